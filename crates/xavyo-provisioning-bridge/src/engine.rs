//! Pipeline engine contract.
//!
//! The engine runs the routes that actually talk to connected systems. The
//! bridge only sends envelopes to input channels, opens reply endpoints, and
//! manages which route definitions are loaded.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::envelope::Envelope;
use crate::error::PipelineResult;
use crate::routes::Route;

/// Receiving half of a reply endpoint.
pub type ReplyEndpoint = mpsc::Receiver<Envelope>;

/// Routes handed to the engine in a single load.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteDocument {
    /// Route definitions, in load order.
    pub routes: Vec<Route>,
}

impl RouteDocument {
    /// Combine several persisted routes into one document.
    pub fn combine(routes: impl IntoIterator<Item = Route>) -> Self {
        Self {
            routes: routes.into_iter().collect(),
        }
    }

    /// A document holding one route.
    #[must_use]
    pub fn single(route: Route) -> Self {
        Self {
            routes: vec![route],
        }
    }

    /// Number of routes in the document.
    #[must_use]
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Whether the document holds no routes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Keys of the routes in the document.
    #[must_use]
    pub fn keys(&self) -> Vec<&str> {
        self.routes.iter().map(|r| r.key.as_str()).collect()
    }
}

/// A message-routing engine hosting provisioning routes.
#[async_trait]
pub trait PipelineEngine: Send + Sync {
    /// Start accepting messages.
    async fn start(&self) -> PipelineResult<()>;

    /// Stop accepting messages and discard loaded routes.
    async fn stop(&self) -> PipelineResult<()>;

    /// Whether the engine is started.
    fn is_started(&self) -> bool;

    /// Number of loaded routes.
    fn route_count(&self) -> usize;

    /// Keys of the loaded routes.
    fn route_keys(&self) -> Vec<String>;

    /// Parse and register every route of `document`. Returns the number registered.
    ///
    /// A route whose key is already loaded is replaced. The document is
    /// loaded as a whole: on error the loaded routes are left untouched.
    fn load_routes(&self, document: &RouteDocument) -> PipelineResult<usize>;

    /// Open the receiving end of a reply channel.
    fn open_reply_endpoint(&self, channel: &str, capacity: usize) -> PipelineResult<ReplyEndpoint>;

    /// Send an envelope to an input channel.
    async fn send(&self, channel: &str, envelope: Envelope) -> PipelineResult<()>;
}

/// Builds the engine on first use.
pub trait EngineFactory: Send + Sync {
    /// Construct a new, not yet started engine.
    fn create(&self) -> PipelineResult<Arc<dyn PipelineEngine>>;
}

impl<F> EngineFactory for F
where
    F: Fn() -> PipelineResult<Arc<dyn PipelineEngine>> + Send + Sync,
{
    fn create(&self) -> PipelineResult<Arc<dyn PipelineEngine>> {
        self()
    }
}
