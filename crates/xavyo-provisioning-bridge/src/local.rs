//! In-process pipeline engine.
//!
//! Routes are JSON documents naming the channel they consume, the reply
//! channel they answer on, and a registered processor:
//!
//! ```json
//! {"from": "direct:createUser", "to": "direct:createPort", "processor": "createUser"}
//! ```
//!
//! Each received envelope is processed on its own task. The processor's result
//! becomes the reply body; a processor error becomes the reply's captured
//! failure. Stopping the engine answers every in-flight request with a
//! failure so no caller is left waiting.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::engine::{PipelineEngine, ReplyEndpoint, RouteDocument};
use crate::envelope::Envelope;
use crate::error::{PipelineError, PipelineFailure, PipelineResult};

/// Failure kind reported to callers whose request was cut short by a stop.
pub const ENGINE_STOPPED_FAILURE: &str = "EngineStopped";

/// Processing step bound to a route.
#[async_trait]
pub trait RouteProcessor: Send + Sync {
    /// Process one request and produce the reply body.
    async fn process(&self, request: &Envelope) -> Result<Value, PipelineFailure>;
}

#[async_trait]
impl<F> RouteProcessor for F
where
    F: Fn(&Envelope) -> Result<Value, PipelineFailure> + Send + Sync,
{
    async fn process(&self, request: &Envelope) -> Result<Value, PipelineFailure> {
        self(request)
    }
}

/// Parsed route definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteSpec {
    /// Channel the route consumes.
    pub from: String,

    /// Channel the route replies on.
    pub to: String,

    /// Registered processor name.
    pub processor: String,
}

impl RouteSpec {
    /// Build a route definition.
    pub fn new(
        from: impl Into<String>,
        to: impl Into<String>,
        processor: impl Into<String>,
    ) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            processor: processor.into(),
        }
    }

    /// Serialize into route content.
    #[must_use]
    pub fn to_content(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

struct InFlight {
    request: Envelope,
    reply_to: String,
    handle: Option<JoinHandle<()>>,
}

/// Pipeline engine running routes inside the current process.
#[derive(Default)]
pub struct LocalPipelineEngine {
    processors: DashMap<String, Arc<dyn RouteProcessor>>,
    routes: DashMap<String, RouteSpec>,
    endpoints: Arc<DashMap<String, mpsc::Sender<Envelope>>>,
    in_flight: Arc<DashMap<Uuid, InFlight>>,
    started: AtomicBool,
    endpoint_opens: AtomicUsize,
    sent: DashMap<String, usize>,
}

impl LocalPipelineEngine {
    /// Create an engine with no processors.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a processor under `name`. Registrations survive restarts.
    pub fn register_processor(&self, name: impl Into<String>, processor: Arc<dyn RouteProcessor>) {
        self.processors.insert(name.into(), processor);
    }

    /// Builder form of [`register_processor`](Self::register_processor).
    #[must_use]
    pub fn with_processor(self, name: impl Into<String>, processor: Arc<dyn RouteProcessor>) -> Self {
        self.register_processor(name, processor);
        self
    }

    /// Number of envelopes accepted on `channel`.
    #[must_use]
    pub fn sent_count(&self, channel: &str) -> usize {
        self.sent.get(channel).map(|count| *count).unwrap_or(0)
    }

    /// Number of reply endpoints opened so far.
    #[must_use]
    pub fn endpoint_opens(&self) -> usize {
        self.endpoint_opens.load(Ordering::SeqCst)
    }

    /// Number of requests currently being processed.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    fn parse(&self, key: &str, content: &str) -> PipelineResult<RouteSpec> {
        let spec: RouteSpec = serde_json::from_str(content)
            .map_err(|e| PipelineError::invalid_definition(key, e.to_string()))?;

        if !self.processors.contains_key(&spec.processor) {
            return Err(PipelineError::registration(
                key,
                format!("unknown processor '{}'", spec.processor),
            ));
        }

        Ok(spec)
    }

    fn route_from(&self, channel: &str) -> Option<RouteSpec> {
        self.routes
            .iter()
            .find(|entry| entry.value().from == channel)
            .map(|entry| entry.value().clone())
    }
}

#[async_trait]
impl PipelineEngine for LocalPipelineEngine {
    async fn start(&self) -> PipelineResult<()> {
        self.started.store(true, Ordering::SeqCst);
        debug!("Local pipeline engine started");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn stop(&self) -> PipelineResult<()> {
        self.started.store(false, Ordering::SeqCst);
        self.routes.clear();

        let ids: Vec<Uuid> = self.in_flight.iter().map(|entry| *entry.key()).collect();
        let mut interrupted = 0usize;

        for id in ids {
            let Some((_, exchange)) = self.in_flight.remove(&id) else {
                continue;
            };
            if let Some(handle) = exchange.handle {
                handle.abort();
            }

            let failure = PipelineFailure::new(
                ENGINE_STOPPED_FAILURE,
                "Pipeline engine stopped while the request was being processed",
            );
            let reply = Envelope::failure_for(&exchange.request, failure);
            let sender = self
                .endpoints
                .get(&exchange.reply_to)
                .map(|entry| entry.value().clone());
            if let Some(sender) = sender {
                if sender.send(reply).await.is_err() {
                    debug!(channel = %exchange.reply_to, "Reply endpoint gone during stop");
                }
            }
            interrupted += 1;
        }

        info!(interrupted, "Local pipeline engine stopped");
        Ok(())
    }

    fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    fn route_count(&self) -> usize {
        self.routes.len()
    }

    fn route_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.routes.iter().map(|e| e.key().clone()).collect();
        keys.sort();
        keys
    }

    fn load_routes(&self, document: &RouteDocument) -> PipelineResult<usize> {
        // Parse everything first so a bad document loads nothing.
        let mut parsed: HashMap<String, RouteSpec> = HashMap::new();
        for route in &document.routes {
            if parsed.contains_key(&route.key) {
                return Err(PipelineError::registration(
                    &route.key,
                    "route key appears more than once in the document",
                ));
            }
            let spec = self.parse(&route.key, &route.content)?;

            let taken = parsed
                .iter()
                .any(|(key, other)| key != &route.key && other.from == spec.from)
                || self
                    .routes
                    .iter()
                    .any(|e| e.key() != &route.key && e.value().from == spec.from);
            if taken {
                return Err(PipelineError::registration(
                    &route.key,
                    format!("channel '{}' already consumed by another route", spec.from),
                ));
            }

            parsed.insert(route.key.clone(), spec);
        }

        let loaded = parsed.len();
        for (key, spec) in parsed {
            debug!(route_key = %key, from = %spec.from, to = %spec.to, "Route registered");
            self.routes.insert(key, spec);
        }
        Ok(loaded)
    }

    fn open_reply_endpoint(&self, channel: &str, capacity: usize) -> PipelineResult<ReplyEndpoint> {
        if let Some(existing) = self.endpoints.get(channel) {
            if !existing.is_closed() {
                return Err(PipelineError::endpoint_unavailable(
                    channel,
                    "endpoint already has a consumer",
                ));
            }
        }

        let (tx, rx) = mpsc::channel(capacity.max(1));
        self.endpoints.insert(channel.to_string(), tx);
        self.endpoint_opens.fetch_add(1, Ordering::SeqCst);
        debug!(channel, capacity, "Reply endpoint opened");
        Ok(rx)
    }

    async fn send(&self, channel: &str, envelope: Envelope) -> PipelineResult<()> {
        if !self.is_started() {
            return Err(PipelineError::EngineStopped);
        }

        let route = self
            .route_from(channel)
            .ok_or_else(|| PipelineError::endpoint_unavailable(channel, "no route consumes it"))?;

        let processor = self
            .processors
            .get(&route.processor)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| {
                PipelineError::endpoint_unavailable(
                    channel,
                    format!("processor '{}' is not registered", route.processor),
                )
            })?;

        *self.sent.entry(channel.to_string()).or_insert(0) += 1;

        let exchange_id = envelope.id;
        self.in_flight.insert(
            exchange_id,
            InFlight {
                request: envelope.clone(),
                reply_to: route.to.clone(),
                handle: None,
            },
        );

        let in_flight = self.in_flight.clone();
        let endpoints = self.endpoints.clone();
        let reply_to = route.to;
        let handle = tokio::spawn(async move {
            let reply = match processor.process(&envelope).await {
                Ok(body) => Envelope::reply_to(&envelope, body),
                Err(failure) => Envelope::failure_for(&envelope, failure),
            };

            // A stop may already have answered this exchange.
            if in_flight.remove(&exchange_id).is_none() {
                return;
            }

            let sender = endpoints.get(&reply_to).map(|entry| entry.value().clone());
            match sender {
                Some(sender) => {
                    if sender.send(reply).await.is_err() {
                        warn!(channel = %reply_to, "Reply endpoint closed, dropping reply");
                    }
                }
                None => warn!(channel = %reply_to, "No reply endpoint open, dropping reply"),
            }
        });

        if let Some(mut exchange) = self.in_flight.get_mut(&exchange_id) {
            exchange.handle = Some(handle);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::Metadata;
    use crate::routes::Route;
    use serde_json::json;

    fn echo() -> Arc<dyn RouteProcessor> {
        Arc::new(|request: &Envelope| -> Result<Value, PipelineFailure> {
            Ok(request.body.clone())
        })
    }

    fn engine() -> LocalPipelineEngine {
        LocalPipelineEngine::new().with_processor("echo", echo())
    }

    fn route(key: &str, from: &str, to: &str) -> Route {
        Route::new(key, RouteSpec::new(from, to, "echo").to_content())
    }

    #[tokio::test]
    async fn test_round_trip() {
        let engine = engine();
        engine.start().await.unwrap();
        engine
            .load_routes(&RouteDocument::single(route(
                "createUser",
                "direct:createUser",
                "direct:createPort",
            )))
            .unwrap();
        let mut endpoint = engine.open_reply_endpoint("direct:createPort", 4).unwrap();

        let request = Envelope::request(json!({"username": "alice"}), Metadata::new());
        engine.send("direct:createUser", request.clone()).await.unwrap();

        let reply = endpoint.recv().await.unwrap();
        assert_eq!(reply.body, json!({"username": "alice"}));
        assert_eq!(reply.correlation_id(), request.correlation_id());
        assert_eq!(engine.sent_count("direct:createUser"), 1);
    }

    #[tokio::test]
    async fn test_invalid_definition_loads_nothing() {
        let engine = engine();
        let document = RouteDocument::combine(vec![
            route("createUser", "direct:createUser", "direct:createPort"),
            Route::new("broken", "{not json"),
        ]);

        let err = engine.load_routes(&document).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidDefinition { ref key, .. } if key == "broken"));
        assert_eq!(engine.route_count(), 0);
    }

    #[tokio::test]
    async fn test_duplicate_key_rejected() {
        let engine = engine();
        let document = RouteDocument::combine(vec![
            route("createUser", "direct:createUser", "direct:createPort"),
            route("createUser", "direct:createUserV2", "direct:createPort"),
        ]);

        let err = engine.load_routes(&document).unwrap_err();
        assert!(matches!(err, PipelineError::Registration { ref key, .. } if key == "createUser"));
        assert_eq!(engine.route_count(), 0);
    }

    #[tokio::test]
    async fn test_failed_replacement_keeps_loaded_route() {
        let engine = engine();
        engine
            .load_routes(&RouteDocument::single(route(
                "createUser",
                "direct:createUser",
                "direct:createPort",
            )))
            .unwrap();

        let err = engine
            .load_routes(&RouteDocument::single(Route::new("createUser", "{not json")))
            .unwrap_err();
        assert!(matches!(err, PipelineError::InvalidDefinition { .. }));
        assert_eq!(engine.route_keys(), vec!["createUser".to_string()]);

        // A valid replacement takes over the key.
        engine
            .load_routes(&RouteDocument::single(route(
                "createUser",
                "direct:createUserV2",
                "direct:createPort",
            )))
            .unwrap();
        assert_eq!(engine.route_count(), 1);
        assert_eq!(
            engine.route_from("direct:createUserV2").map(|spec| spec.to),
            Some("direct:createPort".to_string())
        );
        assert!(engine.route_from("direct:createUser").is_none());
    }

    #[tokio::test]
    async fn test_unknown_processor_rejected() {
        let engine = engine();
        let content = RouteSpec::new("direct:deleteUser", "direct:deletePort", "missing").to_content();
        let err = engine
            .load_routes(&RouteDocument::single(Route::new("deleteUser", content)))
            .unwrap_err();
        assert!(matches!(err, PipelineError::Registration { .. }));
    }

    #[tokio::test]
    async fn test_send_when_stopped() {
        let engine = engine();
        let err = engine
            .send("direct:createUser", Envelope::new(Value::Null))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::EngineStopped));
    }

    #[tokio::test]
    async fn test_second_consumer_rejected() {
        let engine = engine();
        let _endpoint = engine.open_reply_endpoint("direct:createPort", 4).unwrap();
        assert!(engine.open_reply_endpoint("direct:createPort", 4).is_err());
        assert_eq!(engine.endpoint_opens(), 1);
    }

    #[tokio::test]
    async fn test_stop_clears_routes() {
        let engine = engine();
        engine.start().await.unwrap();
        engine
            .load_routes(&RouteDocument::single(route(
                "createUser",
                "direct:createUser",
                "direct:createPort",
            )))
            .unwrap();

        engine.stop().await.unwrap();
        assert_eq!(engine.route_count(), 0);
        assert!(!engine.is_started());
    }
}
