//! # Provisioning Dispatch Bridge
//!
//! Synchronous provisioning operations over an asynchronous routing pipeline
//! for xavyo.
//!
//! This crate provides:
//! - Entity managers for users, groups and any objects
//! - Request/reply correlation over named pipeline channels
//! - A cache of long-lived reply receivers, one per reply channel
//! - Transaction isolation around every operation
//! - Pipeline engine lifecycle: lazy start, route load, reload, restore and restart
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────┐     ┌──────────────────┐     ┌──────────────────┐
//! │  Entity Manager  │────►│    Dispatcher    │────►│  Dispatch Bridge │
//! │ (user/group/any) │     │ (tx per request) │     │                  │
//! └──────────────────┘     └──────────────────┘     └────────┬─────────┘
//!                                                            │
//!                          ┌─────────────────────────────────┼──────────────┐
//!                          │ send(direct:<verb><Entity>)     │              │
//!                          ▼                                 ▼              │
//!                 ┌──────────────────┐             ┌──────────────────┐     │
//!                 │ Pipeline Engine  │────────────►│ Channel Registry │     │
//!                 │  (held, lazy)    │   replies   │ (reply receivers)│     │
//!                 └────────▲─────────┘             └────────┬─────────┘     │
//!                          │                                │ correlationId │
//!                 ┌────────┴─────────┐                      └───────────────┘
//!                 │   Route Store    │
//!                 └──────────────────┘
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use xavyo_provisioning_bridge::{
//!     BridgeConfig, CallContext, InMemoryRouteStore, LocalPipelineEngine,
//!     NoopTransactionManager, PipelineEngine, ProvisioningManagers,
//! };
//!
//! let engine: Arc<dyn PipelineEngine> = Arc::new(LocalPipelineEngine::new());
//! let managers = ProvisioningManagers::new(
//!     Arc::new(move || Ok(engine.clone())),
//!     Arc::new(InMemoryRouteStore::new()),
//!     Arc::new(NoopTransactionManager),
//!     BridgeConfig::from_env()?,
//! );
//!
//! let ctx = CallContext::new("admin", "REST");
//! let (key, propagation) = managers
//!     .users()
//!     .create(serde_json::json!({"username": "alice"}), &ctx)
//!     .await?;
//! ```

pub mod bridge;
pub mod channel;
pub mod config;
pub mod dispatcher;
pub mod engine;
pub mod envelope;
pub mod error;
pub mod holder;
pub mod local;
pub mod managers;
pub mod registry;
pub mod request;
pub mod routes;
pub mod transaction;
pub mod types;

// Re-exports for convenience
pub use bridge::DispatchBridge;
pub use channel::{Channel, Direction, STATUS_PORT, USER_IN_PULL, USER_STATUS_PROPAGATION};
pub use config::{BridgeConfig, BridgeConfigBuilder};
pub use dispatcher::ProvisioningDispatcher;
pub use engine::{EngineFactory, PipelineEngine, ReplyEndpoint, RouteDocument};
pub use envelope::{Envelope, Metadata, CORRELATION_ID};
pub use error::{BridgeError, BridgeResult, PipelineError, PipelineFailure, PipelineResult};
pub use holder::{EngineState, PipelineEngineHolder};
pub use local::{LocalPipelineEngine, RouteProcessor, RouteSpec, ENGINE_STOPPED_FAILURE};
pub use managers::{
    AnyObjectProvisioningManager, GroupProvisioningManager, ProvisioningManagers,
    UserCreateOptions, UserProvisioningManager,
};
pub use registry::{ChannelRegistry, PendingReply, ReplyReceiver};
pub use request::{CallContext, Dispatch, Payload, ProvisioningRequest};
pub use routes::{InMemoryRouteStore, Route, RouteStore};
pub use transaction::{
    DispatchRecord, NoopTransactionManager, Transaction, TransactionBoundary, TransactionError,
    TransactionManager,
};
pub use types::{
    EntityKind, OperationKind, PayloadKind, PropagationReply, PropagationStatus, Provisioned,
    ProvisioningReport, ReportStatus, ResourceOperation, StatusChange, StatusKind, StatusOrigin,
    WorkflowResult,
};

#[cfg(feature = "postgres")]
pub use routes::PgRouteStore;
#[cfg(feature = "postgres")]
pub use transaction::PgTransactionManager;
