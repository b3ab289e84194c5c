//! Error types for the provisioning bridge.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::transaction::TransactionError;

/// A failure raised inside the pipeline and carried back on a reply envelope.
///
/// The bridge hands it to the caller unchanged, so its `Display` output is the
/// pipeline's own message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("{message}")]
pub struct PipelineFailure {
    /// Failure classification reported by the pipeline (e.g. "InvalidValues").
    pub kind: String,

    /// Failure message.
    pub message: String,
}

impl PipelineFailure {
    /// Create a new captured failure.
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
        }
    }
}

/// Errors raised by the pipeline engine or while managing its routes.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// A route document could not be parsed.
    #[error("Invalid route definition '{key}': {reason}")]
    InvalidDefinition { key: String, reason: String },

    /// A parsed route could not be registered with the engine.
    #[error("Failed to register route '{key}': {reason}")]
    Registration { key: String, reason: String },

    /// The route is not present in the route store.
    #[error("Route not found: {key}")]
    RouteNotFound { key: String },

    /// The route store failed.
    #[error("Route store error: {message}")]
    Store { message: String },

    /// An endpoint could not be resolved or opened.
    #[error("Endpoint {channel} unavailable: {reason}")]
    EndpointUnavailable { channel: String, reason: String },

    /// The engine is not accepting messages.
    #[error("Pipeline engine is stopped")]
    EngineStopped,

    /// The engine could not be constructed.
    #[error("Failed to construct pipeline engine: {reason}")]
    Construction { reason: String },
}

impl PipelineError {
    /// Create an invalid definition error.
    pub fn invalid_definition(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidDefinition {
            key: key.into(),
            reason: reason.into(),
        }
    }

    /// Create a registration error.
    pub fn registration(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Registration {
            key: key.into(),
            reason: reason.into(),
        }
    }

    /// Create a route not found error.
    pub fn route_not_found(key: impl Into<String>) -> Self {
        Self::RouteNotFound { key: key.into() }
    }

    /// Create a route store error.
    pub fn store(message: impl Into<String>) -> Self {
        Self::Store {
            message: message.into(),
        }
    }

    /// Create an endpoint unavailable error.
    pub fn endpoint_unavailable(channel: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::EndpointUnavailable {
            channel: channel.into(),
            reason: reason.into(),
        }
    }
}

#[cfg(feature = "postgres")]
impl From<sqlx::Error> for PipelineError {
    fn from(e: sqlx::Error) -> Self {
        Self::Store {
            message: e.to_string(),
        }
    }
}

/// Errors returned by bridge and manager operations.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// Failure captured by the pipeline, passed through verbatim.
    #[error(transparent)]
    Failure(#[from] PipelineFailure),

    /// Engine or route management error.
    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    /// The reply channel consumer could not be created.
    #[error("Reply channel {channel} unavailable: {reason}")]
    ChannelUnavailable { channel: String, reason: String },

    /// No reply arrived within the configured wait.
    #[error("No reply on {channel} within {timeout:?}")]
    ReplyTimeout { channel: String, timeout: Duration },

    /// The reply endpoint closed while a call was waiting on it.
    #[error("Reply channel {channel} closed before a reply arrived")]
    ReplyChannelClosed { channel: String },

    /// The reply body did not have the expected shape.
    #[error("Unexpected reply on {channel}: {reason}")]
    UnexpectedReply { channel: String, reason: String },

    /// The request does not satisfy the operation's payload contract.
    #[error("Invalid provisioning request: {reason}")]
    InvalidRequest { reason: String },

    /// Transaction boundary error.
    #[error("Transaction error: {0}")]
    Transaction(#[from] TransactionError),

    /// Configuration value is invalid.
    #[error("Configuration invalid for {var}: {reason}")]
    ConfigInvalid { var: String, reason: String },

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl BridgeError {
    /// Create an unexpected reply error.
    pub fn unexpected_reply(channel: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::UnexpectedReply {
            channel: channel.into(),
            reason: reason.into(),
        }
    }

    /// Create an invalid request error.
    pub fn invalid_request(reason: impl Into<String>) -> Self {
        Self::InvalidRequest {
            reason: reason.into(),
        }
    }

    /// Returns true if this error was captured inside the pipeline.
    #[must_use]
    pub fn is_captured_failure(&self) -> bool {
        matches!(self, BridgeError::Failure(_))
    }

    /// The captured pipeline failure, if any.
    #[must_use]
    pub fn captured_failure(&self) -> Option<&PipelineFailure> {
        match self {
            BridgeError::Failure(failure) => Some(failure),
            _ => None,
        }
    }

    /// Returns true if retrying the call later may succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            BridgeError::ReplyTimeout { .. }
                | BridgeError::ReplyChannelClosed { .. }
                | BridgeError::ChannelUnavailable { .. }
                | BridgeError::Pipeline(PipelineError::EngineStopped)
                | BridgeError::Pipeline(PipelineError::Construction { .. })
        )
    }
}

/// Result type for bridge operations.
pub type BridgeResult<T> = Result<T, BridgeError>;

/// Result type for engine and route operations.
pub type PipelineResult<T> = Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_captured_failure_display_is_verbatim() {
        let failure = PipelineFailure::new("InvalidValues", "username is required");
        let err = BridgeError::from(failure.clone());

        assert_eq!(err.to_string(), "username is required");
        assert!(err.is_captured_failure());
        assert_eq!(err.captured_failure(), Some(&failure));
    }

    #[test]
    fn test_is_transient() {
        let timeout = BridgeError::ReplyTimeout {
            channel: "direct:createPort".to_string(),
            timeout: Duration::from_secs(5),
        };
        assert!(timeout.is_transient());
        assert!(BridgeError::Pipeline(PipelineError::EngineStopped).is_transient());
        assert!(BridgeError::Pipeline(PipelineError::Construction {
            reason: "engine unavailable".to_string(),
        })
        .is_transient());

        let invalid = BridgeError::invalid_request("missing payload");
        assert!(!invalid.is_transient());
        assert!(!BridgeError::from(PipelineFailure::new("x", "y")).is_transient());
    }

    #[test]
    fn test_pipeline_error_display() {
        let err = PipelineError::invalid_definition("createUser", "expected value at line 1");
        assert_eq!(
            err.to_string(),
            "Invalid route definition 'createUser': expected value at line 1"
        );

        let err = BridgeError::from(PipelineError::route_not_found("deleteUser"));
        assert_eq!(err.to_string(), "Pipeline error: Route not found: deleteUser");
    }
}
