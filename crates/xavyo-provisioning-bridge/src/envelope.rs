//! Envelope exchanged with the pipeline.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::PipelineFailure;

/// Ordered metadata carried next to an envelope body.
pub type Metadata = serde_json::Map<String, Value>;

/// Metadata header correlating a reply with its request.
pub const CORRELATION_ID: &str = "correlationId";

/// Message unit sent to and received from the pipeline.
///
/// Replies copy the request metadata, including the correlation header,
/// so a caller can match a reply to the request it sent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    /// Unique identifier for this envelope instance.
    pub id: Uuid,

    /// Opaque payload.
    pub body: Value,

    /// Metadata headers.
    #[serde(default)]
    pub metadata: Metadata,

    /// Failure captured while the pipeline processed the request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub captured_failure: Option<PipelineFailure>,

    /// When the envelope was created.
    pub created_at: DateTime<Utc>,
}

impl Envelope {
    /// Create an envelope with an empty metadata map.
    pub fn new(body: Value) -> Self {
        Self::with_metadata(body, Metadata::new())
    }

    /// Create an envelope with the given metadata.
    pub fn with_metadata(body: Value, metadata: Metadata) -> Self {
        Self {
            id: Uuid::new_v4(),
            body,
            metadata,
            captured_failure: None,
            created_at: Utc::now(),
        }
    }

    /// Create a request envelope stamped with a fresh correlation id.
    pub fn request(body: Value, metadata: Metadata) -> Self {
        let mut envelope = Self::with_metadata(body, metadata);
        envelope.set_correlation_id(Uuid::new_v4());
        envelope
    }

    /// Create the successful reply to `request`.
    pub fn reply_to(request: &Envelope, body: Value) -> Self {
        Self::with_metadata(body, request.metadata.clone())
    }

    /// Create a reply to `request` carrying a captured failure.
    pub fn failure_for(request: &Envelope, failure: PipelineFailure) -> Self {
        let mut reply = Self::with_metadata(Value::Null, request.metadata.clone());
        reply.captured_failure = Some(failure);
        reply
    }

    /// The correlation id header, if present and well formed.
    #[must_use]
    pub fn correlation_id(&self) -> Option<Uuid> {
        self.metadata
            .get(CORRELATION_ID)
            .and_then(Value::as_str)
            .and_then(|raw| Uuid::parse_str(raw).ok())
    }

    /// Set the correlation id header.
    pub fn set_correlation_id(&mut self, correlation_id: Uuid) {
        self.metadata.insert(
            CORRELATION_ID.to_string(),
            Value::String(correlation_id.to_string()),
        );
    }

    /// Get a metadata header.
    #[must_use]
    pub fn header(&self, key: &str) -> Option<&Value> {
        self.metadata.get(key)
    }

    /// Check whether the pipeline captured a failure.
    #[must_use]
    pub fn has_failure(&self) -> bool {
        self.captured_failure.is_some()
    }

    /// Split the envelope into itself or its captured failure.
    ///
    /// A captured failure always wins over the body.
    pub fn into_result(self) -> Result<Envelope, PipelineFailure> {
        match self.captured_failure {
            Some(failure) => Err(failure),
            None => Ok(self),
        }
    }

    /// Deserialize the body into a typed value.
    pub fn body_as<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        T::deserialize(&self.body)
    }
}
