//! Synchronous request/reply over the asynchronous pipeline.
//!
//! A call registers for its reply before it sends, sends one envelope to the
//! input channel, then waits on the reply channel's receiver for the envelope
//! carrying its own correlation id.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::config::BridgeConfig;
use crate::envelope::{Envelope, Metadata};
use crate::error::{BridgeError, BridgeResult};
use crate::holder::PipelineEngineHolder;
use crate::registry::ChannelRegistry;

/// Turns one pipeline message exchange into a blocking call.
pub struct DispatchBridge {
    holder: Arc<PipelineEngineHolder>,
    registry: ChannelRegistry,
    config: BridgeConfig,
}

impl DispatchBridge {
    /// Create a bridge over the engine owned by `holder`.
    pub fn new(holder: Arc<PipelineEngineHolder>, config: BridgeConfig) -> Self {
        let registry = ChannelRegistry::new(holder.clone(), config.endpoint_capacity);
        Self {
            holder,
            registry,
            config,
        }
    }

    /// The engine holder.
    #[must_use]
    pub fn holder(&self) -> &Arc<PipelineEngineHolder> {
        &self.holder
    }

    /// The reply channel registry.
    #[must_use]
    pub fn registry(&self) -> &ChannelRegistry {
        &self.registry
    }

    /// The bridge configuration.
    #[must_use]
    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Send one envelope and return the matching reply as received.
    ///
    /// A failure captured by the pipeline is left on the returned envelope.
    #[instrument(skip(self, body, metadata))]
    pub async fn send_and_receive(
        &self,
        input: &str,
        reply: &str,
        body: Value,
        metadata: Metadata,
    ) -> BridgeResult<Envelope> {
        let receiver = self.registry.receiver(reply).await?;

        let correlation_id = Uuid::new_v4();
        let mut envelope = Envelope::with_metadata(body, metadata);
        envelope.set_correlation_id(correlation_id);

        let pending = receiver.expect(correlation_id)?;

        let engine = self.holder.engine().await?;
        engine.send(input, envelope).await?;
        debug!(correlation_id = %correlation_id, "Request sent, awaiting reply");

        let reply_envelope = pending.wait(self.config.reply_timeout).await?;
        debug!(
            correlation_id = %correlation_id,
            failed = reply_envelope.has_failure(),
            "Reply received"
        );
        Ok(reply_envelope)
    }

    /// Send one envelope and return the successful reply.
    ///
    /// A failure captured by the pipeline is returned as
    /// [`BridgeError::Failure`] with the pipeline's message untouched.
    pub async fn call(
        &self,
        input: &str,
        reply: &str,
        body: Value,
        metadata: Metadata,
    ) -> BridgeResult<Envelope> {
        let envelope = self.send_and_receive(input, reply, body, metadata).await?;

        envelope.into_result().map_err(|failure| {
            warn!(
                input,
                reply,
                kind = %failure.kind,
                error = %failure,
                "Pipeline reported a failure"
            );
            BridgeError::Failure(failure)
        })
    }

    /// Like [`call`](Self::call), decoding the reply body into `T`.
    pub async fn call_for<T: DeserializeOwned>(
        &self,
        input: &str,
        reply: &str,
        body: Value,
        metadata: Metadata,
    ) -> BridgeResult<T> {
        let envelope = self.call(input, reply, body, metadata).await?;
        envelope
            .body_as()
            .map_err(|e| BridgeError::unexpected_reply(reply, e.to_string()))
    }
}
