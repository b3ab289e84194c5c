//! Single entry point for provisioning requests.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use tracing::{info, instrument};

use crate::bridge::DispatchBridge;
use crate::channel::Channel;
use crate::envelope::Envelope;
use crate::error::{BridgeError, BridgeResult};
use crate::request::{Dispatch, ProvisioningRequest};
use crate::transaction::{DispatchRecord, Transaction, TransactionBoundary, TransactionManager};

/// Resolves provisioning requests and runs each as one bridge call inside its
/// own transaction boundary.
pub struct ProvisioningDispatcher {
    bridge: Arc<DispatchBridge>,
    transactions: Arc<dyn TransactionManager>,
}

impl ProvisioningDispatcher {
    /// Create a dispatcher.
    pub fn new(bridge: Arc<DispatchBridge>, transactions: Arc<dyn TransactionManager>) -> Self {
        Self {
            bridge,
            transactions,
        }
    }

    /// The underlying bridge.
    #[must_use]
    pub fn bridge(&self) -> &Arc<DispatchBridge> {
        &self.bridge
    }

    /// Dispatch a request and return the successful reply envelope.
    #[instrument(
        skip(self, request),
        fields(operation = %request.operation, entity = %request.entity)
    )]
    pub async fn dispatch(&self, request: ProvisioningRequest) -> BridgeResult<Envelope> {
        let operation_name = request.operation_name();
        let mut boundary = self.begin(&operation_name).await?;

        let result = self.call(boundary.transaction(), request).await;
        let envelope = boundary.finish(result).await?;

        info!(operation = %operation_name, "Provisioning request completed");
        Ok(envelope)
    }

    /// Dispatch a request and decode the reply body into `T`.
    ///
    /// Decoding happens inside the transaction boundary, so a reply of the
    /// wrong shape rolls it back.
    #[instrument(
        skip(self, request),
        fields(operation = %request.operation, entity = %request.entity)
    )]
    pub async fn dispatch_for<T: DeserializeOwned>(
        &self,
        request: ProvisioningRequest,
    ) -> BridgeResult<T> {
        let operation_name = request.operation_name();
        let reply = Channel::reply_for(request.operation, request.entity);
        let mut boundary = self.begin(&operation_name).await?;

        let result = match self.call(boundary.transaction(), request).await {
            Ok(envelope) => decode(&reply.name, &envelope),
            Err(e) => Err(e),
        };
        boundary.finish(result).await
    }

    /// Open a new transaction boundary.
    ///
    /// For operations that need more than one exchange with the pipeline.
    pub async fn begin(&self, operation_name: &str) -> BridgeResult<TransactionBoundary> {
        TransactionBoundary::begin(self.transactions.as_ref(), operation_name).await
    }

    async fn call(
        &self,
        tx: &mut dyn Transaction,
        request: ProvisioningRequest,
    ) -> BridgeResult<Envelope> {
        let dispatch = prepare(tx, request).await?;
        self.bridge
            .call(
                &dispatch.input.name,
                &dispatch.reply.name,
                dispatch.body,
                dispatch.metadata,
            )
            .await
    }
}

/// Map `request` to its channels and record it on `tx` before anything is sent.
pub(crate) async fn prepare(
    tx: &mut dyn Transaction,
    request: ProvisioningRequest,
) -> BridgeResult<Dispatch> {
    let operation_name = request.operation_name();
    let actor = request.actor.clone();
    let context = request.context.clone();

    let dispatch = request.into_dispatch()?;
    tx.record(
        DispatchRecord::new(operation_name, &dispatch.input.name, &dispatch.reply.name)
            .by(actor, context),
    )
    .await?;
    Ok(dispatch)
}

/// Decode a reply body received on `channel`.
pub(crate) fn decode<T: DeserializeOwned>(channel: &str, envelope: &Envelope) -> BridgeResult<T> {
    envelope
        .body_as()
        .map_err(|e| BridgeError::unexpected_reply(channel, e.to_string()))
}
