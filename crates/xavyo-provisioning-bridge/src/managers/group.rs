use std::sync::Arc;

use serde_json::Value;
use tracing::instrument;

use super::EntityProvisioner;
use crate::dispatcher::ProvisioningDispatcher;
use crate::error::BridgeResult;
use crate::request::{CallContext, Payload};
use crate::types::{EntityKind, OperationKind, PropagationStatus, Provisioned};

/// Provisioning operations on groups.
#[derive(Clone)]
pub struct GroupProvisioningManager {
    inner: EntityProvisioner,
}

impl GroupProvisioningManager {
    pub fn new(dispatcher: Arc<ProvisioningDispatcher>) -> Self {
        Self {
            inner: EntityProvisioner::new(EntityKind::Group, dispatcher),
        }
    }

    /// Create a group. Returns its key and propagation outcomes.
    #[instrument(skip(self, group, ctx))]
    pub async fn create(&self, group: Value, ctx: &CallContext) -> BridgeResult<Provisioned<String>> {
        let request = self
            .inner
            .request(OperationKind::Create, Payload::Create(group), ctx);
        self.inner.create(request).await
    }

    /// Apply a patch. Returns the updated patch and propagation outcomes.
    #[instrument(skip(self, patch, ctx))]
    pub async fn update(&self, patch: Value, ctx: &CallContext) -> BridgeResult<Provisioned<Value>> {
        let request = self
            .inner
            .request(OperationKind::Update, Payload::Update(patch), ctx);
        self.inner.update(request).await
    }

    #[instrument(skip(self, ctx))]
    pub async fn delete(&self, key: &str, ctx: &CallContext) -> BridgeResult<Vec<PropagationStatus>> {
        self.inner.delete(key, ctx).await
    }

    /// Assign resources without provisioning them.
    #[instrument(skip(self, patch, ctx))]
    pub async fn link(&self, patch: Value, ctx: &CallContext) -> BridgeResult<String> {
        self.inner.relink(OperationKind::Link, patch, ctx).await
    }

    /// Drop resource assignments without deprovisioning.
    #[instrument(skip(self, patch, ctx))]
    pub async fn unlink(&self, patch: Value, ctx: &CallContext) -> BridgeResult<String> {
        self.inner.relink(OperationKind::Unlink, patch, ctx).await
    }

    #[instrument(skip(self, ctx))]
    pub async fn provision(
        &self,
        key: &str,
        resources: &[String],
        ctx: &CallContext,
    ) -> BridgeResult<Vec<PropagationStatus>> {
        let request = self
            .inner
            .request(OperationKind::Provision, Payload::Key(key.to_string()), ctx);
        self.inner.provision(request, resources).await
    }

    #[instrument(skip(self, ctx))]
    pub async fn deprovision(
        &self,
        key: &str,
        resources: &[String],
        ctx: &CallContext,
    ) -> BridgeResult<Vec<PropagationStatus>> {
        self.inner.deprovision(key, resources, ctx).await
    }
}
