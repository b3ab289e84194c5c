//! Entity provisioning managers.
//!
//! The group and any-object managers expose the common catalog; the user
//! manager adds status, password and pull operations. Each public operation
//! is one dispatch inside its own transaction boundary.

mod any_object;
mod group;
mod user;

pub use any_object::AnyObjectProvisioningManager;
pub use group::GroupProvisioningManager;
pub use user::{UserCreateOptions, UserProvisioningManager};

use std::sync::Arc;

use serde_json::Value;

use crate::bridge::DispatchBridge;
use crate::channel::Channel;
use crate::config::BridgeConfig;
use crate::dispatcher::ProvisioningDispatcher;
use crate::engine::EngineFactory;
use crate::error::{BridgeError, BridgeResult};
use crate::holder::PipelineEngineHolder;
use crate::request::{CallContext, Payload, ProvisioningRequest};
use crate::routes::RouteStore;
use crate::transaction::TransactionManager;
use crate::types::{EntityKind, OperationKind, PropagationReply, PropagationStatus, Provisioned};

/// Metadata header listing the resources to (de)provision.
pub const RESOURCES: &str = "resources";

/// Operations shared by every entity kind.
#[derive(Clone)]
pub(crate) struct EntityProvisioner {
    entity: EntityKind,
    dispatcher: Arc<ProvisioningDispatcher>,
}

impl EntityProvisioner {
    pub(crate) fn new(entity: EntityKind, dispatcher: Arc<ProvisioningDispatcher>) -> Self {
        Self { entity, dispatcher }
    }

    pub(crate) fn dispatcher(&self) -> &Arc<ProvisioningDispatcher> {
        &self.dispatcher
    }

    pub(crate) fn request(
        &self,
        operation: OperationKind,
        payload: Payload,
        ctx: &CallContext,
    ) -> ProvisioningRequest {
        ProvisioningRequest::new(operation, self.entity, payload, ctx)
    }

    pub(crate) async fn create(
        &self,
        request: ProvisioningRequest,
    ) -> BridgeResult<Provisioned<String>> {
        let reply: PropagationReply<String> = self.dispatcher.dispatch_for(request).await?;
        Ok(reply.into_pair())
    }

    pub(crate) async fn update(
        &self,
        request: ProvisioningRequest,
    ) -> BridgeResult<Provisioned<Value>> {
        let reply: PropagationReply<Value> = self.dispatcher.dispatch_for(request).await?;
        Ok(reply.into_pair())
    }

    pub(crate) async fn delete(
        &self,
        key: &str,
        ctx: &CallContext,
    ) -> BridgeResult<Vec<PropagationStatus>> {
        let request = self.request(OperationKind::Delete, Payload::Key(key.to_string()), ctx);
        self.dispatcher.dispatch_for(request).await
    }

    /// Link and unlink reply with the updated patch; only its key is returned.
    pub(crate) async fn relink(
        &self,
        operation: OperationKind,
        patch: Value,
        ctx: &CallContext,
    ) -> BridgeResult<String> {
        let request = self.request(operation, Payload::Update(patch), ctx);
        let reply: Value = self.dispatcher.dispatch_for(request).await?;

        reply
            .get("key")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| {
                BridgeError::unexpected_reply(
                    Channel::reply_for(operation, self.entity).name,
                    "reply patch carries no key",
                )
            })
    }

    pub(crate) async fn provision(
        &self,
        request: ProvisioningRequest,
        resources: &[String],
    ) -> BridgeResult<Vec<PropagationStatus>> {
        let request = request.with_extra(RESOURCES, resources.to_vec());
        self.dispatcher.dispatch_for(request).await
    }

    pub(crate) async fn deprovision(
        &self,
        key: &str,
        resources: &[String],
        ctx: &CallContext,
    ) -> BridgeResult<Vec<PropagationStatus>> {
        let request = self
            .request(OperationKind::Deprovision, Payload::Key(key.to_string()), ctx)
            .with_extra(RESOURCES, resources.to_vec());
        self.dispatcher.dispatch_for(request).await
    }
}

/// Fully wired provisioning stack: engine holder, bridge, dispatcher and the
/// three entity managers sharing them.
pub struct ProvisioningManagers {
    holder: Arc<PipelineEngineHolder>,
    dispatcher: Arc<ProvisioningDispatcher>,
    users: UserProvisioningManager,
    groups: GroupProvisioningManager,
    any_objects: AnyObjectProvisioningManager,
}

impl ProvisioningManagers {
    /// Wire the stack. The engine is not constructed until the first call.
    pub fn new(
        factory: Arc<dyn EngineFactory>,
        routes: Arc<dyn RouteStore>,
        transactions: Arc<dyn TransactionManager>,
        config: BridgeConfig,
    ) -> Self {
        let holder = Arc::new(PipelineEngineHolder::new(factory, routes));
        let bridge = Arc::new(DispatchBridge::new(holder.clone(), config));
        let dispatcher = Arc::new(ProvisioningDispatcher::new(bridge, transactions));

        Self {
            users: UserProvisioningManager::new(dispatcher.clone()),
            groups: GroupProvisioningManager::new(dispatcher.clone()),
            any_objects: AnyObjectProvisioningManager::new(dispatcher.clone()),
            holder,
            dispatcher,
        }
    }

    /// The engine holder, for route administration.
    #[must_use]
    pub fn holder(&self) -> &Arc<PipelineEngineHolder> {
        &self.holder
    }

    /// The shared dispatcher.
    #[must_use]
    pub fn dispatcher(&self) -> &Arc<ProvisioningDispatcher> {
        &self.dispatcher
    }

    #[must_use]
    pub fn users(&self) -> &UserProvisioningManager {
        &self.users
    }

    #[must_use]
    pub fn groups(&self) -> &GroupProvisioningManager {
        &self.groups
    }

    #[must_use]
    pub fn any_objects(&self) -> &AnyObjectProvisioningManager {
        &self.any_objects
    }
}
