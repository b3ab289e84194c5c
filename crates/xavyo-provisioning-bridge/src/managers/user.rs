use std::sync::Arc;

use serde_json::Value;
use tracing::{error, info, instrument};

use super::EntityProvisioner;
use crate::channel::USER_IN_PULL;
use crate::dispatcher::{decode, prepare, ProvisioningDispatcher};
use crate::error::BridgeResult;
use crate::request::{CallContext, Payload, TOKEN};
use crate::transaction::DispatchRecord;
use crate::types::{
    EntityKind, OperationKind, PropagationReply, PropagationStatus, Provisioned,
    ProvisioningReport, ReportStatus, StatusChange, WorkflowResult,
};

const STORE_PASSWORD: &str = "storePassword";
const DISABLE_PWD_POLICY_CHECK: &str = "disablePwdPolicyCheck";
const ENABLED: &str = "enabled";
const REMOVE_MEMBERSHIPS: &str = "removeMemberships";
const CHANGE_PWD: &str = "changePwd";
const PASSWORD: &str = "password";
const SUSPEND: &str = "suspend";
const REPORT: &str = "report";

/// Options of a user creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserCreateOptions {
    /// Keep the clear-text password for propagation.
    pub store_password: bool,

    /// Skip password policy evaluation.
    pub disable_pwd_policy_check: bool,

    /// Initial status; `None` lets the workflow decide.
    pub enabled: Option<bool>,
}

impl Default for UserCreateOptions {
    fn default() -> Self {
        Self {
            store_password: true,
            disable_pwd_policy_check: false,
            enabled: None,
        }
    }
}

/// Provisioning operations on users.
#[derive(Clone)]
pub struct UserProvisioningManager {
    inner: EntityProvisioner,
}

impl UserProvisioningManager {
    pub fn new(dispatcher: Arc<ProvisioningDispatcher>) -> Self {
        Self {
            inner: EntityProvisioner::new(EntityKind::User, dispatcher),
        }
    }

    /// Create a user with default options.
    pub async fn create(&self, user: Value, ctx: &CallContext) -> BridgeResult<Provisioned<String>> {
        self.create_with(user, UserCreateOptions::default(), ctx)
            .await
    }

    /// Create a user. Returns the new key and propagation outcomes.
    #[instrument(skip(self, user, ctx))]
    pub async fn create_with(
        &self,
        user: Value,
        options: UserCreateOptions,
        ctx: &CallContext,
    ) -> BridgeResult<Provisioned<String>> {
        let request = self
            .inner
            .request(OperationKind::Create, Payload::Create(user), ctx)
            .with_extra(STORE_PASSWORD, options.store_password)
            .with_extra(DISABLE_PWD_POLICY_CHECK, options.disable_pwd_policy_check)
            .with_extra(ENABLED, options.enabled);
        self.inner.create(request).await
    }

    /// Apply a patch.
    pub async fn update(&self, patch: Value, ctx: &CallContext) -> BridgeResult<Provisioned<Value>> {
        self.update_with(patch, &[], ctx).await
    }

    /// Apply a patch, also dropping memberships of the given groups.
    #[instrument(skip(self, patch, ctx))]
    pub async fn update_with(
        &self,
        patch: Value,
        remove_memberships: &[String],
        ctx: &CallContext,
    ) -> BridgeResult<Provisioned<Value>> {
        let request = self
            .inner
            .request(OperationKind::Update, Payload::Update(patch), ctx)
            .with_extra(REMOVE_MEMBERSHIPS, remove_memberships.to_vec());
        self.inner.update(request).await
    }

    /// Apply a patch received while pulling from an external resource.
    ///
    /// If the pipeline fails the update, the failure is recorded on `report`
    /// and the user's status is pulled anyway; the reply to that second
    /// request is returned.
    #[instrument(skip(self, patch, report, ctx), fields(key = %report.key))]
    pub async fn update_in_pull(
        &self,
        patch: Value,
        report: &mut ProvisioningReport,
        enabled: Option<bool>,
        ctx: &CallContext,
    ) -> BridgeResult<Provisioned<Value>> {
        let request = self
            .inner
            .request(OperationKind::UpdateInPull, Payload::Update(patch.clone()), ctx)
            .with_extra(ENABLED, enabled)
            .with_extra(REPORT, serde_json::to_value(&*report)?);

        let dispatcher = self.inner.dispatcher();
        let bridge = dispatcher.bridge();
        let operation_name = request.operation_name();
        let mut boundary = dispatcher.begin(&operation_name).await?;

        let result: BridgeResult<Provisioned<Value>> = async {
            let tx = boundary.transaction();
            let dispatch = prepare(tx, request).await?;
            let reply_channel = dispatch.reply.name;

            let first = bridge
                .send_and_receive(
                    &dispatch.input.name,
                    &reply_channel,
                    dispatch.body,
                    dispatch.metadata.clone(),
                )
                .await?;

            let envelope = match first.into_result() {
                Ok(envelope) => envelope,
                Err(failure) => {
                    error!(
                        key = %report.key,
                        error = %failure,
                        "Update failed, trying to pull status anyway"
                    );
                    report.status = ReportStatus::Failure;
                    report.message = Some(format!(
                        "{}{}",
                        bridge.config().pull_failure_prefix,
                        failure.message
                    ));

                    tx.record(
                        DispatchRecord::new(&operation_name, USER_IN_PULL, &reply_channel)
                            .by(&ctx.actor, &ctx.context),
                    )
                    .await?;
                    let fallback = serde_json::to_value(WorkflowResult::neutral((patch, false)))?;
                    bridge
                        .call(USER_IN_PULL, &reply_channel, fallback, dispatch.metadata)
                        .await?
                }
            };

            let reply: PropagationReply<Value> = decode(&reply_channel, &envelope)?;
            Ok(reply.into_pair())
        }
        .await;

        boundary.finish(result).await
    }

    #[instrument(skip(self, ctx))]
    pub async fn delete(&self, key: &str, ctx: &CallContext) -> BridgeResult<Vec<PropagationStatus>> {
        self.inner.delete(key, ctx).await
    }

    #[instrument(skip(self, patch, ctx))]
    pub async fn link(&self, patch: Value, ctx: &CallContext) -> BridgeResult<String> {
        self.inner.relink(OperationKind::Link, patch, ctx).await
    }

    #[instrument(skip(self, patch, ctx))]
    pub async fn unlink(&self, patch: Value, ctx: &CallContext) -> BridgeResult<String> {
        self.inner.relink(OperationKind::Unlink, patch, ctx).await
    }

    /// Provision a user onto `resources`, optionally propagating a new password.
    #[instrument(skip(self, password, ctx))]
    pub async fn provision(
        &self,
        key: &str,
        resources: &[String],
        change_pwd: bool,
        password: Option<&str>,
        ctx: &CallContext,
    ) -> BridgeResult<Vec<PropagationStatus>> {
        let mut request = self
            .inner
            .request(OperationKind::Provision, Payload::Key(key.to_string()), ctx)
            .with_extra(CHANGE_PWD, change_pwd);
        if let Some(password) = password {
            request = request.with_extra(PASSWORD, password);
        }
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

    #[instrument(skip(self, change, ctx), fields(key = %change.key))]
    pub async fn activate(
        &self,
        change: StatusChange,
        ctx: &CallContext,
    ) -> BridgeResult<Provisioned<String>> {
        self.change_status(OperationKind::Activate, change, ctx).await
    }

    #[instrument(skip(self, change, ctx), fields(key = %change.key))]
    pub async fn reactivate(
        &self,
        change: StatusChange,
        ctx: &CallContext,
    ) -> BridgeResult<Provisioned<String>> {
        self.change_status(OperationKind::Reactivate, change, ctx).await
    }

    #[instrument(skip(self, change, ctx), fields(key = %change.key))]
    pub async fn suspend(
        &self,
        change: StatusChange,
        ctx: &CallContext,
    ) -> BridgeResult<Provisioned<String>> {
        self.change_status(OperationKind::Suspend, change, ctx).await
    }

    /// Suspend a user in the workflow only, without propagation.
    #[instrument(skip(self, ctx))]
    pub async fn internal_suspend(&self, key: &str, ctx: &CallContext) -> BridgeResult<()> {
        let request = self
            .inner
            .request(OperationKind::InternalSuspend, Payload::Key(key.to_string()), ctx)
            .with_extra(SUSPEND, true);
        self.inner.dispatcher().dispatch(request).await?;
        Ok(())
    }

    #[instrument(skip(self, ctx))]
    pub async fn request_password_reset(&self, key: &str, ctx: &CallContext) -> BridgeResult<()> {
        let request = self.inner.request(
            OperationKind::RequestPasswordReset,
            Payload::Key(key.to_string()),
            ctx,
        );
        self.inner.dispatcher().dispatch(request).await?;
        info!(key, "Password reset requested");
        Ok(())
    }

    #[instrument(skip(self, token, password, ctx))]
    pub async fn confirm_password_reset(
        &self,
        key: &str,
        token: &str,
        password: &str,
        ctx: &CallContext,
    ) -> BridgeResult<()> {
        let request = self
            .inner
            .request(
                OperationKind::ConfirmPasswordReset,
                Payload::Key(key.to_string()),
                ctx,
            )
            .with_extra(TOKEN, token)
            .with_extra(PASSWORD, password);
        self.inner.dispatcher().dispatch(request).await?;
        Ok(())
    }

    async fn change_status(
        &self,
        operation: OperationKind,
        change: StatusChange,
        ctx: &CallContext,
    ) -> BridgeResult<Provisioned<String>> {
        let request = self.inner.request(operation, Payload::Status(change), ctx);
        let reply: PropagationReply<String> = self.inner.dispatcher().dispatch_for(request).await?;
        Ok(reply.into_pair())
    }
}
