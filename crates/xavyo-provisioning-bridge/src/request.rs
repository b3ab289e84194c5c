//! Tagged provisioning requests.
//!
//! A request names its operation and entity kind and carries a payload whose
//! variant must match the operation. Resolving a request yields the channels,
//! body and metadata of exactly one bridge call.

use std::collections::BTreeSet;

use serde_json::Value;

use crate::channel::{Channel, USER_STATUS_PROPAGATION};
use crate::envelope::Metadata;
use crate::error::{BridgeError, BridgeResult};
use crate::types::{EntityKind, OperationKind, PayloadKind, StatusChange, StatusOrigin, WorkflowResult};

/// Metadata header listing resources to skip.
pub const EXCLUDED_RESOURCES: &str = "excludedResources";
/// Metadata header requesting asynchronous propagation for resources without priority.
pub const NULL_PRIORITY_ASYNC: &str = "nullPriorityAsync";
/// Metadata header carrying the request context.
pub const CONTEXT: &str = "context";
/// Metadata header carrying the status change target key.
pub const STATUS_KEY: &str = "key";
/// Metadata header carrying the status change itself.
pub const STATUS_REQUEST: &str = "statusR";
/// Metadata header carrying the activation token.
pub const TOKEN: &str = "token";

/// Operation payload.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// Full creation request.
    Create(Value),
    /// Patch against an existing entity.
    Update(Value),
    /// Entity key.
    Key(String),
    /// Status change.
    Status(StatusChange),
}

impl Payload {
    /// Shape of this payload.
    #[must_use]
    pub fn kind(&self) -> PayloadKind {
        match self {
            Payload::Create(_) => PayloadKind::Create,
            Payload::Update(_) => PayloadKind::Update,
            Payload::Key(_) => PayloadKind::Key,
            Payload::Status(_) => PayloadKind::Status,
        }
    }
}

/// Cross-cutting arguments supplied with every operation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallContext {
    /// Acting identity.
    pub actor: String,

    /// Free-form request context.
    pub context: String,

    /// Resources to skip during propagation. Empty means all assigned ones.
    pub excluded_resources: BTreeSet<String>,

    /// Propagate asynchronously to resources without priority.
    pub null_priority_async: bool,
}

impl CallContext {
    /// Context with no excluded resources and synchronous propagation.
    pub fn new(actor: impl Into<String>, context: impl Into<String>) -> Self {
        Self {
            actor: actor.into(),
            context: context.into(),
            excluded_resources: BTreeSet::new(),
            null_priority_async: false,
        }
    }

    /// Skip the given resources.
    #[must_use]
    pub fn excluding<I, S>(mut self, resources: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.excluded_resources
            .extend(resources.into_iter().map(Into::into));
        self
    }

    /// Set asynchronous propagation for resources without priority.
    #[must_use]
    pub fn null_priority_async(mut self, enabled: bool) -> Self {
        self.null_priority_async = enabled;
        self
    }
}

/// One provisioning operation to dispatch.
#[derive(Debug, Clone, PartialEq)]
pub struct ProvisioningRequest {
    pub operation: OperationKind,
    pub entity: EntityKind,
    pub payload: Payload,
    pub excluded_resources: BTreeSet<String>,
    pub null_priority_async: bool,
    pub actor: String,
    pub context: String,
    /// Operation-specific metadata.
    pub extra: Metadata,
}

/// Resolved bridge call.
#[derive(Debug, Clone)]
pub struct Dispatch {
    pub input: Channel,
    pub reply: Channel,
    pub body: Value,
    pub metadata: Metadata,
}

impl ProvisioningRequest {
    /// Build a request from a payload and the caller's context.
    pub fn new(
        operation: OperationKind,
        entity: EntityKind,
        payload: Payload,
        ctx: &CallContext,
    ) -> Self {
        Self {
            operation,
            entity,
            payload,
            excluded_resources: ctx.excluded_resources.clone(),
            null_priority_async: ctx.null_priority_async,
            actor: ctx.actor.clone(),
            context: ctx.context.clone(),
            extra: Metadata::new(),
        }
    }

    /// Attach an operation-specific metadata header.
    #[must_use]
    pub fn with_extra(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.extra.insert(key.to_string(), value.into());
        self
    }

    /// Check that the payload matches the operation and entity kind.
    pub fn validate(&self) -> BridgeResult<()> {
        if self.operation.is_user_only() && self.entity != EntityKind::User {
            return Err(BridgeError::invalid_request(format!(
                "{} is only supported for users, not {}",
                self.operation, self.entity
            )));
        }

        let expected = self.operation.payload_kind();
        if self.payload.kind() != expected {
            return Err(BridgeError::invalid_request(format!(
                "{} expects a {:?} payload, got {:?}",
                self.operation,
                expected,
                self.payload.kind()
            )));
        }

        match &self.payload {
            Payload::Key(key) if key.trim().is_empty() => {
                Err(BridgeError::invalid_request("entity key is empty"))
            }
            Payload::Status(change) if change.kind.operation() != self.operation => {
                Err(BridgeError::invalid_request(format!(
                    "{} cannot carry a {} status change",
                    self.operation,
                    change.kind.as_str()
                )))
            }
            Payload::Status(change) if change.key.trim().is_empty() => {
                Err(BridgeError::invalid_request("status change key is empty"))
            }
            _ => Ok(()),
        }
    }

    /// Name used for the transaction boundary and logs, e.g. `createUser`.
    #[must_use]
    pub fn operation_name(&self) -> String {
        format!("{}{}", self.operation.verb(), self.entity)
    }

    /// Validate and resolve into channels, body and metadata.
    pub fn into_dispatch(self) -> BridgeResult<Dispatch> {
        self.validate()?;

        let mut input = Channel::input_for(self.operation, self.entity);
        let reply = Channel::reply_for(self.operation, self.entity);

        let mut metadata = Metadata::new();
        metadata.insert(
            EXCLUDED_RESOURCES.to_string(),
            Value::from(self.excluded_resources.into_iter().collect::<Vec<_>>()),
        );
        metadata.insert(
            NULL_PRIORITY_ASYNC.to_string(),
            Value::Bool(self.null_priority_async),
        );
        metadata.insert(
            self.operation.actor_header().to_string(),
            Value::String(self.actor),
        );
        metadata.insert(CONTEXT.to_string(), Value::String(self.context));

        let body = match self.payload {
            Payload::Create(value) | Payload::Update(value) => value,
            Payload::Key(key) => Value::String(key),
            Payload::Status(change) => {
                metadata.insert(STATUS_KEY.to_string(), Value::String(change.key.clone()));
                metadata.insert(STATUS_REQUEST.to_string(), serde_json::to_value(&change)?);
                if let Some(token) = &change.token {
                    metadata.insert(TOKEN.to_string(), Value::String(token.clone()));
                }

                match change.origin {
                    StatusOrigin::Internal => Value::String(change.key),
                    StatusOrigin::External => {
                        input = Channel::send(USER_STATUS_PROPAGATION);
                        serde_json::to_value(
                            WorkflowResult::neutral(change.key).with_task(change.kind.as_str()),
                        )?
                    }
                }
            }
        };

        metadata.extend(self.extra);

        Ok(Dispatch {
            input,
            reply,
            body,
            metadata,
        })
    }
}
