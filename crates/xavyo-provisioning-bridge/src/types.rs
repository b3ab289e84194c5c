//! Shared provisioning types.
//!
//! Request and result payloads are owned by the identity domain and travel as
//! opaque JSON; the types here only carry the fields the bridge itself reads
//! or writes.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Kind of managed entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityKind {
    User,
    Group,
    AnyObject,
}

impl EntityKind {
    /// Channel suffix for this entity kind.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::User => "User",
            EntityKind::Group => "Group",
            EntityKind::AnyObject => "AnyObject",
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for EntityKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace(['_', '-'], "").as_str() {
            "user" => Ok(EntityKind::User),
            "group" => Ok(EntityKind::Group),
            "anyobject" => Ok(EntityKind::AnyObject),
            _ => Err(format!("Unknown entity kind: {s}")),
        }
    }
}

/// Shape of the payload an operation carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadKind {
    /// A full creation request.
    Create,
    /// A patch against an existing entity.
    Update,
    /// The entity key only.
    Key,
    /// A status change.
    Status,
}

/// Provisioning operation kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Create,
    Update,
    UpdateInPull,
    Delete,
    Link,
    Unlink,
    Provision,
    Deprovision,
    Activate,
    Reactivate,
    Suspend,
    InternalSuspend,
    RequestPasswordReset,
    ConfirmPasswordReset,
}

impl OperationKind {
    /// Verb used to build channel names.
    #[must_use]
    pub fn verb(&self) -> &'static str {
        match self {
            OperationKind::Create => "create",
            OperationKind::Update => "update",
            OperationKind::UpdateInPull => "updateInPull",
            OperationKind::Delete => "delete",
            OperationKind::Link => "link",
            OperationKind::Unlink => "unlink",
            OperationKind::Provision => "provision",
            OperationKind::Deprovision => "deprovision",
            OperationKind::Activate => "activate",
            OperationKind::Reactivate => "reactivate",
            OperationKind::Suspend => "suspend",
            OperationKind::InternalSuspend => "internalSuspend",
            OperationKind::RequestPasswordReset => "requestPwdReset",
            OperationKind::ConfirmPasswordReset => "confirmPwdReset",
        }
    }

    /// Payload shape this operation requires.
    #[must_use]
    pub fn payload_kind(&self) -> PayloadKind {
        match self {
            OperationKind::Create => PayloadKind::Create,
            OperationKind::Update
            | OperationKind::UpdateInPull
            | OperationKind::Link
            | OperationKind::Unlink => PayloadKind::Update,
            OperationKind::Activate | OperationKind::Reactivate | OperationKind::Suspend => {
                PayloadKind::Status
            }
            OperationKind::Delete
            | OperationKind::Provision
            | OperationKind::Deprovision
            | OperationKind::InternalSuspend
            | OperationKind::RequestPasswordReset
            | OperationKind::ConfirmPasswordReset => PayloadKind::Key,
        }
    }

    /// Whether only users support this operation.
    #[must_use]
    pub fn is_user_only(&self) -> bool {
        matches!(
            self,
            OperationKind::UpdateInPull
                | OperationKind::Activate
                | OperationKind::Reactivate
                | OperationKind::Suspend
                | OperationKind::InternalSuspend
                | OperationKind::RequestPasswordReset
                | OperationKind::ConfirmPasswordReset
        )
    }

    /// Status transitions share one reply channel.
    #[must_use]
    pub fn is_status_change(&self) -> bool {
        self.payload_kind() == PayloadKind::Status
    }

    /// Metadata header naming the acting identity.
    #[must_use]
    pub fn actor_header(&self) -> &'static str {
        match self {
            OperationKind::Create => "creator",
            OperationKind::Delete | OperationKind::Deprovision => "eraser",
            _ => "updater",
        }
    }
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.verb())
    }
}

/// Outcome of propagating a change to one external resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropagationStatus {
    /// Resource identifier.
    pub resource: String,

    /// Whether propagation succeeded.
    pub success: bool,

    /// Failure reason reported by the resource.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
}

impl PropagationStatus {
    /// Successful propagation to `resource`.
    pub fn success(resource: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            success: true,
            failure_reason: None,
        }
    }

    /// Failed propagation to `resource`.
    pub fn failure(resource: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            success: false,
            failure_reason: Some(reason.into()),
        }
    }
}

/// A result paired with its per-resource propagation outcomes.
pub type Provisioned<T> = (T, Vec<PropagationStatus>);

/// Wire shape of replies carrying a result and propagation outcomes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PropagationReply<T> {
    /// Operation result (key or updated patch).
    pub result: T,

    /// Per-resource outcomes.
    #[serde(default)]
    pub propagation: Vec<PropagationStatus>,
}

impl<T> PropagationReply<T> {
    /// Split into the result and its propagation outcomes.
    pub fn into_pair(self) -> Provisioned<T> {
        (self.result, self.propagation)
    }
}

/// Status of a pull report entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportStatus {
    Success,
    Failure,
    Ignore,
}

/// Report entry produced while pulling one entity from an external system.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisioningReport {
    /// Entity key.
    pub key: String,

    /// Entity display name.
    #[serde(default)]
    pub name: String,

    /// Entity kind.
    pub any_kind: EntityKind,

    /// Operation being reported.
    pub operation: OperationKind,

    /// Outcome.
    pub status: ReportStatus,

    /// Outcome details.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ProvisioningReport {
    /// Create a successful report entry.
    pub fn new(key: impl Into<String>, any_kind: EntityKind, operation: OperationKind) -> Self {
        Self {
            key: key.into(),
            name: String::new(),
            any_kind,
            operation,
            status: ReportStatus::Success,
            message: None,
        }
    }
}

/// Kind of status transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusKind {
    Activate,
    Reactivate,
    Suspend,
}

impl StatusKind {
    /// Operation dispatched for this transition.
    #[must_use]
    pub fn operation(&self) -> OperationKind {
        match self {
            StatusKind::Activate => OperationKind::Activate,
            StatusKind::Reactivate => OperationKind::Reactivate,
            StatusKind::Suspend => OperationKind::Suspend,
        }
    }

    /// Lowercase task name recorded on propagated transitions.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            StatusKind::Activate => "activate",
            StatusKind::Reactivate => "reactivate",
            StatusKind::Suspend => "suspend",
        }
    }
}

/// Where a status change originates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusOrigin {
    /// Requested against the local identity store.
    Internal,
    /// Signalled by an external system.
    External,
}

/// A requested user status change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusChange {
    /// User key.
    pub key: String,

    /// Transition kind.
    pub kind: StatusKind,

    /// Activation token, when the transition requires one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,

    /// Origin of the change.
    pub origin: StatusOrigin,

    /// Resources the change should be propagated to.
    #[serde(default)]
    pub resources: Vec<String>,
}

impl StatusChange {
    /// Create an internally originated status change.
    pub fn new(key: impl Into<String>, kind: StatusKind) -> Self {
        Self {
            key: key.into(),
            kind,
            token: None,
            origin: StatusOrigin::Internal,
            resources: vec![],
        }
    }

    /// Mark the change as signalled by an external system.
    #[must_use]
    pub fn external(mut self) -> Self {
        self.origin = StatusOrigin::External;
        self
    }

    /// Attach an activation token.
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Restrict propagation to the given resources.
    pub fn on_resources<I, S>(mut self, resources: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.resources = resources.into_iter().map(Into::into).collect();
        self
    }
}

/// Operation scheduled on one resource by the workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceOperation {
    Create,
    Update,
    Delete,
}

/// Result of a workflow step, wrapped around status propagation and the pull
/// fallback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowResult<T> {
    /// Step result.
    pub result: T,

    /// Resource operations scheduled by the step.
    #[serde(default)]
    pub prop_by_res: BTreeMap<String, ResourceOperation>,

    /// Workflow tasks performed.
    #[serde(default)]
    pub performed_tasks: Vec<String>,
}

impl<T> WorkflowResult<T> {
    /// Wrap a result with no scheduled propagation and no performed tasks.
    pub fn neutral(result: T) -> Self {
        Self {
            result,
            prop_by_res: BTreeMap::new(),
            performed_tasks: vec![],
        }
    }

    /// Record a performed task.
    pub fn with_task(mut self, task: impl Into<String>) -> Self {
        self.performed_tasks.push(task.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_entity_kind_from_str() {
        assert_eq!("user".parse::<EntityKind>().unwrap(), EntityKind::User);
        assert_eq!("any_object".parse::<EntityKind>().unwrap(), EntityKind::AnyObject);
        assert_eq!("AnyObject".parse::<EntityKind>().unwrap(), EntityKind::AnyObject);
        assert!("realm".parse::<EntityKind>().is_err());
    }

    #[test]
    fn test_payload_kinds() {
        assert_eq!(OperationKind::Create.payload_kind(), PayloadKind::Create);
        assert_eq!(OperationKind::Link.payload_kind(), PayloadKind::Update);
        assert_eq!(OperationKind::Deprovision.payload_kind(), PayloadKind::Key);
        assert_eq!(OperationKind::Suspend.payload_kind(), PayloadKind::Status);
        assert!(OperationKind::Suspend.is_status_change());
        assert!(!OperationKind::InternalSuspend.is_status_change());
    }

    #[test]
    fn test_actor_headers() {
        assert_eq!(OperationKind::Create.actor_header(), "creator");
        assert_eq!(OperationKind::Update.actor_header(), "updater");
        assert_eq!(OperationKind::Delete.actor_header(), "eraser");
    }

    #[test]
    fn test_propagation_reply_into_pair() {
        let reply: PropagationReply<String> = serde_json::from_value(json!({
            "result": "u-1",
            "propagation": [{"resource": "ldap", "success": true}]
        }))
        .unwrap();

        let (key, statuses) = reply.into_pair();
        assert_eq!(key, "u-1");
        assert_eq!(statuses, vec![PropagationStatus::success("ldap")]);
    }

    #[test]
    fn test_neutral_workflow_result_serialization() {
        let result = WorkflowResult::neutral("u-1").with_task("suspend");
        assert_eq!(
            serde_json::to_value(&result).unwrap(),
            json!({"result": "u-1", "prop_by_res": {}, "performed_tasks": ["suspend"]})
        );
    }
}
