//! Channel addressing.
//!
//! Every operation has an input channel `direct:<verb><Entity>`. Users reply on
//! `direct:<verb>Port`, groups and any objects on `direct:<verb><Entity>Port`.
//! Status transitions share `direct:statusPort` whatever their input channel.

use crate::types::{EntityKind, OperationKind};

/// Scheme prefix of in-process channels.
pub const DIRECT_SCHEME: &str = "direct:";

/// Reply channel shared by status transitions.
pub const STATUS_PORT: &str = "direct:statusPort";

/// Input channel for status changes signalled by external systems.
pub const USER_STATUS_PROPAGATION: &str = "direct:userStatusPropagation";

/// Input channel used to pull a user's status after a failed pull update.
pub const USER_IN_PULL: &str = "direct:userInPull";

/// Direction of a channel relative to the bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// The bridge sends requests on it.
    Send,
    /// The bridge receives replies on it.
    Receive,
}

/// A named, directional message endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Channel {
    /// Endpoint name, e.g. `direct:createUser`.
    pub name: String,

    /// Direction.
    pub direction: Direction,
}

impl Channel {
    /// An input channel.
    pub fn send(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            direction: Direction::Send,
        }
    }

    /// A reply channel.
    pub fn receive(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            direction: Direction::Receive,
        }
    }

    /// Input channel of an operation.
    #[must_use]
    pub fn input_for(operation: OperationKind, entity: EntityKind) -> Self {
        Self::send(format!(
            "{DIRECT_SCHEME}{}{}",
            operation.verb(),
            entity.as_str()
        ))
    }

    /// Reply channel of an operation.
    #[must_use]
    pub fn reply_for(operation: OperationKind, entity: EntityKind) -> Self {
        if operation.is_status_change() {
            return Self::receive(STATUS_PORT);
        }

        match entity {
            EntityKind::User => Self::receive(format!("{DIRECT_SCHEME}{}Port", operation.verb())),
            _ => Self::receive(format!(
                "{DIRECT_SCHEME}{}{}Port",
                operation.verb(),
                entity.as_str()
            )),
        }
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_channels() {
        let input = Channel::input_for(OperationKind::Create, EntityKind::User);
        let reply = Channel::reply_for(OperationKind::Create, EntityKind::User);

        assert_eq!(input.name, "direct:createUser");
        assert_eq!(reply.name, "direct:createPort");
        assert_eq!(input.direction, Direction::Send);
        assert_eq!(reply.direction, Direction::Receive);
    }

    #[test]
    fn test_group_and_any_object_channels() {
        assert_eq!(
            Channel::input_for(OperationKind::Deprovision, EntityKind::Group).name,
            "direct:deprovisionGroup"
        );
        assert_eq!(
            Channel::reply_for(OperationKind::Deprovision, EntityKind::Group).name,
            "direct:deprovisionGroupPort"
        );
        assert_eq!(
            Channel::reply_for(OperationKind::Link, EntityKind::AnyObject).name,
            "direct:linkAnyObjectPort"
        );
    }

    #[test]
    fn test_status_changes_share_reply_channel() {
        for operation in [
            OperationKind::Activate,
            OperationKind::Reactivate,
            OperationKind::Suspend,
        ] {
            assert_eq!(
                Channel::reply_for(operation, EntityKind::User).name,
                STATUS_PORT
            );
        }
        assert_eq!(
            Channel::input_for(OperationKind::Suspend, EntityKind::User).name,
            "direct:suspendUser"
        );
    }

    #[test]
    fn test_pull_update_channels() {
        assert_eq!(
            Channel::input_for(OperationKind::UpdateInPull, EntityKind::User).name,
            "direct:updateInPullUser"
        );
        assert_eq!(
            Channel::reply_for(OperationKind::UpdateInPull, EntityKind::User).name,
            "direct:updateInPullPort"
        );
    }
}
