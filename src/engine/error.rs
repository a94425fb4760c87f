//! Error taxonomy for the reconciliation engine

use super::synchronizer::{LifecycleState, Operation, StateSet};
use crate::remote::RemoteError;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

/// Coarse classification of a [`SyncError`], for callers deciding policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Remote,
    NotFound,
    UnexpectedState,
    Timeout,
    Cancelled,
    MutuallyExclusive,
    RequiresReplacement,
    InvalidInput,
    Configuration,
}

/// Errors surfaced by the lifecycle driver
#[derive(Debug, Error)]
pub enum SyncError {
    /// Permanent remote failure, or transient failures past the retry ceiling
    #[error(
        "{resource_type} {operation}: remote call failed after {attempts} attempt(s): {source}"
    )]
    Remote {
        resource_type: String,
        operation: Operation,
        attempts: u32,
        #[source]
        source: RemoteError,
    },

    /// The resource is not (or no longer) known to the remote system.
    ///
    /// Raised during create/update when the resource vanishes, and for reads
    /// past the retry ceiling. Whether that is a benign race is the caller's call.
    #[error("{resource_type} {operation}: resource not found after {attempts} attempt(s)")]
    NotFound {
        resource_type: String,
        operation: Operation,
        attempts: u32,
    },

    #[error(
        "{resource_type} {operation}: unexpected lifecycle state {state} \
         (pending {pending}, target {target})"
    )]
    UnexpectedState {
        resource_type: String,
        operation: Operation,
        state: LifecycleState,
        pending: StateSet,
        target: StateSet,
        last_snapshot: Option<Value>,
    },

    #[error(
        "{resource_type} {operation}: timed out after {timeout:?} (last state {})",
        display_state(.last_state)
    )]
    Timeout {
        resource_type: String,
        operation: Operation,
        timeout: Duration,
        last_state: Option<LifecycleState>,
        last_snapshot: Option<Value>,
    },

    #[error(
        "{resource_type} {operation}: cancelled while waiting (last state {})",
        display_state(.last_state)
    )]
    Cancelled {
        resource_type: String,
        operation: Operation,
        last_state: Option<LifecycleState>,
        last_snapshot: Option<Value>,
    },

    #[error(
        "{resource_type} update: attributes {} cannot change in the same request",
        .fields.join(", ")
    )]
    MutuallyExclusive {
        resource_type: String,
        fields: Vec<String>,
    },

    #[error("{resource_type} update: attributes {} cannot change in place", .fields.join(", "))]
    RequiresReplacement {
        resource_type: String,
        fields: Vec<String>,
    },

    #[error("{resource_type} {operation}: required attribute `{attribute}` is not set")]
    MissingAttribute {
        resource_type: String,
        operation: Operation,
        attribute: &'static str,
    },

    #[error("{resource_type} {operation}: resource has no identity")]
    MissingIdentity {
        resource_type: String,
        operation: Operation,
    },

    #[error("{resource_type}: cannot decode remote response: {message}")]
    Codec {
        resource_type: String,
        message: String,
    },

    #[error("states {overlap:?} are both pending and target")]
    InvalidTransition { overlap: Vec<LifecycleState> },

    #[error("unknown resource type: {0}")]
    UnknownResourceType(String),
}

fn display_state(state: &Option<LifecycleState>) -> &str {
    state.as_ref().map_or("unknown", LifecycleState::as_str)
}

impl SyncError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Remote { .. } => ErrorKind::Remote,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::UnexpectedState { .. } => ErrorKind::UnexpectedState,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::Cancelled { .. } => ErrorKind::Cancelled,
            Self::MutuallyExclusive { .. } => ErrorKind::MutuallyExclusive,
            Self::RequiresReplacement { .. } => ErrorKind::RequiresReplacement,
            Self::MissingAttribute { .. } | Self::MissingIdentity { .. } | Self::Codec { .. } => {
                ErrorKind::InvalidInput
            }
            Self::InvalidTransition { .. } | Self::UnknownResourceType(_) => {
                ErrorKind::Configuration
            }
        }
    }

    /// Last snapshot observed before the failure, if the waiter saw one
    pub fn last_snapshot(&self) -> Option<&Value> {
        match self {
            Self::UnexpectedState { last_snapshot, .. }
            | Self::Timeout { last_snapshot, .. }
            | Self::Cancelled { last_snapshot, .. } => last_snapshot.as_ref(),
            _ => None,
        }
    }

    /// Last lifecycle state observed before the failure
    pub fn last_state(&self) -> Option<&LifecycleState> {
        match self {
            Self::UnexpectedState { state, .. } => Some(state),
            Self::Timeout { last_state, .. } | Self::Cancelled { last_state, .. } => {
                last_state.as_ref()
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_message_names_last_state() {
        let err = SyncError::Timeout {
            resource_type: "autonomous-data-warehouse".to_string(),
            operation: Operation::Create,
            timeout: Duration::from_secs(60),
            last_state: Some(LifecycleState::new("PROVISIONING")),
            last_snapshot: None,
        };

        let msg = err.to_string();
        assert!(msg.contains("autonomous-data-warehouse create"));
        assert!(msg.contains("PROVISIONING"));
        assert_eq!(err.kind(), ErrorKind::Timeout);
    }

    #[test]
    fn test_cancelled_is_distinct_from_timeout() {
        let err = SyncError::Cancelled {
            resource_type: "db".to_string(),
            operation: Operation::Delete,
            last_state: None,
            last_snapshot: None,
        };

        assert_eq!(err.kind(), ErrorKind::Cancelled);
        assert!(err.to_string().contains("last state unknown"));
    }

    #[test]
    fn test_mutually_exclusive_lists_fields() {
        let err = SyncError::MutuallyExclusive {
            resource_type: "db".to_string(),
            fields: vec!["admin_password".to_string(), "cpu_core_count".to_string()],
        };

        assert_eq!(
            err.to_string(),
            "db update: attributes admin_password, cpu_core_count cannot change in the same request"
        );
    }
}
