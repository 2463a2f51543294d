//! Reconciliation error taxonomy
//!
//! Typed errors for event reconciliation and lifecycle dispatch, with a
//! [`Disposition`] classification the transport uses to decide between
//! dropping, redelivering, or surfacing an event.

use thiserror::Error;

use crate::ids::{AccountId, EnvTypeId, EnvironmentId, InstanceId};
use crate::status::{EnvStatus, LifecycleVerb};

/// Errors produced while reconciling events or dispatching lifecycle verbs.
#[derive(Debug, Clone, Error)]
pub enum ReconcileError {
    /// No environment record maps to the event's instance id. The instance
    /// likely belongs to an environment outside this system's ownership.
    #[error("no environment maps to instance '{instance_id}'")]
    UnknownInstance { instance_id: InstanceId },

    /// No environment record exists for the requested id.
    #[error("no environment record '{environment_id}'")]
    UnknownEnvironment { environment_id: EnvironmentId },

    /// No backend is registered for the environment type.
    #[error("no backend registered for environment type '{env_type}'")]
    UnknownEnvironmentType { env_type: EnvTypeId },

    /// The raw backend status string has no canonical mapping. The mapping
    /// table may lag a backend release, so this is retryable.
    #[error("unrecognized backend status '{raw_status}' for environment type '{env_type}'")]
    UnrecognizedStatus { env_type: EnvTypeId, raw_status: String },

    /// The requested transition is not in the canonical table. Indicates a
    /// backend/engine disagreement, not a transient fault.
    #[error("illegal transition {from} -> {to} for environment '{environment_id}'")]
    IllegalTransition {
        environment_id: EnvironmentId,
        from: EnvStatus,
        to: EnvStatus,
    },

    /// Conditional writes kept losing to concurrent writers for the same
    /// environment. The event should be redelivered by the transport.
    #[error("conditional write for environment '{environment_id}' lost after {attempts} attempts")]
    ConcurrencyConflict {
        environment_id: EnvironmentId,
        attempts: u32,
    },

    /// The hosting account's trust role could not be exchanged for
    /// credentials. The owning account should be marked unhealthy rather
    /// than retried indefinitely.
    #[error("credential exchange failed for account '{account_id}': {reason}")]
    CredentialExchangeFailed { account_id: AccountId, reason: String },

    /// A lifecycle request was gated on a hosting account that is not
    /// active.
    #[error("account '{account_id}' is '{status}', not active")]
    AccountNotActive { account_id: AccountId, status: String },

    /// A verb or connection request needs a backend instance, but the
    /// environment has none bound (it was never launched, or its launch
    /// failed before an instance was assigned).
    #[error("environment '{environment_id}' has no bound backend instance")]
    NoBoundInstance { environment_id: EnvironmentId },

    /// Connection credentials were requested for an environment that is not
    /// in a connectable state.
    #[error("environment '{environment_id}' is {status}, not connectable")]
    NotConnectable {
        environment_id: EnvironmentId,
        status: EnvStatus,
    },

    /// The backend rejected a verb at submission time. Completion failures
    /// arrive later as `*_FAILED` status events instead.
    #[error("backend rejected {verb} for environment '{environment_id}': {message}")]
    VerbDispatchFailed {
        verb: LifecycleVerb,
        environment_id: EnvironmentId,
        message: String,
    },

    /// The backend failed to mint connection credentials for a running
    /// environment.
    #[error("connection to environment '{environment_id}' failed: {message}")]
    ConnectionFailed {
        environment_id: EnvironmentId,
        message: String,
    },

    /// Record store failure (connection, query). Transient from the
    /// engine's perspective.
    #[error("record store failure: {message}")]
    Store { message: String },
}

/// What the transport should do with an event whose reconciliation failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum Disposition {
    /// Ack and discard; expected for events outside our ownership.
    Drop,
    /// Redeliver later with backoff.
    Retry,
    /// Ack, but surface for operator inspection; structural condition.
    Surface,
    /// Reject to the caller; a precondition was not met.
    Reject,
    /// Mark the owning account unhealthy instead of retrying.
    MarkAccountUnhealthy,
}

impl ReconcileError {
    /// Classify this error for the transport layer.
    pub fn disposition(&self) -> Disposition {
        match self {
            Self::UnknownInstance { .. } => Disposition::Drop,
            Self::UnrecognizedStatus { .. }
            | Self::ConcurrencyConflict { .. }
            | Self::Store { .. }
            | Self::VerbDispatchFailed { .. }
            | Self::ConnectionFailed { .. } => Disposition::Retry,
            Self::IllegalTransition { .. } | Self::UnknownEnvironmentType { .. } => {
                Disposition::Surface
            }
            Self::CredentialExchangeFailed { .. } => Disposition::MarkAccountUnhealthy,
            Self::UnknownEnvironment { .. }
            | Self::AccountNotActive { .. }
            | Self::NoBoundInstance { .. }
            | Self::NotConnectable { .. } => Disposition::Reject,
        }
    }

    /// Check if the transport should redeliver the triggering event.
    pub fn is_retryable(&self) -> bool {
        self.disposition() == Disposition::Retry
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env_id() -> EnvironmentId {
        EnvironmentId::new("env-1")
    }

    #[test]
    fn unknown_instance_is_dropped() {
        let err = ReconcileError::UnknownInstance {
            instance_id: InstanceId::new("i-foreign"),
        };
        assert_eq!(err.disposition(), Disposition::Drop);
        assert!(!err.is_retryable());
    }

    #[test]
    fn mapping_gaps_and_conflicts_are_retryable() {
        let unmapped = ReconcileError::UnrecognizedStatus {
            env_type: EnvTypeId::new("notebook"),
            raw_status: "Updating".to_string(),
        };
        let conflict = ReconcileError::ConcurrencyConflict {
            environment_id: env_id(),
            attempts: 3,
        };
        assert!(unmapped.is_retryable());
        assert!(conflict.is_retryable());
    }

    #[test]
    fn illegal_transition_is_surfaced_not_retried() {
        let err = ReconcileError::IllegalTransition {
            environment_id: env_id(),
            from: EnvStatus::Terminated,
            to: EnvStatus::Starting,
        };
        assert_eq!(err.disposition(), Disposition::Surface);
        assert!(!err.is_retryable());
    }

    #[test]
    fn credential_failure_marks_account_unhealthy() {
        let err = ReconcileError::CredentialExchangeFailed {
            account_id: AccountId::new("123456789012"),
            reason: "AccessDenied".to_string(),
        };
        assert_eq!(err.disposition(), Disposition::MarkAccountUnhealthy);
    }

    #[test]
    fn gating_errors_reject() {
        let err = ReconcileError::AccountNotActive {
            account_id: AccountId::new("123456789012"),
            status: "pending".to_string(),
        };
        assert_eq!(err.disposition(), Disposition::Reject);
    }

    #[test]
    fn messages_name_the_offending_ids() {
        let err = ReconcileError::IllegalTransition {
            environment_id: env_id(),
            from: EnvStatus::Terminated,
            to: EnvStatus::Starting,
        };
        let msg = err.to_string();
        assert!(msg.contains("env-1"));
        assert!(msg.contains("terminated"));
        assert!(msg.contains("starting"));
    }
}
