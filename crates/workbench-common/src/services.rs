//! Backend capability contracts
//!
//! The two service interfaces every environment-type backend implements, plus
//! the credential broker seam both the account handler and the lifecycle
//! dispatcher use before acting under a hosting account's identity.
//!
//! All verbs follow the synchronous-request / asynchronous-completion
//! pattern: the call returns once the backend has accepted the request, and
//! true completion arrives later as a [`crate::event::StatusEvent`].

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::ReconcileError;
use crate::ids::{AccountId, EnvTypeId, EnvironmentId, InstanceId, ProjectId};

/// Failure a backend reports at verb-submission time.
///
/// `AlreadyInProgress` is the explicit signal for a verb re-issued against a
/// resource that is already transitioning; the dispatcher treats it as a
/// no-op. Completion failures are never reported here; they arrive later as
/// `*_FAILED` status events.
#[derive(Debug, Clone, Error)]
pub enum BackendError {
    #[error("operation already in progress")]
    AlreadyInProgress,
    #[error("{0}")]
    Rejected(String),
    #[error("backend unavailable: {0}")]
    Unavailable(String),
}

/// A hosting account's cross-account trust role, the input to credential
/// exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DelegatedRole {
    pub account_id: AccountId,
    pub role_arn: String,
    /// Optional external-id style secret the trust policy requires.
    pub external_id: Option<String>,
}

/// Short-lived credentials scoped to one hosting account.
#[derive(Clone, Serialize, Deserialize)]
pub struct SessionCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: String,
    pub expires_at: DateTime<Utc>,
}

// Manual Debug so secret material never lands in logs.
impl std::fmt::Debug for SessionCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionCredentials")
            .field("access_key_id", &self.access_key_id)
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}

/// Exchanges a hosting account's trust role for short-lived scoped
/// credentials. Implementations must fail fast with
/// [`ReconcileError::CredentialExchangeFailed`] when the trust relationship
/// is broken; there is no fallback to ambient credentials.
#[async_trait]
pub trait CredentialBroker: Send + Sync {
    async fn assume(&self, role: &DelegatedRole) -> Result<SessionCredentials, ReconcileError>;
}

/// Parameters for launching a new environment.
#[derive(Debug, Clone)]
pub struct LaunchRequest {
    /// Client-supplied idempotency key: the same logical launch submitted
    /// twice must not create two resources.
    pub environment_id: EnvironmentId,
    pub project_id: ProjectId,
    pub env_type: EnvTypeId,
    /// Default parameters from the environment type configuration, opaque to
    /// the engine.
    pub parameters: BTreeMap<String, String>,
}

/// Result of an accepted launch: the backend-assigned instance identifier
/// future status events will carry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchedEnvironment {
    pub instance_id: InstanceId,
}

/// Provisioning verbs an environment-type backend must implement.
///
/// Every call must be safe to invoke on an already-transitioning resource:
/// a no-op or an explicit rejection, never a crash. Verb completion is
/// observed via status events, never via these return values.
#[async_trait]
pub trait EnvironmentLifecycleService: Send + Sync {
    /// Begin asynchronous provisioning. Idempotent under retry with the same
    /// `LaunchRequest::environment_id`.
    async fn launch(
        &self,
        credentials: &SessionCredentials,
        request: &LaunchRequest,
    ) -> Result<LaunchedEnvironment, BackendError>;

    async fn start(
        &self,
        credentials: &SessionCredentials,
        instance_id: &InstanceId,
    ) -> Result<(), BackendError>;

    async fn stop(
        &self,
        credentials: &SessionCredentials,
        instance_id: &InstanceId,
    ) -> Result<(), BackendError>;

    async fn terminate(
        &self,
        credentials: &SessionCredentials,
        instance_id: &InstanceId,
    ) -> Result<(), BackendError>;
}

/// Caller-supplied context for a connection request (requesting user,
/// client address, and similar), opaque to the engine.
#[derive(Debug, Clone, Default)]
pub struct ConnectionContext {
    pub detail: BTreeMap<String, String>,
}

/// Ephemeral access material for a running environment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthCredentials {
    /// Backend-specific key-value material (tokens, URLs, usernames).
    pub material: BTreeMap<String, String>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Access-resolution interface consumed by the UI/API layer.
#[async_trait]
pub trait EnvironmentConnectionService: Send + Sync {
    /// Ephemeral access material for an already-started environment.
    async fn auth_credentials(
        &self,
        instance_id: &InstanceId,
        context: Option<&ConnectionContext>,
    ) -> Result<AuthCredentials, BackendError>;

    /// Static, backend-specific human-readable connection instructions.
    fn connection_instructions(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_credentials_debug_redacts_secrets() {
        let creds = SessionCredentials {
            access_key_id: "AKIAEXAMPLE".to_string(),
            secret_access_key: "super-secret".to_string(),
            session_token: "token-material".to_string(),
            expires_at: Utc::now(),
        };
        let debug = format!("{creds:?}");
        assert!(debug.contains("AKIAEXAMPLE"));
        assert!(!debug.contains("super-secret"));
        assert!(!debug.contains("token-material"));
    }
}
