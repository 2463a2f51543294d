//! Fake lifecycle/connection backend
//!
//! A scripted backend implementing both capability contracts. It records
//! every verb it receives, derives deterministic instance ids from the
//! launch idempotency key (so retried launches converge on one resource),
//! and can be told to reject verbs or report them already in progress.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use workbench_common::ids::InstanceId;
use workbench_common::services::{
    AuthCredentials, BackendError, ConnectionContext, EnvironmentConnectionService,
    EnvironmentLifecycleService, LaunchRequest, LaunchedEnvironment, SessionCredentials,
};
use workbench_common::status::LifecycleVerb;

/// What the fake should do with the next verbs it receives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FakeMode {
    #[default]
    Accept,
    AlreadyInProgress,
    Reject,
}

/// Recording backend double for dispatcher and resolver tests.
#[derive(Debug, Default)]
pub struct FakeBackend {
    mode: Mutex<FakeMode>,
    verbs: Mutex<Vec<(LifecycleVerb, String)>>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_mode(&self, mode: FakeMode) {
        *self.mode.lock().unwrap() = mode;
    }

    /// Verbs received so far, paired with the id they targeted (environment
    /// id for launch, instance id otherwise).
    pub fn verbs(&self) -> Vec<(LifecycleVerb, String)> {
        self.verbs.lock().unwrap().clone()
    }

    /// The instance id a launch of `environment_id` produces.
    pub fn instance_for(environment_id: &str) -> InstanceId {
        InstanceId::new(format!("i-{environment_id}"))
    }

    fn gate(&self) -> Result<(), BackendError> {
        match *self.mode.lock().unwrap() {
            FakeMode::Accept => Ok(()),
            FakeMode::AlreadyInProgress => Err(BackendError::AlreadyInProgress),
            FakeMode::Reject => Err(BackendError::Rejected("rejected by test script".to_string())),
        }
    }

    fn record(&self, verb: LifecycleVerb, target: &str) {
        self.verbs.lock().unwrap().push((verb, target.to_string()));
    }
}

#[async_trait]
impl EnvironmentLifecycleService for FakeBackend {
    async fn launch(
        &self,
        _credentials: &SessionCredentials,
        request: &LaunchRequest,
    ) -> Result<LaunchedEnvironment, BackendError> {
        self.record(LifecycleVerb::Launch, request.environment_id.as_str());
        self.gate()?;
        // Same idempotency key, same instance.
        Ok(LaunchedEnvironment {
            instance_id: Self::instance_for(request.environment_id.as_str()),
        })
    }

    async fn start(
        &self,
        _credentials: &SessionCredentials,
        instance_id: &InstanceId,
    ) -> Result<(), BackendError> {
        self.record(LifecycleVerb::Start, instance_id.as_str());
        self.gate()
    }

    async fn stop(
        &self,
        _credentials: &SessionCredentials,
        instance_id: &InstanceId,
    ) -> Result<(), BackendError> {
        self.record(LifecycleVerb::Stop, instance_id.as_str());
        self.gate()
    }

    async fn terminate(
        &self,
        _credentials: &SessionCredentials,
        instance_id: &InstanceId,
    ) -> Result<(), BackendError> {
        self.record(LifecycleVerb::Terminate, instance_id.as_str());
        self.gate()
    }
}

#[async_trait]
impl EnvironmentConnectionService for FakeBackend {
    async fn auth_credentials(
        &self,
        instance_id: &InstanceId,
        _context: Option<&ConnectionContext>,
    ) -> Result<AuthCredentials, BackendError> {
        self.gate()?;
        let mut material = BTreeMap::new();
        material.insert("url".to_string(), format!("https://{instance_id}.test"));
        material.insert("token".to_string(), "fake-session".to_string());
        Ok(AuthCredentials {
            material,
            expires_at: None,
        })
    }

    fn connection_instructions(&self) -> &str {
        "Open the returned URL and present the token."
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use workbench_common::ids::{EnvTypeId, EnvironmentId, ProjectId};

    fn creds() -> SessionCredentials {
        SessionCredentials {
            access_key_id: "AKIATEST".to_string(),
            secret_access_key: "s".to_string(),
            session_token: "t".to_string(),
            expires_at: Utc::now(),
        }
    }

    fn launch_request(env: &str) -> LaunchRequest {
        LaunchRequest {
            environment_id: EnvironmentId::new(env),
            project_id: ProjectId::new("proj-1"),
            env_type: EnvTypeId::new("notebook"),
            parameters: BTreeMap::new(),
        }
    }

    #[tokio::test]
    async fn launch_is_idempotent_on_the_environment_id() {
        let backend = FakeBackend::new();
        let first = backend.launch(&creds(), &launch_request("env-1")).await.unwrap();
        let second = backend.launch(&creds(), &launch_request("env-1")).await.unwrap();
        assert_eq!(first.instance_id, second.instance_id);
        assert_eq!(backend.verbs().len(), 2);
    }

    #[tokio::test]
    async fn modes_gate_verbs() {
        let backend = FakeBackend::new();
        backend.set_mode(FakeMode::AlreadyInProgress);
        let err = backend
            .terminate(&creds(), &InstanceId::new("i-1"))
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::AlreadyInProgress));

        backend.set_mode(FakeMode::Accept);
        assert!(backend.stop(&creds(), &InstanceId::new("i-1")).await.is_ok());
    }
}
