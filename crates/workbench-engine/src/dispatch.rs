//! Backend registry and lifecycle dispatch
//!
//! The registry is a capability-indexed map from environment type to a
//! statically-typed backend (lifecycle service, connection service, raw
//! status table), resolved once at startup. The dispatcher routes
//! launch/start/stop/terminate to the registered backend; it never knows how
//! any backend provisions resources, and it never advances canonical status
//! itself — completion arrives later as status events.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use tracing::{debug, info};
use workbench_common::error::ReconcileError;
use workbench_common::ids::{EnvTypeId, EnvironmentId, InstanceId};
use workbench_common::services::{
    BackendError, CredentialBroker, EnvironmentConnectionService, EnvironmentLifecycleService,
    LaunchRequest, SessionCredentials,
};
use workbench_common::status::{LifecycleVerb, RawStatusMap};

use crate::store::{store_err, AccountStatus, EnvironmentRecord, Store};

/// The two service implementations registered for an environment type.
#[derive(Clone)]
pub struct BackendServices {
    pub lifecycle: Arc<dyn EnvironmentLifecycleService>,
    pub connection: Arc<dyn EnvironmentConnectionService>,
}

/// Capability-indexed backend registry, built once at startup.
#[derive(Default)]
pub struct BackendRegistry {
    services: HashMap<EnvTypeId, BackendServices>,
    status_maps: HashMap<EnvTypeId, RawStatusMap>,
}

impl BackendRegistry {
    pub fn builder() -> BackendRegistryBuilder {
        BackendRegistryBuilder::default()
    }

    /// Service implementations for an environment type.
    pub fn services(&self, env_type: &EnvTypeId) -> Option<&BackendServices> {
        self.services.get(env_type)
    }

    /// Raw-status mapping table for an environment type.
    pub fn status_map(&self, env_type: &EnvTypeId) -> Option<&RawStatusMap> {
        self.status_maps.get(env_type)
    }

    /// Registered environment types.
    pub fn env_types(&self) -> impl Iterator<Item = &EnvTypeId> {
        self.status_maps.keys()
    }
}

impl std::fmt::Debug for BackendRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendRegistry")
            .field("env_types", &self.status_maps.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Builder for [`BackendRegistry`].
#[derive(Default)]
pub struct BackendRegistryBuilder {
    registry: BackendRegistry,
}

impl BackendRegistryBuilder {
    /// Register a full backend for an environment type.
    #[must_use]
    pub fn backend(
        mut self,
        env_type: EnvTypeId,
        lifecycle: Arc<dyn EnvironmentLifecycleService>,
        connection: Arc<dyn EnvironmentConnectionService>,
        status_map: RawStatusMap,
    ) -> Self {
        self.registry.services.insert(
            env_type.clone(),
            BackendServices {
                lifecycle,
                connection,
            },
        );
        self.registry.status_maps.insert(env_type, status_map);
        self
    }

    /// Register only a raw-status table for an environment type. Used by
    /// operator tooling that reconciles events without dispatching verbs.
    #[must_use]
    pub fn status_map(mut self, env_type: EnvTypeId, status_map: RawStatusMap) -> Self {
        self.registry.status_maps.insert(env_type, status_map);
        self
    }

    pub fn build(self) -> BackendRegistry {
        self.registry
    }
}

/// Routes lifecycle verbs to the backend registered for an environment's
/// type, brokering hosting-account credentials on the way.
pub struct LifecycleDispatcher {
    store: Store,
    registry: Arc<BackendRegistry>,
    broker: Arc<dyn CredentialBroker>,
}

impl LifecycleDispatcher {
    pub fn new(store: Store, registry: Arc<BackendRegistry>, broker: Arc<dyn CredentialBroker>) -> Self {
        Self {
            store,
            registry,
            broker,
        }
    }

    /// Begin provisioning an environment.
    ///
    /// Gated on the hosting account being active; the environment id doubles
    /// as the launch idempotency token. On acceptance the backend-assigned
    /// instance id is bound to the record so future status events resolve.
    pub async fn launch(
        &self,
        environment_id: &EnvironmentId,
        parameters: BTreeMap<String, String>,
    ) -> Result<InstanceId, ReconcileError> {
        let record = self.load(environment_id).await?;
        let services = self.services_for(&record)?;
        ensure_verb_allowed(&record, LifecycleVerb::Launch)?;
        if record.instance_id.is_some() {
            return Err(ReconcileError::IllegalTransition {
                environment_id: record.environment_id.clone(),
                from: record.status,
                to: LifecycleVerb::Launch.in_progress_status(),
            });
        }

        let credentials = self.account_credentials(&record, LifecycleVerb::Launch).await?;

        let request = LaunchRequest {
            environment_id: record.environment_id.clone(),
            project_id: record.project_id.clone(),
            env_type: record.env_type.clone(),
            parameters,
        };

        info!(
            environment_id = %record.environment_id,
            env_type = %record.env_type,
            account_id = %record.account_id,
            "Dispatching launch"
        );

        let launched = services
            .lifecycle
            .launch(&credentials, &request)
            .await
            .map_err(|e| verb_failed(LifecycleVerb::Launch, &record.environment_id, e))?;

        if !self
            .store
            .assign_instance(&record, &launched.instance_id)
            .await
            .map_err(store_err)?
        {
            // A concurrent writer touched the record between read and bind;
            // redelivery will converge on the same instance via the
            // idempotency token.
            return Err(ReconcileError::ConcurrencyConflict {
                environment_id: record.environment_id.clone(),
                attempts: 1,
            });
        }

        info!(
            environment_id = %record.environment_id,
            instance_id = %launched.instance_id,
            "Backend instance bound"
        );

        Ok(launched.instance_id)
    }

    /// Start a stopped (or start-failed) environment.
    pub async fn start(&self, environment_id: &EnvironmentId) -> Result<(), ReconcileError> {
        self.dispatch(environment_id, LifecycleVerb::Start).await
    }

    /// Stop a started environment.
    pub async fn stop(&self, environment_id: &EnvironmentId) -> Result<(), ReconcileError> {
        self.dispatch(environment_id, LifecycleVerb::Stop).await
    }

    /// Terminate an environment. Accepted from any non-terminal status;
    /// this is also the remediation path out of every failure state.
    pub async fn terminate(&self, environment_id: &EnvironmentId) -> Result<(), ReconcileError> {
        self.dispatch(environment_id, LifecycleVerb::Terminate).await
    }

    async fn dispatch(
        &self,
        environment_id: &EnvironmentId,
        verb: LifecycleVerb,
    ) -> Result<(), ReconcileError> {
        let record = self.load(environment_id).await?;
        let services = self.services_for(&record)?;
        ensure_verb_allowed(&record, verb)?;

        let instance_id = record
            .instance_id
            .clone()
            .ok_or_else(|| ReconcileError::NoBoundInstance {
                environment_id: record.environment_id.clone(),
            })?;

        let credentials = self.account_credentials(&record, verb).await?;

        info!(
            environment_id = %record.environment_id,
            instance_id = %instance_id,
            verb = %verb,
            status = %record.status,
            "Dispatching lifecycle verb"
        );

        let result = match verb {
            LifecycleVerb::Start => services.lifecycle.start(&credentials, &instance_id).await,
            LifecycleVerb::Stop => services.lifecycle.stop(&credentials, &instance_id).await,
            LifecycleVerb::Terminate => {
                services.lifecycle.terminate(&credentials, &instance_id).await
            }
            // Launch goes through `launch`, which needs the full request.
            LifecycleVerb::Launch => unreachable!("launch is dispatched separately"),
        };

        match result {
            Ok(()) => Ok(()),
            Err(BackendError::AlreadyInProgress) => {
                debug!(
                    environment_id = %record.environment_id,
                    verb = %verb,
                    "Verb already in progress; treating as no-op"
                );
                Ok(())
            }
            Err(e) => Err(verb_failed(verb, &record.environment_id, e)),
        }
    }

    async fn load(
        &self,
        environment_id: &EnvironmentId,
    ) -> Result<EnvironmentRecord, ReconcileError> {
        self.store
            .environment(environment_id)
            .await
            .map_err(store_err)?
            .ok_or_else(|| ReconcileError::UnknownEnvironment {
                environment_id: environment_id.clone(),
            })
    }

    fn services_for(&self, record: &EnvironmentRecord) -> Result<&BackendServices, ReconcileError> {
        self.registry
            .services(&record.env_type)
            .ok_or_else(|| ReconcileError::UnknownEnvironmentType {
                env_type: record.env_type.clone(),
            })
    }

    /// Broker short-lived credentials for the record's hosting account.
    /// Launch requires the account to be active; other verbs act on
    /// already-provisioned resources and only need the exchange to succeed.
    async fn account_credentials(
        &self,
        record: &EnvironmentRecord,
        verb: LifecycleVerb,
    ) -> Result<SessionCredentials, ReconcileError> {
        let account = self
            .store
            .account(&record.account_id)
            .await
            .map_err(store_err)?
            .ok_or_else(|| ReconcileError::AccountNotActive {
                account_id: record.account_id.clone(),
                status: "unregistered".to_string(),
            })?;

        if verb == LifecycleVerb::Launch && account.status != AccountStatus::Active {
            return Err(ReconcileError::AccountNotActive {
                account_id: account.account_id.clone(),
                status: account.status.to_string(),
            });
        }

        self.broker.assume(&account.delegation()).await
    }
}

impl std::fmt::Debug for LifecycleDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifecycleDispatcher")
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

/// Check that a verb makes sense from the record's current status.
///
/// Re-issuing the verb whose transition is already in flight is allowed (the
/// backend answers with its already-in-progress signal); terminate is
/// allowed from every non-terminal status, which models cancellation of an
/// in-flight verb as "issue the next verb and let the backend converge".
fn ensure_verb_allowed(
    record: &EnvironmentRecord,
    verb: LifecycleVerb,
) -> Result<(), ReconcileError> {
    let target = verb.in_progress_status();
    let allowed = match verb {
        LifecycleVerb::Terminate => !record.status.is_terminal(),
        _ => record.status == target || record.status.can_transition(target),
    };

    if allowed {
        Ok(())
    } else {
        Err(ReconcileError::IllegalTransition {
            environment_id: record.environment_id.clone(),
            from: record.status,
            to: target,
        })
    }
}

fn verb_failed(
    verb: LifecycleVerb,
    environment_id: &EnvironmentId,
    err: BackendError,
) -> ReconcileError {
    ReconcileError::VerbDispatchFailed {
        verb,
        environment_id: environment_id.clone(),
        message: err.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use workbench_common::ids::{AccountId, ProjectId};
    use workbench_common::status::EnvStatus;

    fn record(status: EnvStatus, instance: Option<&str>) -> EnvironmentRecord {
        EnvironmentRecord {
            environment_id: EnvironmentId::new("env-1"),
            project_id: ProjectId::new("proj-1"),
            env_type: EnvTypeId::new("notebook"),
            account_id: AccountId::new("123456789012"),
            status,
            status_version: 0,
            last_event_at: None,
            instance_id: instance.map(InstanceId::new),
            failure_reason: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn terminate_is_allowed_from_any_non_terminal_status() {
        use strum::IntoEnumIterator;
        for status in EnvStatus::iter() {
            let result = ensure_verb_allowed(&record(status, Some("i-1")), LifecycleVerb::Terminate);
            assert_eq!(result.is_ok(), !status.is_terminal(), "terminate from {status}");
        }
    }

    #[test]
    fn stop_requires_a_stoppable_status() {
        assert!(ensure_verb_allowed(&record(EnvStatus::Started, Some("i-1")), LifecycleVerb::Stop).is_ok());
        // Re-issue during the transition is a no-op path, not an error.
        assert!(ensure_verb_allowed(&record(EnvStatus::Stopping, Some("i-1")), LifecycleVerb::Stop).is_ok());
        assert!(
            ensure_verb_allowed(&record(EnvStatus::Stopped, Some("i-1")), LifecycleVerb::Stop).is_err()
        );
        assert!(
            ensure_verb_allowed(&record(EnvStatus::Pending, None), LifecycleVerb::Stop).is_err()
        );
    }

    #[test]
    fn start_is_allowed_from_stopped_and_failed_starts() {
        assert!(ensure_verb_allowed(&record(EnvStatus::Stopped, Some("i-1")), LifecycleVerb::Start).is_ok());
        assert!(ensure_verb_allowed(
            &record(EnvStatus::StartingFailed, Some("i-1")),
            LifecycleVerb::Start
        )
        .is_ok());
        assert!(ensure_verb_allowed(&record(EnvStatus::Started, Some("i-1")), LifecycleVerb::Start).is_err());
        assert!(
            ensure_verb_allowed(&record(EnvStatus::Terminated, Some("i-1")), LifecycleVerb::Start).is_err()
        );
    }

    #[test]
    fn registry_resolves_by_env_type() {
        let registry = BackendRegistry::builder()
            .status_map(EnvTypeId::new("notebook"), RawStatusMap::canonical())
            .build();

        assert!(registry.status_map(&EnvTypeId::new("notebook")).is_some());
        assert!(registry.status_map(&EnvTypeId::new("cluster")).is_none());
        assert!(registry.services(&EnvTypeId::new("notebook")).is_none());
    }
}
