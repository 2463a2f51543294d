//! Shared helpers for engine integration tests

use std::sync::Arc;

use workbench_common::event::StatusEvent;
use workbench_common::ids::{AccountId, EnvTypeId, EnvironmentId, InstanceId, ProjectId};
use workbench_common::status::{EnvStatus, RawStatusMap};
use workbench_engine::dispatch::{BackendRegistry, BackendRegistryBuilder};
use workbench_engine::handlers::{ReconcileOutcome, StatusHandler};
use workbench_engine::store::{EnvironmentRecord, NewEnvironment, Store};
use workbench_test_utils::FakeBackend;

pub const ENV_TYPE: &str = "notebook";
pub const ACCOUNT: &str = "123456789012";
pub const ROLE_ARN: &str = "arn:aws:iam::123456789012:role/workbench-trust";

/// The notebook backend's native status vocabulary.
pub fn notebook_status_map() -> RawStatusMap {
    RawStatusMap::new()
        .map("Provisioning", EnvStatus::Starting)
        .map("InService", EnvStatus::Started)
        .map("Stopping", EnvStatus::Stopping)
        .map("Stopped", EnvStatus::Stopped)
        .map("Deleting", EnvStatus::Terminating)
        .map("Deleted", EnvStatus::Terminated)
        .map("LaunchFailed", EnvStatus::Failed)
        .map("StartFailed", EnvStatus::StartingFailed)
        .map("StopFailed", EnvStatus::StoppingFailed)
        .map("DeleteFailed", EnvStatus::TerminatingFailed)
}

/// Registry with only the canonical status table for the notebook type.
pub fn canonical_registry() -> Arc<BackendRegistry> {
    Arc::new(
        BackendRegistry::builder()
            .status_map(EnvTypeId::new(ENV_TYPE), RawStatusMap::canonical())
            .build(),
    )
}

/// Registry with a full fake backend for the notebook type.
pub fn fake_backend_registry(backend: Arc<FakeBackend>) -> Arc<BackendRegistry> {
    Arc::new(register_fake_backend(BackendRegistry::builder(), backend).build())
}

pub fn register_fake_backend(
    builder: BackendRegistryBuilder,
    backend: Arc<FakeBackend>,
) -> BackendRegistryBuilder {
    builder.backend(
        EnvTypeId::new(ENV_TYPE),
        backend.clone(),
        backend,
        notebook_status_map(),
    )
}

/// Insert an environment with a bound instance id, ready to receive events.
pub async fn seed_environment(store: &Store, environment_id: &str) -> EnvironmentRecord {
    let record = store
        .insert_environment(&NewEnvironment {
            environment_id: EnvironmentId::new(environment_id),
            project_id: ProjectId::new("proj-1"),
            env_type: EnvTypeId::new(ENV_TYPE),
            account_id: AccountId::new(ACCOUNT),
        })
        .await
        .expect("insert environment");

    let instance = instance_for(environment_id);
    assert!(store
        .assign_instance(&record, &instance)
        .await
        .expect("assign instance"));

    store
        .environment(&record.environment_id)
        .await
        .expect("re-read environment")
        .expect("environment exists")
}

pub fn instance_for(environment_id: &str) -> InstanceId {
    InstanceId::new(format!("i-{environment_id}"))
}

/// Drive an environment through a sequence of canonical statuses, one event
/// per status with strictly increasing timestamps starting at `base_ts + 1`.
pub async fn drive(
    handler: &StatusHandler,
    environment_id: &str,
    statuses: &[EnvStatus],
    base_ts: i64,
) {
    let instance = instance_for(environment_id);
    for (i, status) in statuses.iter().enumerate() {
        let event = StatusEvent::new(
            instance.clone(),
            status.to_string(),
            base_ts + 1 + i as i64,
        );
        let outcome = handler.execute(&event).await.expect("drive event applies");
        assert!(
            matches!(outcome, ReconcileOutcome::Applied { .. }),
            "driving to {status} should apply, got {outcome:?}"
        );
    }
}

/// A legal event path from `Pending` to the given status.
pub fn path_to(status: EnvStatus) -> Vec<EnvStatus> {
    use EnvStatus::*;
    match status {
        Pending => vec![],
        Starting => vec![Starting],
        Started => vec![Starting, Started],
        Stopping => vec![Starting, Started, Stopping],
        Stopped => vec![Starting, Started, Stopping, Stopped],
        Terminating => vec![Starting, Started, Terminating],
        Terminated => vec![Starting, Started, Terminating, Terminated],
        Failed => vec![Failed],
        StartingFailed => vec![Starting, StartingFailed],
        StoppingFailed => vec![Starting, Started, Stopping, StoppingFailed],
        TerminatingFailed => vec![Starting, Started, Terminating, TerminatingFailed],
    }
}
