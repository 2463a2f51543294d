//! Engine events emitted for downstream consumers
//!
//! These events are the interface between the reconciliation engine and its
//! consumers (audit, UI refresh). Delivery is best-effort; correctness of the
//! state machine never depends on them.

use tokio::sync::mpsc;
use workbench_common::defaults::DEFAULT_EVENT_BUFFER;
use workbench_common::ids::{AccountId, EnvironmentId};
use workbench_common::status::EnvStatus;

use crate::store::AccountStatus;

/// Event emitted after a successful record mutation.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// An environment's canonical status changed.
    EnvironmentUpdated {
        environment_id: EnvironmentId,
        status: EnvStatus,
    },
    /// An environment reached a terminal status.
    EnvironmentTerminal {
        environment_id: EnvironmentId,
        status: EnvStatus,
    },
    /// An environment entered a failure status.
    EnvironmentFailed {
        environment_id: EnvironmentId,
        status: EnvStatus,
        reason: Option<String>,
    },
    /// A hosting account's onboarding status was reconciled.
    AccountMarked {
        account_id: AccountId,
        status: AccountStatus,
    },
}

/// Create the engine event channel with the default buffer.
pub fn channel() -> (mpsc::Sender<EngineEvent>, mpsc::Receiver<EngineEvent>) {
    mpsc::channel(DEFAULT_EVENT_BUFFER)
}
