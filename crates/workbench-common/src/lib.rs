//! workbench-common - Shared types for the reconciliation engine
//!
//! This crate provides the types shared between the engine and any backend
//! implementation, without AWS SDK or storage dependencies to keep it
//! lightweight.
//!
//! ## Modules
//!
//! - [`defaults`]: Default tunables for reconciliation and redelivery
//! - [`error`]: Reconciliation error taxonomy and transport dispositions
//! - [`event`]: Inbound status events from provisioning backends
//! - [`ids`]: Identifier newtypes
//! - [`services`]: Backend capability contracts (lifecycle, connection)
//! - [`status`]: Canonical environment status model and transition table

pub mod defaults;
pub mod error;
pub mod event;
pub mod ids;
pub mod services;
pub mod status;

// Re-export commonly used types
pub use error::{Disposition, ReconcileError};
pub use event::StatusEvent;
pub use ids::{AccountId, EnvTypeId, EnvironmentId, InstanceId, ProjectId};
pub use services::{
    AuthCredentials, BackendError, ConnectionContext, CredentialBroker, DelegatedRole,
    EnvironmentConnectionService, EnvironmentLifecycleService, LaunchRequest, LaunchedEnvironment,
    SessionCredentials,
};
pub use status::{EnvStatus, LifecycleVerb, RawStatusMap};

/// Get the current timestamp in milliseconds since UNIX epoch.
///
/// Returns 0 if system time is before the epoch (should never happen in practice).
#[inline]
pub fn timestamp_millis() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
