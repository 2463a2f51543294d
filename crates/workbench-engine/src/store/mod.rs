//! Durable record store
//!
//! SQLite-backed storage for environment and hosting-account records. The
//! environment row carries a `status_version` counter; every status write is
//! conditioned on the version read beforehand, which is the compare-and-swap
//! primitive the whole reconciliation path relies on.

mod crud;
mod db;
mod types;

pub use db::Store;
pub use types::{AccountRecord, AccountStatus, EnvironmentRecord, NewEnvironment};

use workbench_common::error::ReconcileError;

/// Map a storage failure into the reconciliation taxonomy (retryable).
pub(crate) fn store_err(err: sqlx::Error) -> ReconcileError {
    ReconcileError::Store {
        message: err.to_string(),
    }
}
