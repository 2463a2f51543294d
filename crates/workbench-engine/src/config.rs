//! Configuration types for the engine
//!
//! Composed of focused sub-configs; defaults come from
//! `workbench_common::defaults`.

use std::path::PathBuf;
use std::time::Duration;

use workbench_common::defaults::{
    DEFAULT_BACKOFF_MAX_MS, DEFAULT_BACKOFF_MIN_MS, DEFAULT_CAS_ATTEMPTS, DEFAULT_REDELIVERY_ATTEMPTS,
    DEFAULT_REGION, DEFAULT_SESSION_DURATION_SECS,
};

/// Record store location.
#[derive(Debug, Clone, Default)]
pub struct StoreConfig {
    /// Explicit database path; the platform data directory is used when
    /// unset.
    pub db_path: Option<PathBuf>,
}

/// AWS settings for the credential broker.
#[derive(Debug, Clone)]
pub struct AwsSettings {
    /// AWS region
    pub region: String,
    /// AWS profile name (overrides default credential resolution)
    pub profile: Option<String>,
    /// Lifetime requested for brokered credentials, in seconds
    pub session_duration_secs: i32,
}

impl Default for AwsSettings {
    fn default() -> Self {
        Self {
            region: DEFAULT_REGION.to_string(),
            profile: None,
            session_duration_secs: DEFAULT_SESSION_DURATION_SECS,
        }
    }
}

/// Reconciliation and redelivery tunables.
#[derive(Debug, Clone)]
pub struct ReconcileTunables {
    /// Conditional-write attempts per event before reporting a concurrency
    /// conflict
    pub cas_attempts: u32,
    /// Redelivery attempts granted to a retryable event
    pub redelivery_attempts: u32,
    /// Minimum redelivery backoff
    pub backoff_min: Duration,
    /// Maximum redelivery backoff
    pub backoff_max: Duration,
}

impl Default for ReconcileTunables {
    fn default() -> Self {
        Self {
            cas_attempts: DEFAULT_CAS_ATTEMPTS,
            redelivery_attempts: DEFAULT_REDELIVERY_ATTEMPTS,
            backoff_min: Duration::from_millis(DEFAULT_BACKOFF_MIN_MS),
            backoff_max: Duration::from_millis(DEFAULT_BACKOFF_MAX_MS),
        }
    }
}

/// Configuration for the reconciliation engine.
#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    pub store: StoreConfig,
    pub aws: AwsSettings,
    pub reconcile: ReconcileTunables,
}
