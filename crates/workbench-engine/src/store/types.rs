//! Record types

use chrono::{DateTime, Utc};
use workbench_common::ids::{AccountId, EnvTypeId, EnvironmentId, InstanceId, ProjectId};
use workbench_common::services::DelegatedRole;
use workbench_common::status::EnvStatus;

/// Hosting-account onboarding status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::EnumString, strum::AsRefStr)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum AccountStatus {
    /// Delegated role verified assumable.
    Active,
    /// Registered, not yet reconciled.
    Pending,
    /// Credential exchange failed; see the failure reason.
    Error,
}

/// A delegated hosting account.
#[derive(Debug, Clone)]
pub struct AccountRecord {
    pub account_id: AccountId,
    /// Cross-account trust role used for credential exchange.
    pub role_arn: String,
    pub external_id: Option<String>,
    pub status: AccountStatus,
    pub failure_reason: Option<String>,
    pub reconciled_at: Option<DateTime<Utc>>,
}

impl AccountRecord {
    /// The credential-exchange input for this account.
    pub fn delegation(&self) -> DelegatedRole {
        DelegatedRole {
            account_id: self.account_id.clone(),
            role_arn: self.role_arn.clone(),
            external_id: self.external_id.clone(),
        }
    }
}

/// A persisted environment record, the only shared mutable resource in the
/// reconciliation hot path.
#[derive(Debug, Clone)]
pub struct EnvironmentRecord {
    pub environment_id: EnvironmentId,
    pub project_id: ProjectId,
    pub env_type: EnvTypeId,
    pub account_id: AccountId,
    pub status: EnvStatus,
    /// Monotonic optimistic-concurrency token; bumped by every conditional
    /// write.
    pub status_version: i64,
    /// Timestamp (epoch millis) of the last applied status event; the
    /// staleness marker.
    pub last_event_at: Option<i64>,
    /// Backend-assigned instance identifier, bound at launch.
    pub instance_id: Option<InstanceId>,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields required to create an environment record.
#[derive(Debug, Clone)]
pub struct NewEnvironment {
    pub environment_id: EnvironmentId,
    pub project_id: ProjectId,
    pub env_type: EnvTypeId,
    pub account_id: AccountId,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn account_status_round_trips_through_strings() {
        for status in [AccountStatus::Active, AccountStatus::Pending, AccountStatus::Error] {
            let s = status.to_string();
            assert_eq!(s.parse::<AccountStatus>().unwrap(), status);
        }
        assert!("bogus".parse::<AccountStatus>().is_err());
    }

    #[test]
    fn delegation_carries_the_trust_role() {
        let account = AccountRecord {
            account_id: AccountId::new("123456789012"),
            role_arn: "arn:aws:iam::123456789012:role/workbench-trust".to_string(),
            external_id: Some("wb-external".to_string()),
            status: AccountStatus::Active,
            failure_reason: None,
            reconciled_at: None,
        };
        let role = account.delegation();
        assert_eq!(role.account_id, account.account_id);
        assert_eq!(role.role_arn, account.role_arn);
        assert_eq!(role.external_id.as_deref(), Some("wb-external"));
    }
}
