//! Record operations
//!
//! All environment status mutations go through conditional writes keyed on
//! the `status_version` read beforehand, so at most one writer succeeds per
//! observed version even under concurrent handler invocations.

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use workbench_common::ids::{AccountId, EnvironmentId, InstanceId, ProjectId};
use workbench_common::status::EnvStatus;

use super::db::Store;
use super::types::{AccountRecord, AccountStatus, EnvironmentRecord, NewEnvironment};

fn decode_err(message: String) -> sqlx::Error {
    sqlx::Error::Decode(message.into())
}

fn parse_status(code: &str) -> Result<EnvStatus, sqlx::Error> {
    EnvStatus::from_code(code).ok_or_else(|| decode_err(format!("unknown status code '{code}'")))
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, sqlx::Error> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| decode_err(format!("bad timestamp '{value}': {e}")))
}

fn environment_from_row(row: &SqliteRow) -> Result<EnvironmentRecord, sqlx::Error> {
    let status: String = row.try_get("status")?;
    let created_at: String = row.try_get("created_at")?;
    let updated_at: String = row.try_get("updated_at")?;

    Ok(EnvironmentRecord {
        environment_id: EnvironmentId::new(row.try_get::<String, _>("environment_id")?),
        project_id: ProjectId::new(row.try_get::<String, _>("project_id")?),
        env_type: row.try_get::<String, _>("env_type")?.into(),
        account_id: AccountId::new(row.try_get::<String, _>("account_id")?),
        status: parse_status(&status)?,
        status_version: row.try_get("status_version")?,
        last_event_at: row.try_get("last_event_at")?,
        instance_id: row
            .try_get::<Option<String>, _>("instance_id")?
            .map(InstanceId::new),
        failure_reason: row.try_get("failure_reason")?,
        created_at: parse_timestamp(&created_at)?,
        updated_at: parse_timestamp(&updated_at)?,
    })
}

fn account_from_row(row: &SqliteRow) -> Result<AccountRecord, sqlx::Error> {
    let status: String = row.try_get("status")?;
    let reconciled_at: Option<String> = row.try_get("reconciled_at")?;

    Ok(AccountRecord {
        account_id: AccountId::new(row.try_get::<String, _>("account_id")?),
        role_arn: row.try_get("role_arn")?,
        external_id: row.try_get("external_id")?,
        status: status
            .parse()
            .map_err(|_| decode_err(format!("unknown account status '{status}'")))?,
        failure_reason: row.try_get("failure_reason")?,
        reconciled_at: reconciled_at.as_deref().map(parse_timestamp).transpose()?,
    })
}

impl Store {
    // ── Environments ────────────────────────────────────────────────────

    /// Insert a new environment record in `Pending` status.
    pub async fn insert_environment(
        &self,
        new: &NewEnvironment,
    ) -> Result<EnvironmentRecord, sqlx::Error> {
        let now = Utc::now();
        let now_str = now.to_rfc3339();

        sqlx::query(
            "INSERT INTO environments
             (environment_id, project_id, env_type, account_id, status, status_version,
              created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, 0, ?, ?)",
        )
        .bind(new.environment_id.as_str())
        .bind(new.project_id.as_str())
        .bind(new.env_type.as_str())
        .bind(new.account_id.as_str())
        .bind(EnvStatus::Pending.code())
        .bind(&now_str)
        .bind(&now_str)
        .execute(self.pool())
        .await?;

        Ok(EnvironmentRecord {
            environment_id: new.environment_id.clone(),
            project_id: new.project_id.clone(),
            env_type: new.env_type.clone(),
            account_id: new.account_id.clone(),
            status: EnvStatus::Pending,
            status_version: 0,
            last_event_at: None,
            instance_id: None,
            failure_reason: None,
            created_at: now,
            updated_at: now,
        })
    }

    /// Point read by environment id.
    pub async fn environment(
        &self,
        environment_id: &EnvironmentId,
    ) -> Result<Option<EnvironmentRecord>, sqlx::Error> {
        sqlx::query("SELECT * FROM environments WHERE environment_id = ?")
            .bind(environment_id.as_str())
            .fetch_optional(self.pool())
            .await?
            .as_ref()
            .map(environment_from_row)
            .transpose()
    }

    /// Resolve the environment a backend instance belongs to.
    pub async fn environment_by_instance(
        &self,
        instance_id: &InstanceId,
    ) -> Result<Option<EnvironmentRecord>, sqlx::Error> {
        sqlx::query("SELECT * FROM environments WHERE instance_id = ?")
            .bind(instance_id.as_str())
            .fetch_optional(self.pool())
            .await?
            .as_ref()
            .map(environment_from_row)
            .transpose()
    }

    /// List environments, optionally filtered by owning project.
    pub async fn list_environments(
        &self,
        project_id: Option<&ProjectId>,
    ) -> Result<Vec<EnvironmentRecord>, sqlx::Error> {
        let rows = match project_id {
            Some(project) => {
                sqlx::query(
                    "SELECT * FROM environments WHERE project_id = ? ORDER BY environment_id",
                )
                .bind(project.as_str())
                .fetch_all(self.pool())
                .await?
            }
            None => {
                sqlx::query("SELECT * FROM environments ORDER BY environment_id")
                    .fetch_all(self.pool())
                    .await?
            }
        };

        rows.iter().map(environment_from_row).collect()
    }

    /// Conditionally advance an environment's status.
    ///
    /// The write is conditioned on both the version and the status observed
    /// when `record` was read; returns false when a concurrent writer got
    /// there first. `failure_reason` replaces the stored reason, clearing it
    /// on non-failure transitions.
    pub async fn apply_status(
        &self,
        record: &EnvironmentRecord,
        to: EnvStatus,
        occurred_at: i64,
        failure_reason: Option<&str>,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE environments
             SET status = ?, status_version = status_version + 1, last_event_at = ?,
                 failure_reason = ?, updated_at = ?
             WHERE environment_id = ? AND status_version = ? AND status = ?",
        )
        .bind(to.code())
        .bind(occurred_at)
        .bind(failure_reason)
        .bind(Utc::now().to_rfc3339())
        .bind(record.environment_id.as_str())
        .bind(record.status_version)
        .bind(record.status.code())
        .execute(self.pool())
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Conditionally advance the staleness marker without changing status.
    /// Used when a redelivered observation matches the stored status.
    pub async fn refresh_event_marker(
        &self,
        record: &EnvironmentRecord,
        occurred_at: i64,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE environments
             SET last_event_at = ?, status_version = status_version + 1, updated_at = ?
             WHERE environment_id = ? AND status_version = ?",
        )
        .bind(occurred_at)
        .bind(Utc::now().to_rfc3339())
        .bind(record.environment_id.as_str())
        .bind(record.status_version)
        .execute(self.pool())
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Conditionally bind the backend-assigned instance id after launch.
    pub async fn assign_instance(
        &self,
        record: &EnvironmentRecord,
        instance_id: &InstanceId,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE environments
             SET instance_id = ?, status_version = status_version + 1, updated_at = ?
             WHERE environment_id = ? AND status_version = ?",
        )
        .bind(instance_id.as_str())
        .bind(Utc::now().to_rfc3339())
        .bind(record.environment_id.as_str())
        .bind(record.status_version)
        .execute(self.pool())
        .await?;

        Ok(result.rows_affected() > 0)
    }

    // ── Accounts ────────────────────────────────────────────────────────

    /// Register a hosting account in `Pending` status. Re-registering an
    /// existing account updates the trust role and resets it to pending.
    pub async fn insert_account(
        &self,
        account_id: &AccountId,
        role_arn: &str,
        external_id: Option<&str>,
    ) -> Result<AccountRecord, sqlx::Error> {
        sqlx::query(
            "INSERT INTO accounts (account_id, role_arn, external_id, status)
             VALUES (?, ?, ?, ?)
             ON CONFLICT(account_id) DO UPDATE SET
                 role_arn = excluded.role_arn,
                 external_id = excluded.external_id,
                 status = excluded.status,
                 failure_reason = NULL,
                 reconciled_at = NULL",
        )
        .bind(account_id.as_str())
        .bind(role_arn)
        .bind(external_id)
        .bind(AccountStatus::Pending.as_ref())
        .execute(self.pool())
        .await?;

        Ok(AccountRecord {
            account_id: account_id.clone(),
            role_arn: role_arn.to_string(),
            external_id: external_id.map(str::to_string),
            status: AccountStatus::Pending,
            failure_reason: None,
            reconciled_at: None,
        })
    }

    /// Point read by account id.
    pub async fn account(
        &self,
        account_id: &AccountId,
    ) -> Result<Option<AccountRecord>, sqlx::Error> {
        sqlx::query("SELECT * FROM accounts WHERE account_id = ?")
            .bind(account_id.as_str())
            .fetch_optional(self.pool())
            .await?
            .as_ref()
            .map(account_from_row)
            .transpose()
    }

    /// List all registered hosting accounts.
    pub async fn list_accounts(&self) -> Result<Vec<AccountRecord>, sqlx::Error> {
        let rows = sqlx::query("SELECT * FROM accounts ORDER BY account_id")
            .fetch_all(self.pool())
            .await?;

        rows.iter().map(account_from_row).collect()
    }

    /// Record the outcome of an account reconciliation probe.
    pub async fn mark_account(
        &self,
        account_id: &AccountId,
        status: AccountStatus,
        failure_reason: Option<&str>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE accounts SET status = ?, failure_reason = ?, reconciled_at = ?
             WHERE account_id = ?",
        )
        .bind(status.as_ref())
        .bind(failure_reason)
        .bind(Utc::now().to_rfc3339())
        .bind(account_id.as_str())
        .execute(self.pool())
        .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use workbench_common::ids::EnvTypeId;

    fn new_env(id: &str) -> NewEnvironment {
        NewEnvironment {
            environment_id: EnvironmentId::new(id),
            project_id: ProjectId::new("proj-1"),
            env_type: EnvTypeId::new("notebook"),
            account_id: AccountId::new("123456789012"),
        }
    }

    #[tokio::test]
    async fn insert_and_fetch_environment() {
        let store = Store::open_in_memory().await.unwrap();
        let record = store.insert_environment(&new_env("env-1")).await.unwrap();
        assert_eq!(record.status, EnvStatus::Pending);
        assert_eq!(record.status_version, 0);

        let fetched = store
            .environment(&EnvironmentId::new("env-1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(fetched.environment_id, record.environment_id);
        assert_eq!(fetched.status, EnvStatus::Pending);
        assert!(fetched.instance_id.is_none());
    }

    #[tokio::test]
    async fn resolve_environment_by_instance() {
        let store = Store::open_in_memory().await.unwrap();
        let record = store.insert_environment(&new_env("env-1")).await.unwrap();

        assert!(store
            .assign_instance(&record, &InstanceId::new("i-abc"))
            .await
            .unwrap());

        let by_instance = store
            .environment_by_instance(&InstanceId::new("i-abc"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(by_instance.environment_id, record.environment_id);
        assert_eq!(by_instance.status_version, 1);

        assert!(store
            .environment_by_instance(&InstanceId::new("i-unknown"))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn apply_status_is_conditional_on_version() {
        let store = Store::open_in_memory().await.unwrap();
        let record = store.insert_environment(&new_env("env-1")).await.unwrap();

        // First writer wins.
        assert!(store
            .apply_status(&record, EnvStatus::Starting, 10, None)
            .await
            .unwrap());

        // Second writer holds the stale version and loses.
        assert!(!store
            .apply_status(&record, EnvStatus::Failed, 11, Some("boom"))
            .await
            .unwrap());

        let current = store
            .environment(&record.environment_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(current.status, EnvStatus::Starting);
        assert_eq!(current.status_version, 1);
        assert_eq!(current.last_event_at, Some(10));
    }

    #[tokio::test]
    async fn apply_status_clears_and_sets_failure_reason() {
        let store = Store::open_in_memory().await.unwrap();
        let mut record = store.insert_environment(&new_env("env-1")).await.unwrap();

        assert!(store
            .apply_status(&record, EnvStatus::Failed, 5, Some("launch quota exceeded"))
            .await
            .unwrap());
        record = store.environment(&record.environment_id).await.unwrap().unwrap();
        assert_eq!(record.failure_reason.as_deref(), Some("launch quota exceeded"));

        // Re-terminate clears the stored reason.
        assert!(store
            .apply_status(&record, EnvStatus::Terminating, 6, None)
            .await
            .unwrap());
        record = store.environment(&record.environment_id).await.unwrap().unwrap();
        assert_eq!(record.failure_reason, None);
    }

    #[tokio::test]
    async fn refresh_event_marker_keeps_status() {
        let store = Store::open_in_memory().await.unwrap();
        let record = store.insert_environment(&new_env("env-1")).await.unwrap();

        assert!(store.refresh_event_marker(&record, 42).await.unwrap());

        let current = store.environment(&record.environment_id).await.unwrap().unwrap();
        assert_eq!(current.status, EnvStatus::Pending);
        assert_eq!(current.last_event_at, Some(42));
        assert_eq!(current.status_version, 1);

        // Stale handle no longer writes.
        assert!(!store.refresh_event_marker(&record, 43).await.unwrap());
    }

    #[tokio::test]
    async fn account_registration_and_marking() {
        let store = Store::open_in_memory().await.unwrap();
        let account_id = AccountId::new("123456789012");

        let account = store
            .insert_account(&account_id, "arn:aws:iam::123456789012:role/trust", None)
            .await
            .unwrap();
        assert_eq!(account.status, AccountStatus::Pending);

        store
            .mark_account(&account_id, AccountStatus::Error, Some("AccessDenied"))
            .await
            .unwrap();
        let stored = store.account(&account_id).await.unwrap().unwrap();
        assert_eq!(stored.status, AccountStatus::Error);
        assert_eq!(stored.failure_reason.as_deref(), Some("AccessDenied"));
        assert!(stored.reconciled_at.is_some());

        // Re-registration resets onboarding state.
        let again = store
            .insert_account(&account_id, "arn:aws:iam::123456789012:role/trust-v2", Some("ext"))
            .await
            .unwrap();
        assert_eq!(again.status, AccountStatus::Pending);
        let stored = store.account(&account_id).await.unwrap().unwrap();
        assert_eq!(stored.role_arn, "arn:aws:iam::123456789012:role/trust-v2");
        assert_eq!(stored.status, AccountStatus::Pending);
        assert!(stored.failure_reason.is_none());
    }

    #[tokio::test]
    async fn list_environments_filters_by_project() {
        let store = Store::open_in_memory().await.unwrap();
        store.insert_environment(&new_env("env-1")).await.unwrap();
        let mut other = new_env("env-2");
        other.project_id = ProjectId::new("proj-2");
        store.insert_environment(&other).await.unwrap();

        let all = store.list_environments(None).await.unwrap();
        assert_eq!(all.len(), 2);

        let filtered = store
            .list_environments(Some(&ProjectId::new("proj-2")))
            .await
            .unwrap();
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].environment_id, EnvironmentId::new("env-2"));
    }
}
