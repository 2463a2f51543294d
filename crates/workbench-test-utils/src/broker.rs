//! Fake credential broker
//!
//! A scripted [`CredentialBroker`] for tests: succeeds with static session
//! credentials by default, fails with `CredentialExchangeFailed` for accounts
//! it was told to break, and records every exchange request.

use std::collections::HashSet;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use workbench_common::error::ReconcileError;
use workbench_common::ids::AccountId;
use workbench_common::services::{CredentialBroker, DelegatedRole, SessionCredentials};

/// Credential broker double with scriptable per-account failures.
#[derive(Debug, Default)]
pub struct FakeBroker {
    broken: Mutex<HashSet<AccountId>>,
    calls: Mutex<Vec<AccountId>>,
}

impl FakeBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make credential exchange fail for the given account from now on.
    pub fn break_account(&self, account_id: &AccountId) {
        self.broken.lock().unwrap().insert(account_id.clone());
    }

    /// Restore a previously broken account.
    pub fn repair_account(&self, account_id: &AccountId) {
        self.broken.lock().unwrap().remove(account_id);
    }

    /// Accounts that were asked for credentials, in call order.
    pub fn calls(&self) -> Vec<AccountId> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl CredentialBroker for FakeBroker {
    async fn assume(&self, role: &DelegatedRole) -> Result<SessionCredentials, ReconcileError> {
        self.calls.lock().unwrap().push(role.account_id.clone());

        if self.broken.lock().unwrap().contains(&role.account_id) {
            return Err(ReconcileError::CredentialExchangeFailed {
                account_id: role.account_id.clone(),
                reason: "assume role denied by test script".to_string(),
            });
        }

        Ok(SessionCredentials {
            access_key_id: format!("AKIATEST{}", role.account_id),
            secret_access_key: "test-secret".to_string(),
            session_token: "test-token".to_string(),
            expires_at: Utc::now() + Duration::minutes(15),
        })
    }
}
