//! Hosting-account reconciliation
//!
//! Verifies that each account's delegated trust role is actually assumable
//! and records the result. Runs unattended on a schedule or on-demand, so a
//! single misconfigured account must never crash the sweep: callers observe
//! account health through the stored status, not through errors.

use std::sync::Arc;

use anyhow::{Context, Result};
use futures::future::join_all;
use tokio::sync::mpsc;
use tracing::{info, warn};
use workbench_common::ids::AccountId;
use workbench_common::services::CredentialBroker;

use crate::events::EngineEvent;
use crate::store::{AccountStatus, Store};

/// Reconciles hosting accounts against their actual onboarding state.
pub struct AccountHandler {
    store: Store,
    broker: Arc<dyn CredentialBroker>,
    events: Option<mpsc::Sender<EngineEvent>>,
}

impl AccountHandler {
    pub fn new(
        store: Store,
        broker: Arc<dyn CredentialBroker>,
        events: Option<mpsc::Sender<EngineEvent>>,
    ) -> Self {
        Self {
            store,
            broker,
            events,
        }
    }

    /// Reconcile one account: probe the credential exchange and mark the
    /// account `active` or `error` accordingly.
    ///
    /// Idempotent: re-running converges on the same stored state and never
    /// duplicates side effects. A failed probe is an outcome, not an error;
    /// only storage failures propagate.
    pub async fn execute(&self, account_id: &AccountId) -> Result<AccountStatus> {
        let account = self
            .store
            .account(account_id)
            .await
            .context("Failed to read account record")?
            .with_context(|| format!("No registered account '{account_id}'"))?;

        let status = match self.broker.assume(&account.delegation()).await {
            Ok(_) => {
                info!(account_id = %account_id, "Delegated role verified; account active");
                self.store
                    .mark_account(account_id, AccountStatus::Active, None)
                    .await
                    .context("Failed to mark account active")?;
                AccountStatus::Active
            }
            Err(e) => {
                warn!(
                    account_id = %account_id,
                    error = %e,
                    "Credential exchange failed; marking account unhealthy"
                );
                self.store
                    .mark_account(account_id, AccountStatus::Error, Some(&e.to_string()))
                    .await
                    .context("Failed to mark account unhealthy")?;
                AccountStatus::Error
            }
        };

        if let Some(events) = &self.events {
            let _ = events.try_send(EngineEvent::AccountMarked {
                account_id: account_id.clone(),
                status,
            });
        }

        Ok(status)
    }

    /// Sweep every registered account concurrently.
    ///
    /// Per-account failures are logged and skipped; the sweep itself only
    /// fails if the account list cannot be read.
    pub async fn reconcile_all(&self) -> Result<Vec<(AccountId, AccountStatus)>> {
        let accounts = self
            .store
            .list_accounts()
            .await
            .context("Failed to list accounts")?;

        let probes = accounts.iter().map(|account| {
            let account_id = account.account_id.clone();
            async move { (account_id.clone(), self.execute(&account_id).await) }
        });

        let mut results = Vec::new();
        for (account_id, result) in join_all(probes).await {
            match result {
                Ok(status) => results.push((account_id, status)),
                Err(e) => {
                    warn!(account_id = %account_id, error = ?e, "Account reconciliation failed");
                }
            }
        }

        Ok(results)
    }
}

impl std::fmt::Debug for AccountHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccountHandler").finish_non_exhaustive()
    }
}
