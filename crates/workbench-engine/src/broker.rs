//! Credential broker
//!
//! Exchanges a hosting account's cross-account trust role for short-lived
//! scoped credentials via STS AssumeRole. There is no fallback to ambient
//! credentials: a broken trust relationship surfaces as
//! `CredentialExchangeFailed` so the account handler can mark the account
//! unhealthy instead of retrying forever.

use std::sync::Arc;

use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region, SdkConfig};
use aws_sdk_sts::error::DisplayErrorContext;
use chrono::{DateTime, Utc};
use tracing::{debug, info};
use workbench_common::error::ReconcileError;
use workbench_common::services::{CredentialBroker, DelegatedRole, SessionCredentials};

use crate::config::AwsSettings;

/// Shared AWS configuration context for creating service clients.
///
/// Loads AWS SDK configuration once; clients are created from the same
/// config without re-loading.
#[derive(Clone)]
pub struct AwsContext {
    config: Arc<SdkConfig>,
    region: String,
}

impl AwsContext {
    /// Load AWS configuration for the specified region.
    pub async fn new(region: &str) -> Self {
        Self::with_profile(region, None).await
    }

    /// Load AWS configuration for a region, optionally using a named
    /// profile instead of the default credential chain.
    pub async fn with_profile(region: &str, profile: Option<&str>) -> Self {
        let mut loader =
            aws_config::defaults(BehaviorVersion::latest()).region(Region::new(region.to_string()));
        if let Some(profile) = profile {
            loader = loader.profile_name(profile);
        }
        let config = loader.load().await;

        Self {
            config: Arc::new(config),
            region: region.to_string(),
        }
    }

    /// Get the underlying SDK config for direct client construction.
    pub fn sdk_config(&self) -> &SdkConfig {
        &self.config
    }

    /// Get the region string.
    pub fn region(&self) -> &str {
        &self.region
    }

    /// Create an STS client from this context.
    pub fn sts_client(&self) -> aws_sdk_sts::Client {
        aws_sdk_sts::Client::new(self.sdk_config())
    }
}

impl std::fmt::Debug for AwsContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AwsContext")
            .field("region", &self.region)
            .finish_non_exhaustive()
    }
}

/// STS-backed credential broker.
#[derive(Debug, Clone)]
pub struct StsBroker {
    client: aws_sdk_sts::Client,
    session_duration_secs: i32,
}

impl StsBroker {
    /// Create a broker, loading AWS configuration from the settings.
    pub async fn new(settings: &AwsSettings) -> Self {
        let ctx = AwsContext::with_profile(&settings.region, settings.profile.as_deref()).await;
        Self::from_context(&ctx, settings.session_duration_secs)
    }

    /// Create a broker from a pre-loaded AWS context.
    pub fn from_context(ctx: &AwsContext, session_duration_secs: i32) -> Self {
        Self {
            client: ctx.sts_client(),
            session_duration_secs,
        }
    }
}

#[async_trait]
impl CredentialBroker for StsBroker {
    async fn assume(&self, role: &DelegatedRole) -> Result<SessionCredentials, ReconcileError> {
        let exchange_failed = |reason: String| ReconcileError::CredentialExchangeFailed {
            account_id: role.account_id.clone(),
            reason,
        };

        debug!(
            account_id = %role.account_id,
            role_arn = %role.role_arn,
            "Exchanging trust role for session credentials"
        );

        let mut request = self
            .client
            .assume_role()
            .role_arn(&role.role_arn)
            .role_session_name(format!("workbench-{}", role.account_id))
            .duration_seconds(self.session_duration_secs);
        if let Some(external_id) = &role.external_id {
            request = request.external_id(external_id);
        }

        let response = request
            .send()
            .await
            .map_err(|e| exchange_failed(format!("{}", DisplayErrorContext(&e))))?;

        let credentials = response
            .credentials()
            .ok_or_else(|| exchange_failed("no credentials in AssumeRole response".to_string()))?;

        let expiration = credentials.expiration();
        let expires_at: DateTime<Utc> =
            DateTime::from_timestamp(expiration.secs(), expiration.subsec_nanos())
                .ok_or_else(|| exchange_failed("invalid expiration in response".to_string()))?;

        info!(
            account_id = %role.account_id,
            expires_at = %expires_at,
            "Session credentials issued"
        );

        Ok(SessionCredentials {
            access_key_id: credentials.access_key_id().to_string(),
            secret_access_key: credentials.secret_access_key().to_string(),
            session_token: credentials.session_token().to_string(),
            expires_at,
        })
    }
}
