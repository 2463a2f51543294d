//! Connection resolution
//!
//! Resolves the connection service registered for an environment's type and
//! produces access credentials plus instructions for a running environment.
//! Consumed by the UI/API layer, not by the reconciliation path.

use std::sync::Arc;

use tracing::debug;
use workbench_common::error::ReconcileError;
use workbench_common::ids::EnvironmentId;
use workbench_common::services::{AuthCredentials, ConnectionContext};

use crate::dispatch::BackendRegistry;
use crate::store::{store_err, Store};

/// Access material and instructions for one running environment.
#[derive(Debug, Clone)]
pub struct ConnectionDetails {
    pub credentials: AuthCredentials,
    pub instructions: String,
}

/// Resolves `EnvironmentConnectionService` implementations for running
/// environments.
pub struct ConnectionResolver {
    store: Store,
    registry: Arc<BackendRegistry>,
}

impl ConnectionResolver {
    pub fn new(store: Store, registry: Arc<BackendRegistry>) -> Self {
        Self { store, registry }
    }

    /// Produce connection details for a started environment.
    ///
    /// Fails with `NotConnectable` for any environment that is not
    /// `Started`; the caller is expected to surface the current status to
    /// the user instead.
    pub async fn resolve(
        &self,
        environment_id: &EnvironmentId,
        context: Option<&ConnectionContext>,
    ) -> Result<ConnectionDetails, ReconcileError> {
        let record = self
            .store
            .environment(environment_id)
            .await
            .map_err(store_err)?
            .ok_or_else(|| ReconcileError::UnknownEnvironment {
                environment_id: environment_id.clone(),
            })?;

        if !record.status.is_connectable() {
            return Err(ReconcileError::NotConnectable {
                environment_id: record.environment_id.clone(),
                status: record.status,
            });
        }

        let instance_id = record
            .instance_id
            .as_ref()
            .ok_or_else(|| ReconcileError::NoBoundInstance {
                environment_id: record.environment_id.clone(),
            })?;

        let services = self
            .registry
            .services(&record.env_type)
            .ok_or_else(|| ReconcileError::UnknownEnvironmentType {
                env_type: record.env_type.clone(),
            })?;

        debug!(
            environment_id = %record.environment_id,
            instance_id = %instance_id,
            "Resolving connection credentials"
        );

        let credentials = services
            .connection
            .auth_credentials(instance_id, context)
            .await
            .map_err(|e| ReconcileError::ConnectionFailed {
                environment_id: record.environment_id.clone(),
                message: e.to_string(),
            })?;

        Ok(ConnectionDetails {
            credentials,
            instructions: services.connection.connection_instructions().to_string(),
        })
    }
}

impl std::fmt::Debug for ConnectionResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionResolver").finish_non_exhaustive()
    }
}
