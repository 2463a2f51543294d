//! Status event reconciliation
//!
//! Consumes one inbound `StatusEvent`, maps its raw backend status to a
//! canonical status, and applies it to the stored environment record only if
//! the transition is legal and the event is not stale. The write is a
//! conditional update keyed on the record version read beforehand, so
//! concurrent handler invocations for the same environment can never both
//! apply.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use workbench_common::error::ReconcileError;
use workbench_common::event::StatusEvent;
use workbench_common::status::EnvStatus;

use crate::config::ReconcileTunables;
use crate::dispatch::BackendRegistry;
use crate::events::EngineEvent;
use crate::store::{store_err, EnvironmentRecord, Store};

/// What reconciling one event did to the record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// The transition was applied.
    Applied {
        previous: EnvStatus,
        current: EnvStatus,
    },
    /// The event was older than (or a duplicate of) the last applied one
    /// and was discarded. Expected under at-least-once delivery.
    Stale,
    /// The event re-observed the stored status; only the staleness marker
    /// advanced.
    NoChange,
}

/// Reconciles inbound status events into environment records.
pub struct StatusHandler {
    store: Store,
    registry: Arc<BackendRegistry>,
    events: Option<mpsc::Sender<EngineEvent>>,
    cas_attempts: u32,
}

impl StatusHandler {
    pub fn new(
        store: Store,
        registry: Arc<BackendRegistry>,
        events: Option<mpsc::Sender<EngineEvent>>,
    ) -> Self {
        Self::with_tunables(store, registry, events, &ReconcileTunables::default())
    }

    pub fn with_tunables(
        store: Store,
        registry: Arc<BackendRegistry>,
        events: Option<mpsc::Sender<EngineEvent>>,
        tunables: &ReconcileTunables,
    ) -> Self {
        Self {
            store,
            registry,
            events,
            cas_attempts: tunables.cas_attempts.max(1),
        }
    }

    /// Reconcile one status event.
    ///
    /// Errors are classified by [`ReconcileError::disposition`]: unknown
    /// instances are dropped, unmapped statuses retried, illegal transitions
    /// surfaced, and exhausted write conflicts handed back to the transport
    /// for redelivery.
    pub async fn execute(&self, event: &StatusEvent) -> Result<ReconcileOutcome, ReconcileError> {
        let mut record = self
            .store
            .environment_by_instance(&event.instance_id)
            .await
            .map_err(store_err)?
            .ok_or_else(|| ReconcileError::UnknownInstance {
                instance_id: event.instance_id.clone(),
            })?;

        let target = self
            .registry
            .status_map(&record.env_type)
            .ok_or_else(|| ReconcileError::UnknownEnvironmentType {
                env_type: record.env_type.clone(),
            })?
            .resolve(&event.raw_status)
            .ok_or_else(|| ReconcileError::UnrecognizedStatus {
                env_type: record.env_type.clone(),
                raw_status: event.raw_status.clone(),
            })?;

        let mut attempts = 0u32;
        loop {
            // Older-or-equal events are duplicates; discarding them is what
            // keeps out-of-order redelivery from regressing state.
            if record
                .last_event_at
                .is_some_and(|last| event.occurred_at <= last)
            {
                debug!(
                    environment_id = %record.environment_id,
                    occurred_at = event.occurred_at,
                    last_event_at = ?record.last_event_at,
                    "Discarding stale status event"
                );
                return Ok(ReconcileOutcome::Stale);
            }

            if record.status == target {
                // Re-observation of the current status: advance the marker
                // so the next staleness check sees this event.
                if self
                    .store
                    .refresh_event_marker(&record, event.occurred_at)
                    .await
                    .map_err(store_err)?
                {
                    return Ok(ReconcileOutcome::NoChange);
                }
            } else {
                if !record.status.can_transition(target) {
                    warn!(
                        environment_id = %record.environment_id,
                        from = %record.status,
                        to = %target,
                        "Rejecting illegal status transition"
                    );
                    return Err(ReconcileError::IllegalTransition {
                        environment_id: record.environment_id.clone(),
                        from: record.status,
                        to: target,
                    });
                }

                let failure_reason = target
                    .is_failure()
                    .then(|| event.failure_reason().unwrap_or("backend reported failure"));

                if self
                    .store
                    .apply_status(&record, target, event.occurred_at, failure_reason)
                    .await
                    .map_err(store_err)?
                {
                    info!(
                        environment_id = %record.environment_id,
                        from = %record.status,
                        to = %target,
                        occurred_at = event.occurred_at,
                        "Status event applied"
                    );
                    self.signal(&record, target, failure_reason);
                    return Ok(ReconcileOutcome::Applied {
                        previous: record.status,
                        current: target,
                    });
                }
            }

            // Lost the conditional write to a concurrent event; re-read and
            // re-validate against the fresh record.
            attempts += 1;
            if attempts >= self.cas_attempts {
                return Err(ReconcileError::ConcurrencyConflict {
                    environment_id: record.environment_id.clone(),
                    attempts,
                });
            }

            record = self
                .store
                .environment(&record.environment_id)
                .await
                .map_err(store_err)?
                .ok_or_else(|| ReconcileError::UnknownEnvironment {
                    environment_id: record.environment_id.clone(),
                })?;
        }
    }

    /// Completion signals for downstream listeners. Best-effort: a full or
    /// closed channel never fails the reconciliation.
    fn signal(&self, record: &EnvironmentRecord, status: EnvStatus, reason: Option<&str>) {
        let Some(events) = &self.events else {
            return;
        };

        let updated = EngineEvent::EnvironmentUpdated {
            environment_id: record.environment_id.clone(),
            status,
        };
        if events.try_send(updated).is_err() {
            debug!("Engine event channel full; dropping update signal");
            return;
        }

        if status.is_failure() {
            let _ = events.try_send(EngineEvent::EnvironmentFailed {
                environment_id: record.environment_id.clone(),
                status,
                reason: reason.map(str::to_string),
            });
        }
        if status.is_terminal() {
            let _ = events.try_send(EngineEvent::EnvironmentTerminal {
                environment_id: record.environment_id.clone(),
                status,
            });
        }
    }
}

impl std::fmt::Debug for StatusHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatusHandler")
            .field("cas_attempts", &self.cas_attempts)
            .finish_non_exhaustive()
    }
}
