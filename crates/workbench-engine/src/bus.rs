//! Event pump
//!
//! In-process stand-in for the at-least-once event transport. Pulls status
//! events off a channel, runs them through the status handler, and acts on
//! the error disposition: retryable failures are redelivered with
//! exponential backoff and a bounded attempt count, structural failures are
//! acked and surfaced in the log.
//!
//! The pump assumes nothing about ordering: concurrent or re-delivered
//! events for the same environment are resolved by the store's conditional
//! writes, not here.

use std::sync::Arc;
use std::time::Duration;

use backon::{BackoffBuilder, ExponentialBuilder};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use workbench_common::error::Disposition;
use workbench_common::event::StatusEvent;

use crate::config::ReconcileTunables;
use crate::handlers::StatusHandler;

/// One delivery of an event, with its redelivery attempt count.
#[derive(Debug)]
struct Delivery {
    event: StatusEvent,
    attempt: u32,
}

/// Handle for submitting events to a running pump. Cheap to clone.
#[derive(Debug, Clone)]
pub struct EventSender {
    tx: mpsc::Sender<Delivery>,
}

impl EventSender {
    /// Submit an event for reconciliation. Fails only when the pump has
    /// shut down.
    pub async fn send(&self, event: StatusEvent) -> anyhow::Result<()> {
        self.tx
            .send(Delivery { event, attempt: 0 })
            .await
            .map_err(|_| anyhow::anyhow!("event pump has shut down"))
    }
}

/// Drives status events through the handler until cancelled.
pub struct EventPump {
    handler: Arc<StatusHandler>,
    tx: mpsc::Sender<Delivery>,
    rx: mpsc::Receiver<Delivery>,
    redelivery_attempts: u32,
    delays: Vec<Duration>,
}

impl EventPump {
    /// Create a pump and the sender used to feed it.
    pub fn new(handler: Arc<StatusHandler>, tunables: &ReconcileTunables) -> (Self, EventSender) {
        let (tx, rx) = mpsc::channel(workbench_common::defaults::DEFAULT_EVENT_BUFFER);

        // Precompute the backoff schedule; one delay per redelivery attempt.
        let delays: Vec<Duration> = ExponentialBuilder::default()
            .with_min_delay(tunables.backoff_min)
            .with_max_delay(tunables.backoff_max)
            .with_jitter()
            .build()
            .take(tunables.redelivery_attempts as usize)
            .collect();

        let sender = EventSender { tx: tx.clone() };
        let pump = Self {
            handler,
            tx,
            rx,
            redelivery_attempts: tunables.redelivery_attempts,
            delays,
        };
        (pump, sender)
    }

    /// Run until the token is cancelled or every sender is dropped.
    pub async fn run(mut self, cancel: CancellationToken) {
        info!("Event pump started");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Event pump cancelled");
                    break;
                }
                delivery = self.rx.recv() => {
                    let Some(delivery) = delivery else {
                        debug!("All event senders dropped; pump stopping");
                        break;
                    };
                    self.process(delivery).await;
                }
            }
        }
    }

    async fn process(&self, delivery: Delivery) {
        let instance_id = delivery.event.instance_id.clone();
        match self.handler.execute(&delivery.event).await {
            Ok(outcome) => {
                debug!(instance_id = %instance_id, ?outcome, "Event reconciled");
            }
            Err(err) => match err.disposition() {
                Disposition::Drop => {
                    info!(
                        instance_id = %instance_id,
                        error = %err,
                        "Dropping event for instance outside our ownership"
                    );
                }
                Disposition::Surface => {
                    error!(
                        instance_id = %instance_id,
                        error = %err,
                        "Protocol violation; event acked for operator inspection"
                    );
                }
                Disposition::Retry => self.redeliver(delivery, &err.to_string()),
                Disposition::Reject | Disposition::MarkAccountUnhealthy => {
                    // Not produced by the status path; log and ack.
                    warn!(instance_id = %instance_id, error = %err, "Event rejected");
                }
            },
        }
    }

    fn redeliver(&self, delivery: Delivery, reason: &str) {
        if delivery.attempt >= self.redelivery_attempts {
            error!(
                instance_id = %delivery.event.instance_id,
                attempts = delivery.attempt,
                error = %reason,
                "Redelivery attempts exhausted; event dropped back to the transport"
            );
            return;
        }

        let delay = self
            .delays
            .get(delivery.attempt as usize)
            .copied()
            .unwrap_or_else(|| self.delays.last().copied().unwrap_or(Duration::from_secs(1)));

        warn!(
            instance_id = %delivery.event.instance_id,
            attempt = delivery.attempt + 1,
            delay_ms = delay.as_millis() as u64,
            error = %reason,
            "Retryable reconciliation failure; scheduling redelivery"
        );

        let tx = self.tx.clone();
        let next = Delivery {
            event: delivery.event,
            attempt: delivery.attempt + 1,
        };
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(next).await;
        });
    }
}

impl std::fmt::Debug for EventPump {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventPump")
            .field("redelivery_attempts", &self.redelivery_attempts)
            .finish_non_exhaustive()
    }
}
