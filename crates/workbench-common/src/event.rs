//! Inbound status events
//!
//! A `StatusEvent` is one observation from a provisioning backend, delivered
//! at-least-once and possibly out of order. Events are ephemeral: the engine
//! consumes them to produce a record mutation and never persists them
//! standalone.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::ids::InstanceId;

/// One status observation for a backend instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusEvent {
    /// Backend-assigned instance the observation is about.
    pub instance_id: InstanceId,
    /// Raw status string in the backend's native vocabulary.
    pub raw_status: String,
    /// When the backend observed the status, epoch milliseconds. Used for
    /// staleness detection; equal-or-older events are duplicates.
    pub occurred_at: i64,
    /// Opaque backend metadata. A `"reason"` entry is persisted as the
    /// failure reason when the event maps to a failure status.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub detail: BTreeMap<String, String>,
}

impl StatusEvent {
    pub fn new(instance_id: impl Into<InstanceId>, raw_status: impl Into<String>, occurred_at: i64) -> Self {
        Self {
            instance_id: instance_id.into(),
            raw_status: raw_status.into(),
            occurred_at,
            detail: BTreeMap::new(),
        }
    }

    /// Attach a metadata entry.
    #[must_use]
    pub fn with_detail(mut self, key: &str, value: &str) -> Self {
        self.detail.insert(key.to_string(), value.to_string());
        self
    }

    /// The failure reason carried by the event, if any.
    pub fn failure_reason(&self) -> Option<&str> {
        self.detail.get("reason").map(String::as_str)
    }
}
