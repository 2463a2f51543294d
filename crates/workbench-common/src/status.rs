//! Canonical environment status model
//!
//! Provides the closed `EnvStatus` enum, its stable external codes, and the
//! legal transition table the status handler validates every inbound event
//! against. The codes are persisted and compared across releases and must
//! remain stable.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Canonical lifecycle states an environment can occupy.
///
/// The discriminants back the stable external codes:
/// - `Pending = 0`: Record created, provisioning not yet begun
/// - `Starting = 1`: Launch or start verb in flight
/// - `Started = 2`: Running and connectable
/// - `Stopping = 3`: Stop verb in flight
/// - `Stopped = 4`: Halted, resources retained
/// - `Terminating = 5`: Terminate verb in flight
/// - `Terminated = 6`: Gone; terminal, record is immutable
/// - `Failed = 7`: Launch failed before the environment ever started
/// - `StartingFailed = 8`: Start verb failed
/// - `StoppingFailed = 9`: Stop verb failed
/// - `TerminatingFailed = 10`: Terminate verb failed
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Default,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
    strum::FromRepr,
    strum::AsRefStr,
)]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
#[serde(rename_all = "snake_case")]
#[repr(i32)]
pub enum EnvStatus {
    #[default]
    Pending = 0,
    Starting = 1,
    Started = 2,
    Stopping = 3,
    Stopped = 4,
    Terminating = 5,
    Terminated = 6,
    Failed = 7,
    StartingFailed = 8,
    StoppingFailed = 9,
    TerminatingFailed = 10,
}

impl EnvStatus {
    /// Stable external code used for persistence and backward-compatible
    /// comparison.
    pub fn code(self) -> &'static str {
        match self {
            Self::Pending => "0",
            Self::Starting => "1",
            Self::Started => "2",
            Self::Stopping => "3",
            Self::Stopped => "4",
            Self::Terminating => "5",
            Self::Terminated => "6",
            Self::Failed => "7",
            Self::StartingFailed => "8",
            Self::StoppingFailed => "9",
            Self::TerminatingFailed => "10",
        }
    }

    /// Parse a stable external code back into a status.
    pub fn from_code(code: &str) -> Option<Self> {
        code.parse::<i32>().ok().and_then(Self::from_repr)
    }

    /// Legal transition targets from this status.
    ///
    /// Failure states are not dead ends: each permits re-terminate and a
    /// re-attempt of the verb that failed. `Terminated` is terminal.
    pub fn transitions(self) -> &'static [EnvStatus] {
        use EnvStatus::*;
        match self {
            Pending => &[Starting, Failed],
            Starting => &[Started, StartingFailed],
            Started => &[Stopping, Terminating],
            Stopping => &[Stopped, StoppingFailed],
            Stopped => &[Starting, Terminating],
            Terminating => &[Terminated, TerminatingFailed],
            Terminated => &[],
            Failed => &[Terminating, Starting],
            StartingFailed => &[Terminating, Starting],
            StoppingFailed => &[Terminating, Stopping],
            TerminatingFailed => &[Terminating],
        }
    }

    /// Check whether moving to `to` is present in the transition table.
    pub fn can_transition(self, to: EnvStatus) -> bool {
        self.transitions().contains(&to)
    }

    /// Check if the status is terminal (no outgoing transitions).
    pub fn is_terminal(self) -> bool {
        self.transitions().is_empty()
    }

    /// Check if the status records a failed verb.
    pub fn is_failure(self) -> bool {
        matches!(
            self,
            Self::Failed | Self::StartingFailed | Self::StoppingFailed | Self::TerminatingFailed
        )
    }

    /// Check if an environment in this status can hand out connection
    /// credentials.
    pub fn is_connectable(self) -> bool {
        matches!(self, Self::Started)
    }

    /// Parse from string, returning None for unknown values.
    pub fn parse(s: &str) -> Option<Self> {
        s.parse().ok()
    }
}

/// Lifecycle verbs the dispatcher forwards to backends.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumString, strum::AsRefStr,
)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum LifecycleVerb {
    Launch,
    Start,
    Stop,
    Terminate,
}

impl LifecycleVerb {
    /// The in-progress status an accepted verb drives the environment toward.
    pub fn in_progress_status(self) -> EnvStatus {
        match self {
            Self::Launch | Self::Start => EnvStatus::Starting,
            Self::Stop => EnvStatus::Stopping,
            Self::Terminate => EnvStatus::Terminating,
        }
    }
}

/// Explicit mapping from a backend's raw status strings to canonical statuses.
///
/// Every registered backend supplies its own table; an unmapped string is an
/// `UnrecognizedStatus` error, never a guessed default. Lookup is
/// case-insensitive on the raw string.
#[derive(Debug, Clone, Default)]
pub struct RawStatusMap {
    entries: HashMap<String, EnvStatus>,
}

impl RawStatusMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a raw-status mapping. Later entries win on duplicate keys.
    #[must_use]
    pub fn map(mut self, raw: &str, status: EnvStatus) -> Self {
        self.entries.insert(raw.to_ascii_lowercase(), status);
        self
    }

    /// Resolve a raw backend status string to its canonical status.
    pub fn resolve(&self, raw: &str) -> Option<EnvStatus> {
        self.entries.get(&raw.to_ascii_lowercase()).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Identity table accepting canonical names and stable codes as raw
    /// strings. Used by operator tooling that speaks the canonical model
    /// directly rather than a backend's native vocabulary.
    pub fn canonical() -> Self {
        use strum::IntoEnumIterator;
        let mut map = Self::new();
        for status in EnvStatus::iter() {
            map = map.map(&status.to_string(), status).map(status.code(), status);
        }
        map
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    /// The transition table from the design, written out long-hand so the
    /// `transitions()` implementation is checked against independent data.
    const EXPECTED: &[(EnvStatus, &[EnvStatus])] = {
        use EnvStatus::*;
        &[
            (Pending, &[Starting, Failed]),
            (Starting, &[Started, StartingFailed]),
            (Started, &[Stopping, Terminating]),
            (Stopping, &[Stopped, StoppingFailed]),
            (Stopped, &[Starting, Terminating]),
            (Terminating, &[Terminated, TerminatingFailed]),
            (Terminated, &[]),
            (Failed, &[Terminating, Starting]),
            (StartingFailed, &[Terminating, Starting]),
            (StoppingFailed, &[Terminating, Stopping]),
            (TerminatingFailed, &[Terminating]),
        ]
    };

    #[test]
    fn every_status_pair_matches_the_table() {
        for from in EnvStatus::iter() {
            let allowed = EXPECTED
                .iter()
                .find(|(s, _)| *s == from)
                .map(|(_, targets)| *targets)
                .expect("every status has a table row");

            for to in EnvStatus::iter() {
                assert_eq!(
                    from.can_transition(to),
                    allowed.contains(&to),
                    "transition {from} -> {to} disagrees with the table"
                );
            }
        }
    }

    #[test]
    fn terminated_is_the_only_terminal_status() {
        for status in EnvStatus::iter() {
            assert_eq!(status.is_terminal(), status == EnvStatus::Terminated);
        }
    }

    #[test]
    fn failure_states_permit_re_terminate() {
        for status in EnvStatus::iter().filter(|s| s.is_failure()) {
            assert!(
                status.can_transition(EnvStatus::Terminating),
                "{status} must permit re-terminate"
            );
        }
    }

    #[test]
    fn codes_round_trip() {
        for status in EnvStatus::iter() {
            assert_eq!(EnvStatus::from_code(status.code()), Some(status));
        }
        assert_eq!(EnvStatus::from_code("99"), None);
        assert_eq!(EnvStatus::from_code("started"), None);
    }

    #[test]
    fn codes_are_stable() {
        assert_eq!(EnvStatus::Pending.code(), "0");
        assert_eq!(EnvStatus::Started.code(), "2");
        assert_eq!(EnvStatus::Terminated.code(), "6");
        assert_eq!(EnvStatus::TerminatingFailed.code(), "10");
    }

    #[test]
    fn name_parsing_is_case_insensitive() {
        assert_eq!(EnvStatus::parse("STARTED"), Some(EnvStatus::Started));
        assert_eq!(
            EnvStatus::parse("starting_failed"),
            Some(EnvStatus::StartingFailed)
        );
        assert_eq!(EnvStatus::parse("running"), None);
    }

    #[test]
    fn only_started_is_connectable() {
        for status in EnvStatus::iter() {
            assert_eq!(status.is_connectable(), status == EnvStatus::Started);
        }
    }

    #[test]
    fn verb_targets() {
        assert_eq!(
            LifecycleVerb::Launch.in_progress_status(),
            EnvStatus::Starting
        );
        assert_eq!(
            LifecycleVerb::Start.in_progress_status(),
            EnvStatus::Starting
        );
        assert_eq!(LifecycleVerb::Stop.in_progress_status(), EnvStatus::Stopping);
        assert_eq!(
            LifecycleVerb::Terminate.in_progress_status(),
            EnvStatus::Terminating
        );
    }

    #[test]
    fn raw_status_map_is_case_insensitive_and_explicit() {
        let map = RawStatusMap::new()
            .map("InService", EnvStatus::Started)
            .map("Deleting", EnvStatus::Terminating);

        assert_eq!(map.resolve("inservice"), Some(EnvStatus::Started));
        assert_eq!(map.resolve("DELETING"), Some(EnvStatus::Terminating));
        // Unmapped strings resolve to nothing, never a default.
        assert_eq!(map.resolve("Updating"), None);
    }

    #[test]
    fn canonical_map_accepts_names_and_codes() {
        let map = RawStatusMap::canonical();
        assert_eq!(map.resolve("started"), Some(EnvStatus::Started));
        assert_eq!(map.resolve("2"), Some(EnvStatus::Started));
        assert_eq!(map.resolve("terminating_failed"), Some(EnvStatus::TerminatingFailed));
        assert_eq!(map.resolve("bogus"), None);
    }
}
