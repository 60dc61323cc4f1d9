//! Bounded reachability history used for flip-flop detection.

use std::collections::VecDeque;
use std::time::SystemTime;

use crate::types::{RecordKind, StateChangeRecord};

/// Maximum number of records retained.
pub const HISTORY_CAPACITY: usize = 10;

/// Number of most recent records inspected for instability.
pub const FLIP_FLOP_WINDOW: usize = 5;

/// Ring buffer of reachability observations.
#[derive(Debug, Default)]
pub struct ChangeHistory {
    records: VecDeque<StateChangeRecord>,
}

impl ChangeHistory {
    pub fn new() -> Self {
        Self {
            records: VecDeque::with_capacity(HISTORY_CAPACITY),
        }
    }

    /// Record an observation. `fallback_previous` is used as `was_online`
    /// when the history is empty.
    pub fn record(&mut self, is_online: bool, fallback_previous: bool) -> StateChangeRecord {
        let was_online = self.records.back().map_or(fallback_previous, |r| r.is_online);
        let record = StateChangeRecord {
            was_online,
            is_online,
            timestamp: SystemTime::now(),
            kind: if was_online == is_online {
                RecordKind::Stable
            } else {
                RecordKind::Change
            },
        };

        if self.records.len() == HISTORY_CAPACITY {
            self.records.pop_front();
        }
        self.records.push_back(record);
        record
    }

    /// Whether recent observations look like oscillation rather than a
    /// genuine change.
    ///
    /// True when the last three verdicts alternate (A, B, A) or when at least
    /// three of the last five records are changes.
    pub fn is_flip_flopping(&self) -> bool {
        let recent: Vec<&StateChangeRecord> =
            self.records.iter().rev().take(FLIP_FLOP_WINDOW).collect();

        let alternating = recent.len() >= 3
            && recent[0].is_online != recent[1].is_online
            && recent[1].is_online != recent[2].is_online;

        let changes = recent
            .iter()
            .filter(|r| r.kind == RecordKind::Change)
            .count();

        alternating || changes >= 3
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn last(&self) -> Option<&StateChangeRecord> {
        self.records.back()
    }
}
