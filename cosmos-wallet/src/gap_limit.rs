//! Gap limit tracking for address discovery
//!
//! Decides how far a restore scan probes an address sequence: probing stops
//! once a configured number of consecutive addresses show no activity.

use core::cmp;
use std::collections::BTreeSet;

/// Default number of consecutive unused addresses probed
pub const DEFAULT_GAP_LIMIT: u32 = 10;

/// Maximum gap limit to prevent excessive address derivation
pub const MAX_GAP_LIMIT: u32 = 1000;

/// Stages of a scan
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GapLimitStage {
    /// Probing addresses
    Scanning,
    /// The gap limit was reached
    Complete,
}

/// Gap limit tracker for a single sequence
#[derive(Debug, Clone)]
pub struct GapLimit {
    /// The gap limit value
    pub limit: u32,
    /// Index the scan started from
    pub start: u32,
    /// Current stage of processing
    pub stage: GapLimitStage,
    /// Count of consecutive unused addresses since the last used one
    pub current_unused_count: u32,
    /// Highest index that has been used
    pub highest_used_index: Option<u32>,
    /// Next index to probe
    pub next_index: u32,
    /// Set of all used indices
    pub used_indices: BTreeSet<u32>,
    /// Whether gap limit has been reached
    pub limit_reached: bool,
}

impl GapLimit {
    /// Tracker probing from `start`. The limit is clamped to `1..=MAX_GAP_LIMIT`.
    pub fn new(limit: u32, start: u32) -> Self {
        Self {
            limit: limit.clamp(1, MAX_GAP_LIMIT),
            start,
            stage: GapLimitStage::Scanning,
            current_unused_count: 0,
            highest_used_index: None,
            next_index: start,
            used_indices: BTreeSet::new(),
            limit_reached: false,
        }
    }

    /// Record activity at `index`.
    ///
    /// Activity at or past the cursor resets the gap; activity behind it only
    /// raises the highest used index.
    pub fn mark_used(&mut self, index: u32) {
        self.used_indices.insert(index);
        self.highest_used_index = Some(match self.highest_used_index {
            None => index,
            Some(current) => cmp::max(current, index),
        });

        if index >= self.next_index {
            self.current_unused_count = 0;
            self.next_index = index.saturating_add(1);
        }
        self.update_limit_reached();
    }

    /// Record that the probe at `index` found nothing.
    pub fn mark_unused(&mut self, index: u32) {
        if index >= self.next_index {
            self.current_unused_count += 1;
            self.next_index = index.saturating_add(1);
        }
        self.update_limit_reached();
    }

    fn update_limit_reached(&mut self) {
        self.limit_reached = self.current_unused_count >= self.limit;
        self.stage = if self.limit_reached {
            GapLimitStage::Complete
        } else {
            GapLimitStage::Scanning
        };
    }

    /// End the scan without waiting for the gap, for a sequence with nothing past its first key.
    pub fn finish(&mut self) {
        self.stage = GapLimitStage::Complete;
    }

    /// The next index to probe, or `None` once the gap limit is reached.
    pub fn next_probe(&self) -> Option<u32> {
        match self.stage {
            GapLimitStage::Scanning if self.next_index < u32::MAX => Some(self.next_index),
            _ => None,
        }
    }

    /// First index never seen used, and never before the scan's start.
    pub fn resume_index(&self) -> u32 {
        match self.highest_used_index {
            Some(highest) => cmp::max(self.start, highest.saturating_add(1)),
            None => self.start,
        }
    }

    /// Get statistics about the gap limit
    pub fn stats(&self) -> GapLimitStats {
        GapLimitStats {
            limit: self.limit,
            stage: self.stage,
            current_gap: self.current_unused_count,
            highest_used: self.highest_used_index,
            probed: self.next_index - self.start,
            used_count: self.used_indices.len() as u32,
            limit_reached: self.limit_reached,
        }
    }
}

/// Statistics about gap limit state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GapLimitStats {
    pub limit: u32,
    pub stage: GapLimitStage,
    pub current_gap: u32,
    pub highest_used: Option<u32>,
    /// Addresses probed past the start
    pub probed: u32,
    pub used_count: u32,
    pub limit_reached: bool,
}
