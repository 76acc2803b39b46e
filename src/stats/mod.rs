//! Write-packing statistics: the batch-size histogram and the stop-reason
//! counters, shared by the driver's live record and the harness's expectation.

#![allow(missing_docs)]

use std::fmt;

use parking_lot::{Mutex, MutexGuard};
use serde::{Deserialize, Serialize};

/// Why the driver closed a batch before accepting another request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    ExceedsSegments,
    ExceedsSectors,
    WrongDirection,
    FlushOrDiscard,
    EmptyQueue,
    ReliableWrite,
    Threshold,
}

impl StopReason {
    pub const COUNT: usize = 7;

    /// Verification order.
    pub const ALL: [Self; Self::COUNT] = [
        Self::ExceedsSegments,
        Self::ExceedsSectors,
        Self::WrongDirection,
        Self::FlushOrDiscard,
        Self::EmptyQueue,
        Self::ReliableWrite,
        Self::Threshold,
    ];

    const fn index(self) -> usize {
        self as usize
    }

    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::ExceedsSegments => "EXCEEDS_SEGMENTS",
            Self::ExceedsSectors => "EXCEEDS_SECTORS",
            Self::WrongDirection => "WRONG_DATA_DIR",
            Self::FlushOrDiscard => "FLUSH_OR_DISCARD",
            Self::EmptyQueue => "EMPTY_QUEUE",
            Self::ReliableWrite => "REL_WRITE",
            Self::Threshold => "THRESHOLD",
        }
    }
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Histogram of packed batch sizes `1..=max_batch` plus stop-reason counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackingStats {
    /// Index 0 is unused so that `packing_events[n]` counts batches of `n`.
    packing_events: Vec<u32>,
    stop_reasons: [u32; StopReason::COUNT],
}

/// The statistics a scenario expects the driver to record.
pub type ExpectedStats = PackingStats;

impl PackingStats {
    #[must_use]
    pub fn new(max_batch: u32) -> Self {
        Self {
            packing_events: vec![0; max_batch as usize + 1],
            stop_reasons: [0; StopReason::COUNT],
        }
    }

    #[must_use]
    pub fn max_batch(&self) -> u32 {
        u32::try_from(self.packing_events.len() - 1).unwrap_or(u32::MAX)
    }

    /// Zero every counter, keeping the histogram bound.
    pub fn reset(&mut self) {
        self.packing_events.fill(0);
        self.stop_reasons = [0; StopReason::COUNT];
    }

    /// Count of batches closed at exactly `size` requests. Out-of-range sizes read as zero.
    #[must_use]
    pub fn packing_events(&self, size: u32) -> u32 {
        self.packing_events.get(size as usize).copied().unwrap_or(0)
    }

    #[must_use]
    pub const fn stop_reason(&self, reason: StopReason) -> u32 {
        self.stop_reasons[reason.index()]
    }

    /// Set the histogram entry for `size`. Sizes outside `1..=max_batch` are
    /// ignored and reported as `false`.
    pub fn set_packing_events(&mut self, size: u32, count: u32) -> bool {
        if size == 0 {
            return false;
        }
        match self.packing_events.get_mut(size as usize) {
            Some(slot) => {
                *slot = count;
                true
            }
            None => false,
        }
    }

    pub const fn set_stop_reason(&mut self, reason: StopReason, count: u32) {
        self.stop_reasons[reason.index()] = count;
    }

    /// Record one closed batch of `size` requests.
    pub fn record_packing_event(&mut self, size: u32) {
        if size == 0 {
            return;
        }
        if let Some(slot) = self.packing_events.get_mut(size as usize) {
            *slot = slot.saturating_add(1);
        }
    }

    pub fn record_stop(&mut self, reason: StopReason) {
        let slot = &mut self.stop_reasons[reason.index()];
        *slot = slot.saturating_add(1);
    }

    /// Non-zero histogram entries as `(size, count)` pairs.
    #[must_use]
    pub fn nonzero_events(&self) -> Vec<(u32, u32)> {
        self.packing_events
            .iter()
            .enumerate()
            .skip(1)
            .filter(|(_, count)| **count > 0)
            .map(|(size, count)| (u32::try_from(size).unwrap_or(u32::MAX), *count))
            .collect()
    }

    /// Non-zero stop-reason counters.
    #[must_use]
    pub fn nonzero_stop_reasons(&self) -> Vec<(StopReason, u32)> {
        StopReason::ALL
            .iter()
            .map(|reason| (*reason, self.stop_reason(*reason)))
            .filter(|(_, count)| *count > 0)
            .collect()
    }
}

/// Live statistics as the driver keeps them: an enable flag plus counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsState {
    pub enabled: bool,
    pub stats: PackingStats,
}

/// Lock-protected driver statistics. The lock belongs to the driver; the
/// harness holds it only while comparing.
#[derive(Debug)]
pub struct StatsCell {
    inner: Mutex<StatsState>,
}

impl StatsCell {
    #[must_use]
    pub fn new(max_batch: u32, enabled: bool) -> Self {
        Self {
            inner: Mutex::new(StatsState {
                enabled,
                stats: PackingStats::new(max_batch),
            }),
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, StatsState> {
        self.inner.lock()
    }

    /// Clone of the current state, taken under the lock.
    #[must_use]
    pub fn snapshot(&self) -> StatsState {
        self.inner.lock().clone()
    }

    pub fn reset(&self) {
        self.inner.lock().stats.reset();
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.inner.lock().enabled = enabled;
    }
}
