//! Statistics verifier: compares the driver's live packing statistics with
//! the expectation for the case that just ran.

#![allow(missing_docs)]

use crate::core::errors::{HarnessError, Result};
use crate::engine::{DispatchEngine, DriverHandle};
use crate::stats::{ExpectedStats, PackingStats, StopReason};

/// Result of a comparison that did not fail hard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verification {
    Passed,
    /// Stats disagreed, but foreign writes hit the device during the round.
    Ignored { foreign_writes: u64, field: String },
}

#[derive(Debug)]
struct Mismatch {
    field: String,
    observed: u32,
    expected: u32,
}

fn first_mismatch(live: &PackingStats, expected: &ExpectedStats) -> Option<Mismatch> {
    for size in 1..=expected.max_batch() {
        let (observed, want) = (live.packing_events(size), expected.packing_events(size));
        if observed != want {
            return Some(Mismatch {
                field: format!("packing_events[{size}]"),
                observed,
                expected: want,
            });
        }
    }
    StopReason::ALL.iter().find_map(|reason| {
        let (observed, want) = (live.stop_reason(*reason), expected.stop_reason(*reason));
        (observed != want).then(|| Mismatch {
            field: format!("stop_reasons[{reason}]"),
            observed,
            expected: want,
        })
    })
}

/// Compare live statistics against `expected`.
///
/// The statistics lock is held only for the comparison itself. A mismatch in
/// a round that saw foreign writes marks the round ignored on the engine and
/// returns [`Verification::Ignored`]; otherwise it is a
/// [`HarnessError::StatsMismatch`].
pub fn verify(
    engine: &dyn DispatchEngine,
    driver: &dyn DriverHandle,
    expected: &ExpectedStats,
) -> Result<Verification> {
    let cell = driver.packing_statistics();
    let mismatch = {
        let state = cell.lock();
        if !state.enabled {
            return Err(HarnessError::StatsUnavailable {
                details: "driver packing statistics are disabled".to_string(),
            });
        }
        first_mismatch(&state.stats, expected)
    };

    let Some(mismatch) = mismatch else {
        return Ok(Verification::Passed);
    };

    let foreign_writes = engine.foreign_writes_this_round();
    if foreign_writes > 0 {
        engine.set_ignore_this_round(true);
        return Ok(Verification::Ignored {
            foreign_writes,
            field: mismatch.field,
        });
    }
    Err(HarnessError::StatsMismatch {
        field: mismatch.field,
        observed: mismatch.observed,
        expected: mismatch.expected,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::Config;
    use crate::engine::sim::SimulatedEngine;

    fn engine(foreign: u32) -> SimulatedEngine {
        let mut cfg = Config::default();
        cfg.device.foreign_writes_per_round = foreign;
        SimulatedEngine::new(&cfg).unwrap()
    }

    fn expected_six_empty_queue() -> ExpectedStats {
        let mut expected = ExpectedStats::new(8);
        expected.set_packing_events(6, 1);
        expected.set_stop_reason(StopReason::EmptyQueue, 1);
        expected
    }

    #[test]
    fn matching_stats_pass() {
        let engine = engine(0);
        let driver = engine.active_queue().unwrap();
        {
            let cell = driver.packing_statistics();
            let mut state = cell.lock();
            state.stats.record_packing_event(6);
            state.stats.record_stop(StopReason::EmptyQueue);
        }
        let outcome = verify(&engine, driver.as_ref(), &expected_six_empty_queue()).unwrap();
        assert_eq!(outcome, Verification::Passed);
    }

    #[test]
    fn histogram_is_compared_before_stop_reasons() {
        let engine = engine(0);
        let driver = engine.active_queue().unwrap();
        driver
            .packing_statistics()
            .lock()
            .stats
            .record_stop(StopReason::Threshold);
        let err = verify(&engine, driver.as_ref(), &expected_six_empty_queue()).unwrap_err();
        match err {
            HarnessError::StatsMismatch {
                field,
                observed,
                expected,
            } => {
                assert_eq!(field, "packing_events[6]");
                assert_eq!((observed, expected), (0, 1));
            }
            other => panic!("unexpected error {other}"),
        }
    }

    #[test]
    fn stop_reason_mismatch_names_the_reason() {
        let engine = engine(0);
        let driver = engine.active_queue().unwrap();
        driver.packing_statistics().lock().stats.record_packing_event(6);
        let err = verify(&engine, driver.as_ref(), &expected_six_empty_queue()).unwrap_err();
        assert!(err.to_string().contains("stop_reasons[EMPTY_QUEUE]"));
    }

    #[test]
    fn disabled_stats_are_an_environment_error() {
        let engine = engine(0);
        let driver = engine.active_queue().unwrap();
        driver.packing_statistics().set_enabled(false);
        let err = verify(&engine, driver.as_ref(), &expected_six_empty_queue()).unwrap_err();
        assert_eq!(err.code(), "PCH-3001");
    }

    #[test]
    fn mismatch_with_foreign_writes_is_ignored() {
        let engine = engine(2);
        let driver = engine.active_queue().unwrap();
        let stream = crate::stream::builder::RequestStream::default();
        engine.submit(&stream).unwrap();
        assert_eq!(engine.foreign_writes_this_round(), 2);
        let outcome = verify(&engine, driver.as_ref(), &expected_six_empty_queue()).unwrap();
        assert!(matches!(outcome, Verification::Ignored { foreign_writes: 2, .. }));
        assert!(engine.round_ignored());
    }
}
