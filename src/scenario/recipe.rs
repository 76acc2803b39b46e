//! Per-case recipes: the request stream to submit and the statistics the
//! driver should record for it.

#![allow(missing_docs)]

use crate::core::config::StreamConfig;
use crate::core::errors::Result;
use crate::stats::{ExpectedStats, StopReason};
use crate::stream::builder::{RequestStream, StreamBuilder};
use crate::stream::rng::Lcg;

use super::catalog::TestCase;

/// Stream, expectation and request count for one pass of one case.
#[derive(Debug, Clone)]
pub struct PreparedCase {
    pub stream: RequestStream,
    pub expected: ExpectedStats,
    /// Writes enqueued by the harness for this pass.
    pub num_requests: u32,
    /// Count kept in the injection context. The threshold case records one
    /// write fewer than it enqueues.
    pub recorded_requests: u32,
}

/// How many writes a case submits before any case-specific adjustment.
///
/// Non-random passes use `max - 2`; random passes draw from
/// `[2, max - 1)`, or `[3, max - 1)` for partial-then-abort so its
/// success/error split is never degenerate.
pub fn base_request_count(case: TestCase, random: bool, rng: &mut Lcg, max_packed: u32) -> u32 {
    if !random {
        return max_packed.saturating_sub(2);
    }
    let min = if case == TestCase::RetPartialFollowedByAbort {
        3
    } else {
        2
    };
    rng.draw(min, max_packed.saturating_sub(1))
}

/// Build the stream and expected statistics for `case`.
///
/// Nothing is returned on failure; a partially built stream is dropped with
/// the builder.
pub fn prepare(
    case: TestCase,
    random: bool,
    rng: &mut Lcg,
    max_packed: u32,
    config: &StreamConfig,
) -> Result<PreparedCase> {
    let base = base_request_count(case, random, rng, max_packed);
    let mut builder = StreamBuilder::new(config);

    let num_requests = match case {
        TestCase::StopDueToReadAfterMaxReqs | TestCase::StopDueToFlushAfterMaxReqs => {
            max_packed.saturating_sub(1)
        }
        TestCase::StopDueToMaxReqNum | TestCase::RetPartialMaxFailIdx => max_packed,
        TestCase::StopDueToThreshold => max_packed.saturating_add(1),
        _ => base,
    };
    let count = num_requests as usize;
    let rng_for_sizes = if random { Some(&mut *rng) } else { None };

    match case {
        TestCase::RetPartialFollowedByAbort => builder.add_mixed_error_writes(count)?,
        TestCase::StopDueToRead
        | TestCase::StopDueToReadAfterMaxReqs
        | TestCase::StopDueToFlush
        | TestCase::StopDueToFlushAfterMaxReqs
        | TestCase::StopDueToEmptyQueue
        | TestCase::StopDueToMaxReqNum
        | TestCase::StopDueToThreshold
        | TestCase::RetPartialFollowedBySuccess
        | TestCase::RetPartialMultipleUntilSuccess
        | TestCase::RetPartialMaxFailIdx
        | TestCase::Cmd23PackedBitUnset => builder.add_writes(count, false, rng_for_sizes)?,
        _ => builder.add_writes(count, true, rng_for_sizes)?,
    }

    match case {
        TestCase::StopDueToRead | TestCase::StopDueToReadAfterMaxReqs => {
            builder.add_base_read()?;
        }
        TestCase::StopDueToFlush | TestCase::StopDueToFlushAfterMaxReqs => builder.add_flush()?,
        _ => {}
    }

    Ok(PreparedCase {
        stream: builder.finish(),
        expected: expected_stats(case, num_requests, max_packed),
        num_requests,
        recorded_requests: if case == TestCase::StopDueToThreshold {
            num_requests.saturating_sub(1)
        } else {
            num_requests
        },
    })
}

/// Statistics the driver should hold after `case` ran with `num_requests` writes.
///
/// The threshold case sizes its histogram entry from one request fewer than
/// it enqueued: the first `max` writes close one full batch and the
/// remaining write forms a batch of its own.
#[must_use]
pub fn expected_stats(case: TestCase, num_requests: u32, max_packed: u32) -> ExpectedStats {
    let mut expected = ExpectedStats::new(max_packed);
    let n = if case == TestCase::StopDueToThreshold {
        num_requests.saturating_sub(1)
    } else {
        num_requests
    };
    if n <= max_packed {
        expected.set_packing_events(n, 1);
    }

    match case {
        TestCase::StopDueToFlush | TestCase::StopDueToFlushAfterMaxReqs => {
            expected.set_stop_reason(StopReason::FlushOrDiscard, 1);
        }
        TestCase::StopDueToRead | TestCase::StopDueToReadAfterMaxReqs => {
            expected.set_stop_reason(StopReason::WrongDirection, 1);
        }
        TestCase::StopDueToThreshold => {
            expected.set_packing_events(1, 1);
            expected.set_stop_reason(StopReason::Threshold, 1);
            expected.set_stop_reason(StopReason::EmptyQueue, 1);
        }
        TestCase::StopDueToMaxReqNum | TestCase::RetPartialMaxFailIdx => {
            expected.set_stop_reason(StopReason::Threshold, 1);
        }
        _ => expected.set_stop_reason(StopReason::EmptyQueue, 1),
    }
    expected
}
