//! Collaborator interfaces consumed by the harness: the dispatch engine that
//! issues requests and calls the injection hooks, and the driver handle that
//! owns capability fields and packing statistics.

#![allow(missing_docs)]

pub mod sim;

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::core::errors::Result;
use crate::protocol::packed::PackedCommand;
use crate::stats::StatsCell;
use crate::stream::builder::RequestStream;

/// Outcome a post-completion hook may substitute for the device's own result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CompletionVerdict {
    Success,
    Abort,
    /// Requests before `fail_index` completed; the rest must be retried.
    Partial { fail_index: u32 },
    Retry,
    CommandError,
    DataError,
}

/// Aggregate outcome of one submitted stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Completion {
    pub completed: usize,
    pub failed: usize,
    /// Failed requests that were not tagged `error_expected`.
    pub unexpected: usize,
}

/// Called once per assembled packed batch, right before it reaches the transport.
pub trait PreSubmissionHook: Send + Sync {
    fn before_submit(&self, command: &mut PackedCommand, max_packed: u32);
}

/// Called once per completed packed batch, before the result is accepted.
/// Returning `None` passes the device's result through unmodified.
pub trait PostCompletionHook: Send + Sync {
    fn on_completion(&self, batch_len: u32) -> Option<CompletionVerdict>;
}

/// Driver state for the active request queue.
pub trait DriverHandle: Send + Sync {
    fn packing_capable(&self) -> bool;
    fn max_packed_writes(&self) -> u32;
    fn packing_statistics(&self) -> Arc<StatsCell>;
    fn reset_statistics(&self);
    /// Turn off the driver's adaptive packing heuristic so batching depends
    /// only on request arrival.
    fn disable_packing_control(&self);
}

/// Block dispatch layer driving the driver under test.
pub trait DispatchEngine: Send + Sync {
    fn active_queue(&self) -> Option<Arc<dyn DriverHandle>>;
    /// Submit a stream and block until every request has completed.
    fn submit(&self, stream: &RequestStream) -> Result<Completion>;
    fn set_pre_submission_hook(&self, hook: Option<Arc<dyn PreSubmissionHook>>);
    fn set_post_completion_hook(&self, hook: Option<Arc<dyn PostCompletionHook>>);
    fn set_ignore_this_round(&self, ignore: bool);
    /// Writes the engine saw in the current round that did not originate
    /// from the harness.
    fn foreign_writes_this_round(&self) -> u64;
    fn hooks_armed(&self) -> (bool, bool);
}
