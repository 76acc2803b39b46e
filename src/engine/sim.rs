//! In-process dispatch engine with a packing driver and device model.
//!
//! A worker thread receives submitted streams over a channel, forms write
//! batches the way a packing driver does, records packing statistics,
//! encodes each multi-request batch as a packed command, lets the device
//! model validate it, then runs completion recovery. The injection hooks are
//! called from the worker thread.

#![allow(missing_docs)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::thread;

use crossbeam_channel::{Receiver, Sender, bounded};
use parking_lot::{Mutex, RwLock};

use crate::core::config::{BLOCKS_PER_BIO, Config, DeviceConfig, HEADER_BLOCKS};
use crate::core::errors::{HarnessError, Result};
use crate::protocol::packed::{
    CMD23_ARG_PACKED, CMD23_ARG_REL_WR, CMD23_BITS_16_TO_29, Direction, PACKED_HDR_RW_WRITE,
    PACKED_HDR_VERSION, PackedCommand, PackedEntry,
};
use crate::stats::{StatsCell, StopReason};
use crate::stream::builder::{RequestDescriptor, RequestStream};

use super::{
    Completion, CompletionVerdict, DispatchEngine, DriverHandle, PostCompletionHook,
    PreSubmissionHook,
};

// ──────────────────── driver ────────────────────

/// Driver state for the simulated queue.
#[derive(Debug)]
pub struct SimulatedDriver {
    packing_capable: bool,
    max_packed_writes: u32,
    stats: Arc<StatsCell>,
    packing_control: AtomicBool,
}

impl SimulatedDriver {
    #[must_use]
    pub fn new(device: &DeviceConfig) -> Self {
        Self {
            packing_capable: device.packing_capable,
            max_packed_writes: device.max_packed_writes,
            stats: Arc::new(StatsCell::new(device.max_packed_writes, device.stats_enabled)),
            packing_control: AtomicBool::new(true),
        }
    }

    /// Whether the adaptive packing heuristic is still active. While it is,
    /// writes go out one at a time and no packing statistics are recorded.
    #[must_use]
    pub fn packing_control_enabled(&self) -> bool {
        self.packing_control.load(Ordering::Acquire)
    }
}

impl DriverHandle for SimulatedDriver {
    fn packing_capable(&self) -> bool {
        self.packing_capable
    }

    fn max_packed_writes(&self) -> u32 {
        self.max_packed_writes
    }

    fn packing_statistics(&self) -> Arc<StatsCell> {
        Arc::clone(&self.stats)
    }

    fn reset_statistics(&self) {
        self.stats.reset();
    }

    fn disable_packing_control(&self) {
        self.packing_control.store(false, Ordering::Release);
    }
}

// ──────────────────── shared worker state ────────────────────

struct Shared {
    driver: Arc<SimulatedDriver>,
    max_packed_sectors: u32,
    retry_limit: u32,
    foreign_writes_per_round: AtomicU32,
    pre_hook: RwLock<Option<Arc<dyn PreSubmissionHook>>>,
    post_hook: RwLock<Option<Arc<dyn PostCompletionHook>>>,
    ignore_round: AtomicBool,
    foreign_writes: AtomicU64,
}

enum Job {
    Submit {
        stream: RequestStream,
        reply: Sender<Completion>,
    },
    Shutdown,
}

// ──────────────────── engine ────────────────────

/// Dispatch engine backed by a worker thread and the simulated driver.
pub struct SimulatedEngine {
    shared: Arc<Shared>,
    tx: Sender<Job>,
    worker: Mutex<Option<thread::JoinHandle<()>>>,
}

impl SimulatedEngine {
    /// Build the driver from `config.device` and start the dispatch worker.
    pub fn new(config: &Config) -> Result<Self> {
        let device = &config.device;
        let shared = Arc::new(Shared {
            driver: Arc::new(SimulatedDriver::new(device)),
            max_packed_sectors: device.max_packed_sectors,
            retry_limit: device.retry_limit,
            foreign_writes_per_round: AtomicU32::new(device.foreign_writes_per_round),
            pre_hook: RwLock::new(None),
            post_hook: RwLock::new(None),
            ignore_round: AtomicBool::new(false),
            foreign_writes: AtomicU64::new(0),
        });

        let (tx, rx) = bounded::<Job>(4);
        let worker_shared = Arc::clone(&shared);
        let worker = thread::Builder::new()
            .name("pch-dispatch".to_string())
            .spawn(move || worker_main(&rx, &worker_shared))
            .map_err(|e| HarnessError::Dispatch {
                details: format!("failed to spawn dispatch worker: {e}"),
            })?;

        Ok(Self {
            shared,
            tx,
            worker: Mutex::new(Some(worker)),
        })
    }

    #[must_use]
    pub fn driver(&self) -> Arc<SimulatedDriver> {
        Arc::clone(&self.shared.driver)
    }

    /// Whether the harness marked the current round as ignored.
    #[must_use]
    pub fn round_ignored(&self) -> bool {
        self.shared.ignore_round.load(Ordering::Acquire)
    }

    /// Change how many foreign writes precede each submitted stream.
    pub fn set_foreign_writes_per_round(&self, count: u32) {
        self.shared
            .foreign_writes_per_round
            .store(count, Ordering::Release);
    }
}

impl DispatchEngine for SimulatedEngine {
    fn active_queue(&self) -> Option<Arc<dyn DriverHandle>> {
        let driver: Arc<dyn DriverHandle> = self.shared.driver.clone();
        Some(driver)
    }

    fn submit(&self, stream: &RequestStream) -> Result<Completion> {
        let (reply, done) = bounded(1);
        self.tx
            .send(Job::Submit {
                stream: stream.clone(),
                reply,
            })
            .map_err(|_| HarnessError::Dispatch {
                details: "dispatch worker is not running".to_string(),
            })?;
        done.recv().map_err(|_| HarnessError::Dispatch {
            details: "dispatch worker exited before completing the stream".to_string(),
        })
    }

    fn set_pre_submission_hook(&self, hook: Option<Arc<dyn PreSubmissionHook>>) {
        *self.shared.pre_hook.write() = hook;
    }

    fn set_post_completion_hook(&self, hook: Option<Arc<dyn PostCompletionHook>>) {
        *self.shared.post_hook.write() = hook;
    }

    fn set_ignore_this_round(&self, ignore: bool) {
        self.shared.ignore_round.store(ignore, Ordering::Release);
    }

    fn foreign_writes_this_round(&self) -> u64 {
        self.shared.foreign_writes.load(Ordering::Acquire)
    }

    fn hooks_armed(&self) -> (bool, bool) {
        (
            self.shared.pre_hook.read().is_some(),
            self.shared.post_hook.read().is_some(),
        )
    }
}

impl Drop for SimulatedEngine {
    fn drop(&mut self) {
        let _ = self.tx.send(Job::Shutdown);
        if let Some(worker) = self.worker.lock().take() {
            let _ = worker.join();
        }
    }
}

// ──────────────────── worker ────────────────────

fn worker_main(rx: &Receiver<Job>, shared: &Shared) {
    while let Ok(job) = rx.recv() {
        match job {
            Job::Submit { stream, reply } => {
                let completion = dispatch_stream(shared, &stream);
                let _ = reply.send(completion);
            }
            Job::Shutdown => break,
        }
    }
}

fn dispatch_stream(shared: &Shared, stream: &RequestStream) -> Completion {
    inject_foreign_writes(shared);

    let requests = stream.requests();
    let packing = !shared.driver.packing_control_enabled();
    let mut completion = Completion::default();
    let mut idx = 0;

    while idx < requests.len() {
        let head = &requests[idx];
        if head.direction != Direction::Write || !packing {
            tally(&mut completion, head, true);
            idx += 1;
            continue;
        }

        let (end, reason) = form_batch(
            requests,
            idx,
            shared.driver.max_packed_writes,
            shared.max_packed_sectors,
        );
        let batch = &requests[idx..end];
        {
            let mut state = shared.driver.stats.lock();
            if state.enabled {
                state
                    .stats
                    .record_packing_event(u32::try_from(batch.len()).unwrap_or(u32::MAX));
                state.stats.record_stop(reason);
            }
        }

        let outcomes = if batch.len() > 1 {
            execute_packed(shared, batch)
        } else {
            vec![true]
        };
        for (request, ok) in batch.iter().zip(outcomes) {
            tally(&mut completion, request, ok);
        }
        idx = end;
    }
    completion
}

/// Single-write batches issued ahead of the stream, as a filesystem sharing
/// the device would.
fn inject_foreign_writes(shared: &Shared) {
    let count = shared.foreign_writes_per_round.load(Ordering::Acquire);
    shared
        .foreign_writes
        .store(u64::from(count), Ordering::Release);
    if count == 0 {
        return;
    }
    let mut state = shared.driver.stats.lock();
    if state.enabled {
        for _ in 0..count {
            state.stats.record_packing_event(1);
            state.stats.record_stop(StopReason::EmptyQueue);
        }
    }
}

const fn tally(completion: &mut Completion, request: &RequestDescriptor, ok: bool) {
    if ok {
        completion.completed += 1;
    } else {
        completion.failed += 1;
        if !request.error_expected {
            completion.unexpected += 1;
        }
    }
}

/// Grow a batch from the write at `start`. Returns the exclusive end index
/// and the reason the batch closed.
fn form_batch(
    requests: &[RequestDescriptor],
    start: usize,
    max_packed: u32,
    max_sectors: u32,
) -> (usize, StopReason) {
    let max = max_packed.max(1) as usize;
    let mut count = 1;
    let mut blocks = u64::from(requests[start].bios) * u64::from(BLOCKS_PER_BIO);
    loop {
        if count == max {
            return (start + count, StopReason::Threshold);
        }
        let Some(next) = requests.get(start + count) else {
            return (start + count, StopReason::EmptyQueue);
        };
        match next.direction {
            Direction::Read => return (start + count, StopReason::WrongDirection),
            Direction::Flush => return (start + count, StopReason::FlushOrDiscard),
            Direction::Write => {
                let next_blocks = u64::from(next.bios) * u64::from(BLOCKS_PER_BIO);
                if blocks + next_blocks > u64::from(max_sectors) {
                    return (start + count, StopReason::ExceedsSectors);
                }
                blocks += next_blocks;
                count += 1;
            }
        }
    }
}

fn execute_packed(shared: &Shared, batch: &[RequestDescriptor]) -> Vec<bool> {
    let entries: Vec<PackedEntry> = batch
        .iter()
        .map(|r| PackedEntry {
            sector: r.start_sector,
            blocks: r.bios * BLOCKS_PER_BIO,
            reliable: false,
        })
        .collect();
    let mut command = PackedCommand::encode(&entries, Direction::Write, HEADER_BLOCKS);

    let pre_hook = shared.pre_hook.read().clone();
    if let Some(hook) = pre_hook {
        hook.before_submit(&mut command, shared.driver.max_packed_writes);
    }

    if device_rejects(&command, batch).is_some() {
        return vec![false; batch.len()];
    }
    recover(shared, batch.len())
}

/// Device-side validation of a packed command. Returns the reason for a rejection.
#[must_use]
pub fn device_rejects(command: &PackedCommand, batch: &[RequestDescriptor]) -> Option<&'static str> {
    if command.version() != PACKED_HDR_VERSION {
        return Some("invalid header version");
    }
    if command.rw_code() != PACKED_HDR_RW_WRITE {
        return Some("header R/W code does not match a write");
    }
    if command.entry_count() as usize != batch.len() {
        return Some("header request count differs from the batch");
    }
    for (idx, request) in batch.iter().enumerate() {
        let cmd23 = command.entry_cmd23(idx).unwrap_or(0);
        if cmd23 & CMD23_ARG_PACKED != 0 {
            return Some("entry CMD23 argument carries the packed bit");
        }
        #[allow(clippy::cast_possible_truncation)]
        let sector = request.start_sector as u32;
        if command.entry_address(idx) != Some(sector) {
            return Some("entry address does not match its request");
        }
    }
    if !command.sbc_packed() {
        // Plain multi-block write.
        return None;
    }
    if command.sbc_arg & CMD23_ARG_REL_WR != 0 {
        return Some("packed CMD23 with reliable write bit");
    }
    if command.sbc_arg & CMD23_BITS_16_TO_29 != 0 {
        return Some("packed CMD23 with reserved bits 16-29");
    }
    let count = command.sbc_block_count();
    if count == 0 {
        return Some("packed CMD23 block count is zero");
    }
    if count != command.data_blocks + command.header_blocks {
        return Some("packed CMD23 block count does not cover header and data");
    }
    None
}

/// Completion and recovery of an accepted batch of `len` requests.
///
/// Partial completes the prefix and retries the rest; Retry reissues the
/// remainder up to `retry_limit` times; Abort and the error verdicts fail
/// whatever remains.
fn recover(shared: &Shared, len: usize) -> Vec<bool> {
    let mut outcomes = vec![false; len];
    let mut done = 0;
    let mut retries = 0;
    let post_hook = shared.post_hook.read().clone();

    while done < len {
        let remaining = len - done;
        #[allow(clippy::cast_possible_truncation)]
        let verdict = post_hook
            .as_ref()
            .and_then(|hook| hook.on_completion(remaining as u32))
            .unwrap_or(CompletionVerdict::Success);
        match verdict {
            CompletionVerdict::Success => {
                outcomes[done..].fill(true);
                done = len;
            }
            CompletionVerdict::Partial { fail_index } => {
                let progress = (fail_index as usize).min(remaining);
                outcomes[done..done + progress].fill(true);
                done += progress;
                if progress == 0 {
                    retries += 1;
                    if retries > shared.retry_limit {
                        break;
                    }
                }
            }
            CompletionVerdict::Retry => {
                retries += 1;
                if retries > shared.retry_limit {
                    break;
                }
            }
            CompletionVerdict::Abort
            | CompletionVerdict::CommandError
            | CompletionVerdict::DataError => break,
        }
    }
    outcomes
}
