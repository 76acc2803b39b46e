//! Logger thread for harness events.
//!
//! A dedicated thread owns the `JsonlWriter`. The runner and the injector
//! callbacks (which run on the dispatch engine's thread) send `HarnessEvent`s
//! over a bounded crossbeam channel with `try_send()`, so neither is ever
//! blocked by logging back-pressure.

#![allow(missing_docs)]

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};

use crate::core::errors::{HarnessError, Result};
use crate::inject::InjectedFault;
use crate::logger::jsonl::{EventType, JsonlConfig, JsonlWriter, LogEntry, Severity};
use crate::scenario::catalog::{TestCase, TestGroup};

// ──────────────────── channel capacity ────────────────────

const CHANNEL_CAPACITY: usize = 1024;

// ──────────────────── public event type ────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HarnessEvent {
    RunStarted {
        group: TestGroup,
        repeat: u32,
        seed: u32,
        config_hash: String,
    },
    NotSupported {
        group: TestGroup,
        details: String,
    },
    CycleStarted {
        group: TestGroup,
        cycle: u32,
    },
    CaseStarted {
        case: TestCase,
        random: bool,
        seed: u32,
        num_requests: u32,
    },
    CasePassed {
        case: TestCase,
        random: bool,
    },
    CaseFailed {
        case: TestCase,
        random: bool,
        error_code: &'static str,
        message: String,
        field: Option<String>,
        observed: Option<u32>,
        expected: Option<u32>,
    },
    RoundIgnored {
        case: TestCase,
        random: bool,
        foreign_writes: u64,
    },
    /// Sent from the dispatch thread, so it carries only `Copy` data.
    InjectorFired {
        case: Option<TestCase>,
        fault: InjectedFault,
        batch_len: u32,
    },
    StatsDump {
        case: TestCase,
        stats: String,
    },
    RunCompleted {
        group: TestGroup,
        passed: bool,
        failures: u32,
        ignored_rounds: u32,
    },
    /// Sentinel that stops the logger thread.
    Shutdown,
}

impl HarnessEvent {
    /// Failure event for `case`, carrying the mismatch detail when there is one.
    #[must_use]
    pub fn case_failed(case: TestCase, random: bool, error: &HarnessError) -> Self {
        let (field, observed, expected) = match error {
            HarnessError::StatsMismatch {
                field,
                observed,
                expected,
            } => (Some(field.clone()), Some(*observed), Some(*expected)),
            _ => (None, None, None),
        };
        Self::CaseFailed {
            case,
            random,
            error_code: error.code(),
            message: error.to_string(),
            field,
            observed,
            expected,
        }
    }
}

// ──────────────────── public handle ────────────────────

/// Cheaply-cloneable handle for sending harness events. Never blocks.
#[derive(Debug, Clone)]
pub struct HarnessLoggerHandle {
    tx: Sender<HarnessEvent>,
    dropped_events: Arc<AtomicU64>,
}

impl HarnessLoggerHandle {
    /// A handle whose events go nowhere.
    #[must_use]
    pub fn disabled() -> Self {
        let (handle, rx) = Self::channel(1);
        drop(rx);
        handle
    }

    /// A handle plus the raw receiving end, without a logger thread.
    #[must_use]
    pub fn channel(capacity: usize) -> (Self, Receiver<HarnessEvent>) {
        let (tx, rx) = bounded(capacity);
        (
            Self {
                tx,
                dropped_events: Arc::new(AtomicU64::new(0)),
            },
            rx,
        )
    }

    /// Send an event. A full channel drops the event and bumps the counter.
    pub fn send(&self, event: HarnessEvent) {
        if let Err(TrySendError::Full(_)) = self.tx.try_send(event) {
            self.dropped_events.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn injector_fired(&self, case: Option<TestCase>, fault: InjectedFault, batch_len: u32) {
        self.send(HarnessEvent::InjectorFired {
            case,
            fault,
            batch_len,
        });
    }

    /// Number of events dropped due to channel back-pressure.
    pub fn dropped_events(&self) -> u64 {
        self.dropped_events.load(Ordering::Relaxed)
    }

    /// Ask the logger thread to flush and exit.
    pub fn shutdown(&self) {
        let _ = self.tx.send(HarnessEvent::Shutdown);
    }
}

// ──────────────────── spawn ────────────────────

/// Spawn the logger thread. It runs until `shutdown()` or until every handle is dropped.
pub fn spawn_logger(
    config: JsonlConfig,
) -> Result<(HarnessLoggerHandle, thread::JoinHandle<()>)> {
    spawn_logger_with_capacity(config, CHANNEL_CAPACITY)
}

pub fn spawn_logger_with_capacity(
    config: JsonlConfig,
    capacity: usize,
) -> Result<(HarnessLoggerHandle, thread::JoinHandle<()>)> {
    let (handle, rx) = HarnessLoggerHandle::channel(capacity);
    let dropped = Arc::clone(&handle.dropped_events);

    let join = thread::Builder::new()
        .name("pch-logger".to_string())
        .spawn(move || logger_thread_main(rx, config, dropped))
        .map_err(|e| HarnessError::Dispatch {
            details: format!("failed to spawn logger thread: {e}"),
        })?;

    Ok((handle, join))
}

// ──────────────────── logger thread ────────────────────

#[allow(clippy::needless_pass_by_value)]
fn logger_thread_main(rx: Receiver<HarnessEvent>, config: JsonlConfig, dropped: Arc<AtomicU64>) {
    let mut jsonl = JsonlWriter::open(&config);

    while let Ok(event) = rx.recv() {
        let d = dropped.swap(0, Ordering::Relaxed);
        if d > 0 {
            let mut warn = LogEntry::new(EventType::Error, Severity::Warning);
            warn.details = Some(format!("{d} log events dropped due to back-pressure"));
            jsonl.write_entry(&warn);
        }

        if matches!(event, HarnessEvent::Shutdown) {
            break;
        }
        jsonl.write_entry(&event_to_log_entry(&event));
    }

    jsonl.finish();
}

// ──────────────────── event conversion ────────────────────

fn case_entry(event: EventType, severity: Severity, case: TestCase, random: bool) -> LogEntry {
    let mut e = LogEntry::new(event, severity);
    e.group = Some(case.group().to_string());
    e.case = Some(case.label().to_string());
    e.random = Some(random);
    e
}

#[allow(clippy::too_many_lines)]
fn event_to_log_entry(event: &HarnessEvent) -> LogEntry {
    match event {
        HarnessEvent::RunStarted {
            group,
            repeat,
            seed,
            config_hash,
        } => {
            let mut e = LogEntry::new(EventType::RunStarted, Severity::Info);
            e.group = Some(group.to_string());
            e.seed = Some(*seed);
            e.details = Some(format!("repeat={repeat} config_hash={config_hash}"));
            e
        }
        HarnessEvent::NotSupported { group, details } => {
            let mut e = LogEntry::new(EventType::NotSupported, Severity::Warning);
            e.group = Some(group.to_string());
            e.error_code = Some("PCH-1001".to_string());
            e.details = Some(details.clone());
            e
        }
        HarnessEvent::CycleStarted { group, cycle } => {
            let mut e = LogEntry::new(EventType::CycleStarted, Severity::Info);
            e.group = Some(group.to_string());
            e.cycle = Some(*cycle);
            e
        }
        HarnessEvent::CaseStarted {
            case,
            random,
            seed,
            num_requests,
        } => {
            let mut e = case_entry(EventType::CaseStarted, Severity::Info, *case, *random);
            e.seed = Some(*seed);
            e.details = Some(format!("num_requests={num_requests}"));
            e
        }
        HarnessEvent::CasePassed { case, random } => {
            case_entry(EventType::CasePassed, Severity::Info, *case, *random)
        }
        HarnessEvent::CaseFailed {
            case,
            random,
            error_code,
            message,
            field,
            observed,
            expected,
        } => {
            let mut e = case_entry(EventType::CaseFailed, Severity::Critical, *case, *random);
            e.error_code = Some((*error_code).to_string());
            e.details = Some(message.clone());
            e.field.clone_from(field);
            e.observed = *observed;
            e.expected = *expected;
            e
        }
        HarnessEvent::RoundIgnored {
            case,
            random,
            foreign_writes,
        } => {
            let mut e = case_entry(EventType::RoundIgnored, Severity::Warning, *case, *random);
            e.details = Some(format!("foreign_writes={foreign_writes}"));
            e
        }
        HarnessEvent::InjectorFired {
            case,
            fault,
            batch_len,
        } => {
            let mut e = LogEntry::new(EventType::InjectorFired, Severity::Info);
            if let Some(case) = case {
                e.group = Some(case.group().to_string());
                e.case = Some(case.label().to_string());
            }
            e.batch_len = Some(*batch_len);
            e.details = Some(match fault {
                InjectedFault::Header(mutation) => format!("pre-submission {mutation:?}"),
                InjectedFault::Completion(verdict) => format!("post-completion {verdict:?}"),
            });
            e
        }
        HarnessEvent::StatsDump { case, stats } => {
            let mut e = LogEntry::new(EventType::StatsDump, Severity::Info);
            e.group = Some(case.group().to_string());
            e.case = Some(case.label().to_string());
            e.details = Some(stats.clone());
            e
        }
        HarnessEvent::RunCompleted {
            group,
            passed,
            failures,
            ignored_rounds,
        } => {
            let severity = if *passed {
                Severity::Info
            } else {
                Severity::Critical
            };
            let mut e = LogEntry::new(EventType::RunCompleted, severity);
            e.group = Some(group.to_string());
            e.failures = Some(*failures);
            e.details = Some(format!("passed={passed} ignored_rounds={ignored_rounds}"));
            e
        }
        HarnessEvent::Shutdown => LogEntry::new(EventType::RunCompleted, Severity::Info),
    }
}

// ──────────────────── tests ────────────────────
