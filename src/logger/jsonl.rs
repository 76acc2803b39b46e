//! Run-scoped JSONL event log.
//!
//! Every `pch run` writes its events to one file, one JSON object per line.
//! The log starts empty unless `logging.append` is set. If the log path
//! cannot be opened the writer tries `logging.fallback_path`, then stderr.
//! A write error part way through a run moves the rest of the run to stderr;
//! a run never fails because its log did.

#![allow(missing_docs)]

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::core::config::{LoggingConfig, PathsConfig};
use crate::core::errors::{HarnessError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

/// The `event` field of a log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    RunStarted,
    NotSupported,
    CycleStarted,
    CaseStarted,
    CasePassed,
    CaseFailed,
    RoundIgnored,
    InjectorFired,
    StatsDump,
    RunCompleted,
    /// Trouble inside the logger itself, such as dropped events.
    Error,
}

/// One log line. Only `ts`, `event` and `severity` are always present.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    /// RFC 3339 UTC timestamp.
    pub ts: String,
    pub event: EventType,
    pub severity: Severity,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub case: Option<String>,
    /// Whether the pass used randomized parameters.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub random: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cycle: Option<u32>,
    /// Statistics field that disagreed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failures: Option<u32>,
    /// Requests in the batch an injector acted on.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch_len: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl LogEntry {
    pub fn new(event: EventType, severity: Severity) -> Self {
        Self {
            ts: chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
            event,
            severity,
            group: None,
            case: None,
            random: None,
            seed: None,
            cycle: None,
            field: None,
            observed: None,
            expected: None,
            failures: None,
            batch_len: None,
            error_code: None,
            details: None,
        }
    }
}

/// Where the event log goes for one run.
#[derive(Debug, Clone)]
pub struct JsonlConfig {
    pub path: PathBuf,
    /// Tried when `path` cannot be opened.
    pub fallback_path: Option<PathBuf>,
    /// Keep earlier runs' lines instead of starting the log empty.
    pub append: bool,
}

impl JsonlConfig {
    /// Writer settings from the `[logging]` and `[paths]` config sections.
    #[must_use]
    pub fn from_config(logging: &LoggingConfig, paths: &PathsConfig) -> Self {
        Self {
            path: paths.jsonl_log.clone(),
            fallback_path: logging.fallback_path.clone(),
            append: logging.append,
        }
    }
}

enum Destination {
    File(BufWriter<File>),
    Stderr,
}

/// Line writer owned by the logger thread.
pub struct JsonlWriter {
    destination: Destination,
}

impl JsonlWriter {
    /// Open the run's log: the configured path, else the fallback, else stderr.
    pub fn open(config: &JsonlConfig) -> Self {
        let candidates = std::iter::once(&config.path).chain(config.fallback_path.as_ref());
        for path in candidates {
            match open_log(path, config.append) {
                Ok(file) => {
                    if path != &config.path {
                        warn(&format!(
                            "cannot open {}, logging to {}",
                            config.path.display(),
                            path.display()
                        ));
                    }
                    return Self {
                        destination: Destination::File(BufWriter::new(file)),
                    };
                }
                Err(e) => warn(&e.to_string()),
            }
        }
        warn("no usable log file, logging to stderr");
        Self {
            destination: Destination::Stderr,
        }
    }

    /// Write `entry` as a single line.
    pub fn write_entry(&mut self, entry: &LogEntry) {
        let line = match serde_json::to_string(entry) {
            Ok(json) => json,
            Err(e) => {
                warn(&format!("serialize error: {e}"));
                return;
            }
        };
        if let Destination::File(out) = &mut self.destination {
            if writeln!(out, "{line}").is_ok() {
                return;
            }
            warn("log write failed, logging the rest of the run to stderr");
            self.destination = Destination::Stderr;
        }
        let _ = writeln!(io::stderr(), "[PCH-JSONL] {line}");
    }

    /// Flush and sync the log at the end of the run.
    pub fn finish(&mut self) {
        if let Destination::File(out) = &mut self.destination {
            let _ = out.flush();
            let _ = out.get_ref().sync_data();
        }
    }

    #[cfg(test)]
    fn is_stderr(&self) -> bool {
        matches!(self.destination, Destination::Stderr)
    }
}

fn open_log(path: &Path, append: bool) -> Result<File> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|source| HarnessError::io(parent, source))?;
    }
    let mut options = OpenOptions::new();
    options.create(true);
    if append {
        options.append(true);
    } else {
        options.write(true).truncate(true);
    }
    options.open(path).map_err(|source| HarnessError::io(path, source))
}

fn warn(message: &str) {
    let _ = writeln!(io::stderr(), "[PCH-JSONL] {message}");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(path: PathBuf) -> JsonlConfig {
        JsonlConfig {
            path,
            fallback_path: None,
            append: false,
        }
    }

    fn lines(path: &Path) -> Vec<serde_json::Value> {
        fs::read_to_string(path)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    #[test]
    fn entries_become_json_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.jsonl");
        let mut writer = JsonlWriter::open(&config(path.clone()));

        let mut entry = LogEntry::new(EventType::CaseFailed, Severity::Warning);
        entry.group = Some("packing".to_string());
        entry.field = Some("packing_events[6]".to_string());
        entry.observed = Some(0);
        entry.expected = Some(1);
        writer.write_entry(&entry);
        writer.write_entry(&LogEntry::new(EventType::CasePassed, Severity::Info));
        writer.finish();

        let parsed = lines(&path);
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0]["event"], "case_failed");
        assert_eq!(parsed[0]["severity"], "warning");
        assert_eq!(parsed[0]["field"], "packing_events[6]");
        assert_eq!(parsed[0]["expected"], 1);
        assert_eq!(parsed[1]["event"], "case_passed");
    }

    #[test]
    fn each_run_starts_a_fresh_log_unless_appending() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.jsonl");
        for _ in 0..2 {
            let mut writer = JsonlWriter::open(&config(path.clone()));
            writer.write_entry(&LogEntry::new(EventType::RunStarted, Severity::Info));
            writer.finish();
        }
        assert_eq!(lines(&path).len(), 1);

        let mut appending = config(path.clone());
        appending.append = true;
        let mut writer = JsonlWriter::open(&appending);
        writer.write_entry(&LogEntry::new(EventType::RunCompleted, Severity::Info));
        writer.finish();
        assert_eq!(lines(&path).len(), 2);
    }

    #[test]
    fn unopenable_path_uses_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        fs::write(&blocker, "").unwrap();
        let fallback = dir.path().join("fallback.jsonl");
        let mut cfg = config(blocker.join("events.jsonl"));
        cfg.fallback_path = Some(fallback.clone());

        let mut writer = JsonlWriter::open(&cfg);
        assert!(!writer.is_stderr());
        writer.write_entry(&LogEntry::new(EventType::Error, Severity::Warning));
        writer.finish();
        assert_eq!(lines(&fallback)[0]["event"], "error");
    }

    #[test]
    fn no_usable_file_falls_back_to_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        fs::write(&blocker, "").unwrap();
        let mut writer = JsonlWriter::open(&config(blocker.join("events.jsonl")));
        assert!(writer.is_stderr());
        writer.write_entry(&LogEntry::new(EventType::RunStarted, Severity::Info));
        writer.finish();
    }

    #[test]
    fn optional_fields_are_omitted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sparse.jsonl");
        let mut writer = JsonlWriter::open(&config(path.clone()));
        writer.write_entry(&LogEntry::new(EventType::RunStarted, Severity::Info));
        writer.finish();

        let line = fs::read_to_string(&path).unwrap();
        assert!(!line.contains("\"group\""));
        assert!(!line.contains("\"seed\""));
        assert!(!line.contains("\"batch_len\""));
    }

    #[test]
    fn config_sections_map_onto_writer_settings() {
        let logging = LoggingConfig {
            fallback_path: Some(PathBuf::from("/tmp/pch-fallback.jsonl")),
            append: true,
            ..LoggingConfig::default()
        };
        let paths = PathsConfig {
            config_file: PathBuf::from("/etc/pch.toml"),
            jsonl_log: PathBuf::from("/var/log/pch.jsonl"),
        };
        let cfg = JsonlConfig::from_config(&logging, &paths);
        assert_eq!(cfg.path, PathBuf::from("/var/log/pch.jsonl"));
        assert_eq!(cfg.fallback_path, logging.fallback_path);
        assert!(cfg.append);
    }
}
