//! PCH-prefixed error types with structured error codes.

#![allow(missing_docs)]

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Shared `Result` alias for the project.
pub type Result<T> = std::result::Result<T, HarnessError>;

/// Top-level error type for the packed command harness.
#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("[PCH-1001] packed writes not supported: {details}")]
    NotSupported { details: String },

    #[error("[PCH-1101] invalid configuration: {details}")]
    InvalidConfig { details: String },

    #[error("[PCH-1102] missing configuration file: {path}")]
    MissingConfig { path: PathBuf },

    #[error("[PCH-1103] configuration parse failure in {context}: {details}")]
    ConfigParse {
        context: &'static str,
        details: String,
    },

    #[error("[PCH-2001] request stream preparation failed: {details}")]
    Resource { details: String },

    #[error("[PCH-2101] wrong pack stats for {field}: got {observed}, expected {expected}")]
    StatsMismatch {
        field: String,
        observed: u32,
        expected: u32,
    },

    #[error("[PCH-2102] {unexpected} request(s) completed against their error expectation in {case}")]
    OutcomeMismatch {
        case: &'static str,
        unexpected: usize,
    },

    #[error("[PCH-3001] packing statistics unavailable: {details}")]
    StatsUnavailable { details: String },

    #[error("[PCH-3002] dispatch failure: {details}")]
    Dispatch { details: String },

    #[error("[PCH-3101] IO failure at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("[PCH-3102] serialization failure in {context}: {details}")]
    Serialization {
        context: &'static str,
        details: String,
    },
}

impl HarnessError {
    /// Stable machine-parseable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::NotSupported { .. } => "PCH-1001",
            Self::InvalidConfig { .. } => "PCH-1101",
            Self::MissingConfig { .. } => "PCH-1102",
            Self::ConfigParse { .. } => "PCH-1103",
            Self::Resource { .. } => "PCH-2001",
            Self::StatsMismatch { .. } => "PCH-2101",
            Self::OutcomeMismatch { .. } => "PCH-2102",
            Self::StatsUnavailable { .. } => "PCH-3001",
            Self::Dispatch { .. } => "PCH-3002",
            Self::Io { .. } => "PCH-3101",
            Self::Serialization { .. } => "PCH-3102",
        }
    }

    /// Whether the error ends the whole invocation rather than one test case.
    #[must_use]
    pub const fn is_fatal_to_run(&self) -> bool {
        matches!(self, Self::NotSupported { .. })
    }

    /// Convenience constructor for IO errors with a known path.
    #[must_use]
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }
}

impl From<serde_json::Error> for HarnessError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization {
            context: "serde_json",
            details: value.to_string(),
        }
    }
}

impl From<toml::de::Error> for HarnessError {
    fn from(value: toml::de::Error) -> Self {
        Self::ConfigParse {
            context: "toml",
            details: value.to_string(),
        }
    }
}
