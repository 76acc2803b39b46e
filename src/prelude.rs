//! Convenience re-exports for library consumers.
//!
//! ```rust,no_run
//! use packed_cmd_harness::prelude::*;
//! ```

// Core
pub use crate::core::config::Config;
pub use crate::core::errors::{HarnessError, Result};

// Engine
pub use crate::engine::sim::{SimulatedDriver, SimulatedEngine};
pub use crate::engine::{
    Completion, CompletionVerdict, DispatchEngine, DriverHandle, PostCompletionHook,
    PreSubmissionHook,
};

// Scenarios
pub use crate::control::{ControlFile, ControlSurface, SeedAttribute};
pub use crate::scenario::catalog::{TestCase, TestGroup};
pub use crate::scenario::runner::{HarnessResult, RunnerState};
pub use crate::scenario::session::HarnessSession;

// Statistics and streams
pub use crate::stats::{ExpectedStats, PackingStats, StopReason};
pub use crate::stream::builder::{RequestDescriptor, RequestStream};

// Logging
pub use crate::logger::sink::{HarnessLoggerHandle, spawn_logger};
