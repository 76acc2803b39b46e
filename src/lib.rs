#![forbid(unsafe_code)]

//! Packed Command Harness (pch): fault-injection and conformance tests for
//! the packed-write path of a block storage driver.
//!
//! The harness drives known request streams through a dispatch engine,
//! corrupts packed headers before submission or rewrites completion results
//! afterwards, and checks the driver's packing statistics against what each
//! scenario should have produced.
//!
//! # Library usage
//!
//! Use the [`prelude`] for convenient access to the most common types:
//!
//! ```rust,no_run
//! use packed_cmd_harness::prelude::*;
//! ```
//!
//! Individual modules can also be imported directly:
//!
//! ```rust,no_run
//! use packed_cmd_harness::core::config::Config;
//! use packed_cmd_harness::scenario::catalog::{TestCase, TestGroup};
//! ```

pub mod prelude;

pub mod control;
pub mod core;
pub mod engine;
pub mod inject;
pub mod logger;
pub mod protocol;
pub mod scenario;
pub mod stats;
pub mod stream;
