//! Test catalog, per-case recipes, the harness session and the runner.

pub mod catalog;
pub mod recipe;
pub mod runner;
pub mod session;
pub mod verify;
