//! Request stream generation: seeded parameter draws and stream assembly.

pub mod builder;
pub mod rng;
