//! Structured event logging: JSONL writer plus a logger thread fed over a channel.

pub mod jsonl;
pub mod sink;
