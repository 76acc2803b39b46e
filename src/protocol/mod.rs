//! Wire-level structures the driver hands to the transport.

pub mod packed;
