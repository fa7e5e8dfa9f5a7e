//! Core runtime services for the Kryne engine.
//!
//! This crate hosts everything the graphics runtime and its modules share:
//! pooled memory containers with generational handles, the job runtime with
//! its sync counters, and the small utility kit (bit twiddling, alignment,
//! hashing, per-frame data tracking).

pub mod assert;
pub mod common;
pub mod memory;
pub mod threads;
