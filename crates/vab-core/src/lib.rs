//! Foundational low-level utilities shared across vab crates.
//!
//! Provides the atomic file-write helper used by variable store persistence
//! and runtime state snapshots, plus unix timestamp helpers.

pub mod atomic_io;
pub mod time_utils;

pub use atomic_io::write_text_atomic;
pub use time_utils::{current_unix_timestamp, current_unix_timestamp_ms};
