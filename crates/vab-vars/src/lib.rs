//! Per-process variable store for the VoiceAttack bridge.
//!
//! Each tracked process owns one `Name=Value` line-oriented store file; the
//! store keeps an in-memory cache per process, tracks which process is
//! currently active, and parses the `@Process:Name` address prefix shared by
//! the update and request directions.

pub mod address;
pub mod store;

pub use address::parse_address;
pub use store::{VariableStore, DEFAULT_PROCESS};
