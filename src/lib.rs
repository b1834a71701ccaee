//! covgen library crate
//!
//! Exposes the synthesis loop's modules so integration tests and tooling can
//! exercise internals without going through CLI startup.

pub mod candidate;
pub mod config;
pub mod deficiency;
pub mod lcov;
pub mod ollama;
pub mod prompt;
pub mod runloop;
pub mod toolchain;
pub mod util;
