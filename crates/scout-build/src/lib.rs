//! # scout-build
//!
//! Blocking subprocess execution with timeouts, and the build backends
//! (single-source compile, Make, CMake) that turn a build plan into a
//! runnable artifact.

pub mod builder;
pub mod process;

pub use builder::{BuildOutcome, Builder};
pub use process::{run_command, CommandOutput, CommandSpec};
