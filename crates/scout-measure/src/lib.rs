//! # scout-measure
//!
//! The measurement side of the pipeline: a common `Measure` capability with
//! LIKWID and perf implementations, repeated-run sampling, and metric
//! aggregation. Adding a backend means implementing `Measure` plus a
//! parser; nothing else changes.

pub mod aggregate;
pub mod backend;
pub mod likwid;
pub mod perf;
pub mod runner;

pub use aggregate::{aggregate, SampleMatrix};
pub use backend::{Measure, MetricMap};
pub use likwid::LikwidBackend;
pub use perf::PerfBackend;
pub use runner::Runner;
