//! The common measurement capability both backends implement.

use std::collections::BTreeMap;
use std::path::Path;

use scout_types::{MeasureError, MetricColumn};

/// Flat metric label -> value map produced by one run.
pub type MetricMap = BTreeMap<String, f64>;

/// A measurement backend wraps the artifact in an external profiler and
/// parses its output into a flat metric map. One call is one run.
pub trait Measure {
    /// Short backend name for logs and error messages.
    fn name(&self) -> &str;

    /// Execute the artifact once under the profiler with the given args and
    /// environment overlay, and parse the declared metrics.
    fn collect(
        &self,
        artifact: &Path,
        args: &[String],
        env: &BTreeMap<String, String>,
    ) -> Result<MetricMap, MeasureError>;

    /// The metric columns this backend is declared to produce, in order.
    fn metric_columns(&self) -> Vec<MetricColumn>;
}
