//! perf backend: wraps the artifact in `perf stat -x,` and parses the
//! machine-readable event counts from stderr.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use tracing::debug;

use scout_build::{run_command, CommandSpec};
use scout_types::{AggMode, MeasureError, MetricColumn, PerfConfig};

use crate::backend::{Measure, MetricMap};

const STDERR_TAIL: usize = 2000;

/// `perf stat` driver and CSV-line parser.
#[derive(Debug)]
pub struct PerfBackend {
    cfg: PerfConfig,
    timeout: Duration,
}

impl PerfBackend {
    pub fn new(cfg: PerfConfig, timeout_s: u64) -> Self {
        Self {
            cfg,
            timeout: Duration::from_secs(timeout_s),
        }
    }
}

impl Measure for PerfBackend {
    fn name(&self) -> &str {
        "perf"
    }

    fn collect(
        &self,
        artifact: &Path,
        args: &[String],
        env: &BTreeMap<String, String>,
    ) -> Result<MetricMap, MeasureError> {
        let mut spec = CommandSpec::new("perf")
            .arg("stat")
            .arg("-x,")
            .arg("-e")
            .arg(self.cfg.events.join(","));
        if let Some(cores) = &self.cfg.core_list {
            spec = spec.arg("--cpu").arg(cores.as_str());
        }
        spec = spec
            .arg("--")
            .arg(artifact.display().to_string())
            .args(args.iter().cloned())
            .envs(env);

        let out = run_command(&spec, self.timeout).map_err(|e| MeasureError::Spawn {
            program: "perf".to_string(),
            message: e.to_string(),
        })?;
        if out.timed_out {
            return Err(MeasureError::Timeout {
                timeout_s: self.timeout.as_secs(),
            });
        }
        if !out.success() {
            return Err(MeasureError::RunFailed {
                code: out.code,
                stderr_tail: out.stderr_tail(STDERR_TAIL),
            });
        }

        // perf writes the -x, table to stderr; the program owns stdout.
        let metrics = parse_stat(&out.stderr, &self.cfg.events);
        if metrics.is_empty() {
            return Err(MeasureError::ParseFailure {
                tool: "perf".to_string(),
            });
        }
        debug!(metrics = metrics.len(), "perf run parsed");
        Ok(metrics)
    }

    fn metric_columns(&self) -> Vec<MetricColumn> {
        self.cfg
            .events
            .iter()
            .cloned()
            .chain(std::iter::once("CPI".to_string()))
            .map(|name| MetricColumn {
                name,
                agg: AggMode::Avg,
                var: false,
            })
            .collect()
    }
}

/// Parse `perf stat -x,` output: `<count>,<unit>,<event>,...` lines.
/// Repeated event lines (per-cpu mode) are summed. Derives
/// `CPI = cycles / instructions` when both raw events are present.
pub fn parse_stat(stderr: &str, events: &[String]) -> MetricMap {
    let mut accum = MetricMap::new();
    for line in stderr.lines() {
        let mut fields = line.split(',');
        let (Some(raw_value), _unit, Some(raw_event)) =
            (fields.next(), fields.next(), fields.next())
        else {
            continue;
        };
        // "<not counted>" / "<not supported>" rows fail the parse and are skipped.
        let Ok(count) = raw_value.trim().replace(',', "").parse::<f64>() else {
            continue;
        };
        let base = base_event(raw_event);
        if !events.iter().any(|e| base_event(e) == base) {
            continue;
        }
        *accum.entry(base.to_string()).or_insert(0.0) += count;
    }

    if let (Some(&cycles), Some(&instructions)) =
        (accum.get("cycles"), accum.get("instructions"))
    {
        if instructions > 0.0 {
            accum.insert("CPI".to_string(), cycles / instructions);
        }
    }
    accum
}

/// `cpu/cache-misses/` -> `cache-misses`, `cycles:u` -> `cycles`.
fn base_event(raw: &str) -> &str {
    let trimmed = raw.trim().trim_matches('/');
    let last = trimmed.rsplit('/').next().unwrap_or(trimmed);
    last.split(':').next().unwrap_or(last)
}
