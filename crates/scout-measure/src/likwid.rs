//! LIKWID backend: wraps the artifact in `likwid-perfctr` and parses its
//! grouped table output.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use tracing::debug;

use scout_build::{run_command, CommandSpec};
use scout_types::{AggMode, LikwidConfig, MeasureError, MetricColumn, MetricSpec};

use crate::backend::{Measure, MetricMap};

const STDERR_TAIL: usize = 2000;

/// `likwid-perfctr` driver and table parser.
#[derive(Debug)]
pub struct LikwidBackend {
    cfg: LikwidConfig,
    timeout: Duration,
}

impl LikwidBackend {
    pub fn new(cfg: LikwidConfig, timeout_s: u64) -> Self {
        Self {
            cfg,
            timeout: Duration::from_secs(timeout_s),
        }
    }
}

impl Measure for LikwidBackend {
    fn name(&self) -> &str {
        "likwid"
    }

    fn collect(
        &self,
        artifact: &Path,
        args: &[String],
        env: &BTreeMap<String, String>,
    ) -> Result<MetricMap, MeasureError> {
        let mut spec = CommandSpec::new("likwid-perfctr");
        if let Some(cores) = &self.cfg.core_list {
            spec = spec.arg("-C").arg(cores.as_str());
        }
        let group = match &self.cfg.group {
            Some(group) => group.clone(),
            None => self.cfg.events.join(","),
        };
        spec = spec
            .arg("-g")
            .arg(group)
            .arg(artifact.display().to_string())
            .args(args.iter().cloned())
            .envs(env);

        let out = run_command(&spec, self.timeout).map_err(|e| MeasureError::Spawn {
            program: "likwid-perfctr".to_string(),
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

        let metrics = parse_table(&out.stdout, &self.cfg.metrics);
        if metrics.is_empty() {
            return Err(MeasureError::ParseFailure {
                tool: "likwid-perfctr".to_string(),
            });
        }
        debug!(metrics = metrics.len(), "likwid run parsed");
        Ok(metrics)
    }

    fn metric_columns(&self) -> Vec<MetricColumn> {
        self.cfg
            .metrics
            .iter()
            .map(|m| MetricColumn {
                name: m.name.clone(),
                agg: m.agg,
                var: m.var,
            })
            .collect()
    }
}

/// Parse the grouped likwid-perfctr table. `| <name> STAT | Sum | Min | Max
/// | Avg |` rows supply a precomputed average; per-thread rows supply one
/// cell per hardware thread, reduced here according to the metric's agg so
/// that each run yields one scalar per metric.
pub fn parse_table(output: &str, specs: &[MetricSpec]) -> MetricMap {
    let mut per_thread: BTreeMap<&str, Vec<f64>> = BTreeMap::new();
    let mut stat_avg: BTreeMap<&str, f64> = BTreeMap::new();

    for line in output.lines() {
        let Some(stripped) = line.trim_start().strip_prefix('|') else {
            continue;
        };
        let cells: Vec<&str> = stripped
            .split('|')
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .collect();
        let Some((&name, values)) = cells.split_first() else {
            continue;
        };

        if let Some(base) = name.strip_suffix("STAT").map(str::trim_end) {
            if let Some(spec) = specs.iter().find(|s| s.name == base) {
                // Columns: Sum | Min | Max | Avg
                if let Some(avg) = values.get(3).and_then(|c| parse_num(c)) {
                    stat_avg.insert(spec.name.as_str(), avg);
                }
            }
            continue;
        }

        if let Some(spec) = specs.iter().find(|s| s.name == name) {
            let bucket = per_thread.entry(spec.name.as_str()).or_default();
            bucket.extend(values.iter().filter_map(|c| parse_num(c)));
        }
    }

    let mut result = MetricMap::new();
    for spec in specs {
        let values = per_thread.get(spec.name.as_str());
        let reduced = match (spec.agg, stat_avg.get(spec.name.as_str())) {
            // The table's own Avg column is authoritative when present.
            (AggMode::Avg, Some(avg)) => Some(*avg),
            _ => values.and_then(|v| reduce(spec.agg, v)),
        };
        if let Some(value) = reduced {
            result.insert(spec.name.clone(), value);
        }
    }
    result
}

fn reduce(agg: AggMode, values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(match agg {
        AggMode::Avg => values.iter().sum::<f64>() / values.len() as f64,
        AggMode::Min => values.iter().cloned().fold(f64::INFINITY, f64::min),
        AggMode::Max => values.iter().cloned().fold(f64::NEG_INFINITY, f64::max),
        AggMode::Median => {
            let mut sorted = values.to_vec();
            sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
            let mid = sorted.len() / 2;
            if sorted.len() % 2 == 0 {
                (sorted[mid - 1] + sorted[mid]) / 2.0
            } else {
                sorted[mid]
            }
        }
    })
}

/// Tolerant number parsing for likwid cells: plain floats, grouped integers
/// (`1.234.567`, `1'234'567`, narrow-NBSP groups) and decimal commas.
pub fn parse_num(text: &str) -> Option<f64> {
    let t = text.trim();
    if t.is_empty() {
        return None;
    }
    if let Ok(v) = t.parse::<f64>() {
        return Some(v);
    }
    if let Some(v) = parse_grouped(t) {
        return Some(v);
    }
    // Decimal comma: 0,95 -> 0.95
    if let Some((int, frac)) = t.split_once(',') {
        if !int.is_empty()
            && int.chars().all(|c| c.is_ascii_digit())
            && !frac.is_empty()
            && frac.chars().all(|c| c.is_ascii_digit())
        {
            return format!("{int}.{frac}").parse().ok();
        }
    }
    None
}

/// `1.234.567`, `1'234'567` or `1\u{202F}234\u{202F}567`, optionally with a
/// decimal-comma fraction.
fn parse_grouped(t: &str) -> Option<f64> {
    let (mantissa, frac) = match t.split_once(',') {
        Some((m, f)) => (m, Some(f)),
        None => (t, None),
    };
    let sep = ['.', '\'', '\u{202F}']
        .into_iter()
        .find(|s| mantissa.contains(*s))?;
    let groups: Vec<&str> = mantissa.split(sep).collect();
    if groups.len() < 2
        || groups[0].is_empty()
        || groups[0].len() > 3
        || !groups[0].chars().all(|c| c.is_ascii_digit())
    {
        return None;
    }
    for group in &groups[1..] {
        if group.len() != 3 || !group.chars().all(|c| c.is_ascii_digit()) {
            return None;
        }
    }
    let mut joined: String = groups.concat();
    if let Some(frac) = frac {
        if frac.is_empty() || !frac.chars().all(|c| c.is_ascii_digit()) {
            return None;
        }
        joined = format!("{joined}.{frac}");
    }
    joined.parse().ok()
}
