//! Study definition: the immutable, validated form of the JSON config file.
//!
//! Loading happens in two steps: serde deserialization into raw structs,
//! then an explicit validation pass that produces `ConfigError` values.
//! Unknown top-level keys are ignored with a warning.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::errors::{ConfigError, ScoutError, ScoutResult};

/// Measurement backend selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    Likwid,
    Perf,
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Likwid => write!(f, "likwid"),
            Self::Perf => write!(f, "perf"),
        }
    }
}

/// Whether an objective is minimized or maximized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Goal {
    Min,
    Max,
}

impl Default for Goal {
    fn default() -> Self {
        Self::Min
    }
}

/// One measured objective: a metric name and an optimization direction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Objective {
    #[serde(default = "default_objective_metric")]
    pub metric: String,
    #[serde(default)]
    pub goal: Goal,
}

fn default_objective_metric() -> String {
    "CPI".to_string()
}

impl Default for Objective {
    fn default() -> Self {
        Self {
            metric: default_objective_metric(),
            goal: Goal::Min,
        }
    }
}

/// How repeated samples of one metric are reduced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggMode {
    Avg,
    Median,
    Min,
    Max,
}

impl Default for AggMode {
    fn default() -> Self {
        Self::Avg
    }
}

/// A metric declaration: exact backend label, aggregation, optional variance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricSpec {
    pub name: String,
    #[serde(default)]
    pub agg: AggMode,
    #[serde(default)]
    pub var: bool,
}

impl MetricSpec {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            agg: AggMode::Avg,
            var: false,
        }
    }
}

/// Accepts either a bare metric name or the full `{name, agg, var}` object.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum MetricSpecRaw {
    Name(String),
    Full(MetricSpec),
}

impl From<MetricSpecRaw> for MetricSpec {
    fn from(raw: MetricSpecRaw) -> Self {
        match raw {
            MetricSpecRaw::Name(name) => MetricSpec::named(name),
            MetricSpecRaw::Full(spec) => spec,
        }
    }
}

/// Accepts either a list of event names or a comma-separated string.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum EventsRaw {
    List(Vec<String>),
    Joined(String),
}

impl EventsRaw {
    fn into_list(self) -> Vec<String> {
        match self {
            Self::List(v) => v,
            Self::Joined(s) => s
                .split(',')
                .map(str::trim)
                .filter(|e| !e.is_empty())
                .map(str::to_string)
                .collect(),
        }
    }
}

/// LIKWID backend configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LikwidConfig {
    #[serde(default)]
    pub group: Option<String>,
    #[serde(default)]
    pub events: Vec<String>,
    #[serde(default)]
    pub metrics: Vec<MetricSpec>,
    #[serde(default)]
    pub core_list: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
struct LikwidRaw {
    group: Option<String>,
    events: Option<EventsRaw>,
    metrics: Option<Vec<MetricSpecRaw>>,
    core_list: Option<String>,
}

impl LikwidRaw {
    fn finish(self) -> Result<LikwidConfig, ConfigError> {
        let events = self.events.map(EventsRaw::into_list).unwrap_or_default();
        if self.group.is_none() && events.is_empty() {
            return Err(ConfigError::EmptyLikwidSpec);
        }
        // Metrics default to the event base names, or the group label.
        let metrics: Vec<MetricSpec> = match self.metrics {
            Some(raw) => raw.into_iter().map(MetricSpec::from).collect(),
            None if !events.is_empty() => events
                .iter()
                .map(|e| MetricSpec::named(e.split(':').next().unwrap_or(e)))
                .collect(),
            None => vec![MetricSpec::named(self.group.clone().unwrap_or_default())],
        };
        Ok(LikwidConfig {
            group: self.group,
            events,
            metrics,
            core_list: self.core_list,
        })
    }
}

/// perf backend configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerfConfig {
    #[serde(default = "default_perf_events")]
    pub events: Vec<String>,
    #[serde(default)]
    pub core_list: Option<String>,
}

fn default_perf_events() -> Vec<String> {
    vec!["cycles".to_string(), "instructions".to_string()]
}

impl Default for PerfConfig {
    fn default() -> Self {
        Self {
            events: default_perf_events(),
            core_list: None,
        }
    }
}

/// Build system used in project mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildSystem {
    Make,
    Cmake,
}

/// Project-mode build description (Make or CMake tree).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectConfig {
    pub dir: PathBuf,
    #[serde(default = "default_build_system")]
    pub build_system: BuildSystem,
    #[serde(default)]
    pub target: Option<String>,
    #[serde(default)]
    pub make_vars: IndexMap<String, String>,
    #[serde(default)]
    pub cmake_defs: Vec<String>,
}

fn default_build_system() -> BuildSystem {
    BuildSystem::Cmake
}

/// A parameter or env-var domain, optionally guarded by a `when` predicate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ValueSpec {
    Guarded {
        when: IndexMap<String, Value>,
        values: Vec<Value>,
    },
    Plain(Vec<Value>),
}

impl ValueSpec {
    pub fn values(&self) -> &[Value] {
        match self {
            Self::Plain(v) => v,
            Self::Guarded { values, .. } => values,
        }
    }

    pub fn when(&self) -> Option<&IndexMap<String, Value>> {
        match self {
            Self::Plain(_) => None,
            Self::Guarded { when, .. } => Some(when),
        }
    }
}

/// Sampler selection for the optimizer façade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SamplerKind {
    Tpe,
    Nsga3,
    Rf,
}

impl Default for SamplerKind {
    fn default() -> Self {
        Self::Tpe
    }
}

/// Search algorithm details.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchConfig {
    #[serde(default)]
    pub sampler: SamplerKind,
    #[serde(default = "default_startup_trials")]
    pub n_startup_trials: usize,
    #[serde(default = "default_population")]
    pub population_size: usize,
    #[serde(default)]
    pub random_seed: Option<u64>,
}

fn default_startup_trials() -> usize {
    10
}

fn default_population() -> usize {
    50
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            sampler: SamplerKind::Tpe,
            n_startup_trials: default_startup_trials(),
            population_size: default_population(),
            random_seed: None,
        }
    }
}

/// Accepts a single argument string (whitespace-split) or a list.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum ArgsRaw {
    Joined(String),
    List(Vec<Value>),
}

impl ArgsRaw {
    fn normalize(self) -> Vec<String> {
        match self {
            Self::Joined(s) => s.split_whitespace().map(str::to_string).collect(),
            Self::List(items) => items
                .into_iter()
                .flat_map(|v| match v {
                    Value::String(s) => {
                        s.split_whitespace().map(str::to_string).collect::<Vec<_>>()
                    }
                    other => vec![json_scalar_to_string(&other)],
                })
                .collect(),
        }
    }
}

/// Render a JSON scalar the way it appears on a command line.
pub fn json_scalar_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}

/// A metric column the archive and aggregator agree on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricColumn {
    pub name: String,
    pub agg: AggMode,
    pub var: bool,
}

#[derive(Debug, Clone, Deserialize)]
struct StudyRaw {
    #[serde(default = "default_backend")]
    backend: Backend,
    source: Option<PathBuf>,
    project: Option<ProjectConfig>,
    #[serde(default = "default_compiler")]
    compiler: String,
    #[serde(default)]
    compiler_flags_base: String,
    #[serde(default = "default_output_basename")]
    output_basename: String,
    #[serde(default)]
    compiler_flags: Vec<String>,
    #[serde(default)]
    compiler_flag_pool: Vec<String>,
    #[serde(default)]
    compiler_params: IndexMap<String, ValueSpec>,
    #[serde(default)]
    env: IndexMap<String, ValueSpec>,
    program_args: Option<ArgsRaw>,
    objectives: Option<Vec<Objective>>,
    #[serde(default)]
    search: SearchConfig,
    likwid: Option<LikwidRaw>,
    perf: Option<PerfConfig>,
    #[serde(default = "default_runs")]
    runs: u32,
    #[serde(default = "default_iterations")]
    iterations: u32,
    #[serde(default = "default_csv_log")]
    csv_log: PathBuf,
    #[serde(default = "default_build_timeout")]
    build_timeout_s: u64,
    #[serde(default = "default_run_timeout")]
    run_timeout_s: u64,
}

fn default_backend() -> Backend {
    Backend::Likwid
}

fn default_compiler() -> String {
    "acpp".to_string()
}

fn default_output_basename() -> String {
    "a.out".to_string()
}

fn default_runs() -> u32 {
    1
}

fn default_iterations() -> u32 {
    100
}

fn default_csv_log() -> PathBuf {
    PathBuf::from("scout_trials.csv")
}

fn default_build_timeout() -> u64 {
    600
}

fn default_run_timeout() -> u64 {
    600
}

const KNOWN_TOP_LEVEL_KEYS: &[&str] = &[
    "backend",
    "source",
    "project",
    "compiler",
    "compiler_flags_base",
    "output_basename",
    "compiler_flags",
    "compiler_flag_pool",
    "compiler_params",
    "env",
    "program_args",
    "objectives",
    "search",
    "likwid",
    "perf",
    "runs",
    "iterations",
    "csv_log",
    "build_timeout_s",
    "run_timeout_s",
];

/// The immutable study definition, validated and ready for space compilation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StudyConfig {
    pub backend: Backend,
    pub source: Option<PathBuf>,
    pub project: Option<ProjectConfig>,
    pub compiler: String,
    pub compiler_flags_base: String,
    pub output_basename: String,
    pub compiler_flags: Vec<String>,
    pub compiler_flag_pool: Vec<String>,
    pub compiler_params: IndexMap<String, ValueSpec>,
    pub env: IndexMap<String, ValueSpec>,
    pub program_args: Vec<String>,
    pub objectives: Vec<Objective>,
    pub search: SearchConfig,
    pub likwid: Option<LikwidConfig>,
    pub perf: Option<PerfConfig>,
    pub runs: u32,
    pub iterations: u32,
    pub csv_log: PathBuf,
    pub build_timeout_s: u64,
    pub run_timeout_s: u64,
}

impl StudyConfig {
    /// Load and validate a study definition from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> ScoutResult<Self> {
        let path = path.as_ref();
        let text =
            std::fs::read_to_string(path).map_err(|e| ConfigError::Unreadable {
                path: path.display().to_string(),
                message: e.to_string(),
            })?;
        Self::from_json(&text)
    }

    /// Parse and validate a study definition from JSON text.
    pub fn from_json(text: &str) -> ScoutResult<Self> {
        let value: Value =
            serde_json::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))?;

        if let Value::Object(map) = &value {
            for key in map.keys() {
                if !KNOWN_TOP_LEVEL_KEYS.contains(&key.as_str()) {
                    warn!("ignoring unknown top-level config key '{key}'");
                }
            }
        }

        let raw: StudyRaw =
            serde_json::from_value(value).map_err(|e| ConfigError::Parse(e.to_string()))?;
        Self::from_raw(raw)
    }

    fn from_raw(raw: StudyRaw) -> ScoutResult<Self> {
        if raw.source.is_some() == raw.project.is_some() {
            return Err(ConfigError::AmbiguousProject.into());
        }

        let likwid = match (raw.backend, raw.likwid) {
            (Backend::Likwid, Some(block)) => Some(block.finish()?),
            (Backend::Likwid, None) => {
                return Err(ConfigError::MissingBackendBlock {
                    block: "likwid".to_string(),
                    backend: "likwid".to_string(),
                }
                .into())
            }
            (Backend::Perf, _) => None,
        };
        let perf = match raw.backend {
            Backend::Perf => Some(raw.perf.unwrap_or_default()),
            Backend::Likwid => None,
        };

        let objectives = raw.objectives.unwrap_or_else(|| vec![Objective::default()]);
        if objectives.is_empty() {
            return Err(crate::config_error!("objectives", "at least one objective required").into());
        }

        let cfg = Self {
            backend: raw.backend,
            source: raw.source,
            project: raw.project,
            compiler: raw.compiler,
            compiler_flags_base: raw.compiler_flags_base,
            output_basename: raw.output_basename,
            compiler_flags: raw.compiler_flags,
            compiler_flag_pool: raw.compiler_flag_pool,
            compiler_params: raw.compiler_params,
            env: raw.env,
            program_args: raw.program_args.map(ArgsRaw::normalize).unwrap_or_default(),
            objectives,
            search: raw.search,
            likwid,
            perf,
            runs: raw.runs,
            iterations: raw.iterations,
            csv_log: raw.csv_log,
            build_timeout_s: raw.build_timeout_s,
            run_timeout_s: raw.run_timeout_s,
        };
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<(), ScoutError> {
        for (field, value) in [
            ("runs", self.runs as i64),
            ("iterations", self.iterations as i64),
            ("search.population_size", self.search.population_size as i64),
            ("search.n_startup_trials", self.search.n_startup_trials as i64),
        ] {
            if value < 1 {
                return Err(ConfigError::NonPositive {
                    field: field.to_string(),
                    value,
                }
                .into());
            }
        }

        let produced = self.backend_metric_names();
        for obj in &self.objectives {
            if !produced.iter().any(|m| m == &obj.metric) {
                return Err(ConfigError::UnknownObjectiveMetric {
                    metric: obj.metric.clone(),
                    backend: self.backend.to_string(),
                }
                .into());
            }
        }
        Ok(())
    }

    /// All metric names the selected backend will produce, `_var` columns excluded.
    pub fn backend_metric_names(&self) -> Vec<String> {
        match self.backend {
            Backend::Likwid => self
                .likwid
                .as_ref()
                .map(|l| l.metrics.iter().map(|m| m.name.clone()).collect())
                .unwrap_or_default(),
            Backend::Perf => {
                let mut names: Vec<String> = self
                    .perf
                    .as_ref()
                    .map(|p| p.events.clone())
                    .unwrap_or_default();
                names.push("CPI".to_string());
                names
            }
        }
    }

    /// Archive/aggregator metric columns in declaration order.
    pub fn metric_columns(&self) -> Vec<MetricColumn> {
        match self.backend {
            Backend::Likwid => self
                .likwid
                .as_ref()
                .map(|l| {
                    l.metrics
                        .iter()
                        .map(|m| MetricColumn {
                            name: m.name.clone(),
                            agg: m.agg,
                            var: m.var,
                        })
                        .collect()
                })
                .unwrap_or_default(),
            Backend::Perf => self
                .backend_metric_names()
                .into_iter()
                .map(|name| MetricColumn {
                    name,
                    agg: AggMode::Avg,
                    var: false,
                })
                .collect(),
        }
    }

    /// The core list handed to the measurement driver, if any.
    pub fn core_list(&self) -> Option<&str> {
        match self.backend {
            Backend::Likwid => self.likwid.as_ref().and_then(|l| l.core_list.as_deref()),
            Backend::Perf => self.perf.as_ref().and_then(|p| p.core_list.as_deref()),
        }
    }
}
