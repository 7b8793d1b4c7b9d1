//! End-to-end exploration runs against a scripted measurement backend and a
//! shell-script compiler, hermetic to the host toolchain.

use std::cell::Cell;
use std::collections::BTreeMap;
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use tempfile::TempDir;

use scout_engine::Orchestrator;
use scout_measure::{Measure, MetricMap};
use scout_optimizer::dominates;
use scout_types::{AggMode, MeasureError, MetricColumn, StudyConfig};

/// Deterministic backend: emits cycles/instructions/CPI derived from a call
/// counter, with optional injected failures on chosen calls.
struct ScriptedBackend {
    calls: Cell<u32>,
    fail_calls: Vec<u32>,
}

impl ScriptedBackend {
    fn new(fail_calls: Vec<u32>) -> Self {
        Self {
            calls: Cell::new(0),
            fail_calls,
        }
    }
}

impl Measure for ScriptedBackend {
    fn name(&self) -> &str {
        "scripted"
    }

    fn collect(
        &self,
        artifact: &Path,
        _args: &[String],
        _env: &BTreeMap<String, String>,
    ) -> Result<MetricMap, MeasureError> {
        assert!(artifact.exists(), "runner must receive a built artifact");
        let call = self.calls.get() + 1;
        self.calls.set(call);
        if self.fail_calls.contains(&call) {
            return Err(MeasureError::RunFailed {
                code: Some(1),
                stderr_tail: "injected run failure".to_string(),
            });
        }
        let mut map = MetricMap::new();
        let cycles = 2_000_000.0 + (call % 7) as f64 * 100_000.0;
        let instructions = 1_000_000.0 + (call % 5) as f64 * 150_000.0;
        map.insert("cycles".to_string(), cycles);
        map.insert("instructions".to_string(), instructions);
        map.insert("CPI".to_string(), cycles / instructions);
        Ok(map)
    }

    fn metric_columns(&self) -> Vec<MetricColumn> {
        ["cycles", "instructions", "CPI"]
            .iter()
            .map(|name| MetricColumn {
                name: name.to_string(),
                agg: AggMode::Avg,
                var: false,
            })
            .collect()
    }
}

/// Shell-script compiler that copies the source to the `-o` target.
fn fake_compiler(dir: &Path) -> PathBuf {
    let path = dir.join("fake-cc");
    let mut f = std::fs::File::create(&path).unwrap();
    writeln!(
        f,
        "#!/bin/sh\nout=\"\"\nsrc=\"\"\nwhile [ $# -gt 0 ]; do\n  case \"$1\" in\n    -o) out=\"$2\"; shift 2 ;;\n    -*) shift ;;\n    *) src=\"$1\"; shift ;;\n  esac\ndone\ncp \"$src\" \"$out\""
    )
    .unwrap();
    drop(f);
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

fn study(tmp: &TempDir, sampler: &str, objectives: &str, runs: u32) -> StudyConfig {
    let compiler = fake_compiler(tmp.path());
    let source = tmp.path().join("kernel.c");
    std::fs::write(&source, "int main(void) { return 0; }").unwrap();
    let csv_log = tmp.path().join("trials.csv");

    StudyConfig::from_json(&format!(
        r#"{{
            "backend": "perf",
            "source": "{source}",
            "compiler": "{compiler}",
            "compiler_flags": ["-O2", "-O3"],
            "compiler_flag_pool": ["-funroll-loops"],
            "compiler_params": {{
                "-flto": {{"when": {{"opt_level": "3+"}}, "values": [true, false]}}
            }},
            "objectives": {objectives},
            "search": {{"sampler": "{sampler}", "population_size": 8, "random_seed": 1234}},
            "runs": {runs},
            "csv_log": "{csv_log}"
        }}"#,
        source = source.display(),
        compiler = compiler.display(),
        csv_log = csv_log.display(),
    ))
    .unwrap()
}

#[test]
fn single_objective_exploration_fills_the_archive() {
    let tmp = TempDir::new().unwrap();
    let cfg = study(&tmp, "tpe", r#"[{"metric": "CPI", "goal": "min"}]"#, 1);
    let csv_path = cfg.csv_log.clone();

    let backend = Box::new(ScriptedBackend::new(Vec::new()));
    let mut orchestrator =
        Orchestrator::with_backend(cfg, tmp.path().join("work"), backend).unwrap();
    let summary = orchestrator.run(6).unwrap();

    assert_eq!(summary.trials, 6);
    assert_eq!(summary.feasible, 6);
    let (_, best_cpi, _) = summary.best[0].clone().unwrap();
    assert!(best_cpi.is_finite() && best_cpi > 0.0);

    let text = std::fs::read_to_string(&csv_path).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 7); // header + 6 rows
    assert!(lines[0].starts_with("trial_id,opt_level,-funroll-loops,-flto,"));
    for row in &lines[1..] {
        let opt_level = row.split(',').nth(1).unwrap();
        assert!(opt_level == "-O2" || opt_level == "-O3");
    }
}

#[test]
fn injected_run_failure_penalizes_but_continues() {
    let tmp = TempDir::new().unwrap();
    let cfg = study(&tmp, "tpe", r#"[{"metric": "CPI", "goal": "min"}]"#, 5);
    let csv_path = cfg.csv_log.clone();

    // runs=5: calls 11..=15 belong to trial 3; failing call 13 fails it.
    let backend = Box::new(ScriptedBackend::new(vec![13]));
    let mut orchestrator =
        Orchestrator::with_backend(cfg, tmp.path().join("work"), backend).unwrap();
    let summary = orchestrator.run(5).unwrap();

    assert_eq!(summary.trials, 5);
    assert_eq!(summary.feasible, 4);
    let failed: Vec<_> = orchestrator
        .records()
        .iter()
        .filter(|r| !r.is_feasible())
        .collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].trial_id, 3);

    let text = std::fs::read_to_string(&csv_path).unwrap();
    let failed_row = text.lines().nth(3).unwrap();
    assert!(failed_row.contains("run_failed"));
    // Exploration continued past the failure.
    assert_eq!(text.lines().count(), 6);
}

#[test]
fn broken_compiler_penalizes_every_trial() {
    let tmp = TempDir::new().unwrap();
    let mut cfg = study(&tmp, "rf", r#"[{"metric": "CPI", "goal": "min"}]"#, 1);
    let broken = tmp.path().join("broken-cc");
    std::fs::write(&broken, "#!/bin/sh\necho 'unsupported flag' >&2\nexit 1").unwrap();
    std::fs::set_permissions(&broken, std::fs::Permissions::from_mode(0o755)).unwrap();
    cfg.compiler = broken.display().to_string();

    let backend = Box::new(ScriptedBackend::new(Vec::new()));
    let mut orchestrator =
        Orchestrator::with_backend(cfg, tmp.path().join("work"), backend).unwrap();
    let summary = orchestrator.run(4).unwrap();

    assert_eq!(summary.feasible, 0);
    assert!(summary.best[0].is_none());
    for record in orchestrator.records() {
        assert_eq!(record.build_status.as_str(), "failed");
        assert!(record
            .failure
            .as_ref()
            .unwrap()
            .message
            .contains("unsupported flag"));
    }
}

#[test]
fn multi_objective_run_yields_a_pareto_front() {
    let tmp = TempDir::new().unwrap();
    let objectives = r#"[
        {"metric": "CPI", "goal": "min"},
        {"metric": "instructions", "goal": "max"}
    ]"#;
    let cfg = study(&tmp, "nsga3", objectives, 1);
    let declared = cfg.objectives.clone();

    let backend = Box::new(ScriptedBackend::new(Vec::new()));
    let mut orchestrator =
        Orchestrator::with_backend(cfg, tmp.path().join("work"), backend).unwrap();
    let summary = orchestrator.run(32).unwrap();

    assert!(!summary.front.is_empty());
    // No feasible trial dominates a front member on all objectives.
    let records = orchestrator.records();
    for (front_id, front_vector, _) in &summary.front {
        for record in records.iter().filter(|r| r.is_feasible()) {
            assert!(
                record.trial_id == *front_id
                    || !dominates(&record.objective_vector, front_vector, &declared),
                "trial {} dominates front member {}",
                record.trial_id,
                front_id
            );
        }
    }
}

#[test]
fn second_invocation_appends_to_matching_archive() {
    let tmp = TempDir::new().unwrap();
    let cfg = study(&tmp, "tpe", r#"[{"metric": "CPI", "goal": "min"}]"#, 1);
    let csv_path = cfg.csv_log.clone();

    {
        let backend = Box::new(ScriptedBackend::new(Vec::new()));
        let mut orchestrator =
            Orchestrator::with_backend(cfg.clone(), tmp.path().join("w1"), backend).unwrap();
        orchestrator.run(3).unwrap();
    }
    {
        let backend = Box::new(ScriptedBackend::new(Vec::new()));
        let mut orchestrator =
            Orchestrator::with_backend(cfg, tmp.path().join("w2"), backend).unwrap();
        orchestrator.run(2).unwrap();
    }

    let text = std::fs::read_to_string(&csv_path).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    // One header, 3 + 2 data rows.
    assert_eq!(lines.len(), 6);
    assert_eq!(lines.iter().filter(|l| l.starts_with("trial_id")).count(), 1);
}
