//! Candidate materialization: assignment -> build plan + runtime plan.
//!
//! Ordering is fixed (opt level, pool toggles, params, each in declaration
//! order) so that two logically equal assignments produce byte-identical
//! command lines.

use std::collections::BTreeMap;
use std::path::PathBuf;

use scout_types::{BuildSystem, SpaceError, StudyConfig};

use crate::assignment::{Assignment, DecisionValue};
use crate::space::{DecisionKind, SearchSpace};

/// How to produce the runnable artifact for one trial.
#[derive(Debug, Clone, PartialEq)]
pub enum BuildPlan {
    /// `compiler <flags...> <source> -o <artifact>`
    SingleSource {
        compiler: String,
        flags: Vec<String>,
        source: PathBuf,
        artifact_name: String,
    },
    /// `make clean && make -j CXX=<compiler> EXTRA_CFLAGS=<flags> KEY=VALUE... [target]`
    Make {
        dir: PathBuf,
        compiler: String,
        flag_string: String,
        make_vars: Vec<(String, String)>,
        target: Option<String>,
    },
    /// cmake configure + build in a fresh per-trial build directory.
    Cmake {
        dir: PathBuf,
        compiler: String,
        flag_string: String,
        defs: Vec<String>,
        target: Option<String>,
    },
}

/// Environment and arguments for running the artifact.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RuntimePlan {
    pub env: BTreeMap<String, String>,
    pub args: Vec<String>,
}

/// Materialize a sampled assignment into concrete plans.
///
/// Verifies guard honoring first: an assignment that activates a variable
/// whose guard is false is a materialization error, not a silent fixup.
pub fn materialize(
    cfg: &StudyConfig,
    space: &SearchSpace,
    assignment: &Assignment,
) -> Result<(BuildPlan, RuntimePlan), SpaceError> {
    space.verify_guards(assignment)?;

    let trial_flags = trial_flags(space, assignment)?;
    let flag_string = join_flags(&cfg.compiler_flags_base, &trial_flags);

    let build_plan = match (&cfg.source, &cfg.project) {
        (Some(source), None) => {
            if cfg.compiler.trim().is_empty() {
                return Err(SpaceError::EmptyCommand);
            }
            let mut flags: Vec<String> = cfg
                .compiler_flags_base
                .split_whitespace()
                .map(str::to_string)
                .collect();
            flags.extend(trial_flags.iter().cloned());
            BuildPlan::SingleSource {
                compiler: cfg.compiler.clone(),
                flags,
                source: source.clone(),
                artifact_name: cfg.output_basename.clone(),
            }
        }
        (None, Some(project)) => match project.build_system {
            BuildSystem::Make => BuildPlan::Make {
                dir: project.dir.clone(),
                compiler: cfg.compiler.clone(),
                flag_string: flag_string.clone(),
                make_vars: project
                    .make_vars
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect(),
                target: project.target.clone(),
            },
            BuildSystem::Cmake => BuildPlan::Cmake {
                dir: project.dir.clone(),
                compiler: cfg.compiler.clone(),
                flag_string: flag_string.clone(),
                defs: project.cmake_defs.clone(),
                target: project.target.clone(),
            },
        },
        // StudyConfig::validate guarantees exactly one of the two.
        _ => return Err(SpaceError::EmptyCommand),
    };

    let mut runtime = RuntimePlan {
        env: BTreeMap::new(),
        args: cfg.program_args.clone(),
    };
    for var in &space.variables {
        if var.kind != DecisionKind::EnvVar {
            continue;
        }
        if let Some(value) = assignment.active(&var.name) {
            runtime.env.insert(var.name.clone(), value.render());
        }
        // Inactive env decisions are omitted entirely, never set to "".
    }

    Ok((build_plan, runtime))
}

/// The per-trial compiler flag tokens, in canonical order.
pub fn trial_flags(
    space: &SearchSpace,
    assignment: &Assignment,
) -> Result<Vec<String>, SpaceError> {
    let mut flags = Vec::new();
    for var in &space.variables {
        let slot = assignment
            .get(&var.name)
            .ok_or_else(|| SpaceError::IncompleteAssignment(var.name.clone()))?;
        let Some(value) = slot.active() else {
            continue;
        };
        match var.kind {
            DecisionKind::OptLevel => flags.push(value.render()),
            DecisionKind::PoolToggle => {
                if value.as_bool() == Some(true) {
                    flags.push(var.name.clone());
                }
            }
            DecisionKind::Param => {
                if let Some(token) = render_param(&var.name, value) {
                    flags.push(token);
                }
            }
            DecisionKind::EnvVar => {}
        }
    }
    Ok(flags)
}

/// Render one parameterized option. Booleans expand to flag presence;
/// keys ending in `=` or a space join without an inserted `=`.
fn render_param(key: &str, value: &DecisionValue) -> Option<String> {
    if let Some(enabled) = value.as_bool() {
        return enabled.then(|| key.to_string());
    }
    let rendered = value.render();
    if key.ends_with('=') || key.ends_with(' ') {
        Some(format!("{key}{rendered}"))
    } else {
        Some(format!("{key}={rendered}"))
    }
}

fn join_flags(base: &str, trial: &[String]) -> String {
    let mut parts: Vec<&str> = base.split_whitespace().collect();
    parts.extend(trial.iter().map(String::as_str));
    parts.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use scout_types::StudyConfig;

    fn study() -> (StudyConfig, SearchSpace) {
        let cfg = StudyConfig::from_json(
            r#"{
                "backend": "perf",
                "source": "bude.cpp",
                "compiler": "acpp",
                "compiler_flags_base": "-std=c++17",
                "compiler_flags": ["-O2", "-O3"],
                "compiler_flag_pool": ["-funroll-loops"],
                "compiler_params": {
                    "-flto": {"when": {"opt_level": "3+"}, "values": [true, false]},
                    "-march": ["native", "znver4"],
                    "-I ": ["include"]
                },
                "env": {
                    "OMP_NUM_THREADS": ["8", "16"]
                },
                "program_args": "--deck bm1"
            }"#,
        )
        .unwrap();
        let space = SearchSpace::compile(&cfg).unwrap();
        (cfg, space)
    }

    fn full_assignment(space: &SearchSpace) -> Assignment {
        // -O3, unroll on, -flto true, -march native, -I include, 8 threads
        space.assignment_from_indices(&[Some(1), Some(1), Some(0), Some(0), Some(0), Some(0)])
    }

    #[test]
    fn single_source_plan_orders_flags() {
        let (cfg, space) = study();
        let assignment = full_assignment(&space);
        let (plan, runtime) = materialize(&cfg, &space, &assignment).unwrap();
        match plan {
            BuildPlan::SingleSource {
                compiler,
                flags,
                source,
                artifact_name,
            } => {
                assert_eq!(compiler, "acpp");
                assert_eq!(
                    flags,
                    vec![
                        "-std=c++17",
                        "-O3",
                        "-funroll-loops",
                        "-flto",
                        "-march=native",
                        "-I include"
                    ]
                );
                assert_eq!(source, PathBuf::from("bude.cpp"));
                assert_eq!(artifact_name, "a.out");
            }
            other => panic!("expected single-source plan, got {other:?}"),
        }
        assert_eq!(runtime.args, vec!["--deck", "bm1"]);
        assert_eq!(runtime.env.get("OMP_NUM_THREADS").map(String::as_str), Some("8"));
    }

    #[test]
    fn materialization_is_byte_stable() {
        let (cfg, space) = study();
        let assignment = full_assignment(&space);
        let first = materialize(&cfg, &space, &assignment).unwrap();
        let second = materialize(&cfg, &space, &assignment).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn false_boolean_param_is_omitted() {
        let (cfg, space) = study();
        // -flto false
        let assignment =
            space.assignment_from_indices(&[Some(1), Some(0), Some(1), Some(1), Some(0), Some(1)]);
        let flags = trial_flags(&space, &assignment).unwrap();
        assert_eq!(flags, vec!["-O3", "-march=znver4", "-I include"]);
        let (_, runtime) = materialize(&cfg, &space, &assignment).unwrap();
        assert_eq!(runtime.env.get("OMP_NUM_THREADS").map(String::as_str), Some("16"));
    }

    #[test]
    fn inactive_env_vars_are_omitted() {
        let cfg = StudyConfig::from_json(
            r#"{
                "backend": "perf",
                "source": "x.c",
                "env": {
                    "ACPP_VISIBILITY_MASK": ["omp", "ocl"],
                    "OMP_PLACES": {"when": {"ACPP_VISIBILITY_MASK": "omp"}, "values": ["cores"]}
                }
            }"#,
        )
        .unwrap();
        let space = SearchSpace::compile(&cfg).unwrap();
        // ocl chosen, OMP_PLACES inactive
        let assignment = space.assignment_from_indices(&[Some(1), None]);
        let (_, runtime) = materialize(&cfg, &space, &assignment).unwrap();
        assert_eq!(
            runtime.env.get("ACPP_VISIBILITY_MASK").map(String::as_str),
            Some("ocl")
        );
        assert!(!runtime.env.contains_key("OMP_PLACES"));
    }

    #[test]
    fn make_plan_carries_vars_and_flag_string() {
        let cfg = StudyConfig::from_json(
            r#"{
                "backend": "perf",
                "project": {
                    "dir": "bench/miniBUDE",
                    "build_system": "make",
                    "target": "bude",
                    "make_vars": {"DEVICE": "cpu"}
                },
                "compiler": "acpp",
                "compiler_flags": ["-O2"]
            }"#,
        )
        .unwrap();
        let space = SearchSpace::compile(&cfg).unwrap();
        let assignment = space.assignment_from_indices(&[Some(0)]);
        let (plan, _) = materialize(&cfg, &space, &assignment).unwrap();
        match plan {
            BuildPlan::Make {
                dir,
                flag_string,
                make_vars,
                target,
                ..
            } => {
                assert_eq!(dir, PathBuf::from("bench/miniBUDE"));
                assert_eq!(flag_string, "-O2");
                assert_eq!(make_vars, vec![("DEVICE".to_string(), "cpu".to_string())]);
                assert_eq!(target.as_deref(), Some("bude"));
            }
            other => panic!("expected make plan, got {other:?}"),
        }
    }

    #[test]
    fn guard_violating_assignment_is_rejected() {
        let (cfg, space) = study();
        // -flto active although opt_level is -O2
        let assignment =
            space.assignment_from_indices(&[Some(0), Some(0), Some(0), Some(0), Some(0), Some(0)]);
        let err = materialize(&cfg, &space, &assignment).unwrap_err();
        assert!(matches!(err, SpaceError::GuardViolation(_)));
    }
}
