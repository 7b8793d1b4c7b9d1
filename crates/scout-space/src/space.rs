//! Search space compilation: decision variables, domains and guards.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use scout_types::{SpaceError, StudyConfig, ValueSpec};

use crate::assignment::{Assignment, DecisionValue};

/// Name of the categorical decision derived from `compiler_flags`.
pub const OPT_LEVEL: &str = "opt_level";

/// What a decision variable controls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DecisionKind {
    /// The mutually exclusive optimization-level slot.
    OptLevel,
    /// One on/off flag from `compiler_flag_pool`.
    PoolToggle,
    /// A parameterized compiler option (`-march`, `-flto`, ...).
    Param,
    /// An environment variable.
    EnvVar,
}

/// One condition of a guard predicate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum GuardCond {
    /// True when the referenced variable equals this value exactly.
    Equals(DecisionValue),
    /// True when the numeric tail of the referenced variable's value is >= n.
    /// Values without a numeric tail (e.g. `-Ofast`) rank above every level.
    TailAtLeast(u32),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuardClause {
    pub var: String,
    pub cond: GuardCond,
}

/// A conjunction of conditions over previously declared variables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Guard {
    pub clauses: Vec<GuardClause>,
}

impl Guard {
    /// Evaluate against a (possibly partial) assignment. A clause whose
    /// referenced variable is inactive or not yet assigned is false.
    pub fn evaluate(&self, partial: &Assignment) -> bool {
        self.clauses.iter().all(|clause| {
            let Some(value) = partial.active(&clause.var) else {
                return false;
            };
            match &clause.cond {
                GuardCond::Equals(expected) => value == expected,
                GuardCond::TailAtLeast(n) => match numeric_tail(&value.render()) {
                    Some(tail) => tail >= *n,
                    None => true,
                },
            }
        })
    }
}

/// Trailing decimal digits of a string, if any (`-O3` -> 3, `-Ofast` -> None).
pub fn numeric_tail(s: &str) -> Option<u32> {
    let digits: String = s
        .chars()
        .rev()
        .take_while(|c| c.is_ascii_digit())
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    if digits.is_empty() {
        None
    } else {
        digits.parse().ok()
    }
}

/// A named dimension of the search space with a finite domain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionVariable {
    pub name: String,
    pub kind: DecisionKind,
    pub domain: Vec<DecisionValue>,
    pub guard: Option<Guard>,
}

impl DecisionVariable {
    /// Whether this variable participates under the given partial assignment.
    pub fn is_active(&self, partial: &Assignment) -> bool {
        match &self.guard {
            None => true,
            Some(guard) => guard.evaluate(partial),
        }
    }
}

/// The compiled search space: decision variables in declaration order with
/// an acyclic guard structure (guards only look backwards).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchSpace {
    pub variables: Vec<DecisionVariable>,
}

impl SearchSpace {
    /// Compile the study definition into a search space.
    ///
    /// Declaration order: `opt_level`, pool toggles, compiler params, env
    /// vars. Guards may reference any variable declared earlier; forward or
    /// self references are rejected, which also rules out cycles.
    pub fn compile(cfg: &StudyConfig) -> Result<Self, SpaceError> {
        let mut variables: Vec<DecisionVariable> = Vec::new();

        if !cfg.compiler_flags.is_empty() {
            let domain = cfg
                .compiler_flags
                .iter()
                .map(|f| DecisionValue::Str(f.clone()))
                .collect();
            push_variable(
                &mut variables,
                DecisionVariable {
                    name: OPT_LEVEL.to_string(),
                    kind: DecisionKind::OptLevel,
                    domain,
                    guard: None,
                },
            )?;
        }

        for flag in &cfg.compiler_flag_pool {
            push_variable(
                &mut variables,
                DecisionVariable {
                    name: flag.clone(),
                    kind: DecisionKind::PoolToggle,
                    domain: vec![DecisionValue::Bool(false), DecisionValue::Bool(true)],
                    guard: None,
                },
            )?;
        }

        compile_spec_map(&mut variables, &cfg.compiler_params, DecisionKind::Param)?;
        compile_spec_map(&mut variables, &cfg.env, DecisionKind::EnvVar)?;

        debug!(
            variables = variables.len(),
            "compiled search space from study definition"
        );
        Ok(Self { variables })
    }

    pub fn len(&self) -> usize {
        self.variables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.variables.is_empty()
    }

    pub fn variable(&self, name: &str) -> Option<&DecisionVariable> {
        self.variables.iter().find(|v| v.name == name)
    }

    /// Decision variable names in declaration order (the archive header order).
    pub fn names(&self) -> Vec<&str> {
        self.variables.iter().map(|v| v.name.as_str()).collect()
    }

    /// Build an assignment from per-variable domain indices (`None` = inactive).
    pub fn assignment_from_indices(&self, indices: &[Option<usize>]) -> Assignment {
        let mut assignment = Assignment::new();
        for (var, idx) in self.variables.iter().zip(indices) {
            match idx {
                Some(i) => assignment.set(var.name.clone(), var.domain[*i].clone()),
                None => assignment.set_inactive(var.name.clone()),
            }
        }
        assignment
    }

    /// Project an assignment back onto per-variable domain indices.
    pub fn indices_from_assignment(&self, assignment: &Assignment) -> Vec<Option<usize>> {
        self.variables
            .iter()
            .map(|var| {
                assignment
                    .active(&var.name)
                    .and_then(|value| var.domain.iter().position(|d| d == value))
            })
            .collect()
    }

    /// Check guard honoring: every active variable's guard holds and every
    /// inactive variable's guard fails under the assignment prefix.
    pub fn verify_guards(&self, assignment: &Assignment) -> Result<(), SpaceError> {
        let mut prefix = Assignment::new();
        for var in &self.variables {
            let slot = assignment
                .get(&var.name)
                .ok_or_else(|| SpaceError::IncompleteAssignment(var.name.clone()))?;
            let expected_active = var.is_active(&prefix);
            if slot.is_active() != expected_active {
                return Err(SpaceError::GuardViolation(var.name.clone()));
            }
            match slot.active() {
                Some(value) => prefix.set(var.name.clone(), value.clone()),
                None => prefix.set_inactive(var.name.clone()),
            }
        }
        Ok(())
    }
}

fn push_variable(
    variables: &mut Vec<DecisionVariable>,
    var: DecisionVariable,
) -> Result<(), SpaceError> {
    if variables.iter().any(|v| v.name == var.name) {
        return Err(SpaceError::DuplicateVariable(var.name));
    }
    if var.domain.is_empty() {
        return Err(SpaceError::EmptyDomain(var.name));
    }
    for (i, value) in var.domain.iter().enumerate() {
        if var.domain[..i].contains(value) {
            return Err(SpaceError::DuplicateDomainValue {
                name: var.name.clone(),
                value: value.render(),
            });
        }
    }
    if let Some(guard) = &var.guard {
        for clause in &guard.clauses {
            if !variables.iter().any(|v| v.name == clause.var) {
                return Err(SpaceError::ForwardGuardReference {
                    name: var.name.clone(),
                    referenced: clause.var.clone(),
                });
            }
        }
    }
    variables.push(var);
    Ok(())
}

fn compile_spec_map(
    variables: &mut Vec<DecisionVariable>,
    specs: &IndexMap<String, ValueSpec>,
    kind: DecisionKind,
) -> Result<(), SpaceError> {
    for (name, spec) in specs {
        let guard = match spec.when() {
            None => None,
            Some(when) => Some(parse_guard(name, when)?),
        };
        let domain = spec.values().iter().map(DecisionValue::from_json).collect();
        push_variable(
            variables,
            DecisionVariable {
                name: name.clone(),
                kind,
                domain,
                guard,
            },
        )?;
    }
    Ok(())
}

fn parse_guard(
    owner: &str,
    when: &IndexMap<String, Value>,
) -> Result<Guard, SpaceError> {
    let mut clauses = Vec::with_capacity(when.len());
    for (var, value) in when {
        let cond = match value {
            Value::String(s) if s.ends_with('+') => {
                let threshold = s[..s.len() - 1].parse().map_err(|_| {
                    SpaceError::MalformedGuard {
                        name: owner.to_string(),
                        cond: s.clone(),
                    }
                })?;
                GuardCond::TailAtLeast(threshold)
            }
            other => GuardCond::Equals(DecisionValue::from_json(other)),
        };
        clauses.push(GuardClause {
            var: var.clone(),
            cond,
        });
    }
    Ok(Guard { clauses })
}
