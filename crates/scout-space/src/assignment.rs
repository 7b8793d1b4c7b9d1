//! Assignments: one chosen value per declared decision variable.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A concrete value a decision variable can take.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DecisionValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl DecisionValue {
    /// Convert a JSON domain entry into a decision value.
    pub fn from_json(value: &Value) -> Self {
        match value {
            Value::Bool(b) => Self::Bool(*b),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Self::Int(i)
                } else {
                    Self::Float(n.as_f64().unwrap_or(0.0))
                }
            }
            Value::String(s) => Self::Str(s.clone()),
            other => Self::Str(other.to_string()),
        }
    }

    /// Render the value the way it appears on a command line or in an env map.
    pub fn render(&self) -> String {
        match self {
            Self::Bool(b) => b.to_string(),
            Self::Int(i) => i.to_string(),
            Self::Float(f) => f.to_string(),
            Self::Str(s) => s.clone(),
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

impl std::fmt::Display for DecisionValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.render())
    }
}

/// Value slot in an assignment: chosen, or masked out by a false guard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AssignedValue {
    Active(DecisionValue),
    Inactive,
}

impl AssignedValue {
    pub fn active(&self) -> Option<&DecisionValue> {
        match self {
            Self::Active(v) => Some(v),
            Self::Inactive => None,
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active(_))
    }
}

/// A total assignment over the declared decision variables, in declaration
/// order. Guarded variables whose predicate was false carry `Inactive`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Assignment {
    values: IndexMap<String, AssignedValue>,
}

impl Assignment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, name: impl Into<String>, value: DecisionValue) {
        self.values.insert(name.into(), AssignedValue::Active(value));
    }

    pub fn set_inactive(&mut self, name: impl Into<String>) {
        self.values.insert(name.into(), AssignedValue::Inactive);
    }

    pub fn get(&self, name: &str) -> Option<&AssignedValue> {
        self.values.get(name)
    }

    /// The active value for `name`, or `None` when inactive or undeclared.
    pub fn active(&self, name: &str) -> Option<&DecisionValue> {
        self.values.get(name).and_then(AssignedValue::active)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &AssignedValue)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Stable human-readable identifier, used for logging and deduplication.
    pub fn key(&self) -> String {
        let parts: Vec<String> = self
            .values
            .iter()
            .filter_map(|(name, slot)| slot.active().map(|v| format!("{name}={v}")))
            .collect();
        if parts.is_empty() {
            "default".to_string()
        } else {
            parts.join("|")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decision_value_from_json() {
        assert_eq!(
            DecisionValue::from_json(&serde_json::json!(true)),
            DecisionValue::Bool(true)
        );
        assert_eq!(
            DecisionValue::from_json(&serde_json::json!(42)),
            DecisionValue::Int(42)
        );
        assert_eq!(
            DecisionValue::from_json(&serde_json::json!("-O3")),
            DecisionValue::Str("-O3".to_string())
        );
    }

    #[test]
    fn assignment_key_skips_inactive() {
        let mut a = Assignment::new();
        a.set("opt_level", DecisionValue::Str("-O3".into()));
        a.set_inactive("-flto");
        a.set("OMP_PLACES", DecisionValue::Str("cores".into()));
        assert_eq!(a.key(), "opt_level=-O3|OMP_PLACES=cores");
    }

    #[test]
    fn empty_assignment_key_is_default() {
        let mut a = Assignment::new();
        a.set_inactive("x");
        assert_eq!(a.key(), "default");
    }
}
