use thiserror::Error;

/// Main error type for the SCOuT driver
#[derive(Error, Debug)]
pub enum ScoutError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Search space error: {0}")]
    Space(#[from] SpaceError),

    #[error("Build error: {0}")]
    Build(#[from] BuildError),

    #[error("Measurement error: {0}")]
    Measure(#[from] MeasureError),

    #[error("Archive error: {0}")]
    Archive(#[from] ArchiveError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Study-definition load/validation errors. Always fatal before any trial.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Cannot read config file {path}: {message}")]
    Unreadable { path: String, message: String },

    #[error("Config parse error: {0}")]
    Parse(String),

    #[error("backend must be 'likwid' or 'perf', got '{0}'")]
    UnknownBackend(String),

    #[error("Provide exactly one of 'source' or 'project'")]
    AmbiguousProject,

    #[error("Missing '{block}' block for backend '{backend}'")]
    MissingBackendBlock { block: String, backend: String },

    #[error("Need either 'group' or 'events' in likwid block")]
    EmptyLikwidSpec,

    #[error("objective.goal must be 'min' or 'max', got '{0}'")]
    BadGoal(String),

    #[error("Objective metric '{metric}' is not produced by the {backend} backend")]
    UnknownObjectiveMetric { metric: String, backend: String },

    #[error("'{field}' must be >= 1, got {value}")]
    NonPositive { field: String, value: i64 },

    #[error("Invalid value for '{field}': {message}")]
    InvalidField { field: String, message: String },
}

/// Space compilation and materialization errors
#[derive(Error, Debug)]
pub enum SpaceError {
    #[error("Duplicate decision variable '{0}'")]
    DuplicateVariable(String),

    #[error("Decision variable '{0}' has an empty domain")]
    EmptyDomain(String),

    #[error("Decision variable '{name}' repeats domain value '{value}'")]
    DuplicateDomainValue { name: String, value: String },

    #[error("Guard on '{name}' references '{referenced}', which is not declared before it")]
    ForwardGuardReference { name: String, referenced: String },

    #[error("Malformed guard condition '{cond}' on '{name}'")]
    MalformedGuard { name: String, cond: String },

    #[error("Assignment is missing a value for '{0}'")]
    IncompleteAssignment(String),

    #[error("Assignment activates '{0}' although its guard is false")]
    GuardViolation(String),

    #[error("Materialization produced an empty command line")]
    EmptyCommand,
}

/// Builder-side errors
#[derive(Error, Debug)]
pub enum BuildError {
    #[error("Build command failed with exit code {code:?}: {stderr_tail}")]
    Failed {
        code: Option<i32>,
        stderr_tail: String,
    },

    #[error("Build exceeded timeout of {timeout_s}s")]
    Timeout { timeout_s: u64 },

    #[error("Build succeeded but artifact '{0}' does not exist")]
    MissingArtifact(String),

    #[error("No executable produced under '{0}'")]
    NoExecutable(String),

    #[error("Cannot prepare build directory: {0}")]
    Workdir(String),

    #[error("Failed to spawn '{program}': {message}")]
    Spawn { program: String, message: String },
}

/// Measurement-side errors
#[derive(Error, Debug)]
pub enum MeasureError {
    #[error("Run failed with exit code {code:?}: {stderr_tail}")]
    RunFailed {
        code: Option<i32>,
        stderr_tail: String,
    },

    #[error("Run exceeded timeout of {timeout_s}s")]
    Timeout { timeout_s: u64 },

    #[error("{tool} output produced no metrics")]
    ParseFailure { tool: String },

    #[error("Declared metric '{0}' missing from backend output")]
    MetricMissing(String),

    #[error("Failed to spawn '{program}': {message}")]
    Spawn { program: String, message: String },
}

/// Archive (CSV) errors. Fatal: the exploration cannot continue without its log.
#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("Cannot open archive '{path}': {message}")]
    Open { path: String, message: String },

    #[error("Cannot write archive row: {0}")]
    Write(String),

    #[error("Cannot rotate stale archive '{path}': {message}")]
    Rotate { path: String, message: String },
}

/// Result type alias for SCOuT operations
pub type ScoutResult<T> = Result<T, ScoutError>;

/// Macro for creating configuration errors from format strings
#[macro_export]
macro_rules! config_error {
    ($field:expr, $($arg:tt)*) => {
        $crate::ConfigError::InvalidField {
            field: $field.to_string(),
            message: format!($($arg)*),
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = BuildError::Failed {
            code: Some(2),
            stderr_tail: "undefined reference to `main'".to_string(),
        };
        assert!(error.to_string().contains("exit code Some(2)"));
        assert!(error.to_string().contains("undefined reference"));
    }

    #[test]
    fn test_error_conversion() {
        let space_error = SpaceError::EmptyDomain("opt_level".to_string());
        let scout_error: ScoutError = space_error.into();
        match scout_error {
            ScoutError::Space(_) => (),
            _ => panic!("Expected Space error"),
        }
    }

    #[test]
    fn test_config_error_macro() {
        let err = config_error!("runs", "expected integer, got {}", "\"five\"");
        assert!(err.to_string().contains("runs"));
        assert!(err.to_string().contains("five"));
    }
}
