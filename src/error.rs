//! Error Types
//!
//! Errors are split by the stage that produces them:
//!
//! - [`LoadError`]: the workflow source could not be located or parsed
//! - [`ConfigurationError`]: the declarations do not form a valid graph,
//!   detected before any action is dispatched
//! - [`ActionError`]: a single action failed; always local to its node
//! - [`EngineError`]: the run loop itself broke an internal invariant
//!
//! [`Error`] unifies them for callers that drive the whole pipeline and
//! maps each class onto a process exit code.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::execution::report::RunReport;

/// Exit code for a run where one or more actions failed or were cancelled.
pub const EXIT_RUN_FAILED: u8 = 1;
/// Exit code for internal engine failures.
pub const EXIT_INTERNAL: u8 = 2;
/// Exit code for unreadable or malformed workflow sources.
pub const EXIT_LOAD: u8 = 102;
/// Exit code for graph validation failures.
pub const EXIT_CONFIGURATION: u8 = 103;
/// Exit code when no workflow source could be located.
pub const EXIT_SOURCE: u8 = 104;

/// Structural problems found while building the workflow graph.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigurationError {
    #[error("Workflow has no actions")]
    EmptyWorkflow,

    #[error("An action has an empty or whitespace-only name")]
    EmptyActionName,

    #[error("Action declared twice: '{0}'")]
    DuplicateAction(String),

    #[error("Action '{action}' depends on unknown action '{dependency}'")]
    UnknownDependency { action: String, dependency: String },

    #[error("Dependency cycle detected: {}", .cycle.join(" -> "))]
    DependencyCycle { cycle: Vec<String> },

    #[error("Action '{action}' has unknown type '{action_type}'")]
    UnknownActionType { action: String, action_type: String },

    #[error("Action '{action}' has invalid parameters: {reason}")]
    InvalidParameters { action: String, reason: String },

    #[error("Cannot load actions from '{}': {reason}", .path.display())]
    ActionDirectory { path: PathBuf, reason: String },
}

/// Failures while locating or reading a workflow declaration.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("Failed to read workflow file '{}': {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read workflow from standard input: {0}")]
    Stdin(#[source] std::io::Error),

    #[error("Failed to parse workflow YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Invalid workflow structure: {0}")]
    Structure(String),

    #[error("Cyclic import: {}", .0.iter().map(|p| p.display().to_string()).collect::<Vec<_>>().join(" -> "))]
    CyclicImport(Vec<PathBuf>),

    #[error("Workflow source not found: {0}")]
    SourceNotFound(String),

    #[error("Multiple workflow sources detected in '{}'", .0.display())]
    AmbiguousSource(PathBuf),
}

impl LoadError {
    /// Returns true when the failure is about locating the source rather
    /// than its contents.
    pub fn is_source_error(&self) -> bool {
        matches!(self, Self::SourceNotFound(_) | Self::AmbiguousSource(_))
    }
}

/// Failure of a single action. Never aborts the run by itself.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ActionError {
    #[error("Outcome resolution failed: {0}")]
    OutcomeResolution(String),

    #[error("{0}")]
    Execution(String),

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("Cancelled")]
    Cancelled,
}

/// Fatal run-loop failures.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The run was aborted; the report holds every node state captured
    /// up to that point.
    #[error("Engine invariant violated: {reason}")]
    InvariantViolation {
        reason: String,
        report: Box<RunReport>,
    },
}

/// Any error surfaced while loading, validating or running a workflow.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Load(#[from] LoadError),

    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("Failed to write report '{}': {source}", .path.display())]
    Report {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl Error {
    /// Process exit code for this error class.
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Load(e) if e.is_source_error() => EXIT_SOURCE,
            Self::Load(_) => EXIT_LOAD,
            Self::Configuration(_) => EXIT_CONFIGURATION,
            Self::Engine(_) | Self::Report { .. } => EXIT_INTERNAL,
        }
    }
}
