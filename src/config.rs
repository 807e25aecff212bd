//! Run Configuration
//!
//! [`RunConfig`] carries every run-wide knob. It is assembled once, before
//! the run starts (by the CLI from flags and environment variables, or by
//! library callers through the `with_*` builders), and never changes
//! afterwards.
//!
//! [`RECOGNIZED_OPTIONS`] documents each option with its flag, environment
//! variable and default; `rustrunner info options` prints it.

use std::time::Duration;

use crate::execution::{RenderingMode, StrategyKind};
use crate::workflow::FailurePolicy;

pub const ENV_WORKFLOW_FILE: &str = "RUSTRUNNER_WORKFLOW_FILE";
pub const ENV_CONTEXT_DIRECTORY: &str = "RUSTRUNNER_CONTEXT_DIRECTORY";
pub const ENV_STRATEGY: &str = "RUSTRUNNER_STRATEGY";
pub const ENV_MAX_PARALLEL: &str = "RUSTRUNNER_MAX_PARALLEL";
pub const ENV_FAILURE_POLICY: &str = "RUSTRUNNER_FAILURE_POLICY";
pub const ENV_LENIENT_OUTCOMES: &str = "RUSTRUNNER_LENIENT_OUTCOMES";
pub const ENV_ACTION_TIMEOUT: &str = "RUSTRUNNER_ACTION_TIMEOUT";
pub const ENV_ACTION_DIRECTORIES: &str = "RUSTRUNNER_ACTION_DIRECTORIES";
pub const ENV_NO_YIELD_FUNCTION: &str = "RUSTRUNNER_NO_YIELD_FUNCTION";
pub const ENV_LOG_LEVEL: &str = "RUSTRUNNER_LOG_LEVEL";
pub const ENV_LOG_FILE: &str = "RUSTRUNNER_LOG_FILE";

/// Environment variable through which external actions learn their name.
pub const ENV_ACTION_NAME: &str = "RUSTRUNNER_ACTION_NAME";

/// Run-wide settings.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use rustrunner::config::RunConfig;
/// use rustrunner::execution::{RenderingMode, StrategyKind};
/// use rustrunner::workflow::FailurePolicy;
///
/// let config = RunConfig::default()
///     .with_strategy(StrategyKind::Free)
///     .with_max_parallel(4)
///     .with_failure_policy(FailurePolicy::FailFast)
///     .with_rendering(RenderingMode::Lenient)
///     .with_action_timeout(Some(Duration::from_secs(60)));
///
/// assert_eq!(config.max_parallel, 4);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct RunConfig {
    /// Dispatch strategy
    pub strategy: StrategyKind,
    /// Concurrency bound for the free strategy; 0 means unbounded
    pub max_parallel: usize,
    /// Reaction to action failures without an override
    pub failure_policy: FailurePolicy,
    /// Strict or lenient outcome references
    pub rendering: RenderingMode,
    /// Default per-action timeout; an action's own `timeout` wins
    pub action_timeout: Option<Duration>,
    /// Whether shell actions get the `yield_outcome` helper
    pub yield_function: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            strategy: StrategyKind::Free,
            max_parallel: 0,
            failure_policy: FailurePolicy::BestEffort,
            rendering: RenderingMode::Strict,
            action_timeout: None,
            yield_function: true,
        }
    }
}

impl RunConfig {
    pub fn with_strategy(mut self, strategy: StrategyKind) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_max_parallel(mut self, max_parallel: usize) -> Self {
        self.max_parallel = max_parallel;
        self
    }

    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    pub fn with_rendering(mut self, rendering: RenderingMode) -> Self {
        self.rendering = rendering;
        self
    }

    pub fn with_action_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.action_timeout = timeout;
        self
    }

    pub fn with_yield_function(mut self, enabled: bool) -> Self {
        self.yield_function = enabled;
        self
    }
}

/// Documentation entry for one recognized option.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfigOption {
    pub name: &'static str,
    pub flag: &'static str,
    pub env: &'static str,
    pub default: &'static str,
    pub description: &'static str,
}

/// Every option the CLI understands.
pub const RECOGNIZED_OPTIONS: &[ConfigOption] = &[
    ConfigOption {
        name: "workflow",
        flag: "[WORKFLOW]",
        env: ENV_WORKFLOW_FILE,
        default: "rustrunner.yml | rustrunner.yaml",
        description: "Workflow file, or - for standard input",
    },
    ConfigOption {
        name: "context-dir",
        flag: "--context-dir",
        env: ENV_CONTEXT_DIRECTORY,
        default: ".",
        description: "Directory searched for the workflow file",
    },
    ConfigOption {
        name: "strategy",
        flag: "-s, --strategy",
        env: ENV_STRATEGY,
        default: "free",
        description: "Scheduling strategy: free or sequential",
    },
    ConfigOption {
        name: "max-parallel",
        flag: "-j, --max-parallel",
        env: ENV_MAX_PARALLEL,
        default: "number of CPUs",
        description: "Concurrency bound for the free strategy (0 = unbounded)",
    },
    ConfigOption {
        name: "failure-policy",
        flag: "--failure-policy",
        env: ENV_FAILURE_POLICY,
        default: "best-effort",
        description: "Reaction to failures: fail-fast or best-effort",
    },
    ConfigOption {
        name: "lenient-outcomes",
        flag: "--lenient-outcomes",
        env: ENV_LENIENT_OUTCOMES,
        default: "false",
        description: "Render missing outcomes as empty strings",
    },
    ConfigOption {
        name: "timeout",
        flag: "--timeout",
        env: ENV_ACTION_TIMEOUT,
        default: "none",
        description: "Default per-action timeout in seconds",
    },
    ConfigOption {
        name: "actions-dir",
        flag: "--actions-dir",
        env: ENV_ACTION_DIRECTORIES,
        default: "none",
        description: "Directories of executable actions (colon-separated in env)",
    },
    ConfigOption {
        name: "no-yield-function",
        flag: "--no-yield-function",
        env: ENV_NO_YIELD_FUNCTION,
        default: "false",
        description: "Do not inject yield_outcome into shell actions",
    },
    ConfigOption {
        name: "log-level",
        flag: "-l, --log-level",
        env: ENV_LOG_LEVEL,
        default: "info",
        description: "Log verbosity: off, error, warn, info, debug, trace",
    },
    ConfigOption {
        name: "log-file",
        flag: "--log-file",
        env: ENV_LOG_FILE,
        default: "stderr",
        description: "Write logs to this file instead of stderr",
    },
];

/// Renders [`RECOGNIZED_OPTIONS`] as an aligned table.
pub fn describe_options() -> String {
    let flag_width = RECOGNIZED_OPTIONS
        .iter()
        .map(|o| o.flag.len())
        .max()
        .unwrap_or(0);
    let env_width = RECOGNIZED_OPTIONS
        .iter()
        .map(|o| o.env.len())
        .max()
        .unwrap_or(0);

    let mut output = String::new();
    for option in RECOGNIZED_OPTIONS {
        output.push_str(&format!(
            "{:flag_width$}  {:env_width$}  {} (default: {})\n",
            option.flag, option.env, option.description, option.default,
        ));
    }
    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_defaults() {
        let config = RunConfig::default();
        assert_eq!(config.strategy, StrategyKind::Free);
        assert_eq!(config.max_parallel, 0);
        assert_eq!(config.failure_policy, FailurePolicy::BestEffort);
        assert_eq!(config.rendering, RenderingMode::Strict);
        assert!(config.yield_function);
    }

    #[test]
    fn test_builders() {
        let config = RunConfig::default()
            .with_strategy(StrategyKind::Sequential)
            .with_yield_function(false)
            .with_action_timeout(Some(Duration::from_millis(250)));

        assert_eq!(config.strategy, StrategyKind::Sequential);
        assert!(!config.yield_function);
        assert_eq!(config.action_timeout, Some(Duration::from_millis(250)));
    }

    #[test]
    fn test_options_are_unique() {
        let names: HashSet<_> = RECOGNIZED_OPTIONS.iter().map(|o| o.name).collect();
        let envs: HashSet<_> = RECOGNIZED_OPTIONS.iter().map(|o| o.env).collect();
        assert_eq!(names.len(), RECOGNIZED_OPTIONS.len());
        assert_eq!(envs.len(), RECOGNIZED_OPTIONS.len());
        assert!(RECOGNIZED_OPTIONS.iter().all(|o| o.env.starts_with("RUSTRUNNER_")));
    }

    #[test]
    fn test_describe_options_lists_everything() {
        let table = describe_options();
        assert_eq!(table.lines().count(), RECOGNIZED_OPTIONS.len());
        assert!(table.contains(ENV_MAX_PARALLEL));
        assert!(table.contains("--failure-policy"));
    }
}
