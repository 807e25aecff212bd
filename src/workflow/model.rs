//! Workflow Data Model
//!
//! Declarations of actions as they appear in a workflow source.
//!
//! # Example YAML Format
//!
//! ```yaml
//! context:
//!   greeting: hello
//!
//! actions:
//!   - name: fetch
//!     type: shell
//!     command: yield_outcome revision "$(git rev-parse HEAD)"
//!
//!   - name: announce
//!     type: echo
//!     expects:
//!       - fetch
//!       - { name: notify, external: true }
//!     on_failure: continue
//!     timeout: 2.5
//!     message: "@{context.greeting} from @{outcomes.fetch.revision}"
//! ```
//!
//! Every key that is not one of the reserved keys (`name`, `type`,
//! `description`, `expects`, `on_failure`, `timeout`) is collected as an
//! action parameter.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Parameter mapping handed to an action. Values may contain template
/// expressions until they are resolved right before dispatch.
pub type Parameters = serde_json::Map<String, Value>;

/// Run-wide reaction to an action failure.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "kebab-case")]
pub enum FailurePolicy {
    /// Cancel everything in flight and stop dispatching.
    FailFast,
    /// Skip the failed action's dependents and keep going with the rest.
    #[default]
    BestEffort,
}

impl FailurePolicy {
    /// All recognized policy names.
    pub const NAMES: &'static [&'static str] = &["fail-fast", "best-effort"];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FailFast => "fail-fast",
            Self::BestEffort => "best-effort",
        }
    }
}

impl fmt::Display for FailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('_', "-").as_str() {
            "fail-fast" => Ok(Self::FailFast),
            "best-effort" => Ok(Self::BestEffort),
            other => Err(format!(
                "Unknown failure policy '{}' (expected one of: {})",
                other,
                Self::NAMES.join(", ")
            )),
        }
    }
}

/// Per-action override of the run's failure policy.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum OnFailure {
    /// A failure of this action stops the run, whatever the run policy.
    FailFast,
    /// A failure of this action only skips its dependents.
    BestEffort,
    /// Dependents still run; the run still ends as failed.
    Continue,
}

impl OnFailure {
    /// Returns the run-wide policy to apply for a failure of this action,
    /// or `None` when nothing beyond recording the failure should happen.
    pub fn policy(self) -> Option<FailurePolicy> {
        match self {
            Self::FailFast => Some(FailurePolicy::FailFast),
            Self::BestEffort => Some(FailurePolicy::BestEffort),
            Self::Continue => None,
        }
    }
}

/// One entry of an action's `expects` list.
///
/// Written either as a bare action name or as a mapping:
///
/// ```yaml
/// expects:
///   - build
///   - { name: lint, strict: true }
///   - { name: notify, external: true }
/// ```
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct Dependency {
    /// Name of the action depended upon
    pub name: String,

    /// Only a SUCCEEDED dependency satisfies a strict edge, even when it
    /// failed with `on_failure: continue`
    #[serde(default)]
    pub strict: bool,

    /// The edge is dropped when no action with this name is declared
    #[serde(default)]
    pub external: bool,
}

impl Dependency {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into().trim().to_string(),
            strict: false,
            external: false,
        }
    }

    /// Marks the edge strict.
    pub fn strict(mut self) -> Self {
        self.strict = true;
        self
    }

    /// Marks the edge external.
    pub fn external(mut self) -> Self {
        self.external = true;
        self
    }
}

impl From<&str> for Dependency {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for Dependency {
    fn from(name: String) -> Self {
        Self::new(name)
    }
}

impl PartialEq<&str> for Dependency {
    fn eq(&self, other: &&str) -> bool {
        self.name == *other
    }
}

impl fmt::Display for Dependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)?;
        match (self.strict, self.external) {
            (true, true) => f.write_str(" (strict, external)"),
            (true, false) => f.write_str(" (strict)"),
            (false, true) => f.write_str(" (external)"),
            (false, false) => Ok(()),
        }
    }
}

/// Declarative description of one action node.
#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct ActionSpec {
    /// Unique name within the workflow
    pub name: String,

    /// Registered action type (e.g., "shell", "echo")
    #[serde(rename = "type")]
    pub action_type: String,

    /// Free-form description, shown by `validate`
    #[serde(default)]
    pub description: Option<String>,

    /// Actions that must finish in a satisfying state before this one starts
    #[serde(
        rename = "expects",
        alias = "depends_on",
        deserialize_with = "dependency_list",
        default
    )]
    pub dependencies: Vec<Dependency>,

    /// Failure policy override for this action
    #[serde(default)]
    pub on_failure: Option<OnFailure>,

    /// Wall-clock limit in seconds
    #[serde(deserialize_with = "optional_seconds", default)]
    pub timeout: Option<Duration>,

    /// Everything else
    #[serde(flatten)]
    pub parameters: Parameters,
}

/// Deserializes a single entry or a list of entries, each either a name or
/// a [`Dependency`] mapping.
fn dependency_list<'de, D>(deserializer: D) -> Result<Vec<Dependency>, D::Error>
where
    D: Deserializer<'de>,
{
    fn entry<E: de::Error>(value: Value) -> Result<Dependency, E> {
        let dependency = match value {
            Value::String(name) => Dependency::new(name),
            Value::Object(_) => serde_json::from_value::<Dependency>(value)
                .map_err(|e| E::custom(format!("invalid dependency: {}", e)))?,
            _ => return Err(E::custom("Expected a name or a mapping in 'expects'")),
        };
        if dependency.name.is_empty() {
            return Err(E::custom("Empty dependency name"));
        }
        Ok(dependency)
    }

    let val = Value::deserialize(deserializer)?;
    match val {
        Value::Null => Ok(Vec::new()),
        Value::String(s) if s.trim().is_empty() => Ok(Vec::new()),
        Value::Array(arr) => arr.into_iter().map(entry::<D::Error>).collect(),
        other => Ok(vec![entry::<D::Error>(other)?]),
    }
}

/// Deserializes a non-negative number of seconds.
fn optional_seconds<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<f64>::deserialize(deserializer)? {
        None => Ok(None),
        Some(secs) if secs.is_finite() && secs > 0.0 => Ok(Some(Duration::from_secs_f64(secs))),
        Some(secs) => Err(de::Error::custom(format!(
            "timeout must be a positive number of seconds, got {}",
            secs
        ))),
    }
}

impl ActionSpec {
    /// Creates a new ActionSpec with no dependencies or parameters.
    ///
    /// # Arguments
    ///
    /// * `name` - Unique action name
    /// * `action_type` - Registered action type
    ///
    /// # Example
    ///
    /// ```
    /// use rustrunner::workflow::ActionSpec;
    ///
    /// let spec = ActionSpec::new("greet", "echo")
    ///     .with_parameter("message", "hello @{context.who}")
    ///     .depends_on("setup");
    /// assert_eq!(spec.dependencies, vec!["setup"]);
    /// ```
    pub fn new(name: impl Into<String>, action_type: impl Into<String>) -> Self {
        Self {
            name: name.into().trim().to_string(),
            action_type: action_type.into().trim().to_string(),
            description: None,
            dependencies: Vec::new(),
            on_failure: None,
            timeout: None,
            parameters: Parameters::new(),
        }
    }

    /// Adds a dependency on another action.
    pub fn depends_on(mut self, action: impl Into<Dependency>) -> Self {
        self.dependencies.push(action.into());
        self
    }

    /// Sets a parameter value.
    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    /// Sets the failure policy override.
    pub fn with_on_failure(mut self, on_failure: OnFailure) -> Self {
        self.on_failure = Some(on_failure);
        self
    }

    /// Sets the per-action timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spec_creation() {
        let spec = ActionSpec::new(" build ", "shell")
            .with_parameter("command", "make")
            .depends_on("fetch")
            .with_timeout(Duration::from_secs(5));

        assert_eq!(spec.name, "build");
        assert_eq!(spec.action_type, "shell");
        assert_eq!(spec.dependencies, vec!["fetch"]);
        assert_eq!(spec.parameters["command"], "make");
        assert_eq!(spec.timeout, Some(Duration::from_secs(5)));
    }

    #[test]
    fn test_deserialize_collects_parameters() {
        let yaml = r#"
name: greet
type: echo
description: says hi
message: hello
retries: 3
"#;
        let spec: ActionSpec = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(spec.name, "greet");
        assert_eq!(spec.description.as_deref(), Some("says hi"));
        assert_eq!(spec.parameters.len(), 2);
        assert_eq!(spec.parameters["message"], "hello");
        assert_eq!(spec.parameters["retries"], 3);
        assert!(!spec.parameters.contains_key("name"));
    }

    #[test]
    fn test_expects_single_string_or_list() {
        let single: ActionSpec = serde_yaml::from_str("name: b\ntype: echo\nexpects: a\n").unwrap();
        assert_eq!(single.dependencies, vec!["a"]);

        let list: ActionSpec =
            serde_yaml::from_str("name: c\ntype: echo\nexpects: [a, b]\n").unwrap();
        assert_eq!(list.dependencies, vec!["a", "b"]);

        let alias: ActionSpec =
            serde_yaml::from_str("name: d\ntype: echo\ndepends_on: [a]\n").unwrap();
        assert_eq!(alias.dependencies, vec!["a"]);
    }

    #[test]
    fn test_expects_mapping_entries() {
        let spec: ActionSpec = serde_yaml::from_str(
            r#"
name: deploy
type: echo
expects:
  - build
  - { name: lint, strict: true }
  - name: notify
    external: true
"#,
        )
        .unwrap();

        assert_eq!(
            spec.dependencies,
            vec![
                Dependency::new("build"),
                Dependency::new("lint").strict(),
                Dependency::new("notify").external(),
            ]
        );
        assert_eq!(spec.dependencies[1].to_string(), "lint (strict)");
    }

    #[test]
    fn test_expects_single_mapping() {
        let spec: ActionSpec =
            serde_yaml::from_str("name: b\ntype: echo\nexpects: { name: a, strict: true }\n")
                .unwrap();
        assert_eq!(spec.dependencies, vec![Dependency::new("a").strict()]);
    }

    #[test]
    fn test_expects_mapping_errors() {
        for yaml in [
            "name: b\ntype: echo\nexpects: [{ strict: true }]\n",
            "name: b\ntype: echo\nexpects: [{ name: a, optional: true }]\n",
            "name: b\ntype: echo\nexpects: [{ name: a, strict: maybe }]\n",
            "name: b\ntype: echo\nexpects: [\"\"]\n",
        ] {
            let result: Result<ActionSpec, _> = serde_yaml::from_str(yaml);
            assert!(result.is_err(), "expected error for {yaml}");
        }
    }

    #[test]
    fn test_expects_rejects_non_strings() {
        let result: Result<ActionSpec, _> =
            serde_yaml::from_str("name: b\ntype: echo\nexpects: [1, 2]\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_on_failure_and_timeout() {
        let spec: ActionSpec = serde_yaml::from_str(
            "name: b\ntype: echo\non_failure: continue\ntimeout: 1.5\n",
        )
        .unwrap();

        assert_eq!(spec.on_failure, Some(OnFailure::Continue));
        assert_eq!(spec.timeout, Some(Duration::from_millis(1500)));
    }

    #[test]
    fn test_negative_timeout_rejected() {
        let result: Result<ActionSpec, _> =
            serde_yaml::from_str("name: b\ntype: echo\ntimeout: -1\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_missing_type_rejected() {
        let result: Result<ActionSpec, _> = serde_yaml::from_str("name: b\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_failure_policy_from_str() {
        assert_eq!("fail-fast".parse::<FailurePolicy>(), Ok(FailurePolicy::FailFast));
        assert_eq!("BEST_EFFORT".parse::<FailurePolicy>(), Ok(FailurePolicy::BestEffort));
        assert!("sometimes".parse::<FailurePolicy>().is_err());
        assert_eq!(FailurePolicy::default(), FailurePolicy::BestEffort);
    }

    #[test]
    fn test_on_failure_policy_mapping() {
        assert_eq!(OnFailure::FailFast.policy(), Some(FailurePolicy::FailFast));
        assert_eq!(OnFailure::BestEffort.policy(), Some(FailurePolicy::BestEffort));
        assert_eq!(OnFailure::Continue.policy(), None);
    }
}
