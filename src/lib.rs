//! RustRunner - Declarative Task Orchestration Engine
//!
//! Runs a graph of named actions declared in YAML. Each action has a type,
//! parameters and dependencies; independent actions run concurrently, and
//! values published by one action flow into the parameters of its
//! dependents through `@{outcomes.<action>.<key>}` templates.
//!
//! # Architecture
//!
//! The library is organized into four main modules:
//!
//! - [`workflow`]: Action declarations, YAML parsing and the validated graph
//! - [`execution`]: Run engine, dispatch strategies, templates and reports
//! - [`actions`]: Bundled action types (`echo`, `shell`, directory plugins)
//! - [`config`]: Run-wide settings and the recognized option table
//!
//! # Example
//!
//! ```rust,no_run
//! use rustrunner::config::RunConfig;
//! use rustrunner::execution::{ActionRegistry, Engine};
//! use rustrunner::loads;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), rustrunner::Error> {
//!     let workflow = loads(
//!         r#"
//! actions:
//!   - name: fetch
//!     type: shell
//!     command: yield_outcome version 1.4.2
//!   - name: announce
//!     type: echo
//!     expects: fetch
//!     message: "Deploying @{outcomes.fetch.version}"
//! "#,
//!     )?;
//!
//!     let engine = Engine::new(workflow, ActionRegistry::builtin(), RunConfig::default())?;
//!     let report = engine.run().await?;
//!     println!("{}", report.summary());
//!     Ok(())
//! }
//! ```

pub mod actions;
pub mod config;
pub mod error;
pub mod execution;
pub mod workflow;

// Re-export commonly used types
pub use config::RunConfig;
pub use error::Error;
pub use execution::{ActionRegistry, Engine, RunReport};
pub use workflow::{load_workflow, loads, ActionSpec, Workflow};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = "RustRunner";

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::ActionState;

    #[test]
    fn test_library_version() {
        assert!(!VERSION.is_empty());
        assert!(VERSION.contains('.'));
    }

    #[test]
    fn test_app_name() {
        assert_eq!(APP_NAME, "RustRunner");
    }

    #[test]
    fn test_version_format() {
        let parts: Vec<&str> = VERSION.split('.').collect();
        assert!(parts.len() >= 2, "Version should have at least major.minor");
        for part in parts {
            assert!(part.parse::<u32>().is_ok(), "Version components should be numeric");
        }
    }

    #[tokio::test]
    async fn test_yaml_to_report() {
        let workflow = loads(
            r#"
context:
  who: world
actions:
  - name: produce
    type: shell
    command: yield_outcome greeting "hello @{context.who}"
  - name: consume
    type: shell
    expects: produce
    command: yield_outcome echoed "@{outcomes.produce.greeting}!"
  - name: say
    type: echo
    expects: [consume]
    message: "@{outcomes.consume.echoed}"
"#,
        )
        .unwrap();

        let engine = Engine::new(workflow, ActionRegistry::builtin(), RunConfig::default()).unwrap();
        let report = engine.run().await.unwrap();

        assert!(report.is_success(), "{}", report.summary());
        assert_eq!(report.action("consume").unwrap().outcomes["echoed"], "hello world!");
        let names: Vec<_> = report.actions.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec!["produce", "consume", "say"]);
    }

    #[tokio::test]
    async fn test_dependency_mappings_in_yaml() {
        let workflow = loads(
            r#"
actions:
  - name: flaky
    type: shell
    command: exit 1
    on_failure: continue
  - name: cleanup
    type: echo
    expects: [flaky, {name: provisioner, external: true}]
    message: "flaky is @{status.flaky}"
  - name: publish
    type: echo
    expects: {name: flaky, strict: true}
    message: never
"#,
        )
        .unwrap();

        assert_eq!(workflow.dependencies(1).len(), 1);
        let engine = Engine::new(workflow, ActionRegistry::builtin(), RunConfig::default()).unwrap();
        let report = engine.run().await.unwrap();

        assert_eq!(report.state_of("cleanup"), Some(ActionState::Succeeded));
        assert_eq!(report.state_of("publish"), Some(ActionState::Skipped));
        assert!(!report.is_success());
    }
}
