//! Shell Action
//!
//! Runs a command string or a script file through a shell. The script is
//! written to a temporary file first, prefixed with the `yield_outcome`
//! helper unless it was disabled for the run.
//!
//! # Parameters
//!
//! ```yaml
//! - name: build
//!   type: shell
//!   command: |              # either `command`...
//!     make all
//!     yield_outcome artifact target/app
//!   file: scripts/build.sh  # ...or `file`, sourced by the script
//!   environment:            # optional extra environment variables
//!     PROFILE: release
//!   cwd: /src               # optional working directory
//!   shell: bash             # optional interpreter (default: bash)
//! ```

use std::collections::BTreeMap;
use std::io::Write;
use std::path::PathBuf;

use async_trait::async_trait;
use log::debug;
use serde::Deserialize;
use serde_json::Value;
use tempfile::NamedTempFile;
use tokio::process::Command;

use super::emission::YIELD_SHELL_FUNCTION;
use super::process::run_process;
use crate::error::ActionError;
use crate::execution::{Action, ActionContext, Outcomes};
use crate::workflow::Parameters;

const DEFAULT_SHELL: &str = "bash";

fn default_shell() -> String {
    DEFAULT_SHELL.to_string()
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
struct ShellParameters {
    #[serde(default)]
    command: Option<String>,
    #[serde(default)]
    file: Option<PathBuf>,
    #[serde(default)]
    environment: BTreeMap<String, String>,
    #[serde(default)]
    cwd: Option<PathBuf>,
    #[serde(default = "default_shell")]
    shell: String,
}

impl ShellParameters {
    fn parse(parameters: &Parameters) -> Result<Self, String> {
        let parsed: Self = serde_json::from_value(Value::Object(parameters.clone()))
            .map_err(|e| e.to_string())?;

        match (&parsed.command, &parsed.file) {
            (Some(_), Some(_)) => Err("'command' and 'file' are mutually exclusive".to_string()),
            (None, None) => Err("either 'command' or 'file' is required".to_string()),
            _ => Ok(parsed),
        }
    }

    /// Script text handed to the shell.
    fn script(&self, yield_function: bool) -> String {
        let mut script = String::new();
        if yield_function {
            script.push_str(YIELD_SHELL_FUNCTION);
            script.push('\n');
        }
        if let Some(command) = &self.command {
            script.push_str(command);
        } else if let Some(file) = &self.file {
            script.push_str(&format!(". {}", quote(&file.to_string_lossy())));
        }
        script.push('\n');
        script
    }
}

/// Single-quotes a string for POSIX shells.
fn quote(text: &str) -> String {
    format!("'{}'", text.replace('\'', r#"'\''"#))
}

/// Writes the script to a temporary file removed when the handle drops.
fn create_script(content: &str) -> Result<NamedTempFile, ActionError> {
    let mut file = tempfile::Builder::new()
        .prefix("rustrunner-")
        .suffix(".sh")
        .tempfile()
        .map_err(|e| ActionError::Execution(format!("Failed to create script: {}", e)))?;

    file.write_all(content.as_bytes())
        .and_then(|_| file.flush())
        .map_err(|e| ActionError::Execution(format!("Failed to write script: {}", e)))?;

    Ok(file)
}

/// Built-in `shell` action type.
#[derive(Debug, Default, Clone, Copy)]
pub struct ShellAction;

#[async_trait]
impl Action for ShellAction {
    fn validate(&self, parameters: &Parameters) -> Result<(), String> {
        ShellParameters::parse(parameters).map(|_| ())
    }

    async fn run(&self, ctx: ActionContext) -> Result<Outcomes, ActionError> {
        let params = ShellParameters::parse(ctx.parameters()).map_err(ActionError::Execution)?;
        let script = create_script(&params.script(ctx.yield_function_enabled()))?;

        let mut command = Command::new(&params.shell);
        command.arg(script.path()).envs(&params.environment);
        if let Some(cwd) = &params.cwd {
            command.current_dir(cwd);
            debug!("[{}] executing in directory: {}", ctx.name(), cwd.display());
        }

        debug!(
            "[{}] running {} {}",
            ctx.name(),
            params.shell,
            script.path().display()
        );
        run_process(command, None, &ctx).await
    }
}
