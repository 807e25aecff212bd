//! External Actions
//!
//! Every executable file in an action directory becomes an action type
//! named after its file stem (`deploy.sh` → `deploy`). The program gets the
//! resolved parameters as a JSON object on stdin, its action name in
//! `RUSTRUNNER_ACTION_NAME`, and yields outcomes with the marker protocol
//! from [`super::emission`].

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use log::{debug, warn};
use tokio::process::Command;

use super::process::run_process;
use crate::config::ENV_ACTION_NAME;
use crate::error::{ActionError, ConfigurationError};
use crate::execution::{Action, ActionContext, Outcomes};

/// Action backed by an executable file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalAction {
    program: PathBuf,
}

impl ExternalAction {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }
}

#[async_trait]
impl Action for ExternalAction {
    async fn run(&self, ctx: ActionContext) -> Result<Outcomes, ActionError> {
        let payload = serde_json::to_vec(ctx.parameters())
            .map_err(|e| ActionError::Execution(format!("Failed to encode parameters: {}", e)))?;

        let mut command = Command::new(&self.program);
        command.env(ENV_ACTION_NAME, ctx.name());

        debug!("[{}] running {}", ctx.name(), self.program.display());
        run_process(command, Some(payload), &ctx).await
    }
}

/// Finds the executable files in `dir`, sorted by action type name.
///
/// Hidden files and subdirectories are ignored. When two files share a
/// stem, the first one in path order wins.
pub fn discover(dir: &Path) -> Result<Vec<(String, ExternalAction)>, ConfigurationError> {
    let directory_error = |reason: String| ConfigurationError::ActionDirectory {
        path: dir.to_path_buf(),
        reason,
    };

    let entries = fs::read_dir(dir).map_err(|e| directory_error(e.to_string()))?;

    let mut paths = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| directory_error(e.to_string()))?;
        paths.push(entry.path());
    }
    paths.sort();

    let mut found: BTreeMap<String, ExternalAction> = BTreeMap::new();
    for path in paths {
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        if stem.is_empty() || stem.starts_with('.') {
            continue;
        }
        let Ok(metadata) = fs::metadata(&path) else {
            warn!("Ignoring unreadable action file {}", path.display());
            continue;
        };
        if !metadata.is_file() || !is_executable(&metadata) {
            debug!("Ignoring non-executable {}", path.display());
            continue;
        }

        if let Some(existing) = found.get(stem) {
            warn!(
                "Ignoring {}: action type '{}' already provided by {}",
                path.display(),
                stem,
                existing.program().display()
            );
            continue;
        }
        found.insert(stem.to_string(), ExternalAction::new(&path));
    }

    Ok(found.into_iter().collect())
}

#[cfg(unix)]
fn is_executable(metadata: &fs::Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o111 != 0
}

#[cfg(not(unix))]
fn is_executable(_metadata: &fs::Metadata) -> bool {
    true
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::execution::ActionRegistry;
    use crate::workflow::Parameters;
    use serde_json::Value;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;
    use tokio_util::sync::CancellationToken;

    fn write_program(dir: &Path, file: &str, body: &str, mode: u32) -> PathBuf {
        let path = dir.join(file);
        fs::write(&path, body).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(mode)).unwrap();
        path
    }

    const ECHO_INPUT: &str = r#"#!/bin/sh
input=$(cat)
printf '##rustrunner[yield-outcome-b64 %s %s]##\n' \
  "$(printf '%s' input | base64 | tr -d '\n')" \
  "$(printf '%s' "$input" | base64 | tr -d '\n')"
printf '##rustrunner[yield-outcome-b64 %s %s]##\n' \
  "$(printf '%s' name | base64 | tr -d '\n')" \
  "$(printf '%s' "$RUSTRUNNER_ACTION_NAME" | base64 | tr -d '\n')"
"#;

    #[test]
    fn test_discover_executables_only() {
        let dir = TempDir::new().unwrap();
        write_program(dir.path(), "deploy.sh", "#!/bin/sh\n", 0o755);
        write_program(dir.path(), "notes.txt", "hello", 0o644);
        write_program(dir.path(), ".hidden", "#!/bin/sh\n", 0o755);
        fs::create_dir(dir.path().join("nested")).unwrap();

        let found = discover(dir.path()).unwrap();
        let names: Vec<_> = found.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["deploy"]);
        assert_eq!(found[0].1.program(), dir.path().join("deploy.sh"));
    }

    #[test]
    fn test_discover_missing_directory() {
        let err = discover(Path::new("/nonexistent/rustrunner/actions")).unwrap_err();
        assert!(matches!(err, ConfigurationError::ActionDirectory { .. }));
    }

    #[test]
    fn test_later_directory_overrides_builtin() {
        let dir = TempDir::new().unwrap();
        write_program(dir.path(), "echo", "#!/bin/sh\n", 0o755);

        let registry = ActionRegistry::builder()
            .with_builtins()
            .load_directory(dir.path())
            .unwrap()
            .build();
        assert_eq!(registry.types(), vec!["echo", "shell"]);
    }

    #[tokio::test]
    async fn test_parameters_arrive_as_json() {
        let dir = TempDir::new().unwrap();
        let program = write_program(dir.path(), "inspect", ECHO_INPUT, 0o755);

        let mut parameters = Parameters::new();
        parameters.insert("target".into(), Value::from("prod"));
        parameters.insert("replicas".into(), Value::from(3));
        let ctx = ActionContext::new("ship", parameters, CancellationToken::new());

        let outcomes = ExternalAction::new(program).run(ctx).await.unwrap();
        let input: Value = serde_json::from_str(&outcomes["input"]).unwrap();
        assert_eq!(input["target"], "prod");
        assert_eq!(input["replicas"], 3);
        assert_eq!(outcomes["name"], "ship");
    }

    #[tokio::test]
    async fn test_failing_program() {
        let dir = TempDir::new().unwrap();
        let program = write_program(dir.path(), "broken", "#!/bin/sh\nexit 4\n", 0o755);
        let ctx = ActionContext::new("x", Parameters::new(), CancellationToken::new());

        let result = ExternalAction::new(program).run(ctx).await;
        assert_eq!(result, Err(ActionError::Execution("Exit code: 4".into())));
    }
}
