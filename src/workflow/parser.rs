//! Workflow Parser
//!
//! Handles locating, loading and parsing workflow definitions from YAML.
//!
//! A workflow source is either an explicit file, `-` for standard input,
//! or detected inside a context directory as one of
//! [`DEFAULT_SOURCE_NAMES`].
//!
//! # Imports
//!
//! Entries of `actions` and `context` may be `!import <path>` instead of
//! inline declarations. The imported file contributes its own `actions`
//! (when imported from `actions`) or `context` (when imported from
//! `context`); its other root keys are ignored. Relative paths resolve
//! against the importing file's directory. A file that imports itself,
//! directly or through other files, is a [`LoadError::CyclicImport`].
//!
//! ```yaml
//! context:
//!   - region: eu
//!   - !import shared/context.yml
//! actions:
//!   - !import build/actions.yml
//!   - name: deploy
//!     type: shell
//!     expects: compile
//!     command: ./deploy.sh
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use log::{debug, info};
use serde_yaml::{Mapping, Value};

use super::graph::Workflow;
use super::model::ActionSpec;
use super::validator::GraphBuilder;
use crate::error::{Error, LoadError};

/// File names searched for when no explicit source is given.
pub const DEFAULT_SOURCE_NAMES: &[&str] = &["rustrunner.yml", "rustrunner.yaml"];

/// Marker for reading the workflow from standard input.
pub const STDIN_SOURCE: &str = "-";

/// YAML tag that splices another file into `actions` or `context`.
pub const IMPORT_TAG: &str = "!import";

const ROOT_KEYS: &[&str] = &["actions", "context"];

/// Root document of a workflow, with every import resolved.
#[derive(Debug, Clone, Default)]
pub struct WorkflowDocument {
    /// Ordered action declarations
    pub actions: Vec<ActionSpec>,

    /// Static key/value context
    pub context: BTreeMap<String, String>,
}

impl WorkflowDocument {
    /// Validates the declarations and builds the graph.
    pub fn into_workflow(self) -> Result<Workflow, crate::error::ConfigurationError> {
        GraphBuilder::new()
            .with_context(self.context)
            .build(self.actions)
    }
}

/// Root keys a document contributes at its nesting level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    All,
    Actions,
    Context,
}

impl Section {
    fn includes(self, key: &str) -> bool {
        match self {
            Self::All => true,
            Self::Actions => key == "actions",
            Self::Context => key == "context",
        }
    }
}

/// Accumulates one document from a root source and its imports.
#[derive(Debug, Default)]
struct DocumentLoader {
    /// Canonical paths of the files currently being read, outermost first
    stack: Vec<PathBuf>,
    document: WorkflowDocument,
}

impl DocumentLoader {
    fn load_file(&mut self, path: &Path, section: Section) -> Result<(), LoadError> {
        let canonical = fs::canonicalize(path).map_err(|e| LoadError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        if self.stack.contains(&canonical) {
            let mut chain = self.stack.clone();
            chain.push(canonical);
            return Err(LoadError::CyclicImport(chain));
        }

        let text = fs::read_to_string(&canonical).map_err(|e| LoadError::Io {
            path: canonical.clone(),
            source: e,
        })?;
        debug!("Reading {} ({} bytes)", canonical.display(), text.len());

        let base = canonical
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        self.stack.push(canonical);
        let loaded = self.load_text(&text, &base, section);
        self.stack.pop();
        loaded
    }

    fn load_text(&mut self, text: &str, base: &Path, section: Section) -> Result<(), LoadError> {
        if text.trim().is_empty() {
            return Err(LoadError::Structure("workflow source is empty".into()));
        }

        let root = match serde_yaml::from_str::<Value>(text)? {
            Value::Mapping(root) => root,
            other => {
                return Err(LoadError::Structure(format!(
                    "root must be a mapping, got {}",
                    kind(&other)
                )))
            }
        };
        if root.is_empty() {
            return Err(LoadError::Structure(format!(
                "empty root mapping (expected some of: {})",
                ROOT_KEYS.join(", ")
            )));
        }

        for (key, value) in root {
            let key = match key.as_str() {
                Some(key) if ROOT_KEYS.contains(&key) => key.to_string(),
                _ => {
                    return Err(LoadError::Structure(format!(
                        "unrecognized root key {:?} (expected some of: {})",
                        key,
                        ROOT_KEYS.join(", ")
                    )))
                }
            };
            if !section.includes(&key) {
                debug!("Ignoring '{}' of an imported file", key);
                continue;
            }
            match key.as_str() {
                "actions" => self.load_actions(value, base)?,
                _ => self.load_context(value, base)?,
            }
        }
        Ok(())
    }

    fn load_actions(&mut self, value: Value, base: &Path) -> Result<(), LoadError> {
        let items = match value {
            Value::Sequence(items) => items,
            other => {
                return Err(LoadError::Structure(format!(
                    "'actions' must be a list, got {}",
                    kind(&other)
                )))
            }
        };

        for item in items {
            match item {
                Value::Mapping(_) => {
                    let spec: ActionSpec = serde_yaml::from_value(item)?;
                    self.document.actions.push(spec);
                }
                Value::Tagged(tagged) if tagged.tag == IMPORT_TAG => {
                    self.import(tagged.value, base, Section::Actions)?
                }
                other => {
                    return Err(LoadError::Structure(format!(
                        "action entries must be mappings or {}, got {}",
                        IMPORT_TAG,
                        kind(&other)
                    )))
                }
            }
        }
        Ok(())
    }

    fn load_context(&mut self, value: Value, base: &Path) -> Result<(), LoadError> {
        match value {
            Value::Null => Ok(()),
            Value::Mapping(entries) => self.merge_context(entries),
            Value::Sequence(items) => {
                for (position, item) in items.into_iter().enumerate() {
                    match item {
                        Value::Mapping(entries) => self.merge_context(entries)?,
                        Value::Tagged(tagged) if tagged.tag == IMPORT_TAG => {
                            self.import(tagged.value, base, Section::Context)?
                        }
                        other => {
                            return Err(LoadError::Structure(format!(
                                "context item #{} must be a mapping or {}, got {}",
                                position + 1,
                                IMPORT_TAG,
                                kind(&other)
                            )))
                        }
                    }
                }
                Ok(())
            }
            other => Err(LoadError::Structure(format!(
                "'context' must be a mapping or a list, got {}",
                kind(&other)
            ))),
        }
    }

    /// Adds context entries; later definitions of a key win.
    fn merge_context(&mut self, entries: Mapping) -> Result<(), LoadError> {
        for (key, value) in entries {
            let Some(key) = key.as_str().map(str::to_string) else {
                return Err(LoadError::Structure(format!(
                    "context keys must be strings, got {:?}",
                    key
                )));
            };
            let value = match value {
                Value::String(s) => s,
                Value::Number(n) => n.to_string(),
                Value::Bool(b) => b.to_string(),
                Value::Null => String::new(),
                _ => {
                    return Err(LoadError::Structure(format!(
                        "context value '{}' must be a scalar",
                        key
                    )))
                }
            };
            if self.document.context.insert(key.clone(), value).is_some() {
                debug!("Context key redefined: {}", key);
            }
        }
        Ok(())
    }

    fn import(&mut self, target: Value, base: &Path, section: Section) -> Result<(), LoadError> {
        let target = match target {
            Value::String(target) => target,
            other => {
                return Err(LoadError::Structure(format!(
                    "{} expects a path string, got {}",
                    IMPORT_TAG,
                    kind(&other)
                )))
            }
        };
        if target.trim().is_empty() {
            return Err(LoadError::Structure(format!("empty {}", IMPORT_TAG)));
        }

        let path = Path::new(target.trim());
        let path = if path.is_absolute() {
            path.to_path_buf()
        } else {
            base.join(path)
        };
        debug!("Importing {}", path.display());
        self.load_file(&path, section)
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Sequence(_) => "a list",
        Value::Mapping(_) => "a mapping",
        Value::Tagged(_) => "a tagged value",
    }
}

/// Where a workflow declaration is read from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkflowSource {
    File(PathBuf),
    Stdin,
}

impl fmt::Display for WorkflowSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::File(path) => write!(f, "{}", path.display()),
            Self::Stdin => f.write_str("<stdin>"),
        }
    }
}

/// Determines the workflow source.
///
/// # Arguments
///
/// * `explicit` - Source given by the user, if any (`-` means stdin)
/// * `context_dir` - Directory searched when no source is given; relative
///   explicit paths are resolved against it as well
///
/// # Returns
///
/// * `Ok(WorkflowSource)` - The located source
/// * `Err(LoadError::SourceNotFound | LoadError::AmbiguousSource)`
pub fn detect_source(explicit: Option<&str>, context_dir: &Path) -> Result<WorkflowSource, LoadError> {
    match explicit {
        Some(STDIN_SOURCE) => Ok(WorkflowSource::Stdin),
        Some(path) => {
            let candidate = context_dir.join(path);
            if candidate.is_file() {
                Ok(WorkflowSource::File(candidate))
            } else {
                Err(LoadError::SourceNotFound(candidate.display().to_string()))
            }
        }
        None => {
            let mut found: Vec<PathBuf> = DEFAULT_SOURCE_NAMES
                .iter()
                .map(|name| context_dir.join(name))
                .filter(|p| p.is_file())
                .collect();

            match found.len() {
                0 => Err(LoadError::SourceNotFound(format!(
                    "none of {} in '{}'",
                    DEFAULT_SOURCE_NAMES.join(", "),
                    context_dir.display()
                ))),
                1 => {
                    let path = found.remove(0);
                    debug!("Detected workflow source {}", path.display());
                    Ok(WorkflowSource::File(path))
                }
                _ => Err(LoadError::AmbiguousSource(context_dir.to_path_buf())),
            }
        }
    }
}

/// Parses a workflow document from YAML text.
///
/// Relative imports resolve against the current directory.
pub fn parse_document(yaml_content: &str) -> Result<WorkflowDocument, LoadError> {
    let mut loader = DocumentLoader::default();
    loader.load_text(yaml_content, Path::new("."), Section::All)?;
    Ok(finish(loader))
}

/// Reads and parses a workflow document from a source, following imports.
pub fn read_document(source: &WorkflowSource) -> Result<WorkflowDocument, LoadError> {
    info!("Loading workflow from: {}", source);

    let mut loader = DocumentLoader::default();
    match source {
        WorkflowSource::File(path) => loader.load_file(path, Section::All)?,
        WorkflowSource::Stdin => {
            let mut buffer = String::new();
            std::io::stdin()
                .read_to_string(&mut buffer)
                .map_err(LoadError::Stdin)?;
            debug!("YAML content loaded ({} bytes)", buffer.len());
            loader.load_text(&buffer, Path::new("."), Section::All)?;
        }
    }
    Ok(finish(loader))
}

fn finish(loader: DocumentLoader) -> WorkflowDocument {
    let document = loader.document;
    info!(
        "Parsed {} actions, {} context entries",
        document.actions.len(),
        document.context.len()
    );
    document
}

/// Loads a workflow from a YAML file.
///
/// This function:
/// 1. Reads and parses the YAML file
/// 2. Validates names and dependencies
/// 3. Rejects cycles and computes the topological order
///
/// # Arguments
///
/// * `path` - Path to the workflow YAML file
///
/// # Returns
///
/// * `Ok(Workflow)` - Successfully loaded and validated workflow
/// * `Err(Error::Load | Error::Configuration)` - Parse or validation error
///
/// # Example
///
/// ```rust,no_run
/// use rustrunner::workflow::load_workflow;
///
/// fn main() -> Result<(), rustrunner::Error> {
///     let workflow = load_workflow("rustrunner.yml")?;
///     println!("Loaded {} actions", workflow.len());
///     Ok(())
/// }
/// ```
pub fn load_workflow(path: impl AsRef<Path>) -> Result<Workflow, Error> {
    let source = WorkflowSource::File(path.as_ref().to_path_buf());
    let document = read_document(&source)?;
    Ok(document.into_workflow()?)
}

/// Parses and validates a workflow from YAML text.
pub fn loads(yaml_content: &str) -> Result<Workflow, Error> {
    let document = parse_document(yaml_content)?;
    Ok(document.into_workflow()?)
}
