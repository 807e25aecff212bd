//! Action Registry
//!
//! Maps action type names to their implementations. Built-in types are
//! registered first; executables found in action directories are added on
//! top, later directories overriding earlier ones.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use log::{debug, info, warn};

use super::action::Action;
use crate::actions;
use crate::error::ConfigurationError;

/// Immutable lookup table of action types.
#[derive(Clone, Default)]
pub struct ActionRegistry {
    actions: Arc<HashMap<String, Arc<dyn Action>>>,
}

impl ActionRegistry {
    pub fn builder() -> ActionRegistryBuilder {
        ActionRegistryBuilder::new()
    }

    /// Registry containing only the built-in action types.
    pub fn builtin() -> Self {
        Self::builder().with_builtins().build()
    }

    pub fn get(&self, action_type: &str) -> Option<Arc<dyn Action>> {
        self.actions.get(action_type).cloned()
    }

    pub fn contains(&self, action_type: &str) -> bool {
        self.actions.contains_key(action_type)
    }

    /// Registered type names, sorted.
    pub fn types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.actions.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

impl fmt::Debug for ActionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionRegistry")
            .field("types", &self.types())
            .finish()
    }
}

/// Collects action types before freezing them into an [`ActionRegistry`].
///
/// # Example
///
/// ```
/// use rustrunner::execution::ActionRegistry;
///
/// let registry = ActionRegistry::builder().with_builtins().build();
/// assert!(registry.contains("shell"));
/// assert!(registry.contains("echo"));
/// ```
#[derive(Default)]
pub struct ActionRegistryBuilder {
    actions: HashMap<String, Arc<dyn Action>>,
}

impl ActionRegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds the bundled action types.
    pub fn with_builtins(mut self) -> Self {
        for (name, action) in actions::builtins() {
            self = self.register(name, action);
        }
        self
    }

    /// Registers an action type, replacing any previous one of that name.
    pub fn register(mut self, name: impl Into<String>, action: Arc<dyn Action>) -> Self {
        let name = name.into();
        if self.actions.insert(name.clone(), action).is_some() {
            warn!("Action type '{}' overridden", name);
        } else {
            debug!("Registered action type '{}'", name);
        }
        self
    }

    /// Registers every executable file in `dir` as an external action type.
    pub fn load_directory(mut self, dir: &Path) -> Result<Self, ConfigurationError> {
        let found = actions::external::discover(dir)?;
        info!(
            "Loaded {} action types from {}",
            found.len(),
            dir.display()
        );
        for (name, action) in found {
            self = self.register(name, Arc::new(action));
        }
        Ok(self)
    }

    /// Loads several directories in order.
    pub fn load_directories<P: AsRef<Path>>(mut self, dirs: &[P]) -> Result<Self, ConfigurationError> {
        for dir in dirs {
            self = self.load_directory(dir.as_ref())?;
        }
        Ok(self)
    }

    pub fn build(self) -> ActionRegistry {
        ActionRegistry {
            actions: Arc::new(self.actions),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ActionError;
    use crate::execution::action::ActionContext;
    use crate::execution::outcome::Outcomes;
    use async_trait::async_trait;

    struct Noop;

    #[async_trait]
    impl Action for Noop {
        async fn run(&self, _ctx: ActionContext) -> Result<Outcomes, ActionError> {
            Ok(Outcomes::new())
        }
    }

    #[test]
    fn test_builtin_types() {
        let registry = ActionRegistry::builtin();
        assert_eq!(registry.types(), vec!["echo", "shell"]);
        assert!(registry.get("echo").is_some());
        assert!(registry.get("docker").is_none());
    }

    #[test]
    fn test_register_overrides() {
        let registry = ActionRegistry::builder()
            .with_builtins()
            .register("echo", Arc::new(Noop))
            .register("noop", Arc::new(Noop))
            .build();

        assert_eq!(registry.len(), 3);
        assert!(registry.contains("noop"));
    }

    #[test]
    fn test_missing_directory_is_error() {
        let result = ActionRegistry::builder().load_directory(Path::new("/nonexistent/actions"));
        assert!(matches!(
            result,
            Err(ConfigurationError::ActionDirectory { .. })
        ));
    }
}
