//! Outcome Store
//!
//! Holds the key/value outcomes published by succeeded actions. Each
//! action publishes at most once, and only the engine writes.

use std::collections::{BTreeMap, HashMap};

use thiserror::Error;

/// Key/value outcomes produced by one action.
pub type Outcomes = BTreeMap<String, String>;

/// Second publication for the same action.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Outcomes of action '{0}' were already published")]
pub struct AlreadyPublished(pub String);

/// Write-once registry of action outcomes.
#[derive(Debug, Clone, Default)]
pub struct OutcomeStore {
    published: HashMap<String, Outcomes>,
}

impl OutcomeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the outcomes of a succeeded action.
    ///
    /// An empty mapping still counts as published.
    pub fn publish(&mut self, action: &str, outcomes: Outcomes) -> Result<(), AlreadyPublished> {
        if self.published.contains_key(action) {
            return Err(AlreadyPublished(action.to_string()));
        }
        self.published.insert(action.to_string(), outcomes);
        Ok(())
    }

    /// Returns true once the action has published.
    pub fn is_published(&self, action: &str) -> bool {
        self.published.contains_key(action)
    }

    /// Looks up one outcome value.
    pub fn get(&self, action: &str, key: &str) -> Option<&str> {
        self.published
            .get(action)
            .and_then(|o| o.get(key))
            .map(String::as_str)
    }

    /// Number of actions that published.
    pub fn len(&self) -> usize {
        self.published.len()
    }

    pub fn is_empty(&self) -> bool {
        self.published.is_empty()
    }
}
