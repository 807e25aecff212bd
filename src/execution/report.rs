//! Run Report
//!
//! Final snapshot of a run: per-action terminal state, error, timing and
//! outcomes, in topological order. Serializes to JSON for `--report` and
//! renders a colored summary plus an ASCII timeline for the terminal.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use colored::Colorize;
use serde::Serialize;

use crate::workflow::{ActionState, RunState, Workflow};

/// Outcome of one action.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct ActionReport {
    pub name: String,
    #[serde(rename = "type")]
    pub action_type: String,
    pub state: ActionState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub outcomes: BTreeMap<String, String>,
}

impl ActionReport {
    /// Wall-clock run time in milliseconds, if the action started.
    pub fn duration_ms(&self) -> Option<i64> {
        match (self.started_at, self.finished_at) {
            (Some(start), Some(end)) => Some((end - start).num_milliseconds()),
            _ => None,
        }
    }
}

/// Summary of a finished (or aborted) run.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct RunReport {
    pub state: RunState,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub actions: Vec<ActionReport>,
}

impl RunReport {
    /// Captures every node of the workflow in topological order.
    pub fn capture(
        workflow: &Workflow,
        state: RunState,
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
    ) -> Self {
        let actions = workflow
            .topological_order()
            .iter()
            .filter_map(|&i| workflow.node(i))
            .map(|node| ActionReport {
                name: node.name().to_string(),
                action_type: node.spec().action_type.clone(),
                state: node.state(),
                error: node.error().map(|e| e.to_string()),
                started_at: node.started_at(),
                finished_at: node.finished_at(),
                outcomes: node.outcomes().clone(),
            })
            .collect();

        Self {
            state,
            started_at,
            finished_at,
            actions,
        }
    }

    pub fn is_success(&self) -> bool {
        self.state.is_success()
    }

    /// Looks up one action's entry.
    pub fn action(&self, name: &str) -> Option<&ActionReport> {
        self.actions.iter().find(|a| a.name == name)
    }

    /// Terminal state of one action.
    pub fn state_of(&self, name: &str) -> Option<ActionState> {
        self.action(name).map(|a| a.state)
    }

    /// Number of actions per state.
    pub fn counts(&self) -> BTreeMap<&'static str, usize> {
        let mut counts = BTreeMap::new();
        for action in &self.actions {
            *counts.entry(action.state.as_str()).or_insert(0) += 1;
        }
        counts
    }

    pub fn duration_ms(&self) -> i64 {
        (self.finished_at - self.started_at).num_milliseconds()
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Human-readable summary with one line per action.
    pub fn summary(&self) -> String {
        let mut output = String::new();

        let banner = format!("Run {} in {} ms", self.state, self.duration_ms());
        let banner = if self.is_success() {
            banner.as_str().green().bold()
        } else {
            banner.as_str().red().bold()
        };
        output.push_str(&format!("{}\n\n", banner));

        for action in &self.actions {
            let state = colorize_state(action.state);
            let timing = action
                .duration_ms()
                .map(|ms| format!(" ({} ms)", ms))
                .unwrap_or_default();
            output.push_str(&format!(
                "  {} {}{}\n",
                state,
                action.name,
                timing.as_str().dimmed()
            ));
            if let Some(error) = &action.error {
                output.push_str(&format!("             {}\n", error.as_str().red()));
            }
        }

        let counts: Vec<String> = self
            .counts()
            .into_iter()
            .map(|(state, n)| format!("{} {}", n, state.to_lowercase()))
            .collect();
        output.push_str(&format!("\n{}\n", counts.join(", ")));
        output
    }

    /// ASCII chart of when each started action ran.
    ///
    /// Bars are scaled to 50 characters across the whole run.
    pub fn timeline_chart(&self) -> String {
        let mut output = String::from("Execution Timeline:\n\n");

        let total_time = self.duration_ms();
        if total_time <= 0 {
            return output;
        }
        let scale = 50.0 / total_time as f64;

        let mut started: Vec<&ActionReport> = self
            .actions
            .iter()
            .filter(|a| a.started_at.is_some() && a.finished_at.is_some())
            .collect();
        started.sort_by_key(|a| a.started_at);

        for action in started {
            let (Some(start), Some(end)) = (action.started_at, action.finished_at) else {
                continue;
            };
            let offset = (start - self.started_at).num_milliseconds().max(0);
            let duration = (end - start).num_milliseconds().max(0);

            let start_pos = (offset as f64 * scale) as usize;
            let width = (duration as f64 * scale).max(1.0) as usize;

            let mut bar = " ".repeat(start_pos);
            bar.push_str(&"#".repeat(width));

            output.push_str(&format!(
                "{:12} |{:<50}| ({} ms)\n",
                truncate(&action.name, 12),
                bar,
                duration
            ));
        }

        output.push_str(&format!("\nTotal: {} ms\n", total_time));
        output
    }
}

/// Pads the state name to a fixed column, then colors it.
fn colorize_state(state: ActionState) -> colored::ColoredString {
    let padded = format!("{:<10}", state.as_str());
    let label = padded.as_str();
    match state {
        ActionState::Succeeded => label.green(),
        ActionState::Failed => label.red(),
        ActionState::Cancelled => label.magenta(),
        ActionState::Skipped => label.yellow(),
        _ => label.normal(),
    }
}

/// Truncates a string to max length, adding ellipsis if needed.
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}
