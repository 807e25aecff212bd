//! Template Resolution
//!
//! Parameter values may embed `@{...}` expressions that are substituted
//! right before an action is dispatched:
//!
//! | Expression                     | Value                                  |
//! |--------------------------------|----------------------------------------|
//! | `@{outcomes.ACTION.KEY}`       | outcome published by a succeeded action|
//! | `@{status.ACTION}`             | current state name of an action        |
//! | `@{context.KEY}`               | context entry, itself rendered         |
//! | `@{environment.VAR}`           | process environment variable or empty  |
//!
//! Path segments may be quoted (`'my key'`, `"my key"`) or use bracket
//! form (`outcomes['build-app'].image`). An even run of `@` before `{`
//! is literal text: `@@{x}` renders as `@@{x}`.
//!
//! In strict mode a reference to an action that has not succeeded, or to
//! a key it did not produce, is an error. Lenient mode substitutes an
//! empty string for those. Syntax errors and references to undeclared
//! actions fail in both modes.

use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use super::outcome::OutcomeStore;
use crate::error::ActionError;
use crate::workflow::{Parameters, Workflow};

/// How unresolvable outcome references are treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum RenderingMode {
    /// Missing outcomes fail the referencing action
    #[default]
    Strict,
    /// Missing outcomes render as an empty string
    Lenient,
}

impl RenderingMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Strict => "strict",
            Self::Lenient => "lenient",
        }
    }
}

impl fmt::Display for RenderingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Piece of a template string.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment<'t> {
    Text(&'t str),
    Expression(&'t str),
}

/// A run of `@` followed by `{`. Leftmost matching always starts at the
/// first `@` of the run.
static OPENER: Lazy<Result<Regex, regex::Error>> = Lazy::new(|| Regex::new(r"@+\{"));

/// Splits a template into literal text and expression bodies.
///
/// An odd `@` run opens an expression with its last `@`; the earlier ones
/// stay literal. An even run is literal text as a whole.
fn tokenize(text: &str) -> Result<Vec<Segment<'_>>, String> {
    let opener = OPENER
        .as_ref()
        .map_err(|e| format!("Template pattern failed to compile: {}", e))?;
    let bytes = text.as_bytes();
    let mut segments = Vec::new();
    let mut text_start = 0;
    let mut search_from = 0;

    while let Some(found) = opener.find_at(text, search_from) {
        let run = found.len() - 1;
        if run % 2 == 0 {
            search_from = found.end();
            continue;
        }

        // Opening `@{` is the last two bytes of the match
        let open_at = found.end() - 2;
        if text_start < open_at {
            segments.push(Segment::Text(&text[text_start..open_at]));
        }

        let body_start = found.end();
        let mut quote: Option<u8> = None;
        let mut j = body_start;
        loop {
            if j >= bytes.len() {
                return Err(format!(
                    "Unterminated expression starting at offset {}",
                    open_at
                ));
            }
            match (quote, bytes[j]) {
                (Some(q), c) if c == q => quote = None,
                (Some(_), _) => {}
                (None, b'\'' | b'"') => quote = Some(bytes[j]),
                (None, b'}') => break,
                _ => {}
            }
            j += 1;
        }

        segments.push(Segment::Expression(&text[body_start..j]));
        text_start = j + 1;
        search_from = text_start;
    }

    if text_start < text.len() {
        segments.push(Segment::Text(&text[text_start..]));
    }
    Ok(segments)
}

/// Splits an expression body into its path segments.
fn parse_path(expression: &str) -> Result<Vec<String>, String> {
    let mut chars = expression.trim().chars().peekable();
    let mut parts = Vec::new();

    loop {
        while chars.peek().is_some_and(|c| c.is_whitespace()) {
            chars.next();
        }

        let part = match chars.peek().copied() {
            None => return Err(format!("Empty segment in expression '{}'", expression)),
            Some(q @ ('\'' | '"')) => {
                chars.next();
                read_quoted(&mut chars, q, expression)?
            }
            Some('[') => {
                chars.next();
                while chars.peek().is_some_and(|c| c.is_whitespace()) {
                    chars.next();
                }
                let q = match chars.next() {
                    Some(q @ ('\'' | '"')) => q,
                    _ => {
                        return Err(format!(
                            "Expected quoted key after '[' in expression '{}'",
                            expression
                        ))
                    }
                };
                let key = read_quoted(&mut chars, q, expression)?;
                while chars.peek().is_some_and(|c| c.is_whitespace()) {
                    chars.next();
                }
                if chars.next() != Some(']') {
                    return Err(format!("Missing ']' in expression '{}'", expression));
                }
                key
            }
            Some(_) => {
                let mut word = String::new();
                while let Some(&c) = chars.peek() {
                    if c == '.' || c == '[' || c.is_whitespace() || c == '\'' || c == '"' {
                        break;
                    }
                    word.push(c);
                    chars.next();
                }
                if word.is_empty() {
                    return Err(format!("Empty segment in expression '{}'", expression));
                }
                word
            }
        };
        parts.push(part);

        while chars.peek().is_some_and(|c| c.is_whitespace()) {
            chars.next();
        }
        match chars.peek() {
            None => return Ok(parts),
            Some('.') => {
                chars.next();
            }
            Some('[') => {}
            Some(c) => {
                return Err(format!(
                    "Unexpected character '{}' in expression '{}'",
                    c, expression
                ))
            }
        }
    }
}

fn read_quoted(
    chars: &mut std::iter::Peekable<std::str::Chars<'_>>,
    quote: char,
    expression: &str,
) -> Result<String, String> {
    let mut value = String::new();
    for c in chars.by_ref() {
        if c == quote {
            return Ok(value);
        }
        value.push(c);
    }
    Err(format!("Unterminated quote in expression '{}'", expression))
}

/// Renders templates against a consistent snapshot of run state.
///
/// The resolver borrows the workflow and outcome store, so it always sees
/// the state as of the moment it was created.
///
/// # Example
///
/// ```
/// use rustrunner::execution::{OutcomeStore, RenderingMode, TemplateResolver};
/// use rustrunner::workflow::{ActionSpec, GraphBuilder};
///
/// let workflow = GraphBuilder::new()
///     .with_context_value("who", "world")
///     .build(vec![ActionSpec::new("greet", "echo")])
///     .unwrap();
/// let outcomes = OutcomeStore::new();
///
/// let resolver = TemplateResolver::new(&workflow, &outcomes, RenderingMode::Strict);
/// assert_eq!(resolver.render("hello @{context.who}").unwrap(), "hello world");
/// assert_eq!(resolver.render("@{status.greet}").unwrap(), "PENDING");
/// ```
pub struct TemplateResolver<'a> {
    workflow: &'a Workflow,
    outcomes: &'a OutcomeStore,
    mode: RenderingMode,
}

impl<'a> TemplateResolver<'a> {
    pub fn new(workflow: &'a Workflow, outcomes: &'a OutcomeStore, mode: RenderingMode) -> Self {
        Self {
            workflow,
            outcomes,
            mode,
        }
    }

    /// Renders one template string.
    pub fn render(&self, text: &str) -> Result<String, ActionError> {
        let mut stack = Vec::new();
        self.render_with(text, &mut stack)
            .map_err(ActionError::OutcomeResolution)
    }

    /// Resolves every string inside a parameter mapping, recursively.
    ///
    /// Non-string values are returned unchanged.
    pub fn resolve_parameters(&self, parameters: &Parameters) -> Result<Parameters, ActionError> {
        parameters
            .iter()
            .map(|(key, value)| Ok((key.clone(), self.resolve_value(value)?)))
            .collect()
    }

    fn resolve_value(&self, value: &Value) -> Result<Value, ActionError> {
        match value {
            Value::String(s) => Ok(Value::String(self.render(s)?)),
            Value::Array(items) => items
                .iter()
                .map(|v| self.resolve_value(v))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
            Value::Object(map) => self.resolve_parameters(map).map(Value::Object),
            other => Ok(other.clone()),
        }
    }

    fn render_with(&self, text: &str, stack: &mut Vec<String>) -> Result<String, String> {
        let mut rendered = String::with_capacity(text.len());
        for segment in tokenize(text)? {
            match segment {
                Segment::Text(t) => rendered.push_str(t),
                Segment::Expression(expr) => {
                    let path = parse_path(expr)?;
                    rendered.push_str(&self.evaluate(&path, stack)?);
                }
            }
        }
        Ok(rendered)
    }

    fn evaluate(&self, path: &[String], stack: &mut Vec<String>) -> Result<String, String> {
        let expect_len = |n: usize| {
            if path.len() == n {
                Ok(())
            } else {
                Err(format!(
                    "Expression '{}' must have {} segments",
                    path.join("."),
                    n
                ))
            }
        };

        match path[0].as_str() {
            "outcomes" => {
                expect_len(3)?;
                self.outcome(&path[1], &path[2])
            }
            "status" => {
                expect_len(2)?;
                self.workflow
                    .state_of(&path[1])
                    .map(|s| s.as_str().to_string())
                    .ok_or_else(|| format!("Action not found: '{}'", path[1]))
            }
            "context" => {
                expect_len(2)?;
                self.context(&path[1], stack)
            }
            "environment" => {
                expect_len(2)?;
                Ok(std::env::var(&path[1]).unwrap_or_default())
            }
            other => Err(format!("Unknown expression type: '{}'", other)),
        }
    }

    fn outcome(&self, action: &str, key: &str) -> Result<String, String> {
        let state = self
            .workflow
            .state_of(action)
            .ok_or_else(|| format!("Action not found: '{}'", action))?;

        if let Some(value) = self.outcomes.get(action, key) {
            return Ok(value.to_string());
        }

        match self.mode {
            RenderingMode::Lenient => Ok(String::new()),
            RenderingMode::Strict if !self.outcomes.is_published(action) => Err(format!(
                "Action '{}' has not succeeded (state: {})",
                action, state
            )),
            RenderingMode::Strict => Err(format!(
                "Action '{}' did not produce outcome '{}'",
                action, key
            )),
        }
    }

    fn context(&self, key: &str, stack: &mut Vec<String>) -> Result<String, String> {
        let value = self
            .workflow
            .context()
            .get(key)
            .ok_or_else(|| format!("Context key not found: '{}'", key))?;

        if stack.iter().any(|k| k == key) {
            let mut cycle = stack.clone();
            cycle.push(key.to_string());
            return Err(format!("Context cycle detected: {}", cycle.join(" -> ")));
        }

        stack.push(key.to_string());
        let rendered = self.render_with(value, stack);
        stack.pop();
        rendered
    }
}
