//! Outcome Marker Protocol
//!
//! Process-backed actions publish outcomes by printing marker lines on
//! stdout:
//!
//! ```text
//! ##rustrunner[yield-outcome-b64 <base64 key> <base64 value>]##
//! ```
//!
//! Key and value are base64 so arbitrary text (spaces, newlines) survives
//! the line protocol. A missing value means the empty string. Every other
//! line is regular action output.

use base64::prelude::*;
use log::{debug, warn};

use crate::execution::{ActionContext, Outcomes};

pub const YIELD_MARKER_PREFIX: &str = "##rustrunner[yield-outcome-b64";
pub const YIELD_MARKER_SUFFIX: &str = "]##";

/// Shell helper injected into shell scripts.
///
/// `yield_outcome KEY [VALUE]` publishes an outcome; without VALUE the
/// value is read from stdin.
pub const YIELD_SHELL_FUNCTION: &str = r###"yield_outcome(){ [ "$1" = "" ] && echo "Missing key (first argument)" >&2 && return 1; command -v base64 >/dev/null || { echo "Missing command: base64" >&2; return 2; }; if [ "$#" -ge 2 ]; then value="$2"; else value="$(cat /dev/stdin)"; fi; echo "##rustrunner[yield-outcome-b64 $(printf '%s' "$1" | base64 | tr -d '\n') $(printf '%s' "$value" | base64 | tr -d '\n')]##"; }"###;

/// One piece of a scanned output line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Emission {
    Text(String),
    Outcome { key: String, value: String },
}

/// Builds the marker line for one outcome.
pub fn encode_marker(key: &str, value: &str) -> String {
    format!(
        "{} {} {}{}",
        YIELD_MARKER_PREFIX,
        BASE64_STANDARD.encode(key),
        BASE64_STANDARD.encode(value),
        YIELD_MARKER_SUFFIX
    )
}

/// Splits one stdout line into text and outcome emissions.
///
/// Text printed before a marker on the same line (e.g. by `printf` without
/// a trailing newline) is kept as its own text emission. A marker that
/// fails to decode is reported and treated as plain text.
pub fn scan_line(line: &str) -> Vec<Emission> {
    let Some(start) = line.find(YIELD_MARKER_PREFIX) else {
        return vec![Emission::Text(line.to_string())];
    };
    let body_start = start + YIELD_MARKER_PREFIX.len();
    let Some(body_len) = line[body_start..].find(YIELD_MARKER_SUFFIX) else {
        return vec![Emission::Text(line.to_string())];
    };
    let body = &line[body_start..body_start + body_len];

    let (key, value) = match decode_body(body) {
        Ok(pair) => pair,
        Err(reason) => {
            warn!("Malformed outcome marker ({}): {}", reason, line);
            return vec![Emission::Text(line.to_string())];
        }
    };

    let mut emissions = Vec::new();
    let before = &line[..start];
    if !before.is_empty() {
        emissions.push(Emission::Text(before.to_string()));
    }
    emissions.push(Emission::Outcome { key, value });

    let after = &line[body_start + body_len + YIELD_MARKER_SUFFIX.len()..];
    if !after.trim().is_empty() {
        emissions.push(Emission::Text(after.to_string()));
    }
    emissions
}

fn decode_body(body: &str) -> Result<(String, String), String> {
    let mut fields = body.split_whitespace();
    let key = fields.next().ok_or("missing key")?;
    let value = fields.next();
    if fields.next().is_some() {
        return Err("too many fields".to_string());
    }

    let key = decode_field(key)?;
    if key.is_empty() {
        return Err("empty key".to_string());
    }
    let value = match value {
        Some(v) => decode_field(v)?,
        None => String::new(),
    };
    Ok((key, value))
}

fn decode_field(field: &str) -> Result<String, String> {
    let bytes = BASE64_STANDARD
        .decode(field)
        .map_err(|e| format!("invalid base64: {}", e))?;
    String::from_utf8(bytes).map_err(|_| "value is not UTF-8".to_string())
}

/// Accumulates outcomes from the output lines of one action.
#[derive(Debug, Default)]
pub struct OutcomeScanner {
    outcomes: Outcomes,
}

impl OutcomeScanner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Processes one stdout line: outcomes are collected, text is logged.
    ///
    /// Yielding the same key twice keeps the last value.
    pub fn feed(&mut self, line: &str, ctx: &ActionContext) {
        for emission in scan_line(line) {
            match emission {
                Emission::Text(text) => ctx.emit(&text),
                Emission::Outcome { key, value } => {
                    debug!("[{}] outcome {} = {:?}", ctx.name(), key, value);
                    if self.outcomes.insert(key.clone(), value).is_some() {
                        debug!("[{}] outcome '{}' yielded again, keeping the last value", ctx.name(), key);
                    }
                }
            }
        }
    }

    pub fn finish(self) -> Outcomes {
        self.outcomes
    }
}
