//! Child process execution shared by the shell and external actions.

use std::process::Stdio;

use log::{debug, warn};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;

use super::emission::OutcomeScanner;
use crate::error::ActionError;
use crate::execution::{ActionContext, Outcomes};

/// Runs `command` to completion, streaming its output into the action log.
///
/// Stdout lines are scanned for outcome markers; stderr lines are logged as
/// error output. If `stdin_payload` is given it is written to the child's
/// stdin, which is then closed.
///
/// Cancellation kills the child process.
pub(crate) async fn run_process(
    mut command: Command,
    stdin_payload: Option<Vec<u8>>,
    ctx: &ActionContext,
) -> Result<Outcomes, ActionError> {
    command
        .stdin(if stdin_payload.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = command
        .spawn()
        .map_err(|e| ActionError::Execution(format!("Failed to start process: {}", e)))?;
    debug!("[{}] spawned process {:?}", ctx.name(), child.id());

    if let (Some(payload), Some(mut stdin)) = (stdin_payload, child.stdin.take()) {
        let name = ctx.name().to_string();
        tokio::spawn(async move {
            if let Err(e) = stdin.write_all(&payload).await {
                debug!("[{}] could not write stdin: {}", name, e);
            }
        });
    }

    let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
        return Err(ActionError::Execution(
            "Process output is not captured".to_string(),
        ));
    };

    // The future owns the child, so dropping it on cancellation kills it.
    let work = async move {
        let mut scanner = OutcomeScanner::new();
        let mut out_lines = BufReader::new(stdout).split(b'\n');
        let mut err_lines = BufReader::new(stderr).split(b'\n');
        let mut out_done = false;
        let mut err_done = false;

        while !(out_done && err_done) {
            tokio::select! {
                line = out_lines.next_segment(), if !out_done => match line {
                    Ok(Some(bytes)) => scanner.feed(&decode_line(&bytes), ctx),
                    Ok(None) => out_done = true,
                    Err(e) => {
                        warn!("[{}] failed to read stdout: {}", ctx.name(), e);
                        out_done = true;
                    }
                },
                line = err_lines.next_segment(), if !err_done => match line {
                    Ok(Some(bytes)) => ctx.emit_error(&decode_line(&bytes)),
                    Ok(None) => err_done = true,
                    Err(e) => {
                        warn!("[{}] failed to read stderr: {}", ctx.name(), e);
                        err_done = true;
                    }
                },
            }
        }

        let status = child
            .wait()
            .await
            .map_err(|e| ActionError::Execution(format!("Failed to wait for process: {}", e)))?;

        if status.success() {
            Ok(scanner.finish())
        } else {
            Err(ActionError::Execution(match status.code() {
                Some(code) => format!("Exit code: {}", code),
                None => "Terminated by signal".to_string(),
            }))
        }
    };

    tokio::select! {
        result = work => result,
        _ = ctx.cancelled() => {
            debug!("[{}] killing process on cancellation", ctx.name());
            Err(ActionError::Cancelled)
        }
    }
}

fn decode_line(bytes: &[u8]) -> String {
    let bytes = bytes.strip_suffix(b"\r").unwrap_or(bytes);
    String::from_utf8_lossy(bytes).into_owned()
}
