//! Action Contract
//!
//! An [`Action`] is the unit of work behind an action type. The engine
//! never runs actions directly: [`ActionHandle::start`] spawns a supervisor
//! task that owns the action future, enforces the timeout, reacts to
//! cancellation and converts whatever happens into one [`TerminalResult`].
//!
//! Cancellation is cooperative. The action sees a child token through
//! [`ActionContext`]; if it has not finished within [`CANCEL_GRACE_PERIOD`]
//! after cancellation, its future is aborted.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info, warn};
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::outcome::Outcomes;
use crate::error::ActionError;
use crate::workflow::Parameters;

/// Time an action gets to wind down after cancellation before it is aborted.
pub const CANCEL_GRACE_PERIOD: Duration = Duration::from_secs(10);

/// Executable behavior behind an action type.
///
/// # Example
///
/// ```
/// use async_trait::async_trait;
/// use rustrunner::error::ActionError;
/// use rustrunner::execution::{Action, ActionContext, Outcomes};
///
/// struct Hostname;
///
/// #[async_trait]
/// impl Action for Hostname {
///     async fn run(&self, ctx: ActionContext) -> Result<Outcomes, ActionError> {
///         ctx.emit("resolving hostname");
///         Ok(Outcomes::from([("host".to_string(), "localhost".to_string())]))
///     }
/// }
/// ```
#[async_trait]
pub trait Action: Send + Sync {
    /// Checks declared parameters before the run starts.
    ///
    /// Values may still contain unresolved templates at this point.
    fn validate(&self, _parameters: &Parameters) -> Result<(), String> {
        Ok(())
    }

    /// Executes the action with fully resolved parameters.
    async fn run(&self, ctx: ActionContext) -> Result<Outcomes, ActionError>;
}

/// Everything an action receives for one execution.
#[derive(Debug, Clone)]
pub struct ActionContext {
    name: String,
    parameters: Parameters,
    token: CancellationToken,
    yield_function: bool,
}

impl ActionContext {
    pub fn new(name: impl Into<String>, parameters: Parameters, token: CancellationToken) -> Self {
        Self {
            name: name.into(),
            parameters,
            token,
            yield_function: true,
        }
    }

    /// Enables or disables the shell `yield_outcome` helper.
    pub fn with_yield_function(mut self, enabled: bool) -> Self {
        self.yield_function = enabled;
        self
    }

    /// Name of the action node being executed.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Resolved parameters.
    pub fn parameters(&self) -> &Parameters {
        &self.parameters
    }

    /// String parameter lookup.
    pub fn parameter_str(&self, key: &str) -> Option<&str> {
        self.parameters.get(key).and_then(Value::as_str)
    }

    pub fn yield_function_enabled(&self) -> bool {
        self.yield_function
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Completes once the action has been asked to stop.
    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }

    /// Logs one line of action output.
    pub fn emit(&self, line: &str) {
        info!("[{}] {}", self.name, line);
    }

    /// Logs one line of action error output.
    pub fn emit_error(&self, line: &str) {
        warn!("[{}] {}", self.name, line);
    }
}

/// How a started action ended.
#[derive(Debug, Clone, PartialEq)]
pub enum TerminalResult {
    Succeeded(Outcomes),
    Failed(ActionError),
    Cancelled,
}

/// Options applied by the supervisor.
#[derive(Debug, Clone, Copy, Default)]
pub struct LaunchOptions {
    /// Wall-clock limit, surfaced as [`ActionError::Timeout`]
    pub timeout: Option<Duration>,
    /// Whether shell actions get the `yield_outcome` helper
    pub yield_function: bool,
}

/// A running action.
pub struct ActionHandle {
    name: String,
    token: CancellationToken,
    task: JoinHandle<TerminalResult>,
}

impl ActionHandle {
    /// Starts an action on the tokio runtime.
    ///
    /// # Arguments
    ///
    /// * `action` - Behavior to run
    /// * `name` - Action node name
    /// * `parameters` - Fully resolved parameters
    /// * `options` - Timeout and helper settings
    pub fn start(
        action: Arc<dyn Action>,
        name: impl Into<String>,
        parameters: Parameters,
        options: LaunchOptions,
    ) -> Self {
        let name = name.into();
        let token = CancellationToken::new();
        let action_token = token.child_token();
        let context = ActionContext::new(name.clone(), parameters, action_token.clone())
            .with_yield_function(options.yield_function);

        debug!("Starting action '{}'", name);
        let task = tokio::spawn(supervise(
            action,
            context,
            token.clone(),
            action_token,
            options.timeout,
        ));

        Self { name, token, task }
    }

    /// Token that cancels this action. Cancelling is idempotent; the
    /// result still arrives through [`wait`](Self::wait).
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Waits for the terminal result.
    pub async fn wait(self) -> TerminalResult {
        match self.task.await {
            Ok(result) => result,
            Err(e) => TerminalResult::Failed(ActionError::Execution(format!(
                "Supervisor for action '{}' failed: {}",
                self.name, e
            ))),
        }
    }
}

/// Runs the action future and maps its end into a [`TerminalResult`].
async fn supervise(
    action: Arc<dyn Action>,
    context: ActionContext,
    run_token: CancellationToken,
    action_token: CancellationToken,
    timeout: Option<Duration>,
) -> TerminalResult {
    let name = context.name().to_string();
    let mut inner = tokio::spawn(async move { action.run(context).await });

    let deadline = async {
        match timeout {
            Some(limit) => tokio::time::sleep(limit).await,
            None => std::future::pending::<()>().await,
        }
    };
    tokio::pin!(deadline);

    let mut timed_out: Option<Duration> = None;
    let finished = tokio::select! {
        joined = &mut inner => Some(joined),
        _ = &mut deadline => {
            warn!("Action '{}' exceeded its timeout of {:?}", name, timeout.unwrap_or_default());
            timed_out = timeout;
            None
        }
        _ = run_token.cancelled() => {
            debug!("Action '{}' received cancellation", name);
            None
        }
    };

    let joined = match finished {
        Some(joined) => joined,
        None => {
            action_token.cancel();
            match tokio::time::timeout(CANCEL_GRACE_PERIOD, &mut inner).await {
                Ok(joined) => joined,
                Err(_) => {
                    warn!(
                        "Action '{}' ignored cancellation for {:?}, aborting",
                        name, CANCEL_GRACE_PERIOD
                    );
                    inner.abort();
                    return match timed_out {
                        Some(limit) => TerminalResult::Failed(ActionError::Timeout(limit)),
                        None => TerminalResult::Cancelled,
                    };
                }
            }
        }
    };

    let result = joined.unwrap_or_else(|e| {
        Err(ActionError::Execution(format!(
            "Action '{}' panicked: {}",
            name, e
        )))
    });

    if let Some(limit) = timed_out {
        return TerminalResult::Failed(ActionError::Timeout(limit));
    }

    match result {
        Ok(outcomes) => TerminalResult::Succeeded(outcomes),
        Err(_) if run_token.is_cancelled() => TerminalResult::Cancelled,
        Err(e) => TerminalResult::Failed(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct Sleeper {
        delay: Duration,
        observed_cancel: Arc<AtomicBool>,
    }

    #[async_trait]
    impl Action for Sleeper {
        async fn run(&self, ctx: ActionContext) -> Result<Outcomes, ActionError> {
            tokio::select! {
                _ = tokio::time::sleep(self.delay) => {
                    Ok(Outcomes::from([("slept".to_string(), "yes".to_string())]))
                }
                _ = ctx.cancelled() => {
                    self.observed_cancel.store(true, Ordering::SeqCst);
                    Err(ActionError::Cancelled)
                }
            }
        }
    }

    struct Panicker;

    #[async_trait]
    impl Action for Panicker {
        async fn run(&self, _ctx: ActionContext) -> Result<Outcomes, ActionError> {
            panic!("boom");
        }
    }

    fn sleeper(delay_ms: u64) -> (Arc<dyn Action>, Arc<AtomicBool>) {
        let flag = Arc::new(AtomicBool::new(false));
        let action = Arc::new(Sleeper {
            delay: Duration::from_millis(delay_ms),
            observed_cancel: Arc::clone(&flag),
        });
        (action, flag)
    }

    #[tokio::test]
    async fn test_success_returns_outcomes() {
        let (action, _) = sleeper(5);
        let handle = ActionHandle::start(
            action,
            "nap",
            Parameters::new(),
            LaunchOptions::default(),
        );

        match handle.wait().await {
            TerminalResult::Succeeded(outcomes) => assert_eq!(outcomes["slept"], "yes"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_cancel_is_observed() {
        let (action, flag) = sleeper(10_000);
        let handle = ActionHandle::start(
            action,
            "nap",
            Parameters::new(),
            LaunchOptions::default(),
        );

        handle.token().cancel();
        handle.token().cancel();
        assert_eq!(handle.wait().await, TerminalResult::Cancelled);
        assert!(flag.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_timeout_is_failure() {
        let (action, flag) = sleeper(10_000);
        let handle = ActionHandle::start(
            action,
            "nap",
            Parameters::new(),
            LaunchOptions {
                timeout: Some(Duration::from_millis(20)),
                yield_function: true,
            },
        );

        assert_eq!(
            handle.wait().await,
            TerminalResult::Failed(ActionError::Timeout(Duration::from_millis(20)))
        );
        assert!(flag.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_panic_becomes_failure() {
        let handle = ActionHandle::start(
            Arc::new(Panicker),
            "bad",
            Parameters::new(),
            LaunchOptions::default(),
        );

        match handle.wait().await {
            TerminalResult::Failed(ActionError::Execution(msg)) => assert!(msg.contains("panicked")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_context_accessors() {
        let mut params = Parameters::new();
        params.insert("message".into(), Value::from("hi"));
        params.insert("count".into(), Value::from(2));

        let ctx = ActionContext::new("greet", params, CancellationToken::new())
            .with_yield_function(false);

        assert_eq!(ctx.name(), "greet");
        assert_eq!(ctx.parameter_str("message"), Some("hi"));
        assert_eq!(ctx.parameter_str("count"), None);
        assert!(!ctx.yield_function_enabled());
        assert!(!ctx.is_cancelled());
    }
}
