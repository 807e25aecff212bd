//! Echo Action
//!
//! Writes its `message` parameter to the action log, one log line per
//! message line. Publishes no outcomes.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::ActionError;
use crate::execution::{Action, ActionContext, Outcomes};
use crate::workflow::Parameters;

/// Built-in `echo` action type.
#[derive(Debug, Default, Clone, Copy)]
pub struct EchoAction;

#[async_trait]
impl Action for EchoAction {
    fn validate(&self, parameters: &Parameters) -> Result<(), String> {
        match parameters.get("message") {
            Some(Value::String(_)) => {}
            Some(_) => return Err("'message' must be a string".to_string()),
            None => return Err("missing required parameter 'message'".to_string()),
        }
        match parameters.keys().find(|k| k.as_str() != "message") {
            Some(unknown) => Err(format!("unknown parameter '{}'", unknown)),
            None => Ok(()),
        }
    }

    async fn run(&self, ctx: ActionContext) -> Result<Outcomes, ActionError> {
        let message = ctx
            .parameter_str("message")
            .ok_or_else(|| ActionError::Execution("missing parameter 'message'".to_string()))?;

        for line in message.lines() {
            ctx.emit(line);
        }
        Ok(Outcomes::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio_util::sync::CancellationToken;

    fn params(value: Value) -> Parameters {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_validate() {
        assert!(EchoAction.validate(&params(json!({"message": "hi"}))).is_ok());
        assert!(EchoAction.validate(&params(json!({}))).is_err());
        assert!(EchoAction.validate(&params(json!({"message": 1}))).is_err());
        assert_eq!(
            EchoAction.validate(&params(json!({"message": "hi", "loud": true}))),
            Err("unknown parameter 'loud'".to_string())
        );
    }

    #[tokio::test]
    async fn test_run_publishes_nothing() {
        let ctx = ActionContext::new(
            "greet",
            params(json!({"message": "hello\nworld"})),
            CancellationToken::new(),
        );
        assert_eq!(EchoAction.run(ctx).await, Ok(Outcomes::new()));
    }
}
