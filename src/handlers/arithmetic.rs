use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::execution::InvocationContext;
use crate::models::{Command, ProxyResult};
use crate::registry::{CacheKeyFn, Handler, HandlerError};

/// Integer arithmetic over the `a` and `b` parameters
///
/// `sum values=1,2,3` folds its list through nested `add` commands, so repeated pairs
/// within one request are served from the request cache.
#[derive(Debug, Default, Clone, Copy)]
pub struct ArithmeticHandler;

fn operand(command: &Command, name: &str) -> Result<i64, HandlerError> {
    let raw = command
        .param(name)
        .ok_or_else(|| HandlerError::invalid_parameter(name, "missing"))?;
    raw.parse()
        .map_err(|_| HandlerError::invalid_parameter(name, format!("'{raw}' is not an integer")))
}

fn overflow() -> HandlerError {
    HandlerError::failed("arithmetic overflow")
}

#[async_trait]
impl Handler for ArithmeticHandler {
    fn name(&self) -> &str {
        "arithmetic"
    }

    fn commands(&self) -> Vec<String> {
        ["add", "subtract", "multiply", "divide", "sum"]
            .map(String::from)
            .to_vec()
    }

    async fn invoke(
        &self,
        ctx: &InvocationContext,
        command: &Command,
    ) -> Result<Option<ProxyResult>, HandlerError> {
        if command.name == "sum" {
            return self.sum(ctx, command).await.map(Some);
        }

        let a = operand(command, "a")?;
        let b = operand(command, "b")?;
        let value = match command.name.as_str() {
            "add" => a.checked_add(b).ok_or_else(overflow)?,
            "subtract" => a.checked_sub(b).ok_or_else(overflow)?,
            "multiply" => a.checked_mul(b).ok_or_else(overflow)?,
            "divide" => {
                if b == 0 {
                    return Err(HandlerError::invalid_parameter("b", "division by zero"));
                }
                a.checked_div(b).ok_or_else(overflow)?
            }
            other => return Err(HandlerError::UnsupportedCommand(other.to_string())),
        };

        Ok(Some(ProxyResult::success().with_message(value.to_string())))
    }

    fn cache_key_fn(&self) -> Option<CacheKeyFn> {
        Some(Arc::new(|params: &BTreeMap<String, String>| {
            match (params.get("a"), params.get("b")) {
                (Some(a), Some(b)) => Some(format!("{a},{b}")),
                _ => params.get("values").cloned(),
            }
        }))
    }
}

impl ArithmeticHandler {
    async fn sum(&self, ctx: &InvocationContext, command: &Command) -> Result<ProxyResult, HandlerError> {
        let raw = command
            .param("values")
            .ok_or_else(|| HandlerError::invalid_parameter("values", "missing"))?;

        let mut total = 0i64;
        for value in raw.split(',').filter(|v| !v.is_empty()) {
            let added = ctx
                .execute_command(
                    Command::new("add")
                        .with_param("a", total.to_string())
                        .with_param("b", value),
                )
                .await
                .map_err(|e| HandlerError::failed(e.to_string()))?;
            total = added
                .message
                .as_deref()
                .unwrap_or_default()
                .parse()
                .map_err(|_| HandlerError::failed("add returned a non-integer"))?;
        }

        Ok(ProxyResult::success().with_message(total.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RequestContext;

    async fn run(command: Command) -> Result<Option<ProxyResult>, HandlerError> {
        let ctx = InvocationContext::new(RequestContext::new(), "arithmetic");
        ArithmeticHandler.invoke(&ctx, &command).await
    }

    fn binary(name: &str, a: &str, b: &str) -> Command {
        Command::new(name).with_param("a", a).with_param("b", b)
    }

    #[tokio::test]
    async fn test_operations() {
        for (name, expected) in [("add", "9"), ("subtract", "5"), ("multiply", "14"), ("divide", "3")] {
            let result = run(binary(name, "7", "2")).await.unwrap().unwrap();
            assert_eq!(result.message.as_deref(), Some(expected), "{name}");
        }
    }

    #[tokio::test]
    async fn test_invalid_operands() {
        assert_eq!(
            run(binary("divide", "1", "0")).await.unwrap_err(),
            HandlerError::invalid_parameter("b", "division by zero")
        );
        assert!(matches!(
            run(binary("add", "x", "1")).await.unwrap_err(),
            HandlerError::InvalidParameter { .. }
        ));
        assert_eq!(
            run(binary("add", &i64::MAX.to_string(), "1")).await.unwrap_err(),
            overflow()
        );
    }

    #[tokio::test]
    async fn test_sum_needs_executor() {
        let err = run(Command::new("sum").with_param("values", "1,2"))
            .await
            .unwrap_err();
        assert!(matches!(err, HandlerError::Failed(_)));
    }
}
