use crate::error::{constants, RelayError, Result};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::RwLock;

/// The business-logic executor a session hands its calls to.
///
/// Implementations may run calls concurrently; a session never lets one
/// failing call poison its batch siblings, so `execute` is free to fail per
/// call.
#[async_trait]
pub trait Dispatcher: Send + Sync {
    async fn execute(&self, name: &str, args: &Map<String, Value>) -> Result<Value>;
}

type HandlerFn = dyn Fn(&Map<String, Value>) -> Result<Value> + Send + Sync + 'static;

/// Operation registry with zero-copy name routing for statics.
/// Uses Cow<'static, str> to avoid heap allocations for known operation names.
pub struct HandlerRegistry {
    handlers: RwLock<HashMap<Cow<'static, str>, Box<HandlerFn>>>,
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
        }
    }

    pub fn register<F>(&self, name: &str, handler: F) -> Result<()>
    where
        F: Fn(&Map<String, Value>) -> Result<Value> + Send + Sync + 'static,
    {
        let mut handlers = self
            .handlers
            .write()
            .map_err(|_| RelayError::Dispatch(constants::ERR_DISPATCHER_WRITE_LOCK.to_string()))?;

        handlers.insert(Cow::Owned(name.to_string()), Box::new(handler));
        Ok(())
    }
}

#[async_trait]
impl Dispatcher for HandlerRegistry {
    async fn execute(&self, name: &str, args: &Map<String, Value>) -> Result<Value> {
        let handlers = self
            .handlers
            .read()
            .map_err(|_| RelayError::Dispatch(constants::ERR_DISPATCHER_READ_LOCK.to_string()))?;

        handlers
            .get(name)
            .ok_or_else(|| RelayError::Dispatch(format!("unknown operation `{name}`")))
            .and_then(|handler| handler(args))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn registered_handler_executes() {
        let registry = HandlerRegistry::new();
        registry
            .register("echo", |args| {
                Ok(args.get("msg").cloned().unwrap_or(Value::Null))
            })
            .expect("register");

        let mut args = Map::new();
        args.insert("msg".to_string(), json!("hi"));
        let result = registry.execute("echo", &args).await.expect("execute");
        assert_eq!(result, json!("hi"));
    }

    #[tokio::test]
    async fn unknown_operation_is_dispatch_error() {
        let registry = HandlerRegistry::new();
        let err = registry.execute("missing", &Map::new()).await.unwrap_err();
        assert!(matches!(err, RelayError::Dispatch(_)));
    }

    #[tokio::test]
    async fn handler_failure_is_reported_per_call() {
        let registry = HandlerRegistry::new();
        registry
            .register("explode", |_| Err(RelayError::Dispatch("boom".to_string())))
            .expect("register");

        let err = registry.execute("explode", &Map::new()).await.unwrap_err();
        assert!(matches!(err, RelayError::Dispatch(_)));
    }
}
