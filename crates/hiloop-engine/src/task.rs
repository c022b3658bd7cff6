//! Process-wide task handler registry (spec §4.2-4.3).
//!
//! A task step names its handler by string; the registry resolves it at
//! execution time. An unregistered name is not an error — the step
//! soft-skips with `{status: "skipped", reason: "handler_not_found"}`, the
//! same forward-compatible behavior as the original implementation.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use hiloop_core::{JsonMap, Result};

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn execute(&self, input: &JsonMap) -> Result<JsonMap>;
}

#[async_trait]
pub trait RollbackHandler: Send + Sync {
    async fn rollback(&self, output: &JsonMap) -> Result<()>;
}

#[derive(Clone, Default)]
pub struct TaskRegistry {
    handlers: Arc<HashMap<String, Arc<dyn TaskHandler>>>,
    rollback_handlers: Arc<HashMap<String, Arc<dyn RollbackHandler>>>,
}

pub struct TaskRegistryBuilder {
    handlers: HashMap<String, Arc<dyn TaskHandler>>,
    rollback_handlers: HashMap<String, Arc<dyn RollbackHandler>>,
}

impl TaskRegistryBuilder {
    pub fn new() -> Self {
        Self { handlers: HashMap::new(), rollback_handlers: HashMap::new() }
    }

    pub fn register(
        mut self,
        name: impl Into<String>,
        handler: Arc<dyn TaskHandler>,
        rollback: Option<Arc<dyn RollbackHandler>>,
    ) -> Self {
        let name = name.into();
        if let Some(rollback) = rollback {
            self.rollback_handlers.insert(name.clone(), rollback);
        }
        self.handlers.insert(name, handler);
        self
    }

    pub fn build(self) -> TaskRegistry {
        TaskRegistry {
            handlers: Arc::new(self.handlers),
            rollback_handlers: Arc::new(self.rollback_handlers),
        }
    }
}

impl Default for TaskRegistryBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskRegistry {
    pub fn get(&self, name: &str) -> Option<Arc<dyn TaskHandler>> {
        self.handlers.get(name).cloned()
    }

    pub fn get_rollback(&self, name: &str) -> Option<Arc<dyn RollbackHandler>> {
        self.rollback_handlers.get(name).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    #[async_trait]
    impl TaskHandler for Echo {
        async fn execute(&self, input: &JsonMap) -> Result<JsonMap> {
            Ok(input.clone())
        }
    }

    #[tokio::test]
    async fn unregistered_handler_resolves_to_none() {
        let registry = TaskRegistryBuilder::new().build();
        assert!(registry.get("deploy").is_none());
    }

    #[tokio::test]
    async fn registered_handler_executes() {
        let registry = TaskRegistryBuilder::new().register("echo", Arc::new(Echo), None).build();
        let handler = registry.get("echo").unwrap();
        let mut input = JsonMap::new();
        input.insert("a".to_string(), serde_json::json!(1));
        let output = handler.execute(&input).await.unwrap();
        assert_eq!(output.get("a").unwrap(), &serde_json::json!(1));
    }

    #[tokio::test]
    async fn registry_propagates_a_mocked_handlers_error() {
        let mut mock = MockTaskHandler::new();
        mock.expect_execute()
            .times(1)
            .returning(|_| Err(hiloop_core::HiloopError::HandlerError { handler: "flaky".into(), reason: "boom".into() }));

        let registry = TaskRegistryBuilder::new().register("flaky", Arc::new(mock), None).build();
        let handler = registry.get("flaky").unwrap();
        let err = handler.execute(&JsonMap::new()).await.unwrap_err();
        assert!(err.to_string().contains("boom"));
    }
}
