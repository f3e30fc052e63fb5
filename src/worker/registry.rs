//! Unit-of-work abstraction and per-topic factory registry.
//!
//! Units are stateful and short-lived: the registry stores factories, and the
//! runtime builds a fresh unit per execution attempt so no state leaks
//! between messages or between retries of the same message.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use super::error::WorkError;

/// One executable piece of business logic, bound to a topic.
#[async_trait]
pub trait UnitOfWork: Send {
    /// Process one message payload and produce a result document.
    async fn run(&mut self, payload: Value) -> Result<Value, WorkError>;
}

/// Builds fresh [`UnitOfWork`] instances.
pub trait UnitOfWorkFactory: Send + Sync {
    fn create(&self) -> Box<dyn UnitOfWork>;
}

impl<F> UnitOfWorkFactory for F
where
    F: Fn() -> Box<dyn UnitOfWork> + Send + Sync,
{
    fn create(&self) -> Box<dyn UnitOfWork> {
        self()
    }
}

/// Topic name to factory mapping consulted by the runtime on every message.
#[derive(Default, Clone)]
pub struct UnitOfWorkRegistry {
    factories: HashMap<String, Arc<dyn UnitOfWorkFactory>>,
}

impl UnitOfWorkRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, topic: impl Into<String>, factory: Arc<dyn UnitOfWorkFactory>) {
        self.factories.insert(topic.into(), factory);
    }

    /// Build a fresh unit for `topic`, if one is registered.
    pub fn create(&self, topic: &str) -> Option<Box<dyn UnitOfWork>> {
        self.factories.get(topic).map(|f| f.create())
    }

    pub fn topics(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Echo;

    #[async_trait]
    impl UnitOfWork for Echo {
        async fn run(&mut self, payload: Value) -> Result<Value, WorkError> {
            Ok(payload)
        }
    }

    #[tokio::test]
    async fn factory_builds_fresh_units() {
        let mut registry = UnitOfWorkRegistry::new();
        registry.register(
            "echo",
            Arc::new(|| Box::new(Echo) as Box<dyn UnitOfWork>),
        );

        let mut unit = registry.create("echo").expect("registered topic");
        assert_eq!(unit.run(json!({"a": 1})).await.unwrap(), json!({"a": 1}));
        assert!(registry.create("missing").is_none());
    }
}
