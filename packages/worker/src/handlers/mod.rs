use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use common::{WorkloadClass, WorkloadError};

use crate::context::JobContext;

/// A workload body. Implementations live outside the dispatch core; they get
/// a [`JobContext`] for cancellation checks and progress reporting.
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// Name recorded on DLQ records and logs.
    fn name(&self) -> &str;

    async fn run(&self, ctx: &JobContext) -> Result<serde_json::Value, WorkloadError>;
}

/// Class -> body registry, assembled at startup.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<WorkloadClass, Arc<dyn JobHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, class: WorkloadClass, handler: Arc<dyn JobHandler>) {
        self.handlers.insert(class, handler);
    }

    pub fn get(&self, class: WorkloadClass) -> Option<Arc<dyn JobHandler>> {
        self.handlers.get(&class).cloned()
    }
}

/// Pass-through body: checks for cancellation, reports a midpoint, echoes the
/// input back as output. Stands in wherever a real body is not wired up.
pub struct EchoHandler;

#[async_trait]
impl JobHandler for EchoHandler {
    fn name(&self) -> &str {
        "echo"
    }

    async fn run(&self, ctx: &JobContext) -> Result<serde_json::Value, WorkloadError> {
        ctx.check().await?;
        ctx.report(50, Some("processing"), None).await;
        ctx.check().await?;
        Ok(ctx.input.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_lookup() {
        let mut registry = HandlerRegistry::new();
        registry.register(WorkloadClass::Cam, Arc::new(EchoHandler));

        assert!(registry.get(WorkloadClass::Cam).is_some());
        assert!(registry.get(WorkloadClass::Sim).is_none());
        assert_eq!(registry.get(WorkloadClass::Cam).unwrap().name(), "echo");
    }
}
