use std::collections::HashMap;
use std::sync::Arc;

use crate::domain::payload::Payload;

use super::context::{WorkflowContext, WorkflowResult};

/// Deterministic orchestration code.
///
/// `run` is re-executed from the beginning on every decision. Given the same
/// input and the same recorded outcomes it must issue the same commands in
/// the same order. It must not read clocks, randomness, or the environment,
/// and all I/O belongs in activities.
pub trait WorkflowDefinition: Send + Sync + 'static {
    fn workflow_type(&self) -> &'static str;

    fn run(&self, ctx: &mut WorkflowContext<'_>, input: &Payload) -> WorkflowResult<Payload>;
}

#[derive(Clone, Default)]
pub struct WorkflowRegistry {
    definitions: HashMap<String, Arc<dyn WorkflowDefinition>>,
}

impl WorkflowRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, definition: Arc<dyn WorkflowDefinition>) -> &mut Self {
        self.definitions.insert(definition.workflow_type().to_string(), definition);
        self
    }

    pub fn with(mut self, definition: Arc<dyn WorkflowDefinition>) -> Self {
        self.register(definition);
        self
    }

    pub fn get(&self, workflow_type: &str) -> Option<Arc<dyn WorkflowDefinition>> {
        self.definitions.get(workflow_type).cloned()
    }

    pub fn workflow_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.definitions.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }
}

impl std::fmt::Debug for WorkflowRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowRegistry").field("workflows", &self.workflow_types()).finish()
    }
}
