//! Maps a Task's `task_name` tag to the [`TaskHandler`] that implements it.

use std::collections::HashMap;
use std::sync::Arc;

use crate::dispatch::TaskHandler;

#[derive(Default, Clone)]
pub struct TaskRegistry {
    handlers: HashMap<String, Arc<dyn TaskHandler>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, handler: Arc<dyn TaskHandler>) {
        self.handlers.insert(handler.task_name().to_string(), handler);
    }

    pub fn get(&self, task_name: &str) -> Option<&Arc<dyn TaskHandler>> {
        self.handlers.get(task_name)
    }
}

impl std::fmt::Debug for TaskRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskRegistry")
            .field("handlers", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}
