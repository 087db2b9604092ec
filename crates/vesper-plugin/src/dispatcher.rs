//! `CommandDispatcher` — a name-to-handler JSON command table shared by all
//! loaded command plugins

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;

use crate::error::{PluginError, PluginResult};

pub trait CommandHandlerFn: Fn(&Value) -> Value + Send + Sync {}
impl<F: Fn(&Value) -> Value + Send + Sync> CommandHandlerFn for F {}

/// Maps a command id to the closure that answers it. Plugins register their
/// command ids here on load and deregister them on unload, so lookups never
/// need to know which plugin owns which command.
#[derive(Default)]
pub struct CommandDispatcher {
    handlers: RwLock<HashMap<String, Arc<dyn CommandHandlerFn>>>,
}

impl CommandDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, command_id: impl Into<String>, handler: Arc<dyn CommandHandlerFn>) -> PluginResult<()> {
        let command_id = command_id.into();
        let mut handlers = self.handlers.write();
        if handlers.contains_key(&command_id) {
            return Err(PluginError::AlreadyRegistered(command_id));
        }
        handlers.insert(command_id, handler);
        Ok(())
    }

    pub fn unregister(&self, command_id: &str) {
        self.handlers.write().remove(command_id);
    }

    pub fn is_registered(&self, command_id: &str) -> bool {
        self.handlers.read().contains_key(command_id)
    }

    pub fn dispatch(&self, command_id: &str, payload: &Value) -> PluginResult<Value> {
        let handler = self
            .handlers
            .read()
            .get(command_id)
            .cloned()
            .ok_or_else(|| PluginError::NotFound(command_id.to_string()))?;
        let payload = payload.clone();
        std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| handler(&payload))).map_err(|panic| {
            PluginError::HandlerPanicked(command_id.to_string(), panic_message(&panic))
        })
    }
}

pub(crate) fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn registers_and_dispatches() {
        let dispatcher = CommandDispatcher::new();
        dispatcher.register("echo", Arc::new(|payload: &Value| payload.clone())).unwrap();
        let result = dispatcher.dispatch("echo", &json!({"x": 1})).unwrap();
        assert_eq!(result, json!({"x": 1}));
    }

    #[test]
    fn unknown_command_is_not_found() {
        let dispatcher = CommandDispatcher::new();
        let err = dispatcher.dispatch("missing", &json!({})).unwrap_err();
        assert!(matches!(err, PluginError::NotFound(_)));
    }

    #[test]
    fn unregister_removes_handler() {
        let dispatcher = CommandDispatcher::new();
        dispatcher.register("echo", Arc::new(|payload: &Value| payload.clone())).unwrap();
        dispatcher.unregister("echo");
        assert!(!dispatcher.is_registered("echo"));
    }

    #[test]
    fn registering_a_duplicate_command_id_is_rejected() {
        let dispatcher = CommandDispatcher::new();
        dispatcher.register("echo", Arc::new(|payload: &Value| payload.clone())).unwrap();
        let err = dispatcher
            .register("echo", Arc::new(|payload: &Value| payload.clone()))
            .unwrap_err();
        assert!(matches!(err, PluginError::AlreadyRegistered(id) if id == "echo"));
    }

    #[test]
    fn a_panicking_handler_is_caught_and_converted_to_an_error() {
        let dispatcher = CommandDispatcher::new();
        dispatcher
            .register("boom", Arc::new(|_: &Value| panic!("handler exploded")))
            .unwrap();
        let err = dispatcher.dispatch("boom", &json!({})).unwrap_err();
        assert!(matches!(err, PluginError::HandlerPanicked(id, msg) if id == "boom" && msg.contains("exploded")));
    }
}
