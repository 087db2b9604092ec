//! Adapts `vesper_plugin::CommandDispatcher` to the minimal
//! `vesper_core::CommandDispatch` seam a [`vesper_core::Task`] handler calls
//! through, so `vesper-core` never needs to depend on `vesper-plugin`.

use std::sync::Arc;

use serde_json::Value;

use vesper_core::{CommandDispatch, VesperError};
use vesper_plugin::{CommandDispatcher, PluginError};

pub struct DispatcherAdapter {
    dispatcher: Arc<CommandDispatcher>,
}

impl DispatcherAdapter {
    pub fn new(dispatcher: Arc<CommandDispatcher>) -> Self {
        Self { dispatcher }
    }
}

impl CommandDispatch for DispatcherAdapter {
    fn dispatch(&self, command_id: &str, payload: &mut Value) -> Result<(), VesperError> {
        let result = self.dispatcher.dispatch(command_id, payload).map_err(plugin_error_to_vesper)?;
        *payload = result;
        Ok(())
    }
}

fn plugin_error_to_vesper(err: PluginError) -> VesperError {
    match err {
        PluginError::NotFound(id) => VesperError::ResourceUnavailable(format!("no command handler for '{id}'")),
        PluginError::PluginDisabled(name) => VesperError::ResourceUnavailable(format!("plugin '{name}' is disabled")),
        other => VesperError::ExternalFailure(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn forwards_result_payload_in_place() {
        let dispatcher = Arc::new(CommandDispatcher::new());
        dispatcher.register("echo", Arc::new(|payload: &Value| payload.clone())).unwrap();
        let adapter = DispatcherAdapter::new(dispatcher);

        let mut payload = json!({"x": 1});
        adapter.dispatch("echo", &mut payload).unwrap();
        assert_eq!(payload, json!({"x": 1}));
    }

    #[test]
    fn missing_command_maps_to_resource_unavailable() {
        let dispatcher = Arc::new(CommandDispatcher::new());
        let adapter = DispatcherAdapter::new(dispatcher);

        let mut payload = json!({});
        let err = adapter.dispatch("missing", &mut payload).unwrap_err();
        assert_eq!(err.code(), "ResourceUnavailable");
    }
}
