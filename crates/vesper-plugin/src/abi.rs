//! The plugin ABI: metadata, lifecycle state, statistics, and the `Plugin`/
//! `CommandPlugin` traits a dylib implements.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::{Duration, SystemTime};

/// ABI version this host negotiates against. A plugin exporting a different
/// version is rejected at load time
pub const PLUGIN_ABI_VERSION: u32 = 1;

/// Well-known capability tags a plugin may advertise.
pub mod capabilities {
    pub const COMMAND: &str = "command";
    pub const CONTROLLER: &str = "controller";
    pub const HOT_RELOAD: &str = "hot_reload";
    pub const PAUSE_RESUME: &str = "pause_resume";
    pub const RUNTIME_CONFIG: &str = "runtime_config";
    pub const DIRECT_EXECUTION: &str = "direct_execution";
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PluginMetadata {
    pub name: String,
    pub version: String,
    pub description: String,
    pub author: String,
    pub license: String,
    pub homepage: String,
    pub repository: String,
    /// Load priority; higher loads earlier within its dependency layer.
    pub priority: i32,
    pub dependencies: Vec<String>,
    pub optional_deps: Vec<String>,
    pub conflicts: Vec<String>,
    pub tags: Vec<String>,
    pub capabilities: Vec<String>,
}

impl PluginMetadata {
    pub fn has_capability(&self, capability: &str) -> bool {
        self.capabilities.iter().any(|c| c == capability)
    }
}

/// Plugin lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PluginState {
    Unloaded,
    Loading,
    Loaded,
    Initialized,
    Running,
    Paused,
    Stopping,
    Error,
    Disabled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginStatistics {
    pub call_count: u64,
    pub error_count: u64,
    pub avg_response_time_ms: f64,
    #[serde(skip, default = "SystemTime::now")]
    pub last_access_time: SystemTime,
    #[serde(skip, default = "SystemTime::now")]
    pub load_time: SystemTime,
    pub memory_usage_bytes: u64,
}

impl Default for PluginStatistics {
    fn default() -> Self {
        Self {
            call_count: 0,
            error_count: 0,
            avg_response_time_ms: 0.0,
            last_access_time: SystemTime::now(),
            load_time: SystemTime::now(),
            memory_usage_bytes: 0,
        }
    }
}

impl PluginStatistics {
    pub fn record_call(&mut self, elapsed: Duration, failed: bool) {
        self.call_count += 1;
        if failed {
            self.error_count += 1;
        }
        let total_ms = self.avg_response_time_ms * (self.call_count - 1) as f64
            + elapsed.as_secs_f64() * 1000.0;
        self.avg_response_time_ms = total_ms / self.call_count as f64;
        self.last_access_time = SystemTime::now();
    }
}

/// Base interface every plugin dylib implements.
///
/// Implementations are expected to be `'static` and `Send + Sync` since a
/// loaded plugin is shared behind an `Arc` once active.
pub trait Plugin: Send + Sync {
    fn metadata(&self) -> &PluginMetadata;
    fn initialize(&mut self, config: &Value) -> Result<(), String>;
    fn shutdown(&mut self);
    fn state(&self) -> PluginState;
    fn last_error(&self) -> Option<String>;
    fn is_healthy(&self) -> bool;

    fn pause(&mut self) -> bool {
        false
    }
    fn resume(&mut self) -> bool {
        false
    }
    fn statistics(&self) -> PluginStatistics {
        PluginStatistics::default()
    }
    fn update_config(&mut self, _config: &Value) -> bool {
        false
    }
    fn config(&self) -> Value {
        Value::Null
    }
    fn execute_action(&mut self, _action: &str, _params: &Value) -> Value {
        serde_json::json!({"error": "action not supported"})
    }
    fn supported_actions(&self) -> Vec<String> {
        Vec::new()
    }
    fn validate_config(&self, _config: &Value) -> Result<(), String> {
        Ok(())
    }

    /// Command ids this plugin wants registered with the
    /// [`crate::dispatcher::CommandDispatcher`].
    /// A plugin with no commands — e.g. a pure background/service plugin —
    /// leaves this empty. A trait object can't be downcast across the dylib
    /// boundary, so command support lives on `Plugin` itself rather than on
    /// a separate `ICommandPlugin`-style trait.
    fn command_ids(&self) -> Vec<String> {
        Vec::new()
    }
    fn execute_command(&mut self, command_id: &str, params: &Value) -> Value {
        let _ = (command_id, params);
        serde_json::json!({"error": "direct execution not supported"})
    }
    fn command_description(&self, _command_id: &str) -> String {
        String::new()
    }
    fn command_schema(&self, _command_id: &str) -> Value {
        Value::Null
    }

    /// Route paths this plugin wants installed with the [`crate::routes::RouteRegistry`]
    /// at enable time. Empty for plugins that don't advertise the
    /// `controller` capability.
    fn route_paths(&self) -> Vec<String> {
        Vec::new()
    }

    /// URL prefix under which [`Self::route_paths`] are mounted, e.g. `/api/focuser`.
    fn route_prefix(&self) -> String {
        String::new()
    }

    /// Installs this plugin's routes into `registry`. The registry is
    /// assumed not to support dynamic removal, so `unregister_routes` is a
    /// no-op: disabling a controller plugin instead marks its registry
    /// proxy detached (see [`crate::routes::RouteRegistry::detach`]).
    fn register_routes(&self, _registry: &dyn crate::routes::RouteRegistry) {}
}

/// Exported symbol names a plugin dylib must provide.
pub const SYMBOL_ABI_VERSION: &[u8] = b"vesper_plugin_abi_version";
pub const SYMBOL_CREATE: &[u8] = b"vesper_plugin_create";
pub const SYMBOL_DESTROY: &[u8] = b"vesper_plugin_destroy";

pub type AbiVersionFn = unsafe extern "C" fn() -> u32;
pub type CreatePluginFn = unsafe extern "C" fn() -> *mut dyn Plugin;
pub type DestroyPluginFn = unsafe extern "C" fn(*mut dyn Plugin);
