//! Dynamic plugin loading and dispatch: dylib ABI, load/unload lifecycle,
//! dependency ordering, and command routing

pub mod abi;
pub mod dispatcher;
pub mod error;
pub mod loader;
pub mod manager;
pub mod routes;

pub use abi::{
    capabilities, AbiVersionFn, CreatePluginFn, DestroyPluginFn, Plugin, PluginMetadata,
    PluginState, PluginStatistics, PLUGIN_ABI_VERSION,
};
pub use dispatcher::{CommandDispatcher, CommandHandlerFn};
pub use error::{PluginError, PluginResult};
pub use loader::LoadedLibrary;
pub use manager::{
    detect_dependency_cycle, LoadedPluginInfo, PersistedPluginEntry, PluginEvent, PluginEventKind,
    PluginManager,
};
pub use routes::{RecordingRouteRegistry, RouteProxyHandle, RouteRegistry};
