//! `PluginManager` — owns every loaded plugin dylib, negotiates dependency
//! order (topological sort via `petgraph`) and capability/tag/group queries,
//! and fans out lifecycle events to subscribers on a dedicated notification
//! thread
//!

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Weak};
use std::time::{Instant, SystemTime};

use parking_lot::RwLock;
use petgraph::algo::toposort;
use petgraph::graph::DiGraph;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::abi::{PluginMetadata, PluginState, PluginStatistics};
use crate::dispatcher::{panic_message, CommandDispatcher};
use crate::error::{PluginError, PluginResult};
use crate::loader::LoadedLibrary;
use crate::routes::{RouteProxyHandle, RouteRegistry};

/// One of the events subscribers receive, each carrying the
/// plugin name and a JSON payload.
#[derive(Debug, Clone, Serialize)]
pub struct PluginEvent {
    pub kind: PluginEventKind,
    pub plugin: String,
    pub payload: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PluginEventKind {
    Loaded,
    Unloaded,
    Reloaded,
    Initialized,
    Shutdown,
    Error,
    StateChanged,
    Enabled,
    Disabled,
    Paused,
    Resumed,
    ConfigUpdated,
    ActionExecuted,
}

type EventSubscriber = Box<dyn Fn(&PluginEvent) + Send + Sync>;

/// A point-in-time snapshot of a loaded plugin, safe to hand to callers
/// without holding the manager's lock.
#[derive(Debug, Clone)]
pub struct LoadedPluginInfo {
    pub name: String,
    pub path: PathBuf,
    pub metadata: PluginMetadata,
    pub state: PluginState,
    pub enabled: bool,
    pub load_time: SystemTime,
    pub config: Value,
    pub group: Option<String>,
    pub statistics: PluginStatistics,
}

/// One entry of the persisted plugin manifest written by `save_configuration`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedPluginEntry {
    pub name: String,
    pub path: PathBuf,
    pub config: Value,
    pub enabled: bool,
    #[serde(default)]
    pub auto_load: bool,
}

struct PluginEntry {
    library: LoadedLibrary,
    metadata: PluginMetadata,
    state: PluginState,
    enabled: bool,
    load_time: SystemTime,
    config: Value,
    group: Option<String>,
    statistics: PluginStatistics,
    route_handles: Vec<Arc<RouteProxyHandle>>,
    command_ids: Vec<String>,
}

impl PluginEntry {
    fn snapshot(&self, name: &str) -> LoadedPluginInfo {
        LoadedPluginInfo {
            name: name.to_string(),
            path: self.library.path.clone(),
            metadata: self.metadata.clone(),
            state: self.state,
            enabled: self.enabled,
            load_time: self.load_time,
            config: self.config.clone(),
            group: self.group.clone(),
            statistics: self.statistics.clone(),
        }
    }
}

struct PluginGroup {
    members: Vec<String>,
    enabled: bool,
}

/// Central owner of all loaded plugins, the [`CommandDispatcher`] they
/// register commands with, and the [`RouteRegistry`] controller plugins
/// mount routes against.
pub struct PluginManager {
    plugins: RwLock<HashMap<String, PluginEntry>>,
    groups: RwLock<HashMap<String, PluginGroup>>,
    dispatcher: Arc<CommandDispatcher>,
    routes: Arc<dyn RouteRegistry>,
    event_tx: Sender<PluginEvent>,
    subscribers: Arc<RwLock<Vec<EventSubscriber>>>,
    self_weak: RwLock<Weak<PluginManager>>,
}

impl PluginManager {
    /// Builds a manager wrapped in `Arc`, since command handlers registered
    /// with the dispatcher need to call back into the manager
    /// (`execute_plugin_command`) from a closure that outlives any single
    /// `enable` call.
    pub fn new(dispatcher: Arc<CommandDispatcher>, routes: Arc<dyn RouteRegistry>) -> Arc<Self> {
        let (event_tx, event_rx) = mpsc::channel::<PluginEvent>();
        let subscribers: Arc<RwLock<Vec<EventSubscriber>>> = Arc::new(RwLock::new(Vec::new()));

        // The "plugin notification thread": delivers events to
        // subscribers serially, off the caller's thread, so a slow or
        // panicking subscriber can never block plugin lifecycle operations.
        let thread_subscribers = subscribers.clone();
        std::thread::spawn(move || {
            for event in event_rx {
                for subscriber in thread_subscribers.read().iter() {
                    subscriber(&event);
                }
            }
        });

        let manager = Arc::new(Self {
            plugins: RwLock::new(HashMap::new()),
            groups: RwLock::new(HashMap::new()),
            dispatcher,
            routes,
            event_tx,
            subscribers,
            self_weak: RwLock::new(Weak::new()),
        });
        *manager.self_weak.write() = Arc::downgrade(&manager);
        manager
    }

    pub fn dispatcher(&self) -> Arc<CommandDispatcher> {
        self.dispatcher.clone()
    }

    /// Subscribes to plugin lifecycle events; callbacks run on the manager's
    /// notification thread, never on the caller's.
    pub fn subscribe(&self, callback: impl Fn(&PluginEvent) + Send + Sync + 'static) {
        self.subscribers.write().push(Box::new(callback));
    }

    fn emit(&self, kind: PluginEventKind, plugin: &str, payload: Value) {
        let event = PluginEvent {
            kind,
            plugin: plugin.to_string(),
            payload,
        };
        tracing::debug!(?kind, plugin, "plugin event");
        let _ = self.event_tx.send(event);
    }

    // ── Loading ─────────────────────────────────────────────────────────

    /// Loads a plugin dylib from `path`, validates its config, checks
    /// dependencies/conflicts against what's already loaded, and runs
    /// `initialize`. The plugin is `Initialized` but not yet enabled — no
    /// commands or routes are registered until [`Self::enable_plugin`]
    /// ("dual loading ... at `enable` time"). Returns the
    /// plugin's name.
    pub fn load_plugin(&self, path: &Path, config: Value) -> PluginResult<String> {
        let mut library = LoadedLibrary::open(path)?;
        let metadata = library.plugin().metadata().clone();

        {
            let plugins = self.plugins.read();
            if plugins.contains_key(&metadata.name) {
                return Err(PluginError::AlreadyLoaded(metadata.name.clone()));
            }
            for dep in &metadata.dependencies {
                if !plugins.contains_key(dep) {
                    return Err(PluginError::DependencyMissing(dep.clone()));
                }
            }
            for other in plugins.values() {
                if other.metadata.conflicts.contains(&metadata.name)
                    || metadata.conflicts.contains(&other.metadata.name)
                {
                    return Err(PluginError::InvalidPlugin(format!(
                        "'{}' conflicts with loaded plugin '{}'",
                        metadata.name, other.metadata.name
                    )));
                }
            }
        }

        library
            .plugin()
            .validate_config(&config)
            .map_err(PluginError::InitializationFailed)?;

        library
            .plugin_mut()
            .initialize(&config)
            .map_err(PluginError::InitializationFailed)?;

        let name = metadata.name.clone();
        let command_ids = library.plugin().command_ids();
        self.plugins.write().insert(
            name.clone(),
            PluginEntry {
                library,
                metadata,
                state: PluginState::Initialized,
                enabled: false,
                load_time: SystemTime::now(),
                config,
                group: None,
                statistics: PluginStatistics::default(),
                route_handles: Vec::new(),
                command_ids,
            },
        );
        tracing::info!(plugin = %name, "plugin loaded");
        self.emit(PluginEventKind::Loaded, &name, Value::Null);
        self.emit(PluginEventKind::Initialized, &name, Value::Null);
        Ok(name)
    }

    /// Registers a command-capability plugin's handlers with the
    /// [`CommandDispatcher`] and a controller-capability plugin's routes
    /// with the [`RouteRegistry`]; transitions state to `Running` and emits
    /// `Enabled`
    pub fn enable_plugin(&self, name: &str) -> PluginResult<()> {
        let mut plugins = self.plugins.write();
        let entry = plugins.get_mut(name).ok_or_else(|| PluginError::NotFound(name.to_string()))?;
        if entry.enabled {
            return Ok(());
        }

        if entry.metadata.has_capability(crate::abi::capabilities::COMMAND) {
            let weak = self.self_weak.read().clone();
            for command_id in entry.command_ids.clone() {
                let weak = weak.clone();
                let plugin_name = name.to_string();
                let handler_command_id = command_id.clone();
                self.dispatcher.register(
                    command_id,
                    Arc::new(move |payload: &Value| {
                        let Some(manager) = weak.upgrade() else {
                            return serde_json::json!({"error": "plugin manager gone"});
                        };
                        manager
                            .execute_plugin_command(&plugin_name, &handler_command_id, payload)
                            .unwrap_or_else(|e| serde_json::json!({"error": e.to_string()}))
                    }),
                )?;
            }
        }

        if entry.metadata.has_capability(crate::abi::capabilities::CONTROLLER) {
            let prefix = entry.library.plugin().route_prefix();
            entry.route_handles = entry
                .library
                .plugin()
                .route_paths()
                .into_iter()
                .map(|path| self.routes.mount(&prefix, &path))
                .collect();
        }

        entry.state = PluginState::Running;
        entry.enabled = true;
        drop(plugins);
        self.emit(PluginEventKind::Enabled, name, Value::Null);
        self.emit(PluginEventKind::StateChanged, name, serde_json::json!({"state": "Running"}));
        Ok(())
    }

    /// Unregisters a command plugin's handlers from the dispatcher and
    /// detaches any mounted route proxies (disabling a controller
    /// plugin marks its proxy detached rather than removing the route).
    pub fn disable_plugin(&self, name: &str) -> PluginResult<()> {
        let mut plugins = self.plugins.write();
        let entry = plugins.get_mut(name).ok_or_else(|| PluginError::NotFound(name.to_string()))?;
        if !entry.enabled {
            return Ok(());
        }

        for command_id in &entry.command_ids {
            self.dispatcher.unregister(command_id);
        }
        for handle in &entry.route_handles {
            handle.detach();
        }

        entry.state = PluginState::Disabled;
        entry.enabled = false;
        drop(plugins);
        self.emit(PluginEventKind::Disabled, name, Value::Null);
        self.emit(PluginEventKind::StateChanged, name, serde_json::json!({"state": "Disabled"}));
        Ok(())
    }

    /// Unloads a plugin, refusing if another loaded plugin depends on it.
    pub fn unload_plugin(&self, name: &str) -> PluginResult<()> {
        {
            let plugins = self.plugins.read();
            if !plugins.contains_key(name) {
                return Err(PluginError::NotFound(name.to_string()));
            }
            for (other_name, entry) in plugins.iter() {
                if other_name != name && entry.metadata.dependencies.iter().any(|d| d == name) {
                    return Err(PluginError::InUse(name.to_string()));
                }
            }
        }

        if self.plugins.read().get(name).is_some_and(|e| e.enabled) {
            self.disable_plugin(name)?;
        }

        let mut plugins = self.plugins.write();
        if let Some(mut entry) = plugins.remove(name) {
            entry.library.plugin_mut().shutdown();
            tracing::info!(plugin = %name, "plugin unloaded");
        }
        drop(plugins);
        self.emit(PluginEventKind::Shutdown, name, Value::Null);
        self.emit(PluginEventKind::Unloaded, name, Value::Null);
        Ok(())
    }

    pub fn reload_plugin(&self, name: &str) -> PluginResult<String> {
        let (path, config, was_enabled) = {
            let plugins = self.plugins.read();
            let entry = plugins.get(name).ok_or_else(|| PluginError::NotFound(name.to_string()))?;
            (entry.library.path.clone(), entry.config.clone(), entry.enabled)
        };
        self.unload_plugin(name)?;
        let loaded = self.load_plugin(&path, config)?;
        if was_enabled {
            self.enable_plugin(&loaded)?;
        }
        self.emit(PluginEventKind::Reloaded, &loaded, Value::Null);
        Ok(loaded)
    }

    /// Scans `dir` for platform shared-library files and loads (but does not
    /// enable) each one with an empty config, continuing past individual
    /// failures.
    pub fn load_all_discovered(&self, dir: &Path) -> PluginResult<usize> {
        let mut loaded = 0;
        for path in self.discover_plugins(dir)? {
            match self.load_plugin(&path, Value::Object(Default::default())) {
                Ok(_) => loaded += 1,
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "failed to load discovered plugin"),
            }
        }
        Ok(loaded)
    }

    pub fn discover_plugins(&self, dir: &Path) -> PluginResult<Vec<PathBuf>> {
        let ext = std::env::consts::DLL_EXTENSION;
        let mut found = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) == Some(ext) {
                found.push(path);
            }
        }
        Ok(found)
    }

    /// Unloads every loaded plugin, in reverse dependency order.
    pub fn unload_all(&self) -> PluginResult<()> {
        for name in self.load_order()?.into_iter().rev() {
            self.unload_plugin(&name)?;
        }
        Ok(())
    }

    // ── Dependency ordering ──────────────────────────────────────────────

    /// Topological sort over the loaded dependency graph via
    /// `petgraph::algo::toposort`; refuses with `CyclicDependency` rather
    /// than returning an arbitrary order ("at load time, cycles
    /// must be detected and refused").
    pub fn load_order(&self) -> PluginResult<Vec<String>> {
        let plugins = self.plugins.read();
        let mut graph = DiGraph::<String, ()>::new();
        let mut indices = HashMap::new();
        for name in plugins.keys() {
            indices.insert(name.clone(), graph.add_node(name.clone()));
        }
        for (name, entry) in plugins.iter() {
            for dep in &entry.metadata.dependencies {
                if let (Some(&dep_idx), Some(&name_idx)) = (indices.get(dep), indices.get(name)) {
                    // dep must load before name.
                    graph.add_edge(dep_idx, name_idx, ());
                }
            }
        }
        match toposort(&graph, None) {
            Ok(order) => Ok(order.into_iter().map(|idx| graph[idx].clone()).collect()),
            Err(cycle) => Err(PluginError::CyclicDependency(graph[cycle.node_id()].clone())),
        }
    }

    pub fn validate_dependencies(&self, name: &str) -> bool {
        let plugins = self.plugins.read();
        let Some(entry) = plugins.get(name) else {
            return false;
        };
        entry.metadata.dependencies.iter().all(|d| plugins.contains_key(d))
    }

    // ── Queries ─────────────────────────────────────────────────────────

    pub fn is_plugin_loaded(&self, name: &str) -> bool {
        self.plugins.read().contains_key(name)
    }

    pub fn is_plugin_enabled(&self, name: &str) -> bool {
        self.plugins.read().get(name).is_some_and(|e| e.enabled)
    }

    pub fn get_plugin(&self, name: &str) -> Option<LoadedPluginInfo> {
        self.plugins.read().get(name).map(|e| e.snapshot(name))
    }

    pub fn get_all_plugins(&self) -> Vec<LoadedPluginInfo> {
        self.plugins.read().iter().map(|(n, e)| e.snapshot(n)).collect()
    }

    pub fn get_command_plugins(&self) -> Vec<LoadedPluginInfo> {
        self.plugins
            .read()
            .iter()
            .filter(|(_, e)| !e.command_ids.is_empty())
            .map(|(n, e)| e.snapshot(n))
            .collect()
    }

    pub fn get_plugins_by_capability(&self, capability: &str) -> Vec<LoadedPluginInfo> {
        self.plugins
            .read()
            .iter()
            .filter(|(_, e)| e.metadata.has_capability(capability))
            .map(|(n, e)| e.snapshot(n))
            .collect()
    }

    pub fn get_plugins_by_tag(&self, tag: &str) -> Vec<LoadedPluginInfo> {
        self.plugins
            .read()
            .iter()
            .filter(|(_, e)| e.metadata.tags.iter().any(|t| t == tag))
            .map(|(n, e)| e.snapshot(n))
            .collect()
    }

    pub fn has_capability(&self, name: &str, capability: &str) -> bool {
        self.plugins
            .read()
            .get(name)
            .is_some_and(|e| e.metadata.has_capability(capability))
    }

    pub fn conflicting_plugins(&self, name: &str) -> Vec<String> {
        let plugins = self.plugins.read();
        let Some(entry) = plugins.get(name) else {
            return Vec::new();
        };
        plugins
            .iter()
            .filter(|(other_name, other)| {
                *other_name != name
                    && (other.metadata.conflicts.contains(&name.to_string())
                        || entry.metadata.conflicts.contains(&other.metadata.name))
            })
            .map(|(n, _)| n.clone())
            .collect()
    }

    pub fn has_conflicts(&self, name: &str) -> bool {
        !self.conflicting_plugins(name).is_empty()
    }

    pub fn get_plugin_config(&self, name: &str) -> Option<Value> {
        self.plugins.read().get(name).map(|e| e.config.clone())
    }

    pub fn set_plugin_config(&self, name: &str, config: Value) {
        if let Some(entry) = self.plugins.write().get_mut(name) {
            entry.config = config;
        }
    }

    pub fn get_plugin_statistics(&self, name: &str) -> Option<PluginStatistics> {
        self.plugins.read().get(name).map(|e| e.statistics.clone())
    }

    pub fn get_plugin_actions(&self, name: &str) -> Vec<String> {
        self.plugins
            .read()
            .get(name)
            .map(|e| e.library.plugin().supported_actions())
            .unwrap_or_default()
    }

    // ── Mutating lifecycle operations ────────────────────────────────────

    pub fn pause_plugin(&self, name: &str) -> PluginResult<bool> {
        let ok = {
            let mut plugins = self.plugins.write();
            let entry = plugins.get_mut(name).ok_or_else(|| PluginError::NotFound(name.to_string()))?;
            let ok = entry.library.plugin_mut().pause();
            if ok {
                entry.state = PluginState::Paused;
            }
            ok
        };
        if ok {
            self.emit(PluginEventKind::Paused, name, Value::Null);
        }
        Ok(ok)
    }

    pub fn resume_plugin(&self, name: &str) -> PluginResult<bool> {
        let ok = {
            let mut plugins = self.plugins.write();
            let entry = plugins.get_mut(name).ok_or_else(|| PluginError::NotFound(name.to_string()))?;
            let ok = entry.library.plugin_mut().resume();
            if ok {
                entry.state = PluginState::Running;
            }
            ok
        };
        if ok {
            self.emit(PluginEventKind::Resumed, name, Value::Null);
        }
        Ok(ok)
    }

    pub fn update_plugin_config(&self, name: &str, config: Value) -> PluginResult<bool> {
        let ok = {
            let mut plugins = self.plugins.write();
            let entry = plugins.get_mut(name).ok_or_else(|| PluginError::NotFound(name.to_string()))?;
            let ok = entry.library.plugin_mut().update_config(&config);
            if ok {
                entry.config = config.clone();
            }
            ok
        };
        if ok {
            self.emit(PluginEventKind::ConfigUpdated, name, config);
        }
        Ok(ok)
    }

    pub fn validate_plugin_config(&self, name: &str, config: &Value) -> PluginResult<Result<(), String>> {
        let plugins = self.plugins.read();
        let entry = plugins.get(name).ok_or_else(|| PluginError::NotFound(name.to_string()))?;
        Ok(entry.library.plugin().validate_config(config))
    }

    /// Executes a named action on a plugin, tracking call/error counts and
    /// average latency in its [`PluginStatistics`]. Refuses with
    /// `PluginDisabled` if the plugin hasn't been enabled.
    pub fn execute_plugin_action(&self, name: &str, action: &str, params: &Value) -> PluginResult<Value> {
        let mut plugins = self.plugins.write();
        let entry = plugins.get_mut(name).ok_or_else(|| PluginError::NotFound(name.to_string()))?;
        if !entry.enabled {
            return Err(PluginError::PluginDisabled(name.to_string()));
        }
        let started = Instant::now();
        let plugin = entry.library.plugin_mut();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| plugin.execute_action(action, params)))
            .unwrap_or_else(|panic| serde_json::json!({"error": panic_message(&panic)}));
        let failed = result.get("error").is_some();
        entry.statistics.record_call(started.elapsed(), failed);
        drop(plugins);
        self.emit(
            PluginEventKind::ActionExecuted,
            name,
            serde_json::json!({"action": action, "failed": failed}),
        );
        Ok(result)
    }

    /// Executes a command directly on the plugin that owns it. Command
    /// handlers registered with the `CommandDispatcher` at enable time route
    /// back through this same method, so dispatcher-routed and direct calls
    /// share statistics tracking.
    pub fn execute_plugin_command(&self, name: &str, command_id: &str, params: &Value) -> PluginResult<Value> {
        let mut plugins = self.plugins.write();
        let entry = plugins.get_mut(name).ok_or_else(|| PluginError::NotFound(name.to_string()))?;
        if !entry.enabled {
            return Err(PluginError::PluginDisabled(name.to_string()));
        }
        let started = Instant::now();
        let plugin = entry.library.plugin_mut();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| plugin.execute_command(command_id, params)))
            .unwrap_or_else(|panic| serde_json::json!({"error": panic_message(&panic)}));
        let failed = result.get("error").is_some();
        entry.statistics.record_call(started.elapsed(), failed);
        drop(plugins);
        self.emit(
            PluginEventKind::ActionExecuted,
            name,
            serde_json::json!({"command": command_id, "failed": failed}),
        );
        Ok(result)
    }

    // ── Groups ────────────────────────────────────────────────────────────

    pub fn create_group(&self, group: impl Into<String>) {
        self.groups.write().entry(group.into()).or_insert_with(|| PluginGroup {
            members: Vec::new(),
            enabled: false,
        });
    }

    pub fn add_to_group(&self, group: &str, plugin_name: &str) -> PluginResult<()> {
        let mut groups = self.groups.write();
        let g = groups.get_mut(group).ok_or_else(|| PluginError::GroupNotFound(group.to_string()))?;
        if !g.members.iter().any(|m| m == plugin_name) {
            g.members.push(plugin_name.to_string());
        }
        if let Some(entry) = self.plugins.write().get_mut(plugin_name) {
            entry.group = Some(group.to_string());
        }
        Ok(())
    }

    pub fn plugins_in_group(&self, group: &str) -> Vec<LoadedPluginInfo> {
        self.plugins
            .read()
            .iter()
            .filter(|(_, e)| e.group.as_deref() == Some(group))
            .map(|(n, e)| e.snapshot(n))
            .collect()
    }

    /// Enables every member of `group`, in dependency-topological order
    /// ("batch `enableGroup`/`disableGroup` operate in
    /// topological order").
    pub fn enable_group(&self, group: &str) -> PluginResult<()> {
        let members: HashSet<String> = {
            let groups = self.groups.read();
            let g = groups.get(group).ok_or_else(|| PluginError::GroupNotFound(group.to_string()))?;
            g.members.iter().cloned().collect()
        };
        for name in self.load_order()? {
            if members.contains(&name) {
                self.enable_plugin(&name)?;
            }
        }
        if let Some(g) = self.groups.write().get_mut(group) {
            g.enabled = true;
        }
        Ok(())
    }

    /// Disables every member of `group`, in reverse dependency-topological
    /// order.
    pub fn disable_group(&self, group: &str) -> PluginResult<()> {
        let members: HashSet<String> = {
            let groups = self.groups.read();
            let g = groups.get(group).ok_or_else(|| PluginError::GroupNotFound(group.to_string()))?;
            g.members.iter().cloned().collect()
        };
        for name in self.load_order()?.into_iter().rev() {
            if members.contains(&name) {
                self.disable_plugin(&name)?;
            }
        }
        if let Some(g) = self.groups.write().get_mut(group) {
            g.enabled = false;
        }
        Ok(())
    }

    pub fn is_group_enabled(&self, group: &str) -> bool {
        self.groups.read().get(group).is_some_and(|g| g.enabled)
    }

    // ── Persistence ───────────────────────────────────────────

    /// Writes the set of loaded plugins, their paths, per-plugin configs and
    /// enabled status to `path` as JSON.
    pub fn save_configuration(&self, path: &Path) -> PluginResult<()> {
        let entries: Vec<PersistedPluginEntry> = self
            .plugins
            .read()
            .iter()
            .map(|(name, entry)| PersistedPluginEntry {
                name: name.clone(),
                path: entry.library.path.clone(),
                config: entry.config.clone(),
                enabled: entry.enabled,
                auto_load: true,
            })
            .collect();
        std::fs::write(path, serde_json::to_string_pretty(&entries)?)?;
        Ok(())
    }

    /// Reverses [`Self::save_configuration`]: loads (and enables, if
    /// `auto_load` is set) every persisted entry, in the file's own order.
    pub fn load_configuration(&self, path: &Path) -> PluginResult<usize> {
        let content = std::fs::read_to_string(path)?;
        let entries: Vec<PersistedPluginEntry> = serde_json::from_str(&content)?;
        let mut loaded = 0;
        for entry in entries {
            if !entry.auto_load {
                continue;
            }
            match self.load_plugin(&entry.path, entry.config) {
                Ok(name) => {
                    if entry.enabled {
                        self.enable_plugin(&name)?;
                    }
                    loaded += 1;
                }
                Err(e) => tracing::warn!(plugin = %entry.name, error = %e, "failed to restore plugin from configuration"),
            }
        }
        Ok(loaded)
    }
}

/// A plugin-name dependency graph, standalone from [`PluginManager`], used
/// by callers that want to validate an ordering before any dylib is opened
/// (e.g. a `vesper plugins validate` CLI command over a manifest file).
pub fn detect_dependency_cycle(deps: &HashMap<String, HashSet<String>>) -> Option<String> {
    let mut graph = DiGraph::<String, ()>::new();
    let mut indices = HashMap::new();
    for name in deps.keys() {
        indices.entry(name.clone()).or_insert_with(|| graph.add_node(name.clone()));
    }
    for deps_of in deps.values() {
        for dep in deps_of {
            indices.entry(dep.clone()).or_insert_with(|| graph.add_node(dep.clone()));
        }
    }
    for (name, deps_of) in deps {
        let name_idx = indices[name];
        for dep in deps_of {
            graph.add_edge(indices[dep], name_idx, ());
        }
    }
    toposort(&graph, None).err().map(|cycle| graph[cycle.node_id()].clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abi::{Plugin, PluginState};
    use crate::routes::RecordingRouteRegistry;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct StubPlugin {
        metadata: PluginMetadata,
        state: PluginState,
        initialized: Arc<AtomicBool>,
    }

    impl Plugin for StubPlugin {
        fn metadata(&self) -> &PluginMetadata {
            &self.metadata
        }
        fn initialize(&mut self, _config: &Value) -> Result<(), String> {
            self.state = PluginState::Initialized;
            self.initialized.store(true, Ordering::SeqCst);
            Ok(())
        }
        fn shutdown(&mut self) {
            self.state = PluginState::Stopping;
        }
        fn state(&self) -> PluginState {
            self.state
        }
        fn last_error(&self) -> Option<String> {
            None
        }
        fn is_healthy(&self) -> bool {
            true
        }
        fn command_ids(&self) -> Vec<String> {
            vec!["echo".to_string()]
        }
        fn execute_command(&mut self, command_id: &str, params: &Value) -> Value {
            if command_id == "echo" {
                params.clone()
            } else {
                serde_json::json!({"error": "unknown"})
            }
        }
    }

    fn command_metadata(name: &str) -> PluginMetadata {
        PluginMetadata {
            name: name.to_string(),
            capabilities: vec![crate::abi::capabilities::COMMAND.to_string()],
            ..Default::default()
        }
    }

    #[test]
    fn cycle_detection_flags_a_cyclic_two_node_graph() {
        let mut deps = HashMap::new();
        deps.insert("a".to_string(), HashSet::from(["b".to_string()]));
        deps.insert("b".to_string(), HashSet::from(["a".to_string()]));
        assert!(detect_dependency_cycle(&deps).is_some());
    }

    #[test]
    fn cycle_detection_passes_acyclic_chain() {
        let mut deps = HashMap::new();
        deps.insert("a".to_string(), HashSet::from(["b".to_string()]));
        deps.insert("b".to_string(), HashSet::new());
        assert!(detect_dependency_cycle(&deps).is_none());
    }

    #[test]
    fn groups_enable_and_disable_members() {
        let manager = PluginManager::new(Arc::new(CommandDispatcher::new()), Arc::new(RecordingRouteRegistry::new()));
        manager.create_group("imaging");
        // add_to_group works even before the plugin is loaded; membership
        // is set on the entry only once it exists.
        assert!(manager.add_to_group("imaging", "camera").is_ok());
        assert_eq!(manager.plugins_in_group("imaging").len(), 0);
        assert!(!manager.is_group_enabled("imaging"));
    }

    #[test]
    fn unknown_group_operations_fail() {
        let manager = PluginManager::new(Arc::new(CommandDispatcher::new()), Arc::new(RecordingRouteRegistry::new()));
        assert!(matches!(manager.enable_group("missing"), Err(PluginError::GroupNotFound(_))));
    }

    #[test]
    fn load_order_on_empty_manager_is_empty() {
        let manager = PluginManager::new(Arc::new(CommandDispatcher::new()), Arc::new(RecordingRouteRegistry::new()));
        assert!(manager.load_order().unwrap().is_empty());
    }

    #[test]
    fn unused_stub_plugin_compiles_against_full_plugin_trait() {
        // Exercises the `Plugin` trait surface a real dylib would implement,
        // without needing `libloading` to actually open anything.
        let mut stub = StubPlugin {
            metadata: command_metadata("camera"),
            state: PluginState::Loaded,
            initialized: Arc::new(AtomicBool::new(false)),
        };
        assert!(stub.initialize(&Value::Null).is_ok());
        assert_eq!(stub.execute_command("echo", &serde_json::json!({"x": 1})), serde_json::json!({"x": 1}));
    }
}
