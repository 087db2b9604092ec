//! `RouteRegistry` — the seam a controller plugin installs its HTTP routes
//! through, standing in for the out-of-scope HTTP router
//!
//! Per the §9 redesign note ("Hot reload of controller/HTTP routes"), the
//! assumption is that the concrete HTTP framework on the other side of this
//! trait does not support dynamic route removal. So `PluginManager` never
//! asks a registry to remove anything; instead it installs a thin proxy at
//! registration time and marks it *detached* when the owning plugin is
//! disabled or unloaded. A request arriving through a detached proxy is the
//! registry implementation's responsibility to answer with a
//! `plugin-disabled` error rather than reaching the unloaded plugin.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Installs routes for a controller plugin. Implemented by whatever owns the
/// actual HTTP server; `vesper-plugin` only depends on this trait.
pub trait RouteRegistry: Send + Sync {
    /// Mounts `path` under `prefix`, returning a proxy handle the caller
    /// should hold for the plugin's lifetime. The registry is expected to
    /// route inbound requests for this path through `handle.is_attached()`.
    fn mount(&self, prefix: &str, path: &str) -> Arc<RouteProxyHandle>;
}

/// A single mounted route's attach/detach flag, shared between
/// `PluginManager` and the concrete HTTP router.
#[derive(Debug, Default)]
pub struct RouteProxyHandle {
    attached: AtomicBool,
}

impl RouteProxyHandle {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            attached: AtomicBool::new(true),
        })
    }

    pub fn is_attached(&self) -> bool {
        self.attached.load(Ordering::Acquire)
    }

    /// Marks the proxy detached; inbound requests should now answer
    /// `plugin-disabled` instead of reaching the plugin.
    pub fn detach(&self) {
        self.attached.store(false, Ordering::Release);
    }

    pub fn attach(&self) {
        self.attached.store(true, Ordering::Release);
    }
}

/// An in-process `RouteRegistry` used by tests and by hosts that don't run a
/// real HTTP server: it just records the mounted (prefix, path) pairs and
/// their proxy handles.
#[derive(Default)]
pub struct RecordingRouteRegistry {
    mounted: parking_lot::Mutex<Vec<(String, String, Arc<RouteProxyHandle>)>>,
}

impl RecordingRouteRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mounted_paths(&self) -> Vec<(String, String)> {
        self.mounted
            .lock()
            .iter()
            .map(|(prefix, path, _)| (prefix.clone(), path.clone()))
            .collect()
    }

    pub fn handle_for(&self, prefix: &str, path: &str) -> Option<Arc<RouteProxyHandle>> {
        self.mounted
            .lock()
            .iter()
            .find(|(p, r, _)| p == prefix && r == path)
            .map(|(_, _, h)| h.clone())
    }
}

impl RouteRegistry for RecordingRouteRegistry {
    fn mount(&self, prefix: &str, path: &str) -> Arc<RouteProxyHandle> {
        let handle = RouteProxyHandle::new();
        self.mounted
            .lock()
            .push((prefix.to_string(), path.to_string(), handle.clone()));
        handle
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detached_proxy_reports_unattached() {
        let registry = RecordingRouteRegistry::new();
        let handle = registry.mount("/api/focuser", "/status");
        assert!(handle.is_attached());
        handle.detach();
        assert!(!handle.is_attached());
    }

    #[test]
    fn records_every_mounted_path() {
        let registry = RecordingRouteRegistry::new();
        registry.mount("/api/focuser", "/status");
        registry.mount("/api/focuser", "/move");
        assert_eq!(
            registry.mounted_paths(),
            vec![
                ("/api/focuser".to_string(), "/status".to_string()),
                ("/api/focuser".to_string(), "/move".to_string()),
            ]
        );
    }
}
