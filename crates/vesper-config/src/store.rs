//! `ConfigStore` — a thread-safe, path-addressed JSON configuration tree
//! Top-level keys are file stems: loading `camera.json`
//! populates `config["camera"]`, so `"camera/exposure/gain"` addresses the
//! `gain` field of that file's `exposure` object.

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::RwLock;
use serde_json::Value;
use uuid::Uuid;

use crate::error::{ConfigError, ConfigResult};
use crate::json5;

/// A change notification delivered to subscribers
#[derive(Debug, Clone)]
pub enum ChangeEvent {
    ValueChanged { path: String, value: Value },
    ValueRemoved { path: String },
    Merged,
    Cleared,
    FileLoaded { path: String },
    FileSaved { path: String },
}

impl ChangeEvent {
    /// The path this event is scoped to, if any. `Merged`/`Cleared` carry no
    /// single path — they can affect the whole tree — so they always pass a
    /// prefix filter regardless of what prefix a subscriber registered.
    fn path(&self) -> Option<&str> {
        match self {
            ChangeEvent::ValueChanged { path, .. } => Some(path),
            ChangeEvent::ValueRemoved { path } => Some(path),
            ChangeEvent::FileLoaded { path } => Some(path),
            ChangeEvent::FileSaved { path } => Some(path),
            ChangeEvent::Merged | ChangeEvent::Cleared => None,
        }
    }

    fn matches_prefix(&self, prefix: &str) -> bool {
        if prefix.is_empty() {
            return true;
        }
        match self.path() {
            Some(path) => path.starts_with(prefix),
            None => true,
        }
    }
}

pub type SubscriptionId = Uuid;
type Subscriber = Box<dyn Fn(&ChangeEvent) + Send + Sync>;

/// Splits a key path on `/`, preserving empty segments (so a leading or
/// doubled `/` produces an empty-string segment rather than being silently
/// collapsed).
fn split_path(path: &str) -> Vec<&str> {
    path.split('/').collect()
}

pub struct ConfigStore {
    root: RwLock<Value>,
    subscribers: RwLock<Vec<(SubscriptionId, String, Subscriber)>>,
    notifying: AtomicBool,
    next_sub_ordinal: AtomicU64,
}

impl ConfigStore {
    pub fn new() -> Self {
        Self {
            root: RwLock::new(Value::Object(Default::default())),
            subscribers: RwLock::new(Vec::new()),
            notifying: AtomicBool::new(false),
            next_sub_ordinal: AtomicU64::new(0),
        }
    }

    fn guard_reentrancy(&self, op: &str) -> ConfigResult<()> {
        if self.notifying.load(Ordering::SeqCst) {
            return Err(ConfigError::ReentrancyDenied(format!(
                "'{op}' called from within a change-notification callback"
            )));
        }
        Ok(())
    }

    fn notify(&self, event: ChangeEvent) {
        self.notifying.store(true, Ordering::SeqCst);
        for (_, prefix, cb) in self.subscribers.read().iter() {
            if event.matches_prefix(prefix) {
                cb(&event);
            }
        }
        self.notifying.store(false, Ordering::SeqCst);
    }

    /// Subscribes to change notifications whose path starts with `prefix`.
    /// An empty prefix matches every event.
    pub fn subscribe(
        &self,
        prefix: impl Into<String>,
        callback: impl Fn(&ChangeEvent) + Send + Sync + 'static,
    ) -> SubscriptionId {
        let id = Uuid::new_v4();
        self.subscribers.write().push((id, prefix.into(), Box::new(callback)));
        let _ = self.next_sub_ordinal.fetch_add(1, Ordering::Relaxed);
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.subscribers.write().retain(|(sub_id, _, _)| *sub_id != id);
    }

    // ── Read ────────────────────────────────────────────────────────────

    pub fn get(&self, key_path: &str) -> Option<Value> {
        let root = self.root.read();
        let mut p = &*root;
        for key in split_path(key_path) {
            if p.is_object() && p.get(key).is_some() {
                p = p.get(key).unwrap();
            } else {
                return None;
            }
        }
        Some(p.clone())
    }

    pub fn has(&self, key_path: &str) -> bool {
        self.get(key_path).is_some()
    }

    /// All leaf paths in the tree, each rendered as `"/seg1/seg2/.../leaf"`.
    pub fn get_keys(&self) -> Vec<String> {
        fn walk(value: &Value, prefix: &str, out: &mut Vec<String>) {
            if let Value::Object(map) = value {
                for (key, v) in map {
                    let path = format!("{prefix}/{key}");
                    if v.is_object() {
                        walk(v, &path, out);
                    } else {
                        out.push(path);
                    }
                }
            }
        }
        let root = self.root.read();
        let mut out = Vec::new();
        walk(&root, "", &mut out);
        out
    }

    /// Lists `.json` files directly under `dir`, taking an explicit
    /// directory rather than consulting process environment/CLI state.
    pub fn list_paths(&self, dir: &Path) -> ConfigResult<Vec<std::path::PathBuf>> {
        let mut out = Vec::new();
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("json") {
                out.push(path);
            }
        }
        Ok(out)
    }

    // ── Write ───────────────────────────────────────────────────────────

    pub fn set(&self, key_path: &str, value: Value) -> ConfigResult<()> {
        self.guard_reentrancy("set")?;
        self.set_or_append(key_path, value.clone(), false)?;
        self.notify(ChangeEvent::ValueChanged {
            path: key_path.to_string(),
            value,
        });
        Ok(())
    }

    /// Appends `value` to the array at `key_path`, creating an empty array
    /// first if nothing exists there yet. Fails with
    /// [`ConfigError::NotAnArray`] if a non-array value is already present.
    pub fn append(&self, key_path: &str, value: Value) -> ConfigResult<()> {
        self.guard_reentrancy("append")?;
        self.set_or_append(key_path, value.clone(), true)?;
        self.notify(ChangeEvent::ValueChanged {
            path: key_path.to_string(),
            value,
        });
        Ok(())
    }

    fn set_or_append(&self, key_path: &str, value: Value, append: bool) -> ConfigResult<()> {
        let mut root = self.root.write();

        if key_path == "/" {
            if append {
                if !root.is_array() {
                    *root = Value::Array(Vec::new());
                }
                root.as_array_mut().unwrap().push(value);
            } else {
                *root = value;
            }
            return Ok(());
        }

        let keys = split_path(key_path);
        let mut p = &mut *root;
        for (idx, key) in keys.iter().enumerate() {
            let is_last = idx == keys.len() - 1;
            if is_last {
                if append {
                    let obj = p.as_object_mut().ok_or_else(|| {
                        ConfigError::NotAnArray(format!("parent of '{key_path}' is not an object"))
                    })?;
                    let entry = obj.entry((*key).to_string()).or_insert_with(|| Value::Array(Vec::new()));
                    if !entry.is_array() {
                        return Err(ConfigError::NotAnArray(key_path.to_string()));
                    }
                    entry.as_array_mut().unwrap().push(value);
                } else {
                    let obj = p.as_object_mut().ok_or_else(|| {
                        ConfigError::NotAnArray(format!("parent of '{key_path}' is not an object"))
                    })?;
                    obj.insert((*key).to_string(), value);
                }
                return Ok(());
            }

            let obj = p.as_object_mut().ok_or_else(|| {
                ConfigError::NotAnArray(format!("parent of '{key_path}' is not an object"))
            })?;
            let needs_replace = !obj.get(*key).is_some_and(Value::is_object);
            if needs_replace {
                obj.insert((*key).to_string(), Value::Object(Default::default()));
            }
            p = obj.get_mut(*key).unwrap();
        }
        Ok(())
    }

    /// Removes the value at `key_path`. Returns `true` if something was
    /// removed.
    pub fn remove(&self, key_path: &str) -> ConfigResult<bool> {
        self.guard_reentrancy("remove")?;
        let keys = split_path(key_path);
        let removed = {
            let mut root = self.root.write();
            let mut p = &mut *root;
            let mut removed = false;
            for (idx, key) in keys.iter().enumerate() {
                let is_last = idx == keys.len() - 1;
                if is_last {
                    if let Some(obj) = p.as_object_mut() {
                        removed = obj.remove(*key).is_some();
                    }
                    break;
                }
                match p.as_object_mut().and_then(|obj| obj.get_mut(*key)) {
                    Some(next) => p = next,
                    None => break,
                }
            }
            removed
        };
        if removed {
            self.notify(ChangeEvent::ValueRemoved {
                path: key_path.to_string(),
            });
        }
        Ok(removed)
    }

    pub fn clear(&self) -> ConfigResult<()> {
        self.guard_reentrancy("clear")?;
        *self.root.write() = Value::Object(Default::default());
        self.notify(ChangeEvent::Cleared);
        Ok(())
    }

    /// Recursively merges `src` into the store's root, overwriting scalars
    /// and arrays but deep-merging nested objects
    pub fn merge(&self, src: &Value) -> ConfigResult<()> {
        self.guard_reentrancy("merge")?;
        fn merge_into(src: &Value, target: &mut Value) {
            let (Value::Object(src_map), Value::Object(target_map)) = (src, &mut *target) else {
                *target = src.clone();
                return;
            };
            for (key, value) in src_map {
                match (value.is_object(), target_map.get(key).map(Value::is_object)) {
                    (true, Some(true)) => merge_into(value, target_map.get_mut(key).unwrap()),
                    _ => {
                        target_map.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        merge_into(src, &mut self.root.write());
        self.notify(ChangeEvent::Merged);
        Ok(())
    }

    /// Rebuilds the tree by re-splitting every top-level key on `/` into
    /// nested objects (handles top-level keys that were inserted
    /// with embedded slashes, e.g. via [`Self::set`] against an empty store).
    pub fn tidy(&self) {
        let mut root = self.root.write();
        let Value::Object(map) = &*root else {
            return;
        };
        let mut rebuilt = Value::Object(Default::default());
        for (key, value) in map.clone() {
            let mut p = &mut rebuilt;
            let segments: Vec<&str> = key.split('/').collect();
            for segment in segments {
                let obj = p.as_object_mut().expect("rebuilt tree is always object-shaped");
                if !obj.contains_key(segment) {
                    obj.insert(segment.to_string(), Value::Object(Default::default()));
                }
                p = obj.get_mut(segment).unwrap();
            }
            *p = value;
        }
        *root = rebuilt;
        tracing::debug!("config store tidied");
    }

    // ── File I/O ────────────────────────────────────────────────────────

    pub fn load_from_file(&self, path: &Path) -> ConfigResult<()> {
        self.guard_reentrancy("load_from_file")?;
        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.to_path_buf()));
        }
        let content = fs::read_to_string(path)?;
        let is_json5 = matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("json5") | Some("vconf5")
        );
        let value: Value = if is_json5 {
            serde_json::from_str(&json5::convert_json5_to_json(&content)?)?
        } else {
            serde_json::from_str(&content)?
        };
        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("config")
            .to_string();
        self.root
            .write()
            .as_object_mut()
            .expect("root is always object-shaped")
            .insert(stem, value);
        self.notify(ChangeEvent::FileLoaded {
            path: path.display().to_string(),
        });
        tracing::info!(path = %path.display(), "config loaded from file");
        Ok(())
    }

    pub fn load_from_dir(&self, dir: &Path, recursive: bool) -> ConfigResult<()> {
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.is_dir() {
                if recursive {
                    self.load_from_dir(&path, true)?;
                }
                continue;
            }
            match path.extension().and_then(|e| e.to_str()) {
                Some("json") | Some("json5") | Some("vconf") | Some("vconf5") => {
                    if let Err(e) = self.load_from_file(&path) {
                        tracing::warn!(path = %path.display(), error = %e, "failed to load config file");
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    pub fn save(&self, path: &Path) -> ConfigResult<()> {
        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("config")
            .to_string();
        let value = self
            .root
            .read()
            .get(&stem)
            .cloned()
            .ok_or_else(|| ConfigError::KeyNotFound(stem.clone()))?;
        fs::write(path, serde_json::to_string_pretty(&value)?)?;
        self.notify(ChangeEvent::FileSaved {
            path: path.display().to_string(),
        });
        Ok(())
    }

    pub fn save_all(&self, dir: &Path) -> ConfigResult<()> {
        let entries: HashMap<String, Value> = match &*self.root.read() {
            Value::Object(map) => map.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            _ => HashMap::new(),
        };
        for (stem, value) in entries {
            let path = dir.join(format!("{stem}.json"));
            fs::write(&path, serde_json::to_string_pretty(&value)?)?;
            self.notify(ChangeEvent::FileSaved {
                path: path.display().to_string(),
            });
        }
        Ok(())
    }
}

impl Default for ConfigStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn set_and_get_nested_path() {
        let store = ConfigStore::new();
        store.set("camera/exposure/gain", json!(100)).unwrap();
        assert_eq!(store.get("camera/exposure/gain"), Some(json!(100)));
        assert!(store.has("camera/exposure/gain"));
        assert!(!store.has("camera/exposure/offset"));
    }

    #[test]
    fn append_creates_array_and_rejects_non_array() {
        let store = ConfigStore::new();
        store.append("filters", json!("L")).unwrap();
        store.append("filters", json!("R")).unwrap();
        assert_eq!(store.get("filters"), Some(json!(["L", "R"])));

        store.set("name", json!("vesper")).unwrap();
        let err = store.append("name", json!("x")).unwrap_err();
        assert!(matches!(err, ConfigError::NotAnArray(_)));
    }

    #[test]
    fn remove_reports_whether_anything_was_deleted() {
        let store = ConfigStore::new();
        store.set("a/b", json!(1)).unwrap();
        assert!(store.remove("a/b").unwrap());
        assert!(!store.remove("a/b").unwrap());
    }

    #[test]
    fn merge_deep_merges_objects_and_overwrites_scalars() {
        let store = ConfigStore::new();
        store.set("a", json!({"x": 1, "y": 2})).unwrap();
        store.merge(&json!({"a": {"y": 20, "z": 3}})).unwrap();
        assert_eq!(store.get("a"), Some(json!({"x": 1, "y": 20, "z": 3})));
    }

    #[test]
    fn get_keys_lists_every_leaf() {
        let store = ConfigStore::new();
        store.set("a/b", json!(1)).unwrap();
        store.set("a/c", json!(2)).unwrap();
        let mut keys = store.get_keys();
        keys.sort();
        assert_eq!(keys, vec!["/a/b".to_string(), "/a/c".to_string()]);
    }

    #[test]
    fn subscriber_receives_change_events() {
        let store = ConfigStore::new();
        let events = std::sync::Arc::new(parking_lot::Mutex::new(Vec::new()));
        let events_cloned = events.clone();
        store.subscribe("", move |event| {
            events_cloned.lock().push(format!("{event:?}"));
        });
        store.set("a", json!(1)).unwrap();
        store.clear().unwrap();
        let log = events.lock();
        assert_eq!(log.len(), 2);
        assert!(log[0].starts_with("ValueChanged"));
        assert!(log[1].starts_with("Cleared"));
    }

    #[test]
    fn subscriber_only_sees_events_under_its_prefix() {
        let store = ConfigStore::new();
        let events = std::sync::Arc::new(parking_lot::Mutex::new(Vec::new()));
        let events_cloned = events.clone();
        store.subscribe("site", move |event| {
            if let ChangeEvent::ValueChanged { path, .. } = event {
                events_cloned.lock().push(path.clone());
            }
        });
        store.set("site/latitude", json!(45.0)).unwrap();
        store.set("camera/gain", json!(100)).unwrap();
        store.set("site/longitude", json!(-75.0)).unwrap();
        assert_eq!(&*events.lock(), &["site/latitude", "site/longitude"]);
    }

    #[test]
    fn reentrant_mutation_from_subscriber_is_denied() {
        let store = std::sync::Arc::new(ConfigStore::new());
        let inner = store.clone();
        let result = std::sync::Arc::new(parking_lot::Mutex::new(None));
        let result_cloned = result.clone();
        store.subscribe("", move |_event| {
            *result_cloned.lock() = Some(inner.set("b", json!(1)));
        });
        store.set("a", json!(1)).unwrap();
        let captured = result.lock().take().unwrap();
        assert!(matches!(captured, Err(ConfigError::ReentrancyDenied(_))));
    }

    #[test]
    fn load_from_file_keys_by_stem() {
        let dir = tempfile::tempdir().unwrap();
        let file_path = dir.path().join("camera.json");
        fs::write(&file_path, r#"{"gain": 100}"#).unwrap();

        let store = ConfigStore::new();
        store.load_from_file(&file_path).unwrap();
        assert_eq!(store.get("camera/gain"), Some(json!(100)));
    }

    #[test]
    fn load_from_file_accepts_json5_comments_and_bare_keys() {
        let dir = tempfile::tempdir().unwrap();
        let file_path = dir.path().join("camera.json5");
        fs::write(
            &file_path,
            "{\n  // leading comment\n  gain: 100\n}",
        )
        .unwrap();

        let store = ConfigStore::new();
        store.load_from_file(&file_path).unwrap();
        assert_eq!(store.get("camera/gain"), Some(json!(100)));
    }

    #[test]
    fn save_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::new();
        store.set("camera", json!({"gain": 50})).unwrap();
        let path = dir.path().join("camera.json");
        store.save(&path).unwrap();

        let reloaded = ConfigStore::new();
        reloaded.load_from_file(&path).unwrap();
        assert_eq!(reloaded.get("camera/gain"), Some(json!(50)));
    }
}
