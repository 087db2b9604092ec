//! Loads a single plugin dylib via `libloading`, checking the exported ABI
//! version before handing back a boxed [`Plugin`].
//!
//! Grounded on the shared-library loading pattern used by real native-plugin
//! hosts in the Rust ecosystem: `Library::new`, a versioned symbol lookup,
//! and a `Drop` impl that calls the plugin's destroy hook before the library
//! itself is unmapped.

use std::path::{Path, PathBuf};

use libloading::{Library, Symbol};

use crate::abi::{
    AbiVersionFn, CreatePluginFn, DestroyPluginFn, Plugin, PLUGIN_ABI_VERSION, SYMBOL_ABI_VERSION,
    SYMBOL_CREATE, SYMBOL_DESTROY,
};
use crate::error::{PluginError, PluginResult};

/// An open dylib plus the live plugin instance it produced. The `Library`
/// must outlive `plugin` — it is declared after it so drop order unloads the
/// plugin before unmapping the library (Rust drops fields in declaration
/// order).
pub struct LoadedLibrary {
    pub path: PathBuf,
    plugin: Option<Box<dyn Plugin>>,
    destroy: Option<DestroyPluginFn>,
    _library: Library,
}

impl LoadedLibrary {
    /// Loads `path`, checks its ABI version against [`PLUGIN_ABI_VERSION`]
    /// if the plugin exports one, and instantiates the plugin via its
    /// required `create` symbol.
    pub fn open(path: &Path) -> PluginResult<Self> {
        if !path.exists() {
            return Err(PluginError::FileNotFound(path.to_path_buf()));
        }

        // SAFETY: the caller is trusted to point us at a plugin dylib built
        // against this host's ABI; the version check below is the only
        // defense we have against a mismatched build.
        let library = unsafe { Library::new(path) }?;

        // The version symbol is optional: absence means "assume compatible".
        let abi_version: Option<u32> = unsafe {
            library
                .get::<AbiVersionFn>(SYMBOL_ABI_VERSION)
                .ok()
                .map(|symbol: Symbol<AbiVersionFn>| symbol())
        };
        if let Some(abi_version) = abi_version {
            if abi_version != PLUGIN_ABI_VERSION {
                return Err(PluginError::ApiVersionMismatch {
                    host: PLUGIN_ABI_VERSION,
                    plugin: abi_version,
                });
            }
        }

        let create: CreatePluginFn = unsafe {
            let symbol: Symbol<CreatePluginFn> = library
                .get(SYMBOL_CREATE)
                .map_err(|_| PluginError::SymbolNotFound(String::from_utf8_lossy(SYMBOL_CREATE).into_owned()))?;
            *symbol
        };
        // The destroy symbol is optional: absence falls back to the default
        // deleter (`Box::from_raw` dropped in place).
        let destroy: Option<DestroyPluginFn> = unsafe {
            library
                .get::<DestroyPluginFn>(SYMBOL_DESTROY)
                .ok()
                .map(|symbol: Symbol<DestroyPluginFn>| *symbol)
        };

        let raw = unsafe { create() };
        if raw.is_null() {
            return Err(PluginError::InitializationFailed(
                "plugin factory returned a null pointer".into(),
            ));
        }
        let plugin = unsafe { Box::from_raw(raw) };

        tracing::info!(path = %path.display(), "plugin library loaded");

        Ok(Self {
            path: path.to_path_buf(),
            plugin: Some(plugin),
            destroy,
            _library: library,
        })
    }

    pub fn plugin(&self) -> &dyn Plugin {
        self.plugin.as_deref().expect("plugin taken before drop")
    }

    pub fn plugin_mut(&mut self) -> &mut (dyn Plugin + 'static) {
        self.plugin.as_deref_mut().expect("plugin taken before drop")
    }
}

impl Drop for LoadedLibrary {
    fn drop(&mut self) {
        if let Some(plugin) = self.plugin.take() {
            let raw = Box::into_raw(plugin);
            match self.destroy {
                // SAFETY: `raw` was produced by this same library's `create`
                // symbol and has not been freed yet.
                Some(destroy) => unsafe { destroy(raw) },
                // Default deleter: the library exported no `destroy` symbol,
                // so the plugin is an ordinary heap allocation we can drop
                // with the host's own allocator.
                // SAFETY: same as above; `Box::from_raw` runs the plugin's
                // `Drop` impl and frees the allocation.
                None => drop(unsafe { Box::from_raw(raw) }),
            }
        }
    }
}
