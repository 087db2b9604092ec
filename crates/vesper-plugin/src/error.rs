//! Plugin loading/lifecycle error taxonomy.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PluginError {
    #[error("plugin file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("invalid plugin: {0}")]
    InvalidPlugin(String),

    #[error("plugin API version mismatch: host={host}, plugin={plugin}")]
    ApiVersionMismatch { host: u32, plugin: u32 },

    #[error("missing dependency '{0}'")]
    DependencyMissing(String),

    #[error("plugin initialization failed: {0}")]
    InitializationFailed(String),

    #[error("plugin '{0}' is already loaded")]
    AlreadyLoaded(String),

    #[error("failed to load plugin: {0}")]
    LoadFailed(#[from] libloading::Error),

    #[error("symbol not found: {0}")]
    SymbolNotFound(String),

    #[error("plugin '{0}' is in use by other loaded plugins")]
    InUse(String),

    #[error("cyclic plugin dependency detected at '{0}'")]
    CyclicDependency(String),

    #[error("no such plugin: {0}")]
    NotFound(String),

    #[error("command id '{0}' is already registered")]
    AlreadyRegistered(String),

    #[error("command handler '{0}' panicked: {1}")]
    HandlerPanicked(String, String),

    #[error("plugin is disabled: {0}")]
    PluginDisabled(String),

    #[error("no such plugin group: {0}")]
    GroupNotFound(String),

    #[error("plugin I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("plugin configuration (de)serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type PluginResult<T> = Result<T, PluginError>;
