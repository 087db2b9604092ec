//! Error taxonomy for the pieces `vesper-runtime` owns on top of
//! `vesper-core`/`vesper-config`/`vesper-plugin`

use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Core(#[from] vesper_core::VesperError),

    #[error(transparent)]
    Config(#[from] vesper_config::ConfigError),

    #[error(transparent)]
    Plugin(#[from] vesper_plugin::PluginError),

    #[error("sequence I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("sequence (de)serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// `loadSequence` was called while the engine wasn't Idle
    #[error("cannot load a sequence while the engine is not idle")]
    NotIdle,

    /// The global timeout elapsed before the engine could start another
    /// Target
    #[error("global timeout elapsed after {elapsed_secs}s (limit {limit_secs}s)")]
    GlobalTimeoutElapsed { elapsed_secs: u64, limit_secs: u64 },
}

impl EngineError {
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::Core(e) => e.code(),
            EngineError::Config(_) => "ConfigError",
            EngineError::Plugin(_) => "PluginError",
            EngineError::Io(_) => "Io",
            EngineError::Json(_) => "Json",
            EngineError::NotIdle => "StatePrecondition",
            EngineError::GlobalTimeoutElapsed { .. } => "Timeout",
        }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
