//! Shared error taxonomy for the sequencer engine and its collaborators.
//!
//! Each error kind gets one variant here. The variant carries a
//! short machine-dispatchable code (`kind_code`) and a longer display string,
//! matching the `{"status":"error","error":{"code":...,"message":...}}` shape
//! the HTTP façade (an external collaborator) is expected to serialize.

use thiserror::Error;

/// One of the error kinds the engine and its collaborators can surface.
///
/// `Display` yields the short machine-dispatchable code; use
/// `VesperError::to_string()` for the longer human-facing message.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VesperError {
    /// A Task or command received a missing or mistyped parameter.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// An edge insertion would form a cycle in a dependency graph; refused.
    #[error("cyclic dependency: {0}")]
    CyclicDependency(String),

    /// A required device/plugin is not loaded or is disabled.
    #[error("resource unavailable: {0}")]
    ResourceUnavailable(String),

    /// A Task exceeded its configured duration, or the global timeout fired.
    #[error("timeout: {0}")]
    Timeout(String),

    /// A plugin reports an API version incompatible with the host.
    #[error("plugin API mismatch: {0}")]
    PluginApiMismatch(String),

    /// Plugin factory returned null or `initialize` returned false.
    #[error("plugin initialization failed: {0}")]
    PluginInitFailed(String),

    /// Propagated from a device driver or command handler; detail preserved.
    #[error("external failure: {0}")]
    ExternalFailure(String),

    /// Operation called in an incompatible engine/plugin state.
    #[error("state precondition violated: {0}")]
    StatePrecondition(String),

    /// A config subscriber attempted a mutating call from within its callback.
    #[error("reentrant mutation denied: {0}")]
    ReentrancyDenied(String),
}

impl VesperError {
    /// The short code suitable for machine dispatch (§7).
    pub fn code(&self) -> &'static str {
        match self {
            VesperError::InvalidParameter(_) => "InvalidParameter",
            VesperError::CyclicDependency(_) => "CyclicDependency",
            VesperError::ResourceUnavailable(_) => "ResourceUnavailable",
            VesperError::Timeout(_) => "Timeout",
            VesperError::PluginApiMismatch(_) => "PluginApiMismatch",
            VesperError::PluginInitFailed(_) => "PluginInitFailed",
            VesperError::ExternalFailure(_) => "ExternalFailure",
            VesperError::StatePrecondition(_) => "StatePrecondition",
            VesperError::ReentrancyDenied(_) => "ReentrancyDenied",
        }
    }

    /// Renders the `{"status":"error","error":{...}}` shape described in §7/§6
    /// for the (external) HTTP façade to forward verbatim.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "status": "error",
            "error": {
                "code": self.code(),
                "message": self.to_string(),
            }
        })
    }
}

pub type VesperResult<T> = Result<T, VesperError>;
