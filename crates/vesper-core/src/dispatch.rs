//! The seam between `Task`/`Target` execution and command dispatch.
//!
//! `vesper-core` does not depend on `vesper-plugin` — it only needs *some*
//! JSON-in/JSON-out dispatch target for a Task's side effects ("A
//! Task owns nothing external — ... emits side effects via the
//! CommandDispatcher."). `vesper-plugin::CommandDispatcher` implements this
//! trait; tests use a closure-backed stub.

use serde_json::Value;

use crate::error::VesperError;

/// Minimal dispatch seam a [`crate::task::Task`] handler uses to reach a
/// named command (device operation, plugin action, …) with a JSON payload
/// that carries both inputs and outputs.
pub trait CommandDispatch: Send + Sync {
    fn dispatch(&self, command_id: &str, payload: &mut Value) -> Result<(), VesperError>;
}

/// A handler for one concrete task type ("Each concrete Task type
/// is a subclass with a static `taskName()` and an `execute(params)` method").
///
/// Implementations must not assume any persistent state between invocations.
pub trait TaskHandler: Send + Sync {
    /// The `task_name` this handler answers to.
    fn task_name(&self) -> &str;

    /// Executes the task body with its resolved parameters. Returning `Err`
    /// transitions the owning Task to `Failed` with the error's kind/detail.
    fn execute(&self, params: &Value, dispatch: &dyn CommandDispatch) -> Result<(), VesperError>;
}

#[cfg(test)]
pub(crate) struct NoopDispatch;

#[cfg(test)]
impl CommandDispatch for NoopDispatch {
    fn dispatch(&self, _command_id: &str, _payload: &mut Value) -> Result<(), VesperError> {
        Ok(())
    }
}
