//! A small set of built-in [`TaskHandler`] implementations, registered by
//! default so a sequence can drive a mount/camera session without a third
//! party plugin providing every command.
//!
//! Each handler only validates its own parameters and forwards the rest to
//! whatever command the dispatcher has registered — a device plugin is still
//! the thing that actually moves a mount or reads out a sensor ("A
//! Task owns nothing external").

use std::time::Duration;

use serde_json::{json, Value};

use vesper_core::{CommandDispatch, TaskHandler, VesperError};

/// Calls `camera.expose` with `{duration_s, filter?, binning?}`.
pub struct CaptureExposureTask;

impl TaskHandler for CaptureExposureTask {
    fn task_name(&self) -> &str {
        "capture"
    }

    fn execute(&self, params: &Value, dispatch: &dyn CommandDispatch) -> Result<(), VesperError> {
        let duration_s = params
            .get("duration_s")
            .and_then(Value::as_f64)
            .ok_or_else(|| VesperError::InvalidParameter("capture requires 'duration_s'".into()))?;

        let mut payload = json!({
            "duration_s": duration_s,
            "filter": params.get("filter").cloned().unwrap_or(Value::Null),
            "binning": params.get("binning").cloned().unwrap_or(json!(1)),
        });
        dispatch.dispatch("camera.expose", &mut payload)
    }
}

/// Calls `mount.slew` with `{ra_hours, dec_deg}`.
pub struct SlewToTargetTask;

impl TaskHandler for SlewToTargetTask {
    fn task_name(&self) -> &str {
        "slew"
    }

    fn execute(&self, params: &Value, dispatch: &dyn CommandDispatch) -> Result<(), VesperError> {
        let ra_hours = params
            .get("ra_hours")
            .and_then(Value::as_f64)
            .ok_or_else(|| VesperError::InvalidParameter("slew requires 'ra_hours'".into()))?;
        let dec_deg = params
            .get("dec_deg")
            .and_then(Value::as_f64)
            .ok_or_else(|| VesperError::InvalidParameter("slew requires 'dec_deg'".into()))?;

        let mut payload = json!({ "ra_hours": ra_hours, "dec_deg": dec_deg });
        dispatch.dispatch("mount.slew", &mut payload)
    }
}

/// Calls `focuser.autofocus`, forwarding no parameters beyond whatever the
/// focuser plugin defaults to.
pub struct AutofocusTask;

impl TaskHandler for AutofocusTask {
    fn task_name(&self) -> &str {
        "autofocus"
    }

    fn execute(&self, _params: &Value, dispatch: &dyn CommandDispatch) -> Result<(), VesperError> {
        let mut payload = json!({});
        dispatch.dispatch("focuser.autofocus", &mut payload)
    }
}

/// Sleeps the engine thread for `duration_s` seconds. Dispatches nothing;
/// useful for cooldown/settle pauses between other tasks in a group.
pub struct WaitTask;

impl TaskHandler for WaitTask {
    fn task_name(&self) -> &str {
        "wait"
    }

    fn execute(&self, params: &Value, _dispatch: &dyn CommandDispatch) -> Result<(), VesperError> {
        let duration_s = params.get("duration_s").and_then(Value::as_f64).unwrap_or(0.0);
        if duration_s > 0.0 {
            std::thread::sleep(Duration::from_secs_f64(duration_s));
        }
        Ok(())
    }
}

/// Builds a [`vesper_core::TaskRegistry`] with every handler in this module
/// registered.
pub fn builtin_registry() -> vesper_core::TaskRegistry {
    let mut registry = vesper_core::TaskRegistry::new();
    registry.register(std::sync::Arc::new(CaptureExposureTask));
    registry.register(std::sync::Arc::new(SlewToTargetTask));
    registry.register(std::sync::Arc::new(AutofocusTask));
    registry.register(std::sync::Arc::new(WaitTask));
    registry
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct RecordingDispatch {
        calls: Mutex<Vec<(String, Value)>>,
    }

    impl CommandDispatch for RecordingDispatch {
        fn dispatch(&self, command_id: &str, payload: &mut Value) -> Result<(), VesperError> {
            self.calls.lock().unwrap().push((command_id.to_string(), payload.clone()));
            Ok(())
        }
    }

    #[test]
    fn capture_requires_duration() {
        let dispatch = RecordingDispatch { calls: Mutex::new(Vec::new()) };
        let err = CaptureExposureTask.execute(&json!({}), &dispatch).unwrap_err();
        assert_eq!(err.code(), "InvalidParameter");
    }

    #[test]
    fn capture_forwards_to_camera_expose() {
        let dispatch = RecordingDispatch { calls: Mutex::new(Vec::new()) };
        CaptureExposureTask
            .execute(&json!({"duration_s": 30.0, "filter": "L"}), &dispatch)
            .unwrap();
        let calls = dispatch.calls.lock().unwrap();
        assert_eq!(calls[0].0, "camera.expose");
        assert_eq!(calls[0].1["duration_s"], json!(30.0));
    }

    #[test]
    fn wait_with_zero_duration_returns_immediately() {
        let dispatch = RecordingDispatch { calls: Mutex::new(Vec::new()) };
        WaitTask.execute(&json!({"duration_s": 0.0}), &dispatch).unwrap();
        assert!(dispatch.calls.lock().unwrap().is_empty());
    }

    #[test]
    fn builtin_registry_contains_all_four_handlers() {
        let registry = builtin_registry();
        assert!(registry.get("capture").is_some());
        assert!(registry.get("slew").is_some());
        assert!(registry.get("autofocus").is_some());
        assert!(registry.get("wait").is_some());
    }
}
