//! `Task` — a single unit of work inside a [`Target`](crate::target::Target).
//!
//! A Task owns its parameter schema, status machine, timing/resource
//! samples, and a bounded transition history. It owns nothing external —
//! side effects happen through the `CommandDispatcher` that `vesper-plugin`
//! provides.

use std::collections::VecDeque;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::VesperError;

/// Default capacity of a [`Task`]'s status-transition ring buffer.
pub const DEFAULT_HISTORY_CAPACITY: usize = 32;

/// Declared type of a task parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    Int,
    Float,
    Bool,
    String,
    Json,
}

impl ParamType {
    /// Whether `value` is type-correct for this declared parameter type.
    pub fn matches(&self, value: &Value) -> bool {
        match self {
            ParamType::Int => value.is_i64() || value.is_u64(),
            ParamType::Float => value.is_f64() || value.is_i64() || value.is_u64(),
            ParamType::Bool => value.is_boolean(),
            ParamType::String => value.is_string(),
            ParamType::Json => true,
        }
    }
}

/// One entry in a Task's ordered parameter schema
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParamSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub param_type: ParamType,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub default: Option<Value>,
    #[serde(default)]
    pub description: String,
}

impl ParamSpec {
    pub fn new(name: impl Into<String>, param_type: ParamType) -> Self {
        Self {
            name: name.into(),
            param_type,
            required: false,
            default: None,
            description: String::new(),
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_default(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }
}

/// Task lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskStatus {
    Pending,
    Ready,
    Running,
    Completed,
    Failed,
    Skipped,
}

/// One recorded status transition, with the timestamp it happened at.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusTransition {
    pub from: TaskStatus,
    pub to: TaskStatus,
    pub at: DateTime<Utc>,
}

/// A single unit of work.
///
/// Identified by UUID and a human name; carries a type tag (`task_name`)
/// identifying its handler, a parameter schema, status, error detail, timing
/// and resource samples, and a bounded transition history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub uuid: Uuid,
    pub name: String,
    /// Type tag identifying the handler this task invokes (e.g. `"capture"`).
    pub task_name: String,
    pub schema: Vec<ParamSpec>,
    pub status: TaskStatus,
    pub error_kind: Option<String>,
    pub error_detail: Option<String>,
    pub duration: Option<Duration>,
    pub memory_samples: Vec<u64>,
    pub cpu_samples: Vec<f64>,
    #[serde(default = "default_history_capacity")]
    history_capacity: usize,
    history: VecDeque<StatusTransition>,
}

fn default_history_capacity() -> usize {
    DEFAULT_HISTORY_CAPACITY
}

impl Task {
    pub fn new(name: impl Into<String>, task_name: impl Into<String>) -> Self {
        Self {
            uuid: Uuid::new_v4(),
            name: name.into(),
            task_name: task_name.into(),
            schema: Vec::new(),
            status: TaskStatus::Pending,
            error_kind: None,
            error_detail: None,
            duration: None,
            memory_samples: Vec::new(),
            cpu_samples: Vec::new(),
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            history: VecDeque::new(),
        }
    }

    pub fn with_schema(mut self, schema: Vec<ParamSpec>) -> Self {
        self.schema = schema;
        self
    }

    pub fn with_history_capacity(mut self, capacity: usize) -> Self {
        self.history_capacity = capacity.max(1);
        self
    }

    /// Bounded history of past status transitions, oldest first.
    pub fn history(&self) -> &VecDeque<StatusTransition> {
        &self.history
    }

    /// Transitions to `to`, recording the transition in the bounded history.
    pub fn transition(&mut self, to: TaskStatus) {
        let from = self.status;
        self.status = to;
        if self.history.len() == self.history_capacity {
            self.history.pop_front();
        }
        self.history.push_back(StatusTransition {
            from,
            to,
            at: Utc::now(),
        });
        tracing::debug!(task = %self.name, uuid = %self.uuid, ?from, ?to, "task status transition");
    }

    pub fn fail(&mut self, kind: &VesperError, detail: impl Into<String>) {
        self.error_kind = Some(kind.code().to_string());
        self.error_detail = Some(detail.into());
        self.transition(TaskStatus::Failed);
    }

    /// Validates `params` (task-specific, already merged with the Target bag
    /// and schema defaults per §4.6) against [`Self::schema`].
    ///
    /// Every required parameter must be present and type-correct; on
    /// violation returns `InvalidParameter` and the caller is expected to
    /// transition the task to `Failed`
    pub fn validate_params(&self, params: &Value) -> Result<(), VesperError> {
        let obj = params.as_object();
        for spec in &self.schema {
            let value = obj.and_then(|o| o.get(&spec.name)).or(spec.default.as_ref());
            match value {
                None if spec.required => {
                    return Err(VesperError::InvalidParameter(format!(
                        "missing required parameter '{}'",
                        spec.name
                    )));
                }
                None => continue,
                Some(v) => {
                    if !spec.param_type.matches(v) {
                        return Err(VesperError::InvalidParameter(format!(
                            "parameter '{}' expected {:?}, got {v}",
                            spec.name, spec.param_type
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    /// Resolves the effective value of parameter `name`, applying the
    /// precedence rule from §4.6: task-specific override, then Target bag,
    /// then schema default.
    pub fn resolve_param<'a>(
        &'a self,
        name: &str,
        task_params: Option<&'a Value>,
        target_bag: &'a Value,
    ) -> Option<&'a Value> {
        if let Some(v) = task_params.and_then(|p| p.get(name)) {
            return Some(v);
        }
        if let Some(v) = target_bag.get(name) {
            return Some(v);
        }
        self.schema
            .iter()
            .find(|s| s.name == name)
            .and_then(|s| s.default.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validates_required_parameter_presence() {
        let task = Task::new("expose", "capture")
            .with_schema(vec![ParamSpec::new("duration", ParamType::Float).required()]);
        assert!(task.validate_params(&serde_json::json!({})).is_err());
        assert!(
            task.validate_params(&serde_json::json!({"duration": 30.0}))
                .is_ok()
        );
    }

    #[test]
    fn validates_parameter_type() {
        let task = Task::new("expose", "capture")
            .with_schema(vec![ParamSpec::new("duration", ParamType::Float).required()]);
        let err = task
            .validate_params(&serde_json::json!({"duration": "oops"}))
            .unwrap_err();
        assert_eq!(err.code(), "InvalidParameter");
    }

    #[test]
    fn resolves_param_precedence_task_then_target_then_default() {
        let task = Task::new("expose", "capture").with_schema(vec![
            ParamSpec::new("filter", ParamType::String).with_default(serde_json::json!("L")),
        ]);
        let bag = serde_json::json!({"filter": "R"});
        assert_eq!(
            task.resolve_param("filter", None, &bag).unwrap(),
            &serde_json::json!("R")
        );
        let task_params = serde_json::json!({"filter": "G"});
        assert_eq!(
            task.resolve_param("filter", Some(&task_params), &bag)
                .unwrap(),
            &serde_json::json!("G")
        );
        let empty_bag = serde_json::json!({});
        assert_eq!(
            task.resolve_param("filter", None, &empty_bag).unwrap(),
            &serde_json::json!("L")
        );
    }

    #[test]
    fn history_is_bounded() {
        let mut task = Task::new("t", "noop").with_history_capacity(2);
        task.transition(TaskStatus::Ready);
        task.transition(TaskStatus::Running);
        task.transition(TaskStatus::Completed);
        assert_eq!(task.history().len(), 2);
        assert_eq!(task.history().front().unwrap().to, TaskStatus::Running);
    }
}
