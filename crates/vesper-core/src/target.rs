//! `Target` — an ordered group of [`Task`]s sharing astronomical context and
//! a parameter bag

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::astro_context::AstroContext;
use crate::dispatch::CommandDispatch;
use crate::error::VesperError;
use crate::registry::TaskRegistry;
use crate::task::{Task, TaskStatus};

/// Target lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TargetStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Skipped,
}

type StartCallback = Box<dyn Fn(&str) + Send + Sync>;
type EndCallback = Box<dyn Fn(&str, TargetStatus) + Send + Sync>;
type ErrorCallback = Box<dyn Fn(&str, &VesperError) + Send + Sync>;

#[derive(Default)]
struct Callbacks {
    on_start: Option<StartCallback>,
    on_end: Option<EndCallback>,
    on_error: Option<ErrorCallback>,
}

/// An ordered group of Tasks sharing astronomical context and a parameter
/// bag. Internals are split into reader-writer locks separated by concern
/// (tasks, params, groups, deps, astro, callbacks), to reduce contention
/// between the executing thread and observers (progress polling, UI
/// snapshots).
pub struct Target {
    pub uuid: Uuid,
    name: String,
    status: RwLock<TargetStatus>,
    enabled: RwLock<bool>,
    cooldown: RwLock<Duration>,
    max_retries: RwLock<u32>,
    retry_count: RwLock<u32>,
    /// Numeric priority used by the `Priority` scheduling strategy (spec
    /// §4.7): higher runs first, descending, ties broken by original
    /// position.
    priority: RwLock<i64>,

    tasks: RwLock<Vec<Task>>,
    params: RwLock<Value>,
    /// Per-task parameter overrides, keyed by task UUID
    task_params: RwLock<HashMap<Uuid, Value>>,
    /// Group name -> ordered task UUIDs, insertion order preserved.
    task_groups: RwLock<Vec<(String, Vec<Uuid>)>>,
    /// Task UUID -> set of task UUIDs that must be Completed first.
    task_deps: RwLock<HashMap<Uuid, HashSet<Uuid>>>,
    astro: RwLock<Option<AstroContext>>,
    callbacks: RwLock<Callbacks>,
}

impl Target {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_uuid(Uuid::new_v4(), name)
    }

    /// Builds a Target with a caller-supplied identity, used by
    /// `loadSequence` to restore a persisted target's uuid.
    pub fn with_uuid(uuid: Uuid, name: impl Into<String>) -> Self {
        Self {
            uuid,
            name: name.into(),
            status: RwLock::new(TargetStatus::Pending),
            enabled: RwLock::new(true),
            cooldown: RwLock::new(Duration::ZERO),
            max_retries: RwLock::new(0),
            retry_count: RwLock::new(0),
            priority: RwLock::new(0),
            tasks: RwLock::new(Vec::new()),
            params: RwLock::new(Value::Object(Default::default())),
            task_params: RwLock::new(HashMap::new()),
            task_groups: RwLock::new(Vec::new()),
            task_deps: RwLock::new(HashMap::new()),
            astro: RwLock::new(None),
            callbacks: RwLock::new(Callbacks::default()),
        }
    }

    pub fn name(&self) -> String {
        self.name.clone()
    }

    pub fn status(&self) -> TargetStatus {
        *self.status.read()
    }

    fn set_status(&self, status: TargetStatus) {
        *self.status.write() = status;
        tracing::info!(target = %self.name, ?status, "target status transition");
    }

    /// Restores a persisted status directly, bypassing the transition log
    /// (used by `loadSequence`; a freshly-loaded target isn't "transitioning"
    /// so much as resuming).
    pub fn restore_status(&self, status: TargetStatus) {
        *self.status.write() = status;
    }

    /// Restores a persisted retry counter
    pub fn restore_retry_count(&self, count: u32) {
        *self.retry_count.write() = count;
    }

    pub fn is_enabled(&self) -> bool {
        *self.enabled.read()
    }

    pub fn set_enabled(&self, enabled: bool) {
        *self.enabled.write() = enabled;
    }

    pub fn cooldown(&self) -> Duration {
        *self.cooldown.read()
    }

    pub fn set_cooldown(&self, cooldown: Duration) {
        *self.cooldown.write() = cooldown;
    }

    pub fn max_retries(&self) -> u32 {
        *self.max_retries.read()
    }

    pub fn set_max_retries(&self, retries: u32) {
        *self.max_retries.write() = retries;
    }

    pub fn retry_count(&self) -> u32 {
        *self.retry_count.read()
    }

    pub fn priority(&self) -> i64 {
        *self.priority.read()
    }

    pub fn set_priority(&self, priority: i64) {
        *self.priority.write() = priority;
    }

    /// Resets status to `Pending` and bumps the retry counter; returns
    /// `false` once `max_retries` has been exhausted.
    pub fn retry(&self) -> bool {
        let mut count = self.retry_count.write();
        if *count >= self.max_retries() {
            return false;
        }
        *count += 1;
        drop(count);
        self.set_status(TargetStatus::Pending);
        true
    }

    // ── Parameter bag ──────────────────────────────────────────────────

    pub fn params(&self) -> Value {
        self.params.read().clone()
    }

    pub fn set_params(&self, params: Value) {
        *self.params.write() = params;
    }

    pub fn set_task_param(&self, task_uuid: Uuid, value: Value) {
        self.task_params.write().insert(task_uuid, value);
    }

    pub fn task_param(&self, task_uuid: Uuid) -> Option<Value> {
        self.task_params.read().get(&task_uuid).cloned()
    }

    // ── Tasks ───────────────────────────────────────────────────────────

    pub fn add_task(&self, task: Task) -> Uuid {
        let uuid = task.uuid;
        self.tasks.write().push(task);
        uuid
    }

    pub fn task_count(&self) -> usize {
        self.tasks.read().len()
    }

    /// A full snapshot of this Target's tasks, in declaration order, for
    /// persistence.
    pub fn tasks(&self) -> Vec<Task> {
        self.tasks.read().clone()
    }

    /// Replaces all tasks wholesale, used by `loadSequence` to restore a
    /// persisted `tasks` array.
    pub fn set_tasks(&self, tasks: Vec<Task>) {
        *self.tasks.write() = tasks;
    }

    pub fn task_uuids(&self) -> Vec<Uuid> {
        self.tasks.read().iter().map(|t| t.uuid).collect()
    }

    /// Snapshot of a task's current status.
    pub fn task_status(&self, uuid: Uuid) -> Option<TaskStatus> {
        self.tasks.read().iter().find(|t| t.uuid == uuid).map(|t| t.status)
    }

    /// `100 * (completed + skipped) / total`, within floating-point
    /// tolerance; `100.0` when there are no tasks
    pub fn progress(&self) -> f64 {
        let tasks = self.tasks.read();
        if tasks.is_empty() {
            return 100.0;
        }
        let done = tasks
            .iter()
            .filter(|t| matches!(t.status, TaskStatus::Completed | TaskStatus::Skipped))
            .count();
        100.0 * done as f64 / tasks.len() as f64
    }

    // ── Groups ──────────────────────────────────────────────────────────

    pub fn create_group(&self, group: impl Into<String>) {
        let group = group.into();
        let mut groups = self.task_groups.write();
        if !groups.iter().any(|(g, _)| *g == group) {
            groups.push((group, Vec::new()));
        }
    }

    pub fn add_task_to_group(&self, group: &str, task_uuid: Uuid) {
        let mut groups = self.task_groups.write();
        if let Some((_, members)) = groups.iter_mut().find(|(g, _)| g == group) {
            if !members.contains(&task_uuid) {
                members.push(task_uuid);
            }
        }
    }

    /// Snapshot of group name -> ordered task UUIDs, for persistence (spec
    /// §6 `taskGroups`).
    pub fn task_groups_snapshot(&self) -> Vec<(String, Vec<Uuid>)> {
        self.task_groups.read().clone()
    }

    /// Restores a persisted `taskGroups` object wholesale.
    pub fn set_task_groups(&self, groups: Vec<(String, Vec<Uuid>)>) {
        *self.task_groups.write() = groups;
    }

    fn task_group_of(&self, task_uuid: Uuid) -> bool {
        self.task_groups
            .read()
            .iter()
            .any(|(_, members)| members.contains(&task_uuid))
    }

    // ── Dependencies ──────────────────────────────────────────────────

    pub fn add_task_dependency(&self, task_uuid: Uuid, depends_on: Uuid) {
        self.task_deps.write().entry(task_uuid).or_default().insert(depends_on);
    }

    pub fn dependencies_of(&self, task_uuid: Uuid) -> HashSet<Uuid> {
        self.task_deps.read().get(&task_uuid).cloned().unwrap_or_default()
    }

    /// Snapshot of the full task-dependency map, for persistence.
    pub fn task_dependencies_snapshot(&self) -> HashMap<Uuid, HashSet<Uuid>> {
        self.task_deps.read().clone()
    }

    /// Restores a persisted `taskDependencies` object wholesale.
    pub fn set_task_dependencies(&self, deps: HashMap<Uuid, HashSet<Uuid>>) {
        *self.task_deps.write() = deps;
    }

    fn deps_satisfied(&self, task_uuid: Uuid, tasks: &[Task]) -> bool {
        let deps = self.task_deps.read();
        let Some(deps) = deps.get(&task_uuid) else {
            return true;
        };
        deps.iter().all(|dep| {
            tasks
                .iter()
                .find(|t| t.uuid == *dep)
                .map(|t| t.status == TaskStatus::Completed)
                .unwrap_or(false)
        })
    }

    // ── Astro context ────────────────────────────────────────────────

    pub fn set_astro_context(&self, ctx: AstroContext) {
        *self.astro.write() = Some(ctx);
    }

    /// Clone of the current astro context, for persistence: astro config,
    /// observability window, current alt/az, and meridian-flip info.
    pub fn astro_snapshot(&self) -> Option<AstroContext> {
        self.astro.read().clone()
    }

    pub fn with_astro_context<R>(&self, f: impl FnOnce(&AstroContext) -> R) -> Option<R> {
        self.astro.read().as_ref().map(f)
    }

    pub fn with_astro_context_mut<R>(&self, f: impl FnOnce(&mut AstroContext) -> R) -> Option<R> {
        self.astro.write().as_mut().map(f)
    }

    // ── Callbacks ───────────────────────────────────────────────────────

    pub fn on_start(&self, cb: impl Fn(&str) + Send + Sync + 'static) {
        self.callbacks.write().on_start = Some(Box::new(cb));
    }

    pub fn on_end(&self, cb: impl Fn(&str, TargetStatus) + Send + Sync + 'static) {
        self.callbacks.write().on_end = Some(Box::new(cb));
    }

    pub fn on_error(&self, cb: impl Fn(&str, &VesperError) + Send + Sync + 'static) {
        self.callbacks.write().on_error = Some(Box::new(cb));
    }

    fn notify_start(&self) {
        if let Some(cb) = self.callbacks.read().on_start.as_ref() {
            cb(&self.name);
        }
    }

    fn notify_end(&self, status: TargetStatus) {
        if let Some(cb) = self.callbacks.read().on_end.as_ref() {
            cb(&self.name, status);
        }
    }

    /// Transitions a `Failed` target to `Skipped` after the scheduling loop
    /// has decided (via [`crate::sequence::Sequence::handle_failure`]) not
    /// to retry or run an alternative
    pub fn mark_skipped(&self) {
        self.set_status(TargetStatus::Skipped);
        self.notify_end(TargetStatus::Skipped);
    }

    fn notify_error(&self, err: &VesperError) {
        if let Some(cb) = self.callbacks.read().on_error.as_ref() {
            cb(&self.name, err);
        }
    }

    // ── Execution ────────────────────────────────────────

    /// Runs this Target's tasks to completion following the five-step
    /// execution order below, returning the final [`TargetStatus`].
    ///
    /// Steps 1-2: skip entirely (and emit `OnEnd`) if disabled; otherwise
    /// transition to `InProgress` and emit `OnStart`.
    /// Step 3: run ungrouped, dependency-satisfied tasks in insertion order.
    /// Step 4: on no prior failure, run each group's tasks in insertion
    /// order, respecting the same dependency map.
    /// Step 5: emit `OnEnd` with the final status.
    pub fn execute(&self, registry: &TaskRegistry, dispatch: &dyn CommandDispatch) -> TargetStatus {
        if !self.is_enabled() {
            self.set_status(TargetStatus::Skipped);
            self.notify_end(TargetStatus::Skipped);
            return TargetStatus::Skipped;
        }

        self.set_status(TargetStatus::InProgress);
        self.notify_start();

        let mut failed = false;

        // Step 3: ungrouped tasks, insertion order.
        let ungrouped_uuids: Vec<Uuid> = {
            let tasks = self.tasks.read();
            tasks
                .iter()
                .map(|t| t.uuid)
                .filter(|u| !self.task_group_of(*u))
                .collect()
        };
        for uuid in ungrouped_uuids {
            if !self.run_eligible_task(uuid, registry, dispatch) {
                failed = true;
                break;
            }
        }

        // Step 4: groups, insertion order, only if no prior failure.
        if !failed {
            let groups: Vec<(String, Vec<Uuid>)> = self.task_groups.read().clone();
            'groups: for (_group, members) in groups {
                for uuid in members {
                    if !self.run_eligible_task(uuid, registry, dispatch) {
                        failed = true;
                        break 'groups;
                    }
                }
            }
        }

        let final_status = if failed {
            TargetStatus::Failed
        } else {
            TargetStatus::Completed
        };
        self.set_status(final_status);
        self.notify_end(final_status);
        final_status
    }

    /// Runs a single task if its dependencies are satisfied (tasks gated by
    /// an unmet dependency are left `Pending`, not executed and not counted
    /// as a failure). Returns `false` if the task ran and failed.
    fn run_eligible_task(
        &self,
        uuid: Uuid,
        registry: &TaskRegistry,
        dispatch: &dyn CommandDispatch,
    ) -> bool {
        let satisfied = {
            let tasks = self.tasks.read();
            self.deps_satisfied(uuid, &tasks)
        };
        if !satisfied {
            return true;
        }

        let params = {
            let tasks = self.tasks.read();
            let Some(task) = tasks.iter().find(|t| t.uuid == uuid) else {
                return true;
            };
            let bag = self.params();
            let task_override = self.task_param(uuid);
            let mut merged = bag.clone();
            if let Some(obj) = merged.as_object_mut() {
                if let Some(over) = task_override.as_ref().and_then(|v| v.as_object()) {
                    for (k, v) in over {
                        obj.insert(k.clone(), v.clone());
                    }
                }
                for spec in &task.schema {
                    if !obj.contains_key(&spec.name) {
                        if let Some(default) = &spec.default {
                            obj.insert(spec.name.clone(), default.clone());
                        }
                    }
                }
            }
            merged
        };

        let validation = {
            let tasks = self.tasks.read();
            tasks
                .iter()
                .find(|t| t.uuid == uuid)
                .map(|t| t.validate_params(&params))
        };

        let Some(validation) = validation else {
            return true;
        };

        if let Err(e) = validation {
            self.finish_task(uuid, Err(e.clone()), None);
            self.notify_error(&e);
            return false;
        }

        let task_name = {
            let tasks = self.tasks.read();
            tasks.iter().find(|t| t.uuid == uuid).map(|t| t.task_name.clone())
        };
        let Some(task_name) = task_name else {
            return true;
        };

        {
            let mut tasks = self.tasks.write();
            if let Some(task) = tasks.iter_mut().find(|t| t.uuid == uuid) {
                task.transition(TaskStatus::Running);
            }
        }

        let started = Instant::now();
        let result = match registry.get(&task_name) {
            Some(handler) => handler.execute(&params, dispatch),
            None => Err(VesperError::ResourceUnavailable(format!(
                "no task handler registered for '{task_name}'"
            ))),
        };
        let elapsed = started.elapsed();

        let ok = result.is_ok();
        if let Err(e) = &result {
            self.notify_error(e);
        }
        self.finish_task(uuid, result, Some(elapsed));

        if ok && task_name == "capture" {
            self.with_astro_context_mut(|ctx| ctx.record_capture());
        }

        ok
    }

    fn finish_task(&self, uuid: Uuid, result: Result<(), VesperError>, elapsed: Option<Duration>) {
        let mut tasks = self.tasks.write();
        if let Some(task) = tasks.iter_mut().find(|t| t.uuid == uuid) {
            task.duration = elapsed;
            match result {
                Ok(()) => task.transition(TaskStatus::Completed),
                Err(e) => task.fail(&e, e.to_string()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::NoopDispatch;
    use crate::task::ParamSpec;
    use crate::task::ParamType;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingHandler {
        name: &'static str,
        counter: Arc<AtomicUsize>,
        fail: bool,
    }

    impl crate::dispatch::TaskHandler for CountingHandler {
        fn task_name(&self) -> &str {
            self.name
        }
        fn execute(&self, _params: &Value, _d: &dyn CommandDispatch) -> Result<(), VesperError> {
            self.counter.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(VesperError::ExternalFailure("boom".into()))
            } else {
                Ok(())
            }
        }
    }

    fn registry_with(handlers: Vec<Arc<dyn crate::dispatch::TaskHandler>>) -> TaskRegistry {
        let mut r = TaskRegistry::new();
        for h in handlers {
            r.register(h);
        }
        r
    }

    #[test]
    fn disabled_target_is_skipped_without_running_tasks() {
        let counter = Arc::new(AtomicUsize::new(0));
        let target = Target::new("t");
        target.set_enabled(false);
        target.add_task(Task::new("a", "count"));
        let registry = registry_with(vec![Arc::new(CountingHandler {
            name: "count",
            counter: counter.clone(),
            fail: false,
        })]);
        let status = target.execute(&registry, &NoopDispatch);
        assert_eq!(status, TargetStatus::Skipped);
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn runs_tasks_in_order_and_completes() {
        let counter = Arc::new(AtomicUsize::new(0));
        let target = Target::new("t");
        target.add_task(Task::new("a", "count"));
        target.add_task(Task::new("b", "count"));
        let registry = registry_with(vec![Arc::new(CountingHandler {
            name: "count",
            counter: counter.clone(),
            fail: false,
        })]);
        let status = target.execute(&registry, &NoopDispatch);
        assert_eq!(status, TargetStatus::Completed);
        assert_eq!(counter.load(Ordering::SeqCst), 2);
        assert_eq!(target.progress(), 100.0);
    }

    #[test]
    fn failing_task_fails_target_and_stops_main_pass() {
        let counter = Arc::new(AtomicUsize::new(0));
        let target = Target::new("t");
        target.add_task(Task::new("a", "fail"));
        target.add_task(Task::new("b", "fail"));
        let registry = registry_with(vec![Arc::new(CountingHandler {
            name: "fail",
            counter: counter.clone(),
            fail: true,
        })]);
        let status = target.execute(&registry, &NoopDispatch);
        assert_eq!(status, TargetStatus::Failed);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn dependency_gates_group_execution() {
        let counter = Arc::new(AtomicUsize::new(0));
        let target = Target::new("t");
        let a = target.add_task(Task::new("a", "count"));
        let b = target.add_task(
            Task::new("b", "count").with_schema(vec![ParamSpec::new("x", ParamType::Int)]),
        );
        target.add_task_dependency(b, a);
        let registry = registry_with(vec![Arc::new(CountingHandler {
            name: "count",
            counter: counter.clone(),
            fail: false,
        })]);
        let status = target.execute(&registry, &NoopDispatch);
        assert_eq!(status, TargetStatus::Completed);
        assert_eq!(counter.load(Ordering::SeqCst), 2);
        assert_eq!(target.task_status(b), Some(TaskStatus::Completed));
    }

    #[test]
    fn ungrouped_tasks_run_before_groups() {
        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));

        struct Recorder {
            name: &'static str,
            order: Arc<parking_lot::Mutex<Vec<&'static str>>>,
        }
        impl crate::dispatch::TaskHandler for Recorder {
            fn task_name(&self) -> &str {
                self.name
            }
            fn execute(&self, _p: &Value, _d: &dyn CommandDispatch) -> Result<(), VesperError> {
                self.order.lock().push(self.name);
                Ok(())
            }
        }

        let target = Target::new("t");
        let grouped = target.add_task(Task::new("grouped", "grouped"));
        target.create_group("g1");
        target.add_task_to_group("g1", grouped);
        target.add_task(Task::new("ungrouped", "ungrouped"));

        let mut registry = TaskRegistry::new();
        registry.register(Arc::new(Recorder {
            name: "grouped",
            order: order.clone(),
        }));
        registry.register(Arc::new(Recorder {
            name: "ungrouped",
            order: order.clone(),
        }));

        target.execute(&registry, &NoopDispatch);
        assert_eq!(*order.lock(), vec!["ungrouped", "grouped"]);
    }
}
