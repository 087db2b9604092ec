//! End-to-end scenarios exercising `SequenceEngine` against real `Sequence`/
//! `Target`/`Task` state, covering the end-to-end scenario list: sequential
//! happy path, dependency reordering, cycle rejection, and retry-then-skip.
//!
//! Plugin load/enable/dispatch (that section's dylib-loading half) is
//! covered by `vesper-plugin::manager`'s own in-process `Plugin`-trait tests
//! instead of here — this workspace never fabricates a shared-library
//! fixture to load through `libloading` in a test. What's reproduced here is
//! the dispatch seam `vesper-runtime` actually owns: a registered command
//! handler reached through `DispatcherAdapter`.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::{json, Value};

use vesper_core::{
    CommandDispatch, RecoveryStrategy, SchedulingStrategy, Sequence, Target, TargetStatus, Task,
    TaskHandler, TaskRegistry, VesperError,
};
use vesper_plugin::CommandDispatcher;
use vesper_runtime::{DispatcherAdapter, EngineEvent, SequenceEngine};

struct NoopDispatch;
impl CommandDispatch for NoopDispatch {
    fn dispatch(&self, _command_id: &str, _payload: &mut Value) -> Result<(), VesperError> {
        Ok(())
    }
}

/// Increments a shared counter and succeeds every time.
struct IncrementHandler {
    name: &'static str,
    counter: Arc<AtomicUsize>,
}
impl TaskHandler for IncrementHandler {
    fn task_name(&self) -> &str {
        self.name
    }
    fn execute(&self, _params: &Value, _dispatch: &dyn CommandDispatch) -> Result<(), VesperError> {
        self.counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Always fails, counting how many times it was attempted.
struct AlwaysFailsHandler {
    attempts: Arc<AtomicUsize>,
}
impl TaskHandler for AlwaysFailsHandler {
    fn task_name(&self) -> &str {
        "always_fails"
    }
    fn execute(&self, _params: &Value, _dispatch: &dyn CommandDispatch) -> Result<(), VesperError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(VesperError::ExternalFailure("simulated device fault".into()))
    }
}

#[test]
fn sequential_happy_path_runs_three_targets_in_order() {
    let counter = Arc::new(AtomicUsize::new(0));
    let order = Arc::new(Mutex::new(Vec::new()));

    let mut registry = TaskRegistry::new();
    registry.register(Arc::new(IncrementHandler {
        name: "increment",
        counter: counter.clone(),
    }));

    let sequence = Arc::new(Sequence::new());
    sequence.set_max_concurrent_targets(1);
    for name in ["A", "B", "C"] {
        let target = Arc::new(Target::new(name));
        target.add_task(Task::new("step", "increment"));
        sequence.add_target(target);
    }

    let engine = SequenceEngine::new(sequence.clone(), registry, Arc::new(NoopDispatch));
    {
        let order = order.clone();
        engine.on_event(move |event| {
            if let EngineEvent::TargetStart { target } = event {
                order.lock().unwrap().push(target.clone());
            }
        });
    }
    let running = engine.start();
    running.join().unwrap();

    assert_eq!(counter.load(Ordering::SeqCst), 3);
    assert_eq!(&*order.lock().unwrap(), &["A", "B", "C"]);
    assert_eq!(sequence.progress(), 100.0);

    let stats = sequence.stats();
    assert_eq!(stats.total_executions, 3);
    assert_eq!(stats.successful_executions, 3);
    assert_eq!(stats.failed_executions, 0);
}

#[test]
fn dependency_scheduling_strategy_reorders_and_gates_readiness() {
    let mut registry = TaskRegistry::new();
    registry.register(Arc::new(IncrementHandler {
        name: "increment",
        counter: Arc::new(AtomicUsize::new(0)),
    }));

    let sequence = Arc::new(Sequence::new());
    // Declared in order C, B, A with A -> B -> C.
    for name in ["C", "B", "A"] {
        let target = Arc::new(Target::new(name));
        target.add_task(Task::new("step", "increment"));
        sequence.add_target(target);
    }
    sequence.add_target_dependency("A", "B").unwrap();
    sequence.add_target_dependency("B", "C").unwrap();
    sequence.set_scheduling_strategy(SchedulingStrategy::Dependencies).unwrap();

    let names: Vec<String> = sequence.targets().iter().map(|t| t.name()).collect();
    assert_eq!(names, vec!["C", "B", "A"]);

    assert!(!sequence.is_target_ready("A"));

    let order = Arc::new(Mutex::new(Vec::new()));
    let engine = SequenceEngine::new(sequence.clone(), registry, Arc::new(NoopDispatch));
    {
        let order = order.clone();
        engine.on_event(move |event| {
            if let EngineEvent::TargetEnd { target, .. } = event {
                order.lock().unwrap().push(target.clone());
            }
        });
    }
    let running = engine.start();
    running.join().unwrap();

    assert_eq!(&*order.lock().unwrap(), &["C", "B", "A"]);
}

#[test]
fn cyclic_dependency_is_rejected_and_graph_is_unchanged() {
    let sequence = Sequence::new();
    sequence.add_target_dependency("X", "Y").unwrap();

    let err = sequence.add_target_dependency("Y", "X").unwrap_err();
    assert_eq!(err.code(), "CyclicDependency");
    assert!(sequence.dependencies_of("Y").is_empty());
}

#[test]
fn retry_then_skip_attempts_exactly_three_times() {
    let attempts = Arc::new(AtomicUsize::new(0));
    let mut registry = TaskRegistry::new();
    registry.register(Arc::new(AlwaysFailsHandler {
        attempts: attempts.clone(),
    }));

    let sequence = Arc::new(Sequence::new());
    sequence.set_recovery_strategy(RecoveryStrategy::Retry);

    let target = Arc::new(Target::new("T"));
    target.set_max_retries(2);
    target.add_task(Task::new("step", "always_fails"));
    sequence.add_target(target.clone());

    let engine = SequenceEngine::new(sequence.clone(), registry, Arc::new(NoopDispatch));
    let running = engine.start();
    running.join().unwrap();

    assert_eq!(attempts.load(Ordering::SeqCst), 3);
    assert_eq!(target.status(), TargetStatus::Skipped);
}

#[test]
fn config_change_notifications_fire_in_order_and_see_prior_writes() {
    let store = Arc::new(vesper_config::ConfigStore::new());
    let seen = Arc::new(Mutex::new(Vec::new()));
    let latitude_seen_from_second_callback: Arc<Mutex<Option<Value>>> = Arc::new(Mutex::new(None));

    let store_for_callback = store.clone();
    let seen_for_callback = seen.clone();
    let latitude_seen = latitude_seen_from_second_callback.clone();
    store.subscribe("site", move |event| {
        if let vesper_config::ChangeEvent::ValueChanged { path, .. } = event {
            seen_for_callback.lock().unwrap().push(path.clone());
            if path == "site/longitude" {
                *latitude_seen.lock().unwrap() = store_for_callback.get("site/latitude");
            }
        }
    });

    store.set("site/latitude", json!(45.0)).unwrap();
    store.set("site/longitude", json!(-75.0)).unwrap();

    assert_eq!(&*seen.lock().unwrap(), &["site/latitude", "site/longitude"]);
    assert_eq!(*latitude_seen_from_second_callback.lock().unwrap(), Some(json!(45.0)));
}

#[test]
fn dispatcher_adapter_mutates_payload_in_place_for_a_registered_command() {
    let dispatcher = Arc::new(CommandDispatcher::new());
    dispatcher
        .register("ping", Arc::new(|_payload: &Value| json!({"status": "success", "pong": true})))
        .unwrap();
    let adapter = DispatcherAdapter::new(dispatcher);

    let mut payload = json!({});
    adapter.dispatch("ping", &mut payload).unwrap();
    assert_eq!(payload, json!({"status": "success", "pong": true}));
}
