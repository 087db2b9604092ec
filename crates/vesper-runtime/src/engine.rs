//! `SequenceEngine` — the scheduling-loop thread that drives a
//! [`Sequence`]
//!
//! `vesper-core::sequence` owns the decision logic (`next_executable_target`,
//! `handle_failure`, timeout bookkeeping) so it can be unit tested without a
//! live thread; this module owns the loop that repeatedly calls into it, in
//! the same style as `vesper-plugin::manager`'s notification thread — a
//! dedicated `std::thread` fed by atomics and a bounded `mpsc` channel for
//! control signals, no cooperative scheduler.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use chrono::Utc;

use vesper_astro::AstroScheduler;
use vesper_core::{
    CommandDispatch, RecoveryDecision, Sequence, SequenceState, TargetStatus, TaskRegistry,
};

use crate::astro_refresh::{self, ASTRO_REFRESH_INTERVAL};
use crate::error::{EngineError, EngineResult};
use crate::event::EngineEvent;

/// How long the loop sleeps between scheduling attempts when no Target is
/// currently executable (no work ready, or at the concurrency cap).
const IDLE_POLL_INTERVAL: Duration = Duration::from_millis(100);

enum ControlSignal {
    Pause,
    Resume,
    Stop,
}

type EventListener = Box<dyn Fn(&EngineEvent) + Send + Sync>;

/// Drives a [`Sequence`] to completion on a dedicated OS thread.
///
/// Construct one per run; `start` consumes it into a running handle, and a
/// fresh `SequenceEngine` is needed for a subsequent run of the same or a
/// different sequence.
pub struct SequenceEngine {
    sequence: Arc<Sequence>,
    registry: Arc<TaskRegistry>,
    dispatch: Arc<dyn CommandDispatch>,
    astro_scheduler: Option<AstroScheduler>,
    listeners: Arc<Mutex<Vec<EventListener>>>,
    control_tx: Sender<ControlSignal>,
    control_rx: Option<Receiver<ControlSignal>>,
    paused: Arc<AtomicBool>,
    stopped: Arc<AtomicBool>,
}

/// A handle to a running engine thread, returned by [`SequenceEngine::start`].
pub struct RunningEngine {
    sequence: Arc<Sequence>,
    control_tx: Sender<ControlSignal>,
    paused: Arc<AtomicBool>,
    stopped: Arc<AtomicBool>,
    handle: Option<JoinHandle<EngineResult<()>>>,
}

impl SequenceEngine {
    pub fn new(sequence: Arc<Sequence>, registry: TaskRegistry, dispatch: Arc<dyn CommandDispatch>) -> Self {
        let (control_tx, control_rx) = mpsc::channel();
        Self {
            sequence,
            registry: Arc::new(registry),
            dispatch,
            astro_scheduler: None,
            listeners: Arc::new(Mutex::new(Vec::new())),
            control_tx,
            control_rx: Some(control_rx),
            paused: Arc::new(AtomicBool::new(false)),
            stopped: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Enables periodic astro-context refresh against a fixed
    /// observer location. Without this, Targets that carry astro context
    /// keep whatever alt/az and observability window the sequence file was
    /// last saved with.
    pub fn with_astro_scheduler(mut self, scheduler: AstroScheduler) -> Self {
        self.astro_scheduler = Some(scheduler);
        self
    }

    /// Subscribes to engine-level lifecycle events; the callback runs on the
    /// engine thread, so it should be quick (SequenceStart,
    /// SequenceEnd, TargetStart, TargetEnd, Error).
    pub fn on_event(&self, listener: impl Fn(&EngineEvent) + Send + Sync + 'static) {
        self.listeners.lock().unwrap().push(Box::new(listener));
    }

    /// Spawns the scheduling-loop thread and returns a [`RunningEngine`]
    /// handle for pause/resume/stop/join.
    pub fn start(mut self) -> RunningEngine {
        let control_rx = self.control_rx.take().expect("start() called twice");
        let sequence = self.sequence.clone();
        let registry = self.registry.clone();
        let dispatch = self.dispatch.clone();
        let astro_scheduler = self.astro_scheduler;
        let listeners = self.listeners.clone();
        let paused = self.paused.clone();
        let stopped = self.stopped.clone();

        let handle = std::thread::Builder::new()
            .name("vesper-sequence-engine".into())
            .spawn(move || {
                run_loop(
                    sequence,
                    registry,
                    dispatch,
                    astro_scheduler,
                    listeners,
                    control_rx,
                    paused,
                    stopped,
                )
            })
            .expect("failed to spawn sequence engine thread");

        RunningEngine {
            sequence: self.sequence,
            control_tx: self.control_tx,
            paused: self.paused,
            stopped: self.stopped,
            handle: Some(handle),
        }
    }
}

impl RunningEngine {
    /// Requests a pause; the in-flight Target (if any) runs to completion,
    /// the loop halts before starting the next one
    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
        let _ = self.control_tx.send(ControlSignal::Pause);
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
        let _ = self.control_tx.send(ControlSignal::Resume);
    }

    /// Requests a stop; the in-flight Target runs to natural conclusion and
    /// the loop then exits ("the currently running Target ... is
    /// allowed to finish").
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        let _ = self.control_tx.send(ControlSignal::Stop);
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    pub fn sequence(&self) -> &Arc<Sequence> {
        &self.sequence
    }

    /// Blocks until the engine thread exits, returning its terminal result.
    pub fn join(mut self) -> EngineResult<()> {
        match self.handle.take() {
            Some(handle) => handle.join().unwrap_or(Err(EngineError::Core(
                vesper_core::VesperError::ExternalFailure("sequence engine thread panicked".into()),
            ))),
            None => Ok(()),
        }
    }
}

fn run_loop(
    sequence: Arc<Sequence>,
    registry: Arc<TaskRegistry>,
    dispatch: Arc<dyn CommandDispatch>,
    astro_scheduler: Option<AstroScheduler>,
    listeners: Arc<Mutex<Vec<EventListener>>>,
    control_rx: Receiver<ControlSignal>,
    paused: Arc<AtomicBool>,
    stopped: Arc<AtomicBool>,
) -> EngineResult<()> {
    let emit = |event: EngineEvent| {
        for listener in listeners.lock().unwrap().iter() {
            listener(&event);
        }
    };

    sequence.set_state(SequenceState::Running);
    sequence.mark_run_started();
    emit(EngineEvent::SequenceStart);

    let started_at = Instant::now();
    let mut last_astro_refresh: Option<Instant> = None;

    loop {
        while let Ok(signal) = control_rx.try_recv() {
            match signal {
                ControlSignal::Pause => sequence.set_state(SequenceState::Paused),
                ControlSignal::Resume => sequence.set_state(SequenceState::Running),
                ControlSignal::Stop => sequence.set_state(SequenceState::Stopping),
            }
        }

        if stopped.load(Ordering::SeqCst) || sequence.state() == SequenceState::Stopping {
            break;
        }

        if sequence.timeout_elapsed() {
            let elapsed_secs = started_at.elapsed().as_secs();
            let limit_secs = sequence.global_timeout().map(|d| d.as_secs()).unwrap_or(0);
            emit(EngineEvent::Error {
                cause: format!("global timeout elapsed after {elapsed_secs}s"),
            });
            sequence.set_state(SequenceState::Stopping);
            sequence.set_state(SequenceState::Stopped);
            return Err(EngineError::GlobalTimeoutElapsed {
                elapsed_secs,
                limit_secs,
            });
        }

        if paused.load(Ordering::SeqCst) {
            std::thread::sleep(IDLE_POLL_INTERVAL);
            continue;
        }

        if let Some(scheduler) = &astro_scheduler {
            let due = last_astro_refresh
                .map(|last| last.elapsed() >= ASTRO_REFRESH_INTERVAL)
                .unwrap_or(true);
            if due {
                astro_refresh::refresh_targets(&sequence, scheduler, Utc::now());
                last_astro_refresh = Some(Instant::now());
            }
        }

        let Some(target) = sequence.next_executable_target(Utc::now()) else {
            if sequence_is_finished(&sequence) {
                break;
            }
            std::thread::sleep(IDLE_POLL_INTERVAL);
            continue;
        };

        run_target_to_completion(&sequence, &registry, dispatch.as_ref(), target, &emit);
        sequence.recompute_ready_flags();
    }

    sequence.set_state(SequenceState::Stopped);
    emit(EngineEvent::SequenceEnd);
    Ok(())
}

fn run_target_to_completion(
    sequence: &Arc<Sequence>,
    registry: &Arc<TaskRegistry>,
    dispatch: &dyn CommandDispatch,
    target: Arc<vesper_core::Target>,
    emit: &impl Fn(EngineEvent),
) {
    let mut current = target;
    loop {
        emit(EngineEvent::TargetStart {
            target: current.name(),
        });
        let start = Instant::now();
        let status = current.execute(registry, dispatch);
        let elapsed = start.elapsed();
        sequence.record_execution(status == TargetStatus::Completed, elapsed);
        emit(EngineEvent::TargetEnd {
            target: current.name(),
            status,
        });

        if status != TargetStatus::Failed {
            return;
        }

        match sequence.handle_failure(&current) {
            RecoveryDecision::StopEngine => return,
            RecoveryDecision::Skipped | RecoveryDecision::RetriesExhausted | RecoveryDecision::NoAlternative => {
                return;
            }
            RecoveryDecision::Retrying => continue,
            RecoveryDecision::RunAlternative(alt) => {
                current = alt;
                continue;
            }
        }
    }
}

fn sequence_is_finished(sequence: &Arc<Sequence>) -> bool {
    sequence.targets().iter().all(|t| {
        matches!(
            t.status(),
            TargetStatus::Completed | TargetStatus::Failed | TargetStatus::Skipped
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;
    use std::sync::atomic::AtomicUsize;
    use vesper_core::{Task, VesperError};

    struct NoopDispatch;
    impl CommandDispatch for NoopDispatch {
        fn dispatch(&self, _command_id: &str, _payload: &mut Value) -> Result<(), VesperError> {
            Ok(())
        }
    }

    struct CountingHandler {
        calls: Arc<AtomicUsize>,
    }
    impl vesper_core::TaskHandler for CountingHandler {
        fn task_name(&self) -> &str {
            "count"
        }
        fn execute(&self, _params: &Value, _dispatch: &dyn CommandDispatch) -> Result<(), VesperError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn runs_a_single_target_to_completion_and_stops() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut registry = TaskRegistry::new();
        registry.register(Arc::new(CountingHandler { calls: calls.clone() }));

        let sequence = Arc::new(Sequence::new());
        let target = Arc::new(vesper_core::Target::new("m31"));
        target.add_task(Task::new("expose", "count"));
        sequence.add_target(target);

        let engine = SequenceEngine::new(sequence.clone(), registry, Arc::new(NoopDispatch));
        let running = engine.start();
        running.join().unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(sequence.targets()[0].status(), TargetStatus::Completed);
        assert_eq!(sequence.state(), SequenceState::Stopped);
    }

    #[test]
    fn pause_then_resume_still_completes_all_targets() {
        let mut registry = TaskRegistry::new();
        registry.register(Arc::new(CountingHandler {
            calls: Arc::new(AtomicUsize::new(0)),
        }));

        let sequence = Arc::new(Sequence::new());
        for name in ["a", "b"] {
            let target = Arc::new(vesper_core::Target::new(name));
            target.add_task(Task::new("expose", "count"));
            sequence.add_target(target);
        }

        let engine = SequenceEngine::new(sequence.clone(), registry, Arc::new(NoopDispatch));
        let running = engine.start();
        running.pause();
        running.resume();
        running.join().unwrap();

        assert!(sequence
            .targets()
            .iter()
            .all(|t| t.status() == TargetStatus::Completed));
    }

    #[test]
    fn astro_context_is_refreshed_before_the_target_carrying_it_runs() {
        use vesper_core::{AstroContext, EquatorialCoords, ObserverLocation};

        let mut registry = TaskRegistry::new();
        registry.register(Arc::new(CountingHandler {
            calls: Arc::new(AtomicUsize::new(0)),
        }));

        let sequence = Arc::new(Sequence::new());
        let target = Arc::new(vesper_core::Target::new("m42"));
        target.add_task(Task::new("expose", "count"));
        target.set_astro_context(AstroContext::new(
            EquatorialCoords { ra_hours: 5.5, dec_deg: -5.4 },
            10.0,
        ));
        sequence.add_target(target.clone());

        let scheduler = AstroScheduler::new(ObserverLocation {
            latitude_deg: 30.0,
            longitude_deg: 0.0,
        });

        let engine = SequenceEngine::new(sequence.clone(), registry, Arc::new(NoopDispatch))
            .with_astro_scheduler(scheduler);
        let running = engine.start();
        running.join().unwrap();

        assert!(target.with_astro_context(|ctx| ctx.current_alt_az.is_some()).unwrap());
    }
}
