//! `Sequence` — the top-level aggregate owning Targets, dependency graph,
//! scheduling/recovery strategy, and execution statistics
//!
//! The scheduling *loop* (the thread that repeatedly calls
//! [`Sequence::next_executable_target`] and drives execution) lives in
//! `vesper-runtime::engine` — this module owns the data and the pure
//! decision functions the loop calls into, so they can be unit tested
//! without spinning up an async runtime.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::VesperError;
use crate::target::{Target, TargetStatus};

/// Sequence lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SequenceState {
    Idle,
    Running,
    Paused,
    Stopping,
    Stopped,
}

/// Target ordering strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SchedulingStrategy {
    Sequential,
    Dependencies,
    Priority,
}

/// What to do when a Target fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecoveryStrategy {
    Stop,
    Skip,
    Retry,
    Alternative,
}

/// Execution statistics tracked by the Sequence
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionStats {
    pub total_executions: u64,
    pub successful_executions: u64,
    pub failed_executions: u64,
    pub average_duration: Duration,
    #[serde(skip, default = "Instant::now")]
    start_time: Instant,
}

impl Default for ExecutionStats {
    fn default() -> Self {
        Self {
            total_executions: 0,
            successful_executions: 0,
            failed_executions: 0,
            average_duration: Duration::ZERO,
            start_time: Instant::now(),
        }
    }
}

impl ExecutionStats {
    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    fn record(&mut self, success: bool, duration: Duration) {
        self.total_executions += 1;
        if success {
            self.successful_executions += 1;
        } else {
            self.failed_executions += 1;
        }
        let total_nanos = self.average_duration.as_nanos() as u64 * (self.total_executions - 1)
            + duration.as_nanos() as u64;
        self.average_duration = Duration::from_nanos(total_nanos / self.total_executions);
    }
}

/// What the scheduling loop should do after a Target finishes Failed,
/// decided by [`Sequence::handle_failure`] according to [`RecoveryStrategy`].
pub enum RecoveryDecision {
    /// Transition the engine to `Stopping`; the loop should exit.
    StopEngine,
    /// The target has been marked `Skipped`; continue the loop.
    Skipped,
    /// The target's status has been reset to `Pending` for a retry; continue.
    Retrying,
    /// Retries exhausted (or none configured); target marked `Skipped`.
    RetriesExhausted,
    /// An alternative Target is registered under the failed target's name;
    /// the caller is responsible for executing it in place.
    RunAlternative(Arc<Target>),
    /// No alternative registered; behaves like `Skipped`.
    NoAlternative,
}

/// Top-level aggregate: owns Targets in execution order, the target
/// dependency graph, cached readiness, and engine-wide settings/stats.
pub struct Sequence {
    pub uuid: Uuid,
    targets: RwLock<Vec<Arc<Target>>>,
    /// target-name -> set of target names it depends on.
    dependencies: RwLock<HashMap<String, HashSet<String>>>,
    ready_flags: RwLock<HashMap<String, bool>>,
    state: RwLock<SequenceState>,
    scheduling_strategy: RwLock<SchedulingStrategy>,
    recovery_strategy: RwLock<RecoveryStrategy>,
    alternative_targets: RwLock<HashMap<String, Arc<Target>>>,
    max_concurrent_targets: RwLock<usize>,
    global_timeout: RwLock<Option<Duration>>,
    stats: RwLock<ExecutionStats>,
    run_started_at: RwLock<Option<Instant>>,
}

impl Sequence {
    pub fn new() -> Self {
        Self::with_uuid(Uuid::new_v4())
    }

    /// Builds an empty Sequence with a caller-supplied identity, used by
    /// `loadSequence` to restore a persisted sequence's uuid.
    pub fn with_uuid(uuid: Uuid) -> Self {
        Self {
            uuid,
            targets: RwLock::new(Vec::new()),
            dependencies: RwLock::new(HashMap::new()),
            ready_flags: RwLock::new(HashMap::new()),
            state: RwLock::new(SequenceState::Idle),
            scheduling_strategy: RwLock::new(SchedulingStrategy::Sequential),
            recovery_strategy: RwLock::new(RecoveryStrategy::Stop),
            alternative_targets: RwLock::new(HashMap::new()),
            max_concurrent_targets: RwLock::new(1),
            global_timeout: RwLock::new(None),
            stats: RwLock::new(ExecutionStats::default()),
            run_started_at: RwLock::new(None),
        }
    }

    // ── Targets ───────────────────────────────────────────────────────

    pub fn add_target(&self, target: Arc<Target>) {
        self.ready_flags.write().insert(target.name(), true);
        self.targets.write().push(target);
    }

    pub fn targets(&self) -> Vec<Arc<Target>> {
        self.targets.read().clone()
    }

    pub fn target_by_name(&self, name: &str) -> Option<Arc<Target>> {
        self.targets.read().iter().find(|t| t.name() == name).cloned()
    }

    pub fn add_alternative_target(&self, primary_name: impl Into<String>, alternative: Arc<Target>) {
        self.alternative_targets.write().insert(primary_name.into(), alternative);
    }

    // ── State ───────────────────────────────────────────────────────────

    pub fn state(&self) -> SequenceState {
        *self.state.read()
    }

    pub fn set_state(&self, state: SequenceState) {
        *self.state.write() = state;
        tracing::info!(?state, "sequence state transition");
    }

    pub fn mark_run_started(&self) {
        *self.run_started_at.write() = Some(Instant::now());
    }

    /// Whether `executeAll`'s global timeout (if any) has elapsed.
    pub fn timeout_elapsed(&self) -> bool {
        let Some(timeout) = *self.global_timeout.read() else {
            return false;
        };
        match *self.run_started_at.read() {
            Some(start) => start.elapsed() >= timeout,
            None => false,
        }
    }

    pub fn set_global_timeout(&self, timeout: Option<Duration>) {
        *self.global_timeout.write() = timeout;
    }

    pub fn global_timeout(&self) -> Option<Duration> {
        *self.global_timeout.read()
    }

    pub fn max_concurrent_targets(&self) -> usize {
        *self.max_concurrent_targets.read()
    }

    pub fn set_max_concurrent_targets(&self, max: usize) {
        *self.max_concurrent_targets.write() = max;
    }

    pub fn stats(&self) -> ExecutionStats {
        self.stats.read().clone()
    }

    pub fn record_execution(&self, success: bool, duration: Duration) {
        self.stats.write().record(success, duration);
    }

    /// Restores previously-persisted counters (the `executionStats` document);
    /// `average_duration`'s rolling-average math resumes from this baseline.
    pub fn restore_stats(&self, stats: ExecutionStats) {
        *self.stats.write() = stats;
    }

    /// Overall progress across all Targets, matching each Target's own
    /// `progress()` semantics but averaged across the sequence.
    pub fn progress(&self) -> f64 {
        let targets = self.targets.read();
        if targets.is_empty() {
            return 100.0;
        }
        targets.iter().map(|t| t.progress()).sum::<f64>() / targets.len() as f64
    }

    // ── Dependency graph ────────────────────────────────────────────

    /// Tentatively inserts the edge `target depends on depends_on`, runs a
    /// DFS cycle check, and rejects (restoring prior state) if a cycle would
    /// form.
    pub fn add_target_dependency(
        &self,
        target: &str,
        depends_on: &str,
    ) -> Result<(), VesperError> {
        let mut deps = self.dependencies.write();
        let entry = deps.entry(target.to_string()).or_default();
        let inserted = entry.insert(depends_on.to_string());
        if let Some(cycle_node) = Self::find_cycle(&deps) {
            if inserted {
                deps.get_mut(target).unwrap().remove(depends_on);
            }
            return Err(VesperError::CyclicDependency(format!(
                "adding '{target}' -> '{depends_on}' would cycle through '{cycle_node}'"
            )));
        }
        drop(deps);
        self.recompute_ready_flags();
        Ok(())
    }

    /// Replaces the entire dependency map wholesale, used by `loadSequence`
    /// to restore a persisted `dependencies` object without re-running the
    /// cycle check edge-by-edge (the persisted graph is trusted to already
    /// be acyclic, having been produced by a prior `addTargetDependency`).
    pub fn replace_dependencies(&self, dependencies: HashMap<String, HashSet<String>>) {
        *self.dependencies.write() = dependencies;
        self.recompute_ready_flags();
    }

    pub fn remove_target_dependency(&self, target: &str, depends_on: &str) {
        if let Some(set) = self.dependencies.write().get_mut(target) {
            set.remove(depends_on);
        }
        self.recompute_ready_flags();
    }

    pub fn dependencies_of(&self, target: &str) -> HashSet<String> {
        self.dependencies.read().get(target).cloned().unwrap_or_default()
    }

    /// A snapshot of the full dependency map (target name -> depends-on
    /// names), for persistence (`dependencies` object).
    pub fn all_dependencies(&self) -> HashMap<String, HashSet<String>> {
        self.dependencies.read().clone()
    }

    /// Tarjan-style DFS with explicit in-stack tracking: returns
    /// the first node found to participate in a cycle, if any.
    fn find_cycle(graph: &HashMap<String, HashSet<String>>) -> Option<String> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Unvisited,
            InStack,
            Done,
        }
        let mut marks: HashMap<&str, Mark> = HashMap::new();

        fn visit<'a>(
            node: &'a str,
            graph: &'a HashMap<String, HashSet<String>>,
            marks: &mut HashMap<&'a str, Mark>,
        ) -> Option<String> {
            match marks.get(node) {
                Some(Mark::Done) => return None,
                Some(Mark::InStack) => return Some(node.to_string()),
                _ => {}
            }
            marks.insert(node, Mark::InStack);
            if let Some(deps) = graph.get(node) {
                for dep in deps {
                    if let Some(cycle) = visit(dep.as_str(), graph, marks) {
                        return Some(cycle);
                    }
                }
            }
            marks.insert(node, Mark::Done);
            None
        }

        for node in graph.keys() {
            if let Some(cycle) = visit(node.as_str(), graph, &mut marks) {
                return Some(cycle);
            }
        }
        None
    }

    /// Recomputes `ready_flags` to a fixpoint: a target is ready iff every
    /// declared dependency's *Target* has reached `Completed`, not merely
    /// structurally reachable.
    pub fn recompute_ready_flags(&self) {
        let targets = self.targets.read();
        let deps = self.dependencies.read();
        let mut flags = HashMap::new();
        for target in targets.iter() {
            let name = target.name();
            let ready = deps
                .get(&name)
                .map(|ds| {
                    ds.iter().all(|d| {
                        targets
                            .iter()
                            .find(|t| t.name() == *d)
                            .map(|t| t.status() == TargetStatus::Completed)
                            .unwrap_or(false)
                    })
                })
                .unwrap_or(true);
            flags.insert(name, ready);
        }
        *self.ready_flags.write() = flags;
    }

    pub fn is_target_ready(&self, name: &str) -> bool {
        self.ready_flags.read().get(name).copied().unwrap_or(false)
    }

    // ── Scheduling strategy ──────────────────────────────────────────

    pub fn scheduling_strategy(&self) -> SchedulingStrategy {
        *self.scheduling_strategy.read()
    }

    /// Sets the strategy and, for `Dependencies`, reorders `targets` into a
    /// topological order (stable — ties broken by original position).
    /// Returns `CyclicDependency` if the dependency graph contains a cycle.
    pub fn set_scheduling_strategy(&self, strategy: SchedulingStrategy) -> Result<(), VesperError> {
        *self.scheduling_strategy.write() = strategy;
        match strategy {
            SchedulingStrategy::Dependencies => self.reorder_by_dependencies(),
            SchedulingStrategy::Priority => {
                self.reorder_by_priority();
                Ok(())
            }
            SchedulingStrategy::Sequential => Ok(()),
        }
    }

    fn reorder_by_priority(&self) {
        let mut targets = self.targets.write();
        targets.sort_by(|a, b| b.priority().cmp(&a.priority()));
    }

    /// Post-order DFS topological sort, matching the original's
    /// `reorderTargetsByDependencies` (stack built bottom-up via recursion).
    fn reorder_by_dependencies(&self) -> Result<(), VesperError> {
        let deps = self.dependencies.read().clone();
        if let Some(cycle) = Self::find_cycle(&deps) {
            return Err(VesperError::CyclicDependency(format!(
                "cycle detected at '{cycle}' while reordering by dependencies"
            )));
        }

        let mut targets = self.targets.write();
        let mut visited: HashSet<String> = HashSet::new();
        let mut ordered: Vec<Arc<Target>> = Vec::with_capacity(targets.len());

        fn visit(
            name: &str,
            targets: &[Arc<Target>],
            deps: &HashMap<String, HashSet<String>>,
            visited: &mut HashSet<String>,
            ordered: &mut Vec<Arc<Target>>,
        ) {
            if visited.contains(name) {
                return;
            }
            visited.insert(name.to_string());
            if let Some(ds) = deps.get(name) {
                for dep in ds {
                    visit(dep, targets, deps, visited, ordered);
                }
            }
            if let Some(t) = targets.iter().find(|t| t.name() == name) {
                ordered.push(Arc::clone(t));
            }
        }

        for t in targets.iter() {
            visit(&t.name(), &targets, &deps, &mut visited, &mut ordered);
        }
        *targets = ordered;
        Ok(())
    }

    // ── Recovery ────────────────────────────────────────────────────

    pub fn recovery_strategy(&self) -> RecoveryStrategy {
        *self.recovery_strategy.read()
    }

    pub fn set_recovery_strategy(&self, strategy: RecoveryStrategy) {
        *self.recovery_strategy.write() = strategy;
    }

    /// Applies the current [`RecoveryStrategy`] to a just-failed `target`.
    pub fn handle_failure(&self, target: &Arc<Target>) -> RecoveryDecision {
        match self.recovery_strategy() {
            RecoveryStrategy::Stop => {
                self.set_state(SequenceState::Stopping);
                RecoveryDecision::StopEngine
            }
            RecoveryStrategy::Skip => {
                target.mark_skipped();
                RecoveryDecision::Skipped
            }
            RecoveryStrategy::Retry => {
                if target.retry() {
                    RecoveryDecision::Retrying
                } else {
                    target.mark_skipped();
                    RecoveryDecision::RetriesExhausted
                }
            }
            RecoveryStrategy::Alternative => {
                match self.alternative_targets.read().get(&target.name()).cloned() {
                    Some(alt) => RecoveryDecision::RunAlternative(alt),
                    None => {
                        target.mark_skipped();
                        RecoveryDecision::NoAlternative
                    }
                }
            }
        }
    }

    // ── Scheduling decision ───────────────────────────────────────────

    /// Returns the next Target eligible to run: `Pending`, ready, passing
    /// its astro window check (if it has astro context and
    /// `now`/`min_altitude` are known), and within the concurrency cap.
    pub fn next_executable_target(&self, now: DateTime<Utc>) -> Option<Arc<Target>> {
        if self.state() == SequenceState::Stopping {
            return None;
        }

        let max = self.max_concurrent_targets();
        if max > 0 {
            let running = self
                .targets
                .read()
                .iter()
                .filter(|t| t.status() == TargetStatus::InProgress)
                .count();
            if running >= max {
                return None;
            }
        }

        let targets = self.targets.read();
        targets
            .iter()
            .find(|t| {
                t.status() == TargetStatus::Pending
                    && self.is_target_ready(&t.name())
                    && Self::passes_astro_window(t, now)
            })
            .cloned()
    }

    fn passes_astro_window(target: &Target, now: DateTime<Utc>) -> bool {
        target
            .with_astro_context(|ctx| {
                if ctx.observability.is_empty() {
                    return true;
                }
                let in_window = ctx.observability.contains(now);
                let above_min = ctx
                    .current_alt_az
                    .map(|aa| aa.altitude_deg >= ctx.min_altitude_deg)
                    .unwrap_or(true);
                in_window && above_min
            })
            .unwrap_or(true)
    }
}

impl Default for Sequence {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cycle_rejected_and_graph_unchanged() {
        let seq = Sequence::new();
        seq.add_target_dependency("x", "y").unwrap();
        let err = seq.add_target_dependency("y", "x").unwrap_err();
        assert_eq!(err.code(), "CyclicDependency");
        assert!(seq.dependencies_of("y").is_empty());
    }

    #[test]
    fn target_not_ready_until_dependency_completes() {
        let seq = Sequence::new();
        let a = Arc::new(Target::new("a"));
        let b = Arc::new(Target::new("b"));
        seq.add_target(a.clone());
        seq.add_target(b.clone());
        seq.add_target_dependency("a", "b").unwrap();
        assert!(!seq.is_target_ready("a"));

        // Simulate b completing.
        b.set_enabled(true);
        // Force status via the public execute path isn't needed here; the
        // ready-flag recompute only consults status(), so drive it directly
        // through the same transition path execute() would use.
        b.execute(&crate::registry::TaskRegistry::new(), &crate::dispatch::NoopDispatch);
        seq.recompute_ready_flags();
        assert!(seq.is_target_ready("a"));
    }

    #[test]
    fn priority_strategy_sorts_descending() {
        let seq = Sequence::new();
        let low = Arc::new(Target::new("low"));
        low.set_priority(1);
        let high = Arc::new(Target::new("high"));
        high.set_priority(10);
        seq.add_target(low.clone());
        seq.add_target(high.clone());
        seq.set_scheduling_strategy(SchedulingStrategy::Priority).unwrap();
        let ordered = seq.targets();
        assert_eq!(ordered[0].name(), "high");
        assert_eq!(ordered[1].name(), "low");
    }

    #[test]
    fn dependencies_strategy_orders_dependency_before_dependent() {
        let seq = Sequence::new();
        let a = Arc::new(Target::new("a"));
        let b = Arc::new(Target::new("b"));
        seq.add_target(a.clone());
        seq.add_target(b.clone());
        seq.add_target_dependency("a", "b").unwrap();
        seq.set_scheduling_strategy(SchedulingStrategy::Dependencies).unwrap();
        let ordered = seq.targets();
        let pos_a = ordered.iter().position(|t| t.name() == "a").unwrap();
        let pos_b = ordered.iter().position(|t| t.name() == "b").unwrap();
        assert!(pos_b < pos_a);
    }

    #[test]
    fn max_concurrent_targets_blocks_when_saturated() {
        let seq = Sequence::new();
        seq.set_max_concurrent_targets(1);
        let running = Arc::new(Target::new("running"));
        seq.add_target(running.clone());
        let pending = Arc::new(Target::new("pending"));
        seq.add_target(pending.clone());

        running.execute(&crate::registry::TaskRegistry::new(), &crate::dispatch::NoopDispatch);
        // `running` finishes synchronously (no tasks) so it no longer
        // occupies a slot; the cap should still allow picking `pending`.
        assert!(seq.next_executable_target(Utc::now()).is_some());
    }
}
