//! `saveSequence`/`loadSequence`: serializes a whole
//! [`Sequence`] — targets, tasks, groups, dependencies, astro config, and
//! engine settings — to the persisted-sequence JSON document, and the
//! inverse.
//!
//! `Sequence`/`Target` hold their fields behind `RwLock`s and don't derive
//! `serde` themselves (many small locks, not one big serializable
//! snapshot), so the typed wire structs here are built and torn down by hand
//! rather than derived straight off the runtime types.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use vesper_core::{
    AstroContext, ExecutionStats, Sequence, SequenceState, Target, TargetStatus, Task, TaskStatus,
};

use crate::error::{EngineError, EngineResult};

#[derive(Debug, Serialize, Deserialize)]
struct PersistedTask {
    uuid: Uuid,
    name: String,
    #[serde(rename = "taskName")]
    task_name: String,
    #[serde(default)]
    config: Value,
    status: TaskStatus,
    #[serde(default)]
    schema: Vec<vesper_core::ParamSpec>,
}

#[derive(Debug, Serialize, Deserialize)]
struct PersistedTarget {
    name: String,
    uuid: Uuid,
    enabled: bool,
    status: TargetStatus,
    cooldown: f64,
    #[serde(rename = "maxRetries")]
    max_retries: u32,
    #[serde(default)]
    params: Value,
    tasks: Vec<PersistedTask>,
    #[serde(rename = "taskGroups", default)]
    task_groups: HashMap<String, Vec<Uuid>>,
    #[serde(rename = "taskDependencies", default)]
    task_dependencies: HashMap<Uuid, Vec<Uuid>>,
    #[serde(rename = "astroConfig", skip_serializing_if = "Option::is_none", default)]
    astro_config: Option<AstroContext>,
    #[serde(rename = "currentExposurePlanIndex", default)]
    current_exposure_plan_index: usize,
}

#[derive(Debug, Serialize, Deserialize)]
struct PersistedSequence {
    uuid: Uuid,
    state: u8,
    #[serde(rename = "maxConcurrentTargets")]
    max_concurrent_targets: usize,
    #[serde(rename = "globalTimeout")]
    global_timeout: u64,
    targets: Vec<PersistedTarget>,
    dependencies: HashMap<String, Vec<String>>,
    #[serde(rename = "executionStats")]
    execution_stats: ExecutionStats,
}

fn state_to_u8(state: SequenceState) -> u8 {
    match state {
        SequenceState::Idle => 0,
        SequenceState::Running => 1,
        SequenceState::Paused => 2,
        SequenceState::Stopping => 3,
        SequenceState::Stopped => 4,
    }
}

fn state_from_u8(value: u8) -> SequenceState {
    match value {
        1 => SequenceState::Running,
        2 => SequenceState::Paused,
        3 => SequenceState::Stopping,
        4 => SequenceState::Stopped,
        _ => SequenceState::Idle,
    }
}

/// Serializes `sequence` to `path` in the §6 persisted-sequence format.
pub fn save_sequence(sequence: &Sequence, path: &Path) -> EngineResult<()> {
    let targets = sequence
        .targets()
        .iter()
        .map(|t| persist_target(t))
        .collect();

    let dependencies = sequence
        .all_dependencies()
        .into_iter()
        .map(|(name, deps)| (name, deps.into_iter().collect()))
        .collect();

    let persisted = PersistedSequence {
        uuid: sequence.uuid,
        state: state_to_u8(sequence.state()),
        max_concurrent_targets: sequence.max_concurrent_targets(),
        global_timeout: sequence.global_timeout().map(|d| d.as_secs()).unwrap_or(0),
        targets,
        dependencies,
        execution_stats: sequence.stats(),
    };

    let json = serde_json::to_string_pretty(&persisted)?;
    std::fs::write(path, json)?;
    tracing::info!(path = %path.display(), "sequence saved");
    Ok(())
}

fn persist_target(target: &Arc<Target>) -> PersistedTarget {
    let tasks = target
        .tasks()
        .into_iter()
        .map(|task| PersistedTask {
            config: target.task_param(task.uuid).unwrap_or(Value::Null),
            schema: task.schema.clone(),
            uuid: task.uuid,
            name: task.name.clone(),
            task_name: task.task_name.clone(),
            status: task.status,
        })
        .collect();

    let task_groups = target
        .task_groups_snapshot()
        .into_iter()
        .collect::<HashMap<_, _>>();

    let task_dependencies = target
        .task_uuids()
        .into_iter()
        .map(|uuid| (uuid, target.dependencies_of(uuid).into_iter().collect()))
        .collect();

    PersistedTarget {
        name: target.name(),
        uuid: target.uuid,
        enabled: target.is_enabled(),
        status: target.status(),
        cooldown: target.cooldown().as_secs_f64(),
        max_retries: target.max_retries(),
        params: target.params(),
        tasks,
        task_groups,
        task_dependencies,
        astro_config: target.astro_snapshot(),
        current_exposure_plan_index: target
            .astro_snapshot()
            .map(|ctx| ctx.current_exposure_plan_index)
            .unwrap_or(0),
    }
}

/// Replaces `sequence`'s state with the contents of `path`, only when the
/// sequence is `Idle` ("`loadSequence` ... replaces current state
/// only when state == Idle").
pub fn load_sequence(sequence: &Sequence, path: &Path) -> EngineResult<()> {
    if sequence.state() != SequenceState::Idle {
        return Err(EngineError::NotIdle);
    }

    let content = std::fs::read_to_string(path)?;
    let persisted: PersistedSequence = serde_json::from_str(&content)?;

    let targets: Vec<Arc<Target>> = persisted.targets.iter().map(restore_target).collect();
    for target in &targets {
        sequence.add_target(target.clone());
    }

    let dependencies: HashMap<String, std::collections::HashSet<String>> = persisted
        .dependencies
        .into_iter()
        .map(|(name, deps)| (name, deps.into_iter().collect()))
        .collect();
    sequence.replace_dependencies(dependencies);
    sequence.recompute_ready_flags();

    sequence.set_max_concurrent_targets(persisted.max_concurrent_targets);
    sequence.set_global_timeout(if persisted.global_timeout == 0 {
        None
    } else {
        Some(Duration::from_secs(persisted.global_timeout))
    });
    sequence.restore_stats(persisted.execution_stats);
    sequence.set_state(state_from_u8(persisted.state));

    tracing::info!(path = %path.display(), "sequence loaded");
    Ok(())
}

fn restore_target(persisted: &PersistedTarget) -> Arc<Target> {
    let target = Target::with_uuid(persisted.uuid, persisted.name.clone());
    target.set_enabled(persisted.enabled);
    target.restore_status(persisted.status);
    target.set_cooldown(Duration::from_secs_f64(persisted.cooldown));
    target.set_max_retries(persisted.max_retries);
    target.set_params(persisted.params.clone());

    let mut restored_tasks = Vec::with_capacity(persisted.tasks.len());
    for task in &persisted.tasks {
        let mut restored = Task::new(task.name.clone(), task.task_name.clone())
            .with_schema(task.schema.clone());
        restored.uuid = task.uuid;
        // `Task::new` always starts `Pending`; restore the persisted status
        // as a single recorded transition rather than replaying history.
        restored.transition(task.status);
        if !task.config.is_null() {
            target.set_task_param(task.uuid, task.config.clone());
        }
        restored_tasks.push(restored);
    }
    target.set_tasks(restored_tasks);

    let groups: Vec<(String, Vec<Uuid>)> = persisted
        .task_groups
        .iter()
        .map(|(name, ids)| (name.clone(), ids.clone()))
        .collect();
    target.set_task_groups(groups);

    let deps: HashMap<Uuid, std::collections::HashSet<Uuid>> = persisted
        .task_dependencies
        .iter()
        .map(|(id, deps)| (*id, deps.iter().copied().collect()))
        .collect();
    target.set_task_dependencies(deps);

    if let Some(astro) = persisted.astro_config.clone() {
        target.set_astro_context(astro);
    }

    Arc::new(target)
}

#[cfg(test)]
mod tests {
    use super::*;
    use vesper_core::{AstroContext, EquatorialCoords};

    #[test]
    fn round_trips_a_small_sequence() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sequence.json");

        let seq = Sequence::new();
        let target = Arc::new(Target::new("m31"));
        target.set_astro_context(AstroContext::new(
            EquatorialCoords {
                ra_hours: 0.7,
                dec_deg: 41.3,
            },
            20.0,
        ));
        target.add_task(Task::new("expose", "capture"));
        seq.add_target(target);

        save_sequence(&seq, &path).unwrap();

        let restored = Sequence::new();
        load_sequence(&restored, &path).unwrap();
        assert_eq!(restored.targets().len(), 1);
        assert_eq!(restored.targets()[0].name(), "m31");
        assert_eq!(restored.targets()[0].task_count(), 1);
    }

    #[test]
    fn round_trips_the_configured_global_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sequence.json");

        let seq = Sequence::new();
        seq.set_global_timeout(Some(std::time::Duration::from_secs(3600)));
        save_sequence(&seq, &path).unwrap();

        let restored = Sequence::new();
        load_sequence(&restored, &path).unwrap();
        assert_eq!(restored.global_timeout(), Some(std::time::Duration::from_secs(3600)));
    }

    #[test]
    fn refuses_to_load_into_a_running_sequence() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sequence.json");
        let seq = Sequence::new();
        save_sequence(&seq, &path).unwrap();

        let target_seq = Sequence::new();
        target_seq.set_state(SequenceState::Running);
        assert!(matches!(load_sequence(&target_seq, &path), Err(EngineError::NotIdle)));
    }
}
