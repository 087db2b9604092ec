//! Process-level wiring for the sequencer: the scheduling-loop thread
//! ([`engine`]), macro expansion ([`task_generator`]), sequence persistence
//! ([`persistence`]), built-in task handlers ([`tasks`]), astro-context
//! refresh ([`astro_refresh`]), configuration bootstrap ([`config_loader`]),
//! and logging setup ([`logging`]).
//!
//! `vesper-core` stays free of threads and I/O; everything here is the part
//! of the system that actually runs a sequence against the outside world.

pub mod astro_refresh;
pub mod config_loader;
pub mod dispatch_adapter;
pub mod engine;
pub mod error;
pub mod event;
pub mod logging;
pub mod persistence;
pub mod task_generator;
pub mod tasks;

pub use astro_refresh::{observer_location_from_config, refresh_targets, ASTRO_REFRESH_INTERVAL};
pub use config_loader::{load_config, ConfigLoader};
pub use dispatch_adapter::DispatcherAdapter;
pub use engine::{RunningEngine, SequenceEngine};
pub use error::{EngineError, EngineResult};
pub use event::EngineEvent;
pub use logging::{init_vesper, LoggingBuilder, SpanEvents};
pub use persistence::{load_sequence, save_sequence};
pub use task_generator::{Macro, TaskGenerator};
pub use tasks::builtin_registry;
