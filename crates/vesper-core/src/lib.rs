//! Core domain model for the sequencer engine: Tasks, Targets, the Sequence
//! aggregate, astronomical context snapshots, the error taxonomy, and the
//! seam (`CommandDispatch`/`TaskHandler`/`TaskRegistry`) that lets a Task
//! reach out to a plugin without this crate depending on `vesper-plugin`.
//!
//! Everything here is synchronous and lock-based (`parking_lot`); the
//! threaded/async scheduling loop that drives a [`sequence::Sequence`] lives
//! in `vesper-runtime`.

pub mod astro_context;
pub mod dispatch;
pub mod error;
pub mod registry;
pub mod sequence;
pub mod target;
pub mod task;

pub use astro_context::{AltAz, AstroContext, EquatorialCoords, ObserverLocation, ObservabilityWindow};
pub use dispatch::{CommandDispatch, TaskHandler};
pub use error::{VesperError, VesperResult};
pub use registry::TaskRegistry;
pub use sequence::{ExecutionStats, RecoveryDecision, RecoveryStrategy, SchedulingStrategy, Sequence, SequenceState};
pub use target::{Target, TargetStatus};
pub use task::{ParamSpec, ParamType, Task, TaskStatus};
