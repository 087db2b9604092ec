//! Engine-level events ("Kinds for the engine: SequenceStart,
//! SequenceEnd, TargetStart, TargetEnd (with status), Error (with cause)").

use serde::Serialize;
use vesper_core::TargetStatus;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind")]
pub enum EngineEvent {
    SequenceStart,
    SequenceEnd,
    TargetStart { target: String },
    TargetEnd { target: String, status: TargetStatus },
    Error { cause: String },
}
