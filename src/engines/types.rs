//! Engine message types
//!
//! The step/reply contract between the orchestrator and the three engine
//! actors, plus the pivotal rendezvous messages.

use tokio_util::sync::CancellationToken;

use crate::core::state::StateSnapshot;
use crate::core::types::{StateDelta, ThoughtDraft};
use crate::core::working_memory::WorkingMemoryView;
use crate::graph::HypergraphNode;

/// Step dispatch carried to an owning engine
#[derive(Debug, Clone)]
pub struct StepMsg {
    /// Step being processed (0..12)
    pub step: u8,

    /// Cycle the step belongs to
    pub cycle: u64,

    /// Immutable shared-state snapshot taken before dispatch
    pub state: StateSnapshot,

    /// Up to 3 hypergraph concepts related to the current focus
    pub related_concepts: Vec<HypergraphNode>,

    /// Up to 5 recent episodic nodes
    pub recent_episodes: Vec<HypergraphNode>,

    /// Read-only copy of the working-memory buffer and focus
    pub working_memory: WorkingMemoryView,

    /// Root cancellation token; engines abandon work once it fires
    pub cancel: CancellationToken,
}

/// What an engine hands back for a step
#[derive(Debug, Clone)]
pub enum EngineReply {
    /// Normal reply: an optional thought draft plus a state delta
    Produced(Box<EngineOutput>),

    /// The engine observed cancellation and abandoned the step
    Cancelled,

    /// Content generation failed; the orchestrator records the error
    Failed { reason: String },
}

/// Payload of a successful engine reply
#[derive(Debug, Clone)]
pub struct EngineOutput {
    /// Draft for sealing; `None` when the engine contributes state only
    pub thought: Option<ThoughtDraft>,

    /// Scoped shared-state update
    pub delta: StateDelta,

    /// Optional request for consolidation practice
    pub practice_request: Option<PracticeRequest>,
}

/// A request for consolidation practice on a topic
#[derive(Debug, Clone, PartialEq)]
pub struct PracticeRequest {
    pub topic: String,
    pub urgency: f32,
}

/// Pivotal rendezvous broadcast
#[derive(Debug, Clone)]
pub struct PivotalMsg {
    pub step: u8,
    pub cycle: u64,

    /// Consistent snapshot of everything applied so far this cycle
    pub state: StateSnapshot,

    /// How long the engine may take to answer; a readiness probe that runs
    /// past this is abandoned and acked not-ready so the actor stays
    /// responsive for the steps that follow
    pub deadline: std::time::Duration,
}

/// An engine's answer to the pivotal broadcast
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncAck {
    /// Ready to take the pivotal step message
    Ready,

    /// Not ready; the engine sits this pivotal out
    NotReady { reason: String },
}
