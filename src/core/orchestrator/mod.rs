//! Orchestrator
//!
//! The single driver of the 12-step cycle. On each step it snapshots shared
//! state, gathers hypergraph context, dispatches the owning engines (after
//! the barrier, at pivotal steps), then applies replies in engine-id order:
//! validate, seal, merge the state delta, insert into working memory, and
//! enqueue persistence. Determinism rests on the fixed ownership table and
//! the engine-id tie-breaking; given identical replies and starting state,
//! the post-step state sequence is fully determined.

mod step;
mod sync;


use std::collections::HashSet;
use std::sync::{Arc, RwLock};

use chrono::Utc;
use ractor::ActorRef;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::checkpoint::CoreSnapshot;
use crate::config::CoreConfig;
use crate::core::clock::StepClock;
use crate::core::state::SharedState;
use crate::core::types::{EngineId, ThoughtDraft, ThoughtId};
use crate::core::working_memory::WorkingMemory;
use crate::engines::{spawn_engines, ContentProvider, EngineMessage, EngineProfile};
use crate::events::EventBus;
use crate::graph::HypergraphStore;
use crate::metrics::CoreMetrics;
use crate::persistence::PersistencePipeline;

/// Structured rejection of an engine reply at the sealing gate
#[derive(Debug, Error, PartialEq)]
pub enum RejectedThought {
    #[error("draft has empty content")]
    EmptyContent,

    #[error("draft claims engine {claimed}, reply came from {actual}")]
    WrongEngine { claimed: EngineId, actual: EngineId },

    #[error("{engine} does not own step {step}")]
    UnownedStep { engine: EngineId, step: u8 },

    #[error("draft step {draft_step} does not match dispatched step {step}")]
    WrongStep { draft_step: u8, step: u8 },

    #[error("importance out of range: {0}")]
    ImportanceOutOfRange(f32),

    #[error("valence out of range: {0}")]
    ValenceOutOfRange(f32),

    #[error("context cycle {context_cycle} does not match current cycle {cycle}")]
    StaleContext { context_cycle: u64, cycle: u64 },

    #[error("stale delta from cycle {delta_cycle}, current is {cycle}")]
    StaleDelta { delta_cycle: u64, cycle: u64 },

    #[error("duplicate thought id: {0}")]
    DuplicateId(ThoughtId),
}

/// Orchestrator-level errors
#[derive(Debug, Error)]
pub enum CoreError {
    /// A programmer-level invariant broke; the orchestrator stops and the
    /// last consistent snapshot is preserved
    #[error("fatal invariant violation: {reason}")]
    Fatal { reason: String },

    /// The orchestrator was halted by a previous fatal error
    #[error("orchestrator is halted")]
    Halted,

    #[error("engine spawn failed: {0}")]
    Spawn(#[from] ractor::SpawnErr),

    #[error(transparent)]
    Config(#[from] crate::config::ConfigError),
}

/// What a single `run_step` did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    /// The step ran and the ring advanced
    Completed {
        step: u8,
        cycle: u64,
        /// Thoughts committed this step
        produced: usize,
    },

    /// Cancellation was observed before the step started; nothing ran
    Cancelled,
}

/// Summary of one driven cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleSummary {
    /// Cycle counter value when the drive began
    pub cycle: u64,

    /// Thoughts committed across the driven steps
    pub thoughts_committed: usize,
}

/// Per-cycle engine bookkeeping
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct EngineCycleStatus {
    /// Errors in a row within the current cycle
    pub consecutive_errors: u8,

    /// Skipped on non-pivotal steps for the rest of the cycle
    pub degraded: bool,
}

/// The cycle driver
pub struct Orchestrator {
    pub(crate) config: CoreConfig,
    pub(crate) shared: Arc<SharedState>,
    pub(crate) working_memory: Arc<RwLock<WorkingMemory>>,
    pub(crate) engines: Vec<ActorRef<EngineMessage>>,
    pub(crate) store: Arc<dyn HypergraphStore>,
    pub(crate) pipeline: PersistencePipeline,
    pub(crate) clock: StepClock,
    pub(crate) metrics: Arc<CoreMetrics>,
    pub(crate) events: EventBus,
    pub(crate) cancel: CancellationToken,

    /// Every id sealed in this run; duplicates are rejected at the gate
    pub(crate) seen_ids: HashSet<ThoughtId>,

    pub(crate) engine_status: [EngineCycleStatus; 3],

    /// Set by a fatal error; every later step refuses to run
    pub(crate) halted: bool,

    /// Rest recommendation already emitted for the current fatigue episode
    pub(crate) rest_flagged: bool,

    /// Monotonic checkpoint sequence
    snapshot_seq: u64,
}

/// Everything the orchestrator shares with the control surface
pub(crate) struct OrchestratorShared {
    pub shared: Arc<SharedState>,
    pub working_memory: Arc<RwLock<WorkingMemory>>,
    pub metrics: Arc<CoreMetrics>,
    pub events: EventBus,
    pub cancel: CancellationToken,
}

impl Orchestrator {
    /// Spawn engines and workers, wiring a fresh core
    ///
    /// # Errors
    ///
    /// Fails on invalid configuration or engine spawn failure.
    pub async fn spawn(
        config: CoreConfig,
        store: Arc<dyn HypergraphStore>,
        provider: Arc<dyn ContentProvider>,
    ) -> Result<Self, CoreError> {
        Self::build(config, store, provider, None).await
    }

    /// Rebuild a core from a checkpoint snapshot
    ///
    /// Given the same subsequent engine replies, the restored core produces
    /// the same thoughts and state deltas the original would have.
    ///
    /// # Errors
    ///
    /// Fails on invalid configuration or engine spawn failure.
    pub async fn restore(
        config: CoreConfig,
        snapshot: CoreSnapshot,
        store: Arc<dyn HypergraphStore>,
        provider: Arc<dyn ContentProvider>,
    ) -> Result<Self, CoreError> {
        Self::build(config, store, provider, Some(snapshot)).await
    }

    async fn build(
        config: CoreConfig,
        store: Arc<dyn HypergraphStore>,
        provider: Arc<dyn ContentProvider>,
        snapshot: Option<CoreSnapshot>,
    ) -> Result<Self, CoreError> {
        config.validate()?;

        let events = EventBus::new();
        let cancel = CancellationToken::new();
        let metrics = Arc::new(CoreMetrics::new());

        let (shared, working_memory, seen_ids, snapshot_seq) = match snapshot {
            Some(snapshot) => {
                metrics.restore(&snapshot.metrics);
                let mut seen: HashSet<ThoughtId> = snapshot
                    .working_memory
                    .thoughts
                    .iter()
                    .map(|t| t.id)
                    .collect();
                seen.extend(snapshot.shared_state.past_context.iter().copied());
                let shared = SharedState::restore(
                    snapshot.shared_state,
                    config.past_context_capacity,
                    config.future_options_capacity,
                    events.clone(),
                );
                let wm = WorkingMemory::restore(
                    snapshot.working_memory,
                    config.working_memory_capacity,
                );
                (shared, wm, seen, snapshot.sequence)
            }
            None => (
                SharedState::new(
                    config.past_context_capacity,
                    config.future_options_capacity,
                    events.clone(),
                ),
                WorkingMemory::new(config.working_memory_capacity),
                HashSet::new(),
                0,
            ),
        };

        let engines = spawn_engines(provider, config.engine_timeout, &cancel).await?;
        let pipeline = PersistencePipeline::start(
            Arc::clone(&store),
            Arc::clone(&metrics),
            events.clone(),
            config.persistence_queue_capacity,
            config.persistence_workers,
        );

        info!(
            workers = config.persistence_workers,
            queue = config.persistence_queue_capacity,
            "orchestrator wired"
        );

        Ok(Self {
            config,
            shared: Arc::new(shared),
            working_memory: Arc::new(RwLock::new(working_memory)),
            engines,
            store,
            pipeline,
            clock: StepClock::new(),
            metrics,
            events,
            cancel,
            seen_ids,
            engine_status: [EngineCycleStatus::default(); 3],
            halted: false,
            rest_flagged: false,
            snapshot_seq,
        })
    }

    /// Handles the control surface keeps while the driver task owns `self`
    pub(crate) fn shared_handles(&self) -> OrchestratorShared {
        OrchestratorShared {
            shared: Arc::clone(&self.shared),
            working_memory: Arc::clone(&self.working_memory),
            metrics: Arc::clone(&self.metrics),
            events: self.events.clone(),
            cancel: self.cancel.clone(),
        }
    }

    /// Root cancellation token
    #[must_use]
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Event stream subscription
    #[must_use]
    pub fn events(&self) -> EventBus {
        self.events.clone()
    }

    /// Metrics registry
    #[must_use]
    pub fn metrics(&self) -> Arc<CoreMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Whether a fatal error stopped the driver
    #[must_use]
    pub fn is_halted(&self) -> bool {
        self.halted
    }

    /// Cheap read-only snapshot of state, memory, and metrics
    #[must_use]
    pub fn snapshot(&mut self) -> CoreSnapshot {
        self.snapshot_seq += 1;
        CoreSnapshot {
            timestamp: Utc::now(),
            sequence: self.snapshot_seq,
            shared_state: self.shared.snapshot(),
            working_memory: self
                .working_memory
                .read()
                .expect("working memory lock poisoned")
                .view(),
            metrics: self.metrics.snapshot(),
        }
    }

    /// Stop the engines and drain persistence within `shutdown_timeout`
    ///
    /// Returns whether the drain completed and the dead-letter total.
    pub async fn shutdown(self) -> (bool, u64) {
        self.cancel.cancel();
        for engine in &self.engines {
            engine.stop(None);
        }
        let drained = self.pipeline.drain(self.config.shutdown_timeout).await;
        let dead = self.metrics.snapshot().dead_letters;
        info!(drained, dead_letters = dead, "orchestrator shut down");
        (drained, dead)
    }

    /// Validate a draft against the sealing rules
    pub(crate) fn validate_draft(
        &self,
        draft: &ThoughtDraft,
        engine_id: EngineId,
        step: u8,
        cycle: u64,
    ) -> Result<(), RejectedThought> {
        if draft.content.is_empty() {
            return Err(RejectedThought::EmptyContent);
        }
        if draft.engine_id != engine_id {
            return Err(RejectedThought::WrongEngine {
                claimed: draft.engine_id,
                actual: engine_id,
            });
        }
        if draft.step_number != step {
            return Err(RejectedThought::WrongStep {
                draft_step: draft.step_number,
                step,
            });
        }
        if !EngineProfile::for_engine(draft.engine_id).owns(draft.step_number) {
            return Err(RejectedThought::UnownedStep {
                engine: draft.engine_id,
                step: draft.step_number,
            });
        }
        if !(0.0..=1.0).contains(&draft.importance) || !draft.importance.is_finite() {
            return Err(RejectedThought::ImportanceOutOfRange(draft.importance));
        }
        if !(-1.0..=1.0).contains(&draft.emotional_valence) || !draft.emotional_valence.is_finite()
        {
            return Err(RejectedThought::ValenceOutOfRange(draft.emotional_valence));
        }
        if draft.context.cycle != cycle {
            return Err(RejectedThought::StaleContext {
                context_cycle: draft.context.cycle,
                cycle,
            });
        }
        if self.seen_ids.contains(&draft.id) {
            return Err(RejectedThought::DuplicateId(draft.id));
        }
        Ok(())
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("step", &self.shared.current_step())
            .field("cycle", &self.shared.cycle_count())
            .field("halted", &self.halted)
            .finish_non_exhaustive()
    }
}
