//! Shared Cognitive State
//!
//! The single thread-safe container every component reads through snapshots.
//! All writes are serialized behind one mutex; readers pay only the cost of
//! copying the small top-level struct. No lock is ever held across an await
//! point - snapshots go out, deltas come in.

use std::sync::Mutex;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::core::types::{FutureOption, StateDelta, ThoughtId, STEPS_PER_CYCLE};
use crate::events::{CoreEvent, EventBus};

/// Multiplicative fatigue decay applied on every update
const FATIGUE_DECAY: f32 = 0.995;

/// EMA weight for the coherence integration score
const COHERENCE_ALPHA: f32 = 0.10;

/// EMA weight for emotional valence
const VALENCE_ALPHA: f32 = 0.20;

/// Shared-state errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StateError {
    #[error("stale delta: computed against cycle {delta_cycle}, current is {current_cycle}")]
    StaleDelta { delta_cycle: u64, current_cycle: u64 },
}

/// The mutable interior, guarded by the mutex in [`SharedState`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateSnapshot {
    /// Slow-moving integration score (0.0 - 1.0), EMA of per-thought samples
    pub coherence: f32,

    /// Current step of the 12-step ring
    pub current_step: u8,

    /// Total completed cycles
    pub cycle_count: u64,

    /// Current focus item, if any
    pub focus: Option<ThoughtId>,

    /// FIFO of recently committed thoughts, bounded
    pub past_context: Vec<ThoughtId>,

    /// Anticipated directions from the salience engine, bounded
    pub future_options: Vec<FutureOption>,

    /// Accumulated fatigue (0.0 - 1.0)
    pub fatigue: f32,

    /// EMA of emotional valence (-1.0 to 1.0)
    pub emotional_valence_ema: f32,
}

impl StateSnapshot {
    fn fresh() -> Self {
        Self {
            coherence: 0.5,
            current_step: 0,
            cycle_count: 0,
            focus: None,
            past_context: Vec::new(),
            future_options: Vec::new(),
            fatigue: 0.0,
            emotional_valence_ema: 0.0,
        }
    }
}

/// Thread-safe shared cognitive state
///
/// Only the orchestrator mutates it; engines and observers read snapshots.
#[derive(Debug)]
pub struct SharedState {
    inner: Mutex<StateSnapshot>,
    past_capacity: usize,
    future_capacity: usize,
    events: EventBus,
}

impl SharedState {
    #[must_use]
    pub fn new(past_capacity: usize, future_capacity: usize, events: EventBus) -> Self {
        Self {
            inner: Mutex::new(StateSnapshot::fresh()),
            past_capacity,
            future_capacity,
            events,
        }
    }

    /// Rebuild shared state from a snapshot (checkpoint restore)
    #[must_use]
    pub fn restore(
        snapshot: StateSnapshot,
        past_capacity: usize,
        future_capacity: usize,
        events: EventBus,
    ) -> Self {
        Self {
            inner: Mutex::new(snapshot),
            past_capacity,
            future_capacity,
            events,
        }
    }

    /// Copy-on-read snapshot of the whole state
    ///
    /// Never fails and never blocks writers beyond the copy cost.
    #[must_use]
    pub fn snapshot(&self) -> StateSnapshot {
        self.inner.lock().expect("shared state mutex poisoned").clone()
    }

    /// Current step without copying the containers
    #[must_use]
    pub fn current_step(&self) -> u8 {
        self.inner.lock().expect("shared state mutex poisoned").current_step
    }

    /// Completed cycle count
    #[must_use]
    pub fn cycle_count(&self) -> u64 {
        self.inner.lock().expect("shared state mutex poisoned").cycle_count
    }

    /// Current fatigue level
    #[must_use]
    pub fn fatigue(&self) -> f32 {
        self.inner.lock().expect("shared state mutex poisoned").fatigue
    }

    /// Merge an engine delta under the exclusive lock
    ///
    /// # Errors
    ///
    /// Rejects deltas whose `from_cycle` no longer matches the live cycle
    /// counter; stale deltas must not leak into the current cycle.
    pub fn apply_delta(&self, delta: &StateDelta) -> Result<(), StateError> {
        let mut inner = self.inner.lock().expect("shared state mutex poisoned");
        if delta.from_cycle != inner.cycle_count {
            return Err(StateError::StaleDelta {
                delta_cycle: delta.from_cycle,
                current_cycle: inner.cycle_count,
            });
        }

        if let Some(sample) = delta.coherence_sample {
            let sample = sample.clamp(0.0, 1.0);
            inner.coherence += COHERENCE_ALPHA * (sample - inner.coherence);
            inner.coherence = inner.coherence.clamp(0.0, 1.0);
        }
        if let Some(sample) = delta.valence_sample {
            let sample = sample.clamp(-1.0, 1.0);
            inner.emotional_valence_ema += VALENCE_ALPHA * (sample - inner.emotional_valence_ema);
            inner.emotional_valence_ema = inner.emotional_valence_ema.clamp(-1.0, 1.0);
        }
        if let Some(ref options) = delta.future_options {
            let mut options = options.clone();
            if options.len() > self.future_capacity {
                // Evict from the front on overflow
                options.drain(..options.len() - self.future_capacity);
            }
            inner.future_options = options;
        }
        Ok(())
    }

    /// Record a committed thought into the rolling past context
    pub fn note_committed(&self, id: ThoughtId) {
        let mut inner = self.inner.lock().expect("shared state mutex poisoned");
        inner.past_context.push(id);
        if inner.past_context.len() > self.past_capacity {
            let excess = inner.past_context.len() - self.past_capacity;
            inner.past_context.drain(..excess);
        }
    }

    /// Point the focus at a working-memory entry (or clear it)
    pub fn set_focus(&self, focus: Option<ThoughtId>) {
        self.inner.lock().expect("shared state mutex poisoned").focus = focus;
    }

    /// Advance the step counter; wrapping to 0 completes a cycle
    ///
    /// Emits a cycle-boundary event on wrap.
    pub fn advance_step(&self) -> u8 {
        let (step, boundary) = {
            let mut inner = self.inner.lock().expect("shared state mutex poisoned");
            inner.current_step = (inner.current_step + 1) % STEPS_PER_CYCLE;
            if inner.current_step == 0 {
                inner.cycle_count += 1;
                (inner.current_step, Some(inner.cycle_count))
            } else {
                (inner.current_step, None)
            }
        };
        if let Some(cycle) = boundary {
            debug!(cycle, "cycle boundary");
            self.events.publish(CoreEvent::CycleBoundary { cycle });
        }
        step
    }

    /// Accumulate fatigue from work done during a step
    ///
    /// `load` is the fraction of recent steps that produced a thought;
    /// the update is monotonic within a step and clamped to `[0, 1]`.
    pub fn record_fatigue(&self, dt: Duration, load: f32, k: f32) {
        let mut inner = self.inner.lock().expect("shared state mutex poisoned");
        let gain = load.clamp(0.0, 1.0) * dt.as_secs_f32() * k;
        inner.fatigue = (inner.fatigue * FATIGUE_DECAY + gain).clamp(0.0, 1.0);
    }

    /// Decay fatigue while the core is idle
    pub fn rest(&self, dt: Duration) {
        let mut inner = self.inner.lock().expect("shared state mutex poisoned");
        let decay = FATIGUE_DECAY.powf((dt.as_secs_f32() * 10.0).max(1.0));
        inner.fatigue = (inner.fatigue * decay).clamp(0.0, 1.0);
    }
}
