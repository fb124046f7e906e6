//! Core Types for the Scheduling Cycle
//!
//! The fundamental building blocks:
//! - `Thought`: a sealed, immutable record produced by an engine at a step
//! - `ThoughtDraft`: the mutable precursor an engine hands back for sealing
//! - `StateDelta`: a scoped update to shared state returned alongside a draft
//! - `ContextSnapshot`: the slice of shared state visible at creation time
//!
//! Drafts become `Thought`s only through [`ThoughtDraft::seal`], which the
//! orchestrator calls after validation. Nothing else constructs a `Thought`,
//! so a sealed record can be cloned and shared freely without ever being
//! mutated again.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Number of steps in one full cycle
pub const STEPS_PER_CYCLE: u8 = 12;

/// The two steps at which all three engines rendezvous
pub const PIVOTAL_STEPS: [u8; 2] = [1, 7];

/// Unique identifier for a thought
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ThoughtId(pub Uuid);

impl ThoughtId {
    /// Create a new random thought ID
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ThoughtId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ThoughtId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of one of the three engines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EngineId(pub u8);

impl EngineId {
    /// All three engine ids in dispatch order
    pub const ALL: [EngineId; 3] = [EngineId(0), EngineId(1), EngineId(2)];

    /// Index into per-engine arrays
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl std::fmt::Display for EngineId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "engine-{}", self.0)
    }
}

/// Semantic category of a thought
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThoughtType {
    Reflective,
    Exploratory,
    Analytical,
    Creative,
    Predictive,
    Intentional,
}

/// Expression mode of a thought
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThoughtMode {
    Expressive,
    Reflective,
    Meta,
}

/// Role a step plays in the 12-step ring
///
/// Derived from the fixed step table; this is the single step taxonomy in
/// the crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepRole {
    AffordanceInteraction,
    PivotalRelevance,
    AnalyticalAffordance,
    CreativeAffordance,
    IntentionalAffordance,
    SalienceSimulation,
    AnalyticalSalience,
    ReflectiveSalience,
}

impl StepRole {
    /// Role of a step in the fixed table
    ///
    /// # Panics
    ///
    /// Panics if `step >= 12`; callers keep steps in `0..12` by invariant.
    #[must_use]
    pub fn of(step: u8) -> Self {
        match step {
            0 | 2 | 6 => Self::AffordanceInteraction,
            1 | 7 => Self::PivotalRelevance,
            3 => Self::AnalyticalAffordance,
            4 => Self::CreativeAffordance,
            5 => Self::IntentionalAffordance,
            8 | 10 => Self::SalienceSimulation,
            9 => Self::AnalyticalSalience,
            11 => Self::ReflectiveSalience,
            _ => unreachable!("step out of ring: {step}"),
        }
    }

    /// Thought type this role calls for
    #[must_use]
    pub const fn thought_type(self) -> ThoughtType {
        match self {
            Self::AffordanceInteraction => ThoughtType::Exploratory,
            Self::PivotalRelevance | Self::ReflectiveSalience => ThoughtType::Reflective,
            Self::AnalyticalAffordance | Self::AnalyticalSalience => ThoughtType::Analytical,
            Self::CreativeAffordance => ThoughtType::Creative,
            Self::IntentionalAffordance => ThoughtType::Intentional,
            Self::SalienceSimulation => ThoughtType::Predictive,
        }
    }
}

/// Whether a step is one of the two pivotal rendezvous points
#[must_use]
pub fn is_pivotal(step: u8) -> bool {
    PIVOTAL_STEPS.contains(&step)
}

/// Engines that own a step
///
/// Pivotal steps are owned by all three engines; every other step has a
/// single owner. The mapping is fixed; determinism of the whole cycle rests
/// on it.
#[must_use]
pub fn owners_of(step: u8) -> &'static [EngineId] {
    const AFFORDANCE: [EngineId; 1] = [EngineId(0)];
    const SALIENCE: [EngineId; 1] = [EngineId(2)];
    match step {
        1 | 7 => &EngineId::ALL,
        0 | 2 | 3 | 4 | 5 | 6 => &AFFORDANCE,
        8 | 9 | 10 | 11 => &SALIENCE,
        _ => unreachable!("step out of ring: {step}"),
    }
}

/// Triad index of a step (steps 4 apart form a triad)
///
/// Exposed in metrics for diagnostics only; nothing branches on it.
#[must_use]
pub const fn triad_of(step: u8) -> u8 {
    step % 4
}

/// An anticipated direction from the salience engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FutureOption {
    /// Short label for the anticipated direction
    pub tag: String,

    /// Anticipation strength (0.0 - 1.0)
    pub score: f32,
}

impl FutureOption {
    #[must_use]
    pub fn new(tag: impl Into<String>, score: f32) -> Self {
        Self {
            tag: tag.into(),
            score: score.clamp(0.0, 1.0),
        }
    }
}

/// The subset of shared state visible to a thought at creation time
///
/// Captured by the engine from the step message and sealed into the thought;
/// the `cycle` field is what the orchestrator checks against the live cycle
/// counter during validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextSnapshot {
    /// Cycle the thought was generated in
    pub cycle: u64,

    /// Focus item at generation time
    pub focus: Option<ThoughtId>,

    /// Recently committed thoughts visible at generation time
    pub past_context: Vec<ThoughtId>,

    /// Hypergraph concept nodes offered as related context
    pub related_concepts: Vec<String>,
}

/// A mutable thought precursor produced by an engine
///
/// Engines fill every field; the orchestrator validates and seals. A draft
/// that fails validation is discarded wholesale and never touches state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThoughtDraft {
    pub id: ThoughtId,
    pub content: String,
    pub thought_type: ThoughtType,
    pub mode: ThoughtMode,
    pub engine_id: EngineId,
    pub step_number: u8,
    pub importance: f32,
    pub emotional_valence: f32,
    pub context: ContextSnapshot,
}

impl ThoughtDraft {
    /// Seal the draft into an immutable thought record
    ///
    /// Only the orchestrator calls this, after validation has passed.
    #[must_use]
    pub fn seal(self, created_at: DateTime<Utc>) -> Thought {
        Thought {
            id: self.id,
            content: self.content,
            thought_type: self.thought_type,
            mode: self.mode,
            engine_id: self.engine_id,
            step_number: self.step_number,
            created_at,
            importance: self.importance,
            emotional_valence: self.emotional_valence,
            context: self.context,
        }
    }
}

/// A sealed, immutable thought
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Thought {
    /// Unique identifier
    pub id: ThoughtId,

    /// Generated content
    pub content: String,

    /// Semantic category
    pub thought_type: ThoughtType,

    /// Expression mode
    pub mode: ThoughtMode,

    /// Engine that produced this thought
    pub engine_id: EngineId,

    /// Step of the cycle it was produced at
    pub step_number: u8,

    /// Sealing time
    pub created_at: DateTime<Utc>,

    /// Importance weighting (0.0 - 1.0)
    pub importance: f32,

    /// Emotional valence (-1.0 to 1.0)
    pub emotional_valence: f32,

    /// Shared-state slice visible at creation
    pub context: ContextSnapshot,
}

impl Thought {
    /// One-line summary for event streams and logs
    #[must_use]
    pub fn summary(&self) -> String {
        let mut s: String = self.content.chars().take(80).collect();
        if self.content.chars().count() > 80 {
            s.push('…');
        }
        s
    }
}

/// A scoped update to shared state returned by an engine
///
/// Deltas are merged under the shared-state lock in engine-id order; a delta
/// whose `from_cycle` no longer matches the live cycle counter is stale and
/// rejected wholesale.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StateDelta {
    /// Cycle this delta was computed against
    pub from_cycle: u64,

    /// Per-thought coherence sample feeding the coherence EMA (0.0 - 1.0)
    pub coherence_sample: Option<f32>,

    /// Valence sample feeding the valence EMA (-1.0 to 1.0)
    pub valence_sample: Option<f32>,

    /// Replacement for the anticipated-directions sequence (salience engine)
    pub future_options: Option<Vec<FutureOption>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thought_id_is_unique() {
        let id1 = ThoughtId::new();
        let id2 = ThoughtId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn pivotal_steps_are_one_and_seven() {
        assert!(is_pivotal(1));
        assert!(is_pivotal(7));
        for step in [0, 2, 3, 4, 5, 6, 8, 9, 10, 11] {
            assert!(!is_pivotal(step), "step {step} must not be pivotal");
        }
    }

    #[test]
    fn ownership_table_matches_ring() {
        assert_eq!(owners_of(0), &[EngineId(0)]);
        assert_eq!(owners_of(1), &EngineId::ALL);
        assert_eq!(owners_of(6), &[EngineId(0)]);
        assert_eq!(owners_of(7), &EngineId::ALL);
        assert_eq!(owners_of(8), &[EngineId(2)]);
        assert_eq!(owners_of(11), &[EngineId(2)]);
    }

    #[test]
    fn every_step_has_an_owner() {
        for step in 0..STEPS_PER_CYCLE {
            assert!(!owners_of(step).is_empty());
        }
    }

    #[test]
    fn triads_are_steps_four_apart() {
        assert_eq!(triad_of(1), triad_of(5));
        assert_eq!(triad_of(5), triad_of(9));
        assert_eq!(triad_of(0), triad_of(8));
        assert_ne!(triad_of(0), triad_of(1));
    }

    #[test]
    fn step_roles_cover_the_ring() {
        assert_eq!(StepRole::of(0), StepRole::AffordanceInteraction);
        assert_eq!(StepRole::of(1), StepRole::PivotalRelevance);
        assert_eq!(StepRole::of(4), StepRole::CreativeAffordance);
        assert_eq!(StepRole::of(9), StepRole::AnalyticalSalience);
        assert_eq!(StepRole::of(11), StepRole::ReflectiveSalience);
    }

    #[test]
    fn role_thought_types() {
        assert_eq!(
            StepRole::AffordanceInteraction.thought_type(),
            ThoughtType::Exploratory
        );
        assert_eq!(
            StepRole::SalienceSimulation.thought_type(),
            ThoughtType::Predictive
        );
        assert_eq!(
            StepRole::PivotalRelevance.thought_type(),
            ThoughtType::Reflective
        );
    }

    #[test]
    fn seal_preserves_draft_fields() {
        let draft = ThoughtDraft {
            id: ThoughtId::new(),
            content: "a first pass over the focus".to_string(),
            thought_type: ThoughtType::Exploratory,
            mode: ThoughtMode::Expressive,
            engine_id: EngineId(0),
            step_number: 0,
            importance: 0.5,
            emotional_valence: 0.1,
            context: ContextSnapshot {
                cycle: 3,
                focus: None,
                past_context: vec![],
                related_concepts: vec![],
            },
        };
        let id = draft.id;
        let thought = draft.seal(Utc::now());
        assert_eq!(thought.id, id);
        assert_eq!(thought.step_number, 0);
        assert_eq!(thought.context.cycle, 3);
    }

    #[test]
    fn summary_truncates_long_content() {
        let draft = ThoughtDraft {
            id: ThoughtId::new(),
            content: "x".repeat(200),
            thought_type: ThoughtType::Analytical,
            mode: ThoughtMode::Reflective,
            engine_id: EngineId(1),
            step_number: 1,
            importance: 0.5,
            emotional_valence: 0.0,
            context: ContextSnapshot {
                cycle: 0,
                focus: None,
                past_context: vec![],
                related_concepts: vec![],
            },
        };
        let thought = draft.seal(Utc::now());
        assert_eq!(thought.summary().chars().count(), 81);
    }

    #[test]
    fn future_option_clamps_score() {
        let opt = FutureOption::new("drift", 1.5);
        assert_eq!(opt.score, 1.0);
        let opt = FutureOption::new("drift", -0.5);
        assert_eq!(opt.score, 0.0);
    }

    #[test]
    fn engine_ids_order() {
        let mut ids = vec![EngineId(2), EngineId(0), EngineId(1)];
        ids.sort();
        assert_eq!(ids, EngineId::ALL.to_vec());
    }
}
