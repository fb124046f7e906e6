//! Engine Identities
//!
//! The three engine personas and their fixed step ownership. Identity is
//! content bias only - the control flow of the ring never branches on who
//! an engine is, just on which steps it owns.

use crate::core::types::{EngineId, StepRole, ThoughtMode, ThoughtType};

/// Fixed persona and ownership of one engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineProfile {
    pub id: EngineId,

    /// Short persona name used in logs and actor names
    pub name: &'static str,

    /// Steps this engine handles (pivotals appear in all three)
    pub owned_steps: &'static [u8],

    /// Mode this persona leans toward
    pub bias_mode: ThoughtMode,
}

/// Fatigue level above which every persona shifts into meta mode
const META_FATIGUE: f32 = 0.7;

impl EngineProfile {
    /// Engine 0: affordance/action - exploratory and intentional thoughts,
    /// expressive mode
    #[must_use]
    pub const fn affordance() -> Self {
        Self {
            id: EngineId(0),
            name: "affordance",
            owned_steps: &[0, 1, 2, 3, 4, 5, 6, 7],
            bias_mode: ThoughtMode::Expressive,
        }
    }

    /// Engine 1: relevance/present - reflective and analytical thoughts,
    /// required at every pivotal
    #[must_use]
    pub const fn relevance() -> Self {
        Self {
            id: EngineId(1),
            name: "relevance",
            owned_steps: &[1, 7],
            bias_mode: ThoughtMode::Reflective,
        }
    }

    /// Engine 2: salience/future - predictive and creative thoughts,
    /// maintains the anticipated-directions sequence
    #[must_use]
    pub const fn salience() -> Self {
        Self {
            id: EngineId(2),
            name: "salience",
            owned_steps: &[1, 7, 8, 9, 10, 11],
            bias_mode: ThoughtMode::Reflective,
        }
    }

    /// Profile for an engine id
    ///
    /// # Panics
    ///
    /// Panics on ids outside `{0, 1, 2}`; engine ids are fixed at three.
    #[must_use]
    pub fn for_engine(id: EngineId) -> Self {
        match id.0 {
            0 => Self::affordance(),
            1 => Self::relevance(),
            2 => Self::salience(),
            _ => unreachable!("no such engine: {id}"),
        }
    }

    /// Whether this engine handles a step
    #[must_use]
    pub fn owns(&self, step: u8) -> bool {
        self.owned_steps.contains(&step)
    }

    /// Whether this engine maintains the anticipated-directions sequence
    #[must_use]
    pub fn maintains_future_options(&self) -> bool {
        self.id == EngineId(2)
    }

    /// Thought type and mode for a step under the current fatigue
    ///
    /// The step's role decides the type; the persona decides the mode,
    /// except that high fatigue pushes every persona into meta mode.
    #[must_use]
    pub fn classify(&self, step: u8, fatigue: f32) -> (ThoughtType, ThoughtMode) {
        let thought_type = StepRole::of(step).thought_type();
        let mode = if fatigue > META_FATIGUE {
            ThoughtMode::Meta
        } else {
            self.bias_mode
        };
        (thought_type, mode)
    }

    /// Baseline importance for a step role, dampened by fatigue
    #[must_use]
    pub fn base_importance(&self, step: u8, fatigue: f32) -> f32 {
        let base = match StepRole::of(step) {
            StepRole::PivotalRelevance => 0.7,
            StepRole::AnalyticalAffordance | StepRole::AnalyticalSalience => 0.6,
            StepRole::CreativeAffordance | StepRole::SalienceSimulation => 0.55,
            StepRole::IntentionalAffordance | StepRole::ReflectiveSalience => 0.5,
            StepRole::AffordanceInteraction => 0.45,
        };
        (base * (1.0 - 0.3 * fatigue.clamp(0.0, 1.0))).clamp(0.05, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{is_pivotal, owners_of, STEPS_PER_CYCLE};

    #[test]
    fn profiles_cover_the_ownership_table() {
        for step in 0..STEPS_PER_CYCLE {
            for id in owners_of(step) {
                assert!(
                    EngineProfile::for_engine(*id).owns(step),
                    "{id} must own step {step}"
                );
            }
        }
    }

    #[test]
    fn every_profile_owns_both_pivotals() {
        for id in crate::core::types::EngineId::ALL {
            let profile = EngineProfile::for_engine(id);
            assert!(profile.owns(1));
            assert!(profile.owns(7));
        }
    }

    #[test]
    fn non_owners_reject_steps() {
        assert!(!EngineProfile::relevance().owns(0));
        assert!(!EngineProfile::relevance().owns(8));
        assert!(!EngineProfile::affordance().owns(9));
        assert!(!EngineProfile::salience().owns(3));
    }

    #[test]
    fn only_salience_maintains_future_options() {
        assert!(!EngineProfile::affordance().maintains_future_options());
        assert!(!EngineProfile::relevance().maintains_future_options());
        assert!(EngineProfile::salience().maintains_future_options());
    }

    #[test]
    fn classification_follows_step_role() {
        let (t, m) = EngineProfile::affordance().classify(0, 0.0);
        assert_eq!(t, ThoughtType::Exploratory);
        assert_eq!(m, ThoughtMode::Expressive);

        let (t, _) = EngineProfile::salience().classify(8, 0.0);
        assert_eq!(t, ThoughtType::Predictive);
    }

    #[test]
    fn high_fatigue_shifts_to_meta_mode() {
        let (_, mode) = EngineProfile::affordance().classify(0, 0.9);
        assert_eq!(mode, ThoughtMode::Meta);
    }

    #[test]
    fn fatigue_dampens_base_importance() {
        let profile = EngineProfile::affordance();
        let fresh = profile.base_importance(3, 0.0);
        let tired = profile.base_importance(3, 1.0);
        assert!(tired < fresh);
        assert!(tired >= 0.05);
    }

    #[test]
    fn pivotal_steps_carry_highest_base() {
        let profile = EngineProfile::relevance();
        assert!(profile.base_importance(1, 0.0) > profile.base_importance(0, 0.0));
        assert!(is_pivotal(1));
    }
}
