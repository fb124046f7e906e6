//! Checkpointing
//!
//! Serializable snapshots of the whole core for crash recovery and
//! inspection. A snapshot captures shared state, the working-memory buffer,
//! and the metric counters; restoring one reproduces a core that continues
//! deterministically given the same subsequent engine replies.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::state::StateSnapshot;
use crate::core::working_memory::WorkingMemoryView;
use crate::metrics::MetricsSnapshot;

/// A full checkpoint of core state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreSnapshot {
    /// When the checkpoint was taken
    pub timestamp: DateTime<Utc>,

    /// Monotonic checkpoint sequence number
    pub sequence: u64,

    /// Shared cognitive state
    pub shared_state: StateSnapshot,

    /// Working-memory buffer and focus
    pub working_memory: WorkingMemoryView,

    /// Counter values at checkpoint time
    pub metrics: MetricsSnapshot,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::ThoughtId;
    use crate::metrics::CoreMetrics;

    #[test]
    fn snapshot_serde_roundtrip() {
        let snapshot = CoreSnapshot {
            timestamp: Utc::now(),
            sequence: 3,
            shared_state: StateSnapshot {
                coherence: 0.6,
                current_step: 5,
                cycle_count: 2,
                focus: Some(ThoughtId::new()),
                past_context: vec![ThoughtId::new(), ThoughtId::new()],
                future_options: vec![],
                fatigue: 0.2,
                emotional_valence_ema: 0.1,
            },
            working_memory: WorkingMemoryView {
                thoughts: vec![],
                focus: None,
            },
            metrics: CoreMetrics::new().snapshot(),
        };

        let json = serde_json::to_string(&snapshot).unwrap();
        let parsed: CoreSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.sequence, 3);
        assert_eq!(parsed.shared_state.current_step, 5);
        assert_eq!(parsed.shared_state.cycle_count, 2);
        assert_eq!(
            parsed.shared_state.focus,
            snapshot.shared_state.focus
        );
    }
}
