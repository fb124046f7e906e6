//! Core Metrics
//!
//! Lock-free counters updated by the orchestrator and persistence workers,
//! with a cheap consistent-enough snapshot for the control surface. Gauges
//! (coherence, fatigue, queue depth) are refreshed once per step.

use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::types::EngineId;

/// Per-engine counter block
#[derive(Debug, Default)]
pub struct EngineCounters {
    /// Thoughts that passed validation and were committed
    pub thoughts: AtomicU64,

    /// Process errors, timeouts, and validation failures
    pub errors: AtomicU64,

    /// Pivotal barriers this engine missed
    pub missed_pivotals: AtomicU64,

    /// Dispatched steps that yielded no thought
    pub missing_thoughts: AtomicU64,
}

/// Atomic metric registry shared across tasks
#[derive(Debug, Default)]
pub struct CoreMetrics {
    pub engines: [EngineCounters; 3],

    /// Replies discarded at the sealing gate
    pub validation_failures: AtomicU64,

    /// Persistence tasks dropped on backpressure timeout
    pub persistence_dropped: AtomicU64,

    /// Persistence tasks that exhausted retries
    pub dead_letters: AtomicU64,

    /// Engines that asked for consolidation practice
    pub practice_requests: AtomicU64,

    /// Current persistence queue depth (gauge)
    pub queue_depth: AtomicUsize,

    /// Average wall-to-wall step duration in microseconds (gauge)
    pub avg_step_micros: AtomicU64,

    /// Current coherence scaled to 0..=10_000 (gauge)
    coherence_scaled: AtomicU32,

    /// Current fatigue scaled to 0..=10_000 (gauge)
    fatigue_scaled: AtomicU32,

    /// Triad index of the current step (diagnostics only)
    pub triad_index: AtomicU32,

    /// Completed cycles (mirrors shared state)
    pub cycles: AtomicU64,
}

/// Fixed-point scale for the f32 gauges
const GAUGE_SCALE: f32 = 10_000.0;

impl CoreMetrics {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn engine(&self, id: EngineId) -> &EngineCounters {
        &self.engines[id.index()]
    }

    /// Refresh the per-step gauges
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn record_step_gauges(
        &self,
        avg_step: Duration,
        coherence: f32,
        fatigue: f32,
        triad: u8,
        cycles: u64,
    ) {
        self.avg_step_micros
            .store(avg_step.as_micros() as u64, Ordering::Relaxed);
        self.coherence_scaled
            .store((coherence.clamp(0.0, 1.0) * GAUGE_SCALE) as u32, Ordering::Relaxed);
        self.fatigue_scaled
            .store((fatigue.clamp(0.0, 1.0) * GAUGE_SCALE) as u32, Ordering::Relaxed);
        self.triad_index.store(u32::from(triad), Ordering::Relaxed);
        self.cycles.store(cycles, Ordering::Relaxed);
    }

    /// Point-in-time copy of every counter and gauge
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            cycles: self.cycles.load(Ordering::Relaxed),
            engines: std::array::from_fn(|i| EngineSnapshot {
                thoughts: self.engines[i].thoughts.load(Ordering::Relaxed),
                errors: self.engines[i].errors.load(Ordering::Relaxed),
                missed_pivotals: self.engines[i].missed_pivotals.load(Ordering::Relaxed),
                missing_thoughts: self.engines[i].missing_thoughts.load(Ordering::Relaxed),
            }),
            validation_failures: self.validation_failures.load(Ordering::Relaxed),
            persistence_dropped: self.persistence_dropped.load(Ordering::Relaxed),
            dead_letters: self.dead_letters.load(Ordering::Relaxed),
            practice_requests: self.practice_requests.load(Ordering::Relaxed),
            queue_depth: self.queue_depth.load(Ordering::Relaxed),
            avg_step_duration_micros: self.avg_step_micros.load(Ordering::Relaxed),
            coherence: self.coherence_scaled.load(Ordering::Relaxed) as f32 / GAUGE_SCALE,
            fatigue: self.fatigue_scaled.load(Ordering::Relaxed) as f32 / GAUGE_SCALE,
            triad_index: self.triad_index.load(Ordering::Relaxed) as u8,
        }
    }

    /// Reload counters from a snapshot (checkpoint restore)
    pub fn restore(&self, snapshot: &MetricsSnapshot) {
        self.cycles.store(snapshot.cycles, Ordering::Relaxed);
        for (i, engine) in snapshot.engines.iter().enumerate() {
            self.engines[i].thoughts.store(engine.thoughts, Ordering::Relaxed);
            self.engines[i].errors.store(engine.errors, Ordering::Relaxed);
            self.engines[i]
                .missed_pivotals
                .store(engine.missed_pivotals, Ordering::Relaxed);
            self.engines[i]
                .missing_thoughts
                .store(engine.missing_thoughts, Ordering::Relaxed);
        }
        self.validation_failures
            .store(snapshot.validation_failures, Ordering::Relaxed);
        self.persistence_dropped
            .store(snapshot.persistence_dropped, Ordering::Relaxed);
        self.dead_letters.store(snapshot.dead_letters, Ordering::Relaxed);
        self.practice_requests
            .store(snapshot.practice_requests, Ordering::Relaxed);
    }
}

/// Per-engine snapshot block
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineSnapshot {
    pub thoughts: u64,
    pub errors: u64,
    pub missed_pivotals: u64,
    pub missing_thoughts: u64,
}

/// Point-in-time metrics for the control surface
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub cycles: u64,
    pub engines: [EngineSnapshot; 3],
    pub validation_failures: u64,
    pub persistence_dropped: u64,
    pub dead_letters: u64,
    pub practice_requests: u64,
    pub queue_depth: usize,
    pub avg_step_duration_micros: u64,
    pub coherence: f32,
    pub fatigue: f32,
    pub triad_index: u8,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn fresh_metrics_are_zero() {
        let metrics = CoreMetrics::new();
        let snap = metrics.snapshot();
        assert_eq!(snap.cycles, 0);
        assert_eq!(snap.validation_failures, 0);
        for engine in &snap.engines {
            assert_eq!(engine.thoughts, 0);
            assert_eq!(engine.missed_pivotals, 0);
        }
    }

    #[test]
    fn engine_counters_are_independent() {
        let metrics = CoreMetrics::new();
        metrics.engine(EngineId(1)).thoughts.fetch_add(3, Ordering::Relaxed);
        metrics
            .engine(EngineId(2))
            .missed_pivotals
            .fetch_add(1, Ordering::Relaxed);

        let snap = metrics.snapshot();
        assert_eq!(snap.engines[0].thoughts, 0);
        assert_eq!(snap.engines[1].thoughts, 3);
        assert_eq!(snap.engines[2].missed_pivotals, 1);
    }

    #[test]
    fn gauges_roundtrip_through_fixed_point() {
        let metrics = CoreMetrics::new();
        metrics.record_step_gauges(Duration::from_millis(3), 0.75, 0.25, 2, 9);
        let snap = metrics.snapshot();
        assert!((snap.coherence - 0.75).abs() < 0.001);
        assert!((snap.fatigue - 0.25).abs() < 0.001);
        assert_eq!(snap.triad_index, 2);
        assert_eq!(snap.cycles, 9);
        assert_eq!(snap.avg_step_duration_micros, 3000);
    }

    #[test]
    fn restore_reloads_counters() {
        let metrics = CoreMetrics::new();
        metrics.validation_failures.fetch_add(2, Ordering::Relaxed);
        metrics.engine(EngineId(0)).errors.fetch_add(5, Ordering::Relaxed);
        let snap = metrics.snapshot();

        let fresh = CoreMetrics::new();
        fresh.restore(&snap);
        assert_eq!(fresh.snapshot().validation_failures, 2);
        assert_eq!(fresh.snapshot().engines[0].errors, 5);
    }

    #[test]
    fn snapshot_serde_roundtrip() {
        let metrics = CoreMetrics::new();
        metrics.record_step_gauges(Duration::from_millis(1), 0.5, 0.1, 1, 4);
        let snap = metrics.snapshot();
        let json = serde_json::to_string(&snap).unwrap();
        let parsed: MetricsSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, snap);
    }
}
