//! Core Scheduling Components
//!
//! Shared state, working memory, the step clock, the orchestrator, and the
//! [`CognitiveCore`] control surface that owns the driver task.

pub mod clock;
pub mod orchestrator;
pub mod state;
pub mod types;
pub mod working_memory;

pub use orchestrator::{CoreError, CycleSummary, Orchestrator, RejectedThought, StepOutcome};

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::checkpoint::CoreSnapshot;
use crate::config::CoreConfig;
use crate::engines::ContentProvider;
use crate::events::{CoreEvent, EventBus};
use crate::graph::HypergraphStore;
use crate::metrics::MetricsSnapshot;
use orchestrator::OrchestratorShared;

/// Result of stopping the core
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StopReport {
    /// Whether persistence drained within the shutdown timeout
    pub persistence_drain_complete: bool,

    /// Total dead-lettered persistence tasks
    pub dead_lettered: u64,
}

enum RunState {
    /// Built but not started; the orchestrator is held here
    Idle(Box<Orchestrator>),

    /// The driver task owns the orchestrator
    Running(JoinHandle<Orchestrator>),

    /// Stopped and drained
    Stopped(StopReport),
}

/// Control surface over one core instance
///
/// `start`/`stop` are idempotent; `snapshot` and `metrics` are cheap reads
/// that work in every state.
pub struct CognitiveCore {
    handles: OrchestratorShared,
    run_state: RunState,
    snapshot_seq: AtomicU64,
}

impl CognitiveCore {
    /// Build a core with the given storage and content seams
    ///
    /// # Errors
    ///
    /// Fails on invalid configuration or engine spawn failure.
    pub async fn new(
        config: CoreConfig,
        store: Arc<dyn HypergraphStore>,
        provider: Arc<dyn ContentProvider>,
    ) -> Result<Self, CoreError> {
        let orchestrator = Orchestrator::spawn(config, store, provider).await?;
        Ok(Self::wrap(orchestrator))
    }

    /// Rebuild a core from a checkpoint
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
        let orchestrator = Orchestrator::restore(config, snapshot, store, provider).await?;
        Ok(Self::wrap(orchestrator))
    }

    fn wrap(orchestrator: Orchestrator) -> Self {
        let handles = orchestrator.shared_handles();
        Self {
            handles,
            run_state: RunState::Idle(Box::new(orchestrator)),
            snapshot_seq: AtomicU64::new(0),
        }
    }

    /// Start the driver task; a running core is left alone
    pub fn start(&mut self) {
        match std::mem::replace(&mut self.run_state, RunState::Stopped(StopReport {
            persistence_drain_complete: true,
            dead_lettered: 0,
        })) {
            RunState::Idle(mut orchestrator) => {
                let cancel = self.handles.cancel.clone();
                let interval = orchestrator.config.step_interval;
                let handle = tokio::spawn(async move {
                    info!("cognitive core driver started");
                    loop {
                        if cancel.is_cancelled() {
                            break;
                        }
                        match orchestrator.run_step().await {
                            Ok(StepOutcome::Cancelled) => break,
                            Ok(StepOutcome::Completed { .. }) => {}
                            Err(e) => {
                                error!(error = %e, "driver stopped on fatal error");
                                break;
                            }
                        }
                        if !interval.is_zero() {
                            tokio::select! {
                                () = cancel.cancelled() => break,
                                () = tokio::time::sleep(interval) => {}
                            }
                        }
                    }
                    *orchestrator
                });
                self.run_state = RunState::Running(handle);
            }
            other => {
                if matches!(other, RunState::Stopped(_)) {
                    warn!("start ignored: core already stopped");
                }
                self.run_state = other;
            }
        }
    }

    /// Signal cooperative cancellation without waiting for shutdown
    pub fn cancel(&self) {
        self.handles.cancel.cancel();
    }

    /// Stop the driver, drain persistence, and report
    ///
    /// Always returns; on drain timeout the report carries
    /// `persistence_drain_complete = false` with the dead-letter total.
    pub async fn stop(&mut self) -> StopReport {
        self.handles.cancel.cancel();
        let state = std::mem::replace(
            &mut self.run_state,
            RunState::Stopped(StopReport {
                persistence_drain_complete: true,
                dead_lettered: 0,
            }),
        );
        let report = match state {
            RunState::Idle(orchestrator) => {
                let (drained, dead) = orchestrator.shutdown().await;
                StopReport {
                    persistence_drain_complete: drained,
                    dead_lettered: dead,
                }
            }
            RunState::Running(handle) => match handle.await {
                Ok(orchestrator) => {
                    let (drained, dead) = orchestrator.shutdown().await;
                    StopReport {
                        persistence_drain_complete: drained,
                        dead_lettered: dead,
                    }
                }
                Err(e) => {
                    error!(error = %e, "driver task failed before shutdown");
                    StopReport {
                        persistence_drain_complete: false,
                        dead_lettered: self.handles.metrics.snapshot().dead_letters,
                    }
                }
            },
            RunState::Stopped(report) => report,
        };
        self.run_state = RunState::Stopped(report);
        report
    }

    /// Cheap read-only snapshot, valid in every run state
    #[must_use]
    pub fn snapshot(&self) -> CoreSnapshot {
        CoreSnapshot {
            timestamp: Utc::now(),
            sequence: self.snapshot_seq.fetch_add(1, Ordering::Relaxed) + 1,
            shared_state: self.handles.shared.snapshot(),
            working_memory: self
                .handles
                .working_memory
                .read()
                .expect("working memory lock poisoned")
                .view(),
            metrics: self.handles.metrics.snapshot(),
        }
    }

    /// Current metric counters and gauges
    #[must_use]
    pub fn metrics(&self) -> MetricsSnapshot {
        self.handles.metrics.snapshot()
    }

    /// Subscribe to the lossy observer event stream
    #[must_use]
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<CoreEvent> {
        self.handles.events.subscribe()
    }

    /// Event bus handle for wiring observers
    #[must_use]
    pub fn events(&self) -> EventBus {
        self.handles.events.clone()
    }

    /// Whether the driver task is currently running
    #[must_use]
    pub fn is_running(&self) -> bool {
        matches!(self.run_state, RunState::Running(_))
    }
}

impl std::fmt::Debug for CognitiveCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match self.run_state {
            RunState::Idle(_) => "idle",
            RunState::Running(_) => "running",
            RunState::Stopped(_) => "stopped",
        };
        f.debug_struct("CognitiveCore")
            .field("run_state", &state)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engines::ScriptedProvider;
    use crate::graph::memory::InMemoryGraph;
    use std::time::Duration;

    async fn core() -> CognitiveCore {
        let config = CoreConfig {
            step_interval: Duration::from_millis(5),
            ..CoreConfig::default()
        };
        let store = Arc::new(InMemoryGraph::new()) as Arc<dyn HypergraphStore>;
        let provider = Arc::new(ScriptedProvider::new()) as Arc<dyn ContentProvider>;
        CognitiveCore::new(config, store, provider)
            .await
            .expect("core must build")
    }

    #[tokio::test]
    async fn fresh_core_is_not_running() {
        let core = core().await;
        assert!(!core.is_running());
        let snapshot = core.snapshot();
        assert_eq!(snapshot.shared_state.current_step, 0);
        assert_eq!(snapshot.shared_state.cycle_count, 0);
    }

    #[tokio::test]
    async fn start_is_idempotent() {
        let mut core = core().await;
        core.start();
        assert!(core.is_running());
        core.start();
        assert!(core.is_running());
        core.stop().await;
    }

    #[tokio::test]
    async fn stop_always_returns_a_report() {
        let mut core = core().await;
        core.start();
        tokio::time::sleep(Duration::from_millis(30)).await;
        let report = core.stop().await;
        assert!(report.persistence_drain_complete);
        assert!(!core.is_running());

        // Second stop returns the cached report
        let again = core.stop().await;
        assert_eq!(again, report);
    }

    #[tokio::test]
    async fn stop_without_start_drains_cleanly() {
        let mut core = core().await;
        let report = core.stop().await;
        assert!(report.persistence_drain_complete);
        assert_eq!(report.dead_lettered, 0);
    }

    #[tokio::test]
    async fn snapshot_and_metrics_work_while_running() {
        let mut core = core().await;
        core.start();
        tokio::time::sleep(Duration::from_millis(40)).await;

        let snapshot = core.snapshot();
        assert!(snapshot.shared_state.current_step < 12);
        let metrics = core.metrics();
        assert!((0.0..=1.0).contains(&metrics.fatigue));

        core.stop().await;
    }

    #[tokio::test]
    async fn driver_advances_the_ring() {
        let mut core = core().await;
        let mut rx = core.subscribe();
        core.start();
        // 12 steps at 5ms pacing plus slack
        tokio::time::sleep(Duration::from_millis(400)).await;
        core.stop().await;

        let snapshot = core.snapshot();
        assert!(snapshot.shared_state.cycle_count >= 1);

        let mut boundary_seen = false;
        while let Ok(event) = rx.try_recv() {
            if matches!(event, CoreEvent::CycleBoundary { .. }) {
                boundary_seen = true;
            }
        }
        assert!(boundary_seen, "cycle boundary must be published");
    }

    #[tokio::test]
    async fn cancel_stops_the_driver() {
        let mut core = core().await;
        core.start();
        core.cancel();
        let report = core.stop().await;
        assert!(report.persistence_drain_complete);
    }
}
