//! Step execution
//!
//! `run_step` and the reply-application path: dispatch, validation, sealing,
//! delta merge, working-memory insertion, and persistence enqueue.

use std::sync::atomic::Ordering;

use chrono::Utc;
use futures::future::join_all;
use ractor::rpc::CallResult;
use tracing::{debug, warn};

use crate::core::state::StateSnapshot;
use crate::core::types::{
    is_pivotal, owners_of, triad_of, EngineId, STEPS_PER_CYCLE,
};
use crate::engines::{EngineMessage, EngineOutput, EngineReply, StepMsg};
use crate::events::CoreEvent;
use crate::graph::{HypergraphNode, NodeType};
use crate::persistence::{PersistenceError, PersistenceTask};

use super::{CoreError, CycleSummary, Orchestrator, StepOutcome};

/// Fatigue level above which a rest recommendation is emitted
const REST_THRESHOLD: f32 = 0.8;

/// How one engine's dispatch resolved
#[derive(Debug)]
pub(crate) enum DispatchOutcome {
    Replied(EngineReply),
    TimedOut,
    Transport(String),
}

impl Orchestrator {
    /// Process the current step and advance the ring
    ///
    /// Cancellation is checked between steps only; a cancelled core leaves
    /// the step counter exactly where it was.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Fatal` when an internal invariant breaks; the
    /// orchestrator halts and preserves the last consistent state.
    pub async fn run_step(&mut self) -> Result<StepOutcome, CoreError> {
        if self.halted {
            return Err(CoreError::Halted);
        }
        if self.cancel.is_cancelled() {
            return Ok(StepOutcome::Cancelled);
        }

        let started = self.clock.start_step();
        let step = self.shared.current_step();
        let cycle = self.shared.cycle_count();

        if step == 0 {
            // Degraded mode resets at the cycle boundary
            self.engine_status = Default::default();
        }

        let snapshot = self.shared.snapshot();
        let (related_concepts, recent_episodes) = self.fetch_context(&snapshot).await;

        let participants: Vec<EngineId> = if is_pivotal(step) {
            let outcome = self.pivotal_barrier(step, cycle, snapshot.clone()).await;
            if !outcome.missed.is_empty() {
                warn!(step, cycle, missed = ?outcome.missed, "pivotal proceeding without all engines");
            }
            outcome.ready
        } else {
            owners_of(step)
                .iter()
                .copied()
                .filter(|id| {
                    let degraded = self.engine_status[id.index()].degraded;
                    if degraded {
                        debug!(engine = %id, step, "degraded engine skipped");
                        self.metrics
                            .engine(*id)
                            .missing_thoughts
                            .fetch_add(1, Ordering::Relaxed);
                    }
                    !degraded
                })
                .collect()
        };

        let replies = self
            .dispatch_step(step, cycle, &snapshot, &related_concepts, &recent_episodes, &participants)
            .await;

        let mut produced = 0usize;
        for (engine_id, outcome) in replies {
            self.apply_reply(engine_id, step, cycle, outcome, &mut produced)
                .await?;
        }

        let elapsed = started.elapsed();
        self.clock.record_step(elapsed, produced > 0);
        self.shared
            .record_fatigue(elapsed, self.clock.load(), self.config.fatigue_k);

        let fatigue = self.shared.fatigue();
        if fatigue > REST_THRESHOLD {
            if !self.rest_flagged {
                self.rest_flagged = true;
                self.events.publish(CoreEvent::RestRecommended { fatigue });
            }
        } else {
            self.rest_flagged = false;
        }

        self.shared.advance_step();

        let after = self.shared.snapshot();
        self.metrics.record_step_gauges(
            self.clock.average_step_duration(),
            after.coherence,
            after.fatigue,
            triad_of(after.current_step),
            after.cycle_count,
        );
        self.metrics
            .queue_depth
            .store(self.pipeline.depth(), Ordering::Relaxed);

        Ok(StepOutcome::Completed {
            step,
            cycle,
            produced,
        })
    }

    /// Drive up to one full cycle of steps, stopping early on cancellation
    ///
    /// # Errors
    ///
    /// Propagates fatal errors from `run_step`.
    pub async fn run_cycle(&mut self) -> Result<CycleSummary, CoreError> {
        let cycle = self.shared.cycle_count();
        let mut thoughts_committed = 0;
        for _ in 0..STEPS_PER_CYCLE {
            match self.run_step().await? {
                StepOutcome::Completed { produced, .. } => thoughts_committed += produced,
                StepOutcome::Cancelled => break,
            }
        }
        Ok(CycleSummary {
            cycle,
            thoughts_committed,
        })
    }

    /// Best-effort hypergraph context: recent episodes plus concepts related
    /// to the current focus; empty on any store error
    async fn fetch_context(
        &self,
        snapshot: &StateSnapshot,
    ) -> (Vec<HypergraphNode>, Vec<HypergraphNode>) {
        let episodes = self
            .store
            .query_by_type(NodeType::Episode, 5)
            .await
            .unwrap_or_default();

        let concepts = match snapshot.focus {
            Some(focus) => match self.store.edges_from(&focus.to_string()).await {
                Ok(edges) => {
                    let mut concepts = Vec::new();
                    for edge in edges {
                        if concepts.len() >= 3 {
                            break;
                        }
                        if let Ok(node) = self.store.get_node(&edge.target_id).await {
                            if node.node_type == NodeType::Concept {
                                concepts.push(node);
                            }
                        }
                    }
                    concepts
                }
                Err(e) => {
                    debug!(error = %e, "focus context lookup failed");
                    Vec::new()
                }
            },
            None => Vec::new(),
        };

        (concepts, episodes)
    }

    /// Dispatch the step message to every participant concurrently,
    /// returning outcomes in engine-id order
    async fn dispatch_step(
        &self,
        step: u8,
        cycle: u64,
        snapshot: &StateSnapshot,
        related_concepts: &[HypergraphNode],
        recent_episodes: &[HypergraphNode],
        participants: &[EngineId],
    ) -> Vec<(EngineId, DispatchOutcome)> {
        let wm_view = self
            .working_memory
            .read()
            .expect("working memory lock poisoned")
            .view();

        let calls = participants.iter().map(|id| {
            let engine = self.engines[id.index()].clone();
            let msg = StepMsg {
                step,
                cycle,
                state: snapshot.clone(),
                related_concepts: related_concepts.to_vec(),
                recent_episodes: recent_episodes.to_vec(),
                working_memory: wm_view.clone(),
                cancel: self.cancel.clone(),
            };
            let timeout = self.config.step_timeout;
            async move {
                match engine
                    .call(|reply| EngineMessage::Step { msg, reply }, Some(timeout))
                    .await
                {
                    Ok(CallResult::Success(reply)) => DispatchOutcome::Replied(reply),
                    Ok(CallResult::Timeout) => DispatchOutcome::TimedOut,
                    Ok(CallResult::SenderError) => {
                        DispatchOutcome::Transport("reply channel dropped".to_string())
                    }
                    Err(e) => DispatchOutcome::Transport(e.to_string()),
                }
            }
        });

        participants
            .iter()
            .copied()
            .zip(join_all(calls).await)
            .collect()
    }

    /// Apply one engine's outcome in the fixed order: validate, seal, merge
    /// delta, insert into working memory, enqueue persistence
    async fn apply_reply(
        &mut self,
        engine_id: EngineId,
        step: u8,
        cycle: u64,
        outcome: DispatchOutcome,
        produced: &mut usize,
    ) -> Result<(), CoreError> {
        match outcome {
            DispatchOutcome::Replied(EngineReply::Produced(output)) => {
                let EngineOutput {
                    thought,
                    delta,
                    practice_request,
                } = *output;

                if delta.from_cycle != cycle {
                    warn!(engine = %engine_id, step, cycle, delta_cycle = delta.from_cycle, "stale delta, reply discarded");
                    self.metrics
                        .validation_failures
                        .fetch_add(1, Ordering::Relaxed);
                    self.note_engine_error(engine_id, cycle);
                    return Ok(());
                }

                match thought {
                    Some(draft) => {
                        if let Err(rejection) = self.validate_draft(&draft, engine_id, step, cycle)
                        {
                            warn!(engine = %engine_id, step, cycle, %rejection, "thought rejected at sealing gate");
                            self.metrics
                                .validation_failures
                                .fetch_add(1, Ordering::Relaxed);
                            self.note_engine_error(engine_id, cycle);
                            return Ok(());
                        }

                        if let Err(e) = self.shared.apply_delta(&delta) {
                            // Staleness was checked above; reaching this
                            // means the cycle advanced mid-step
                            warn!(engine = %engine_id, step, error = %e, "delta rejected");
                        }

                        let sealed = draft.seal(Utc::now());
                        self.seen_ids.insert(sealed.id);

                        let prior_focus = {
                            let mut wm = self
                                .working_memory
                                .write()
                                .expect("working memory lock poisoned");
                            let prior_focus = wm.focus();
                            match wm.add(sealed.clone()) {
                                Ok(Some(evicted)) => {
                                    debug!(evicted = %evicted.id, importance = evicted.importance, "working memory evicted");
                                }
                                Ok(None) => {}
                                Err(e) => {
                                    self.halted = true;
                                    return Err(CoreError::Fatal {
                                        reason: e.to_string(),
                                    });
                                }
                            }
                            self.shared.set_focus(wm.focus());
                            prior_focus
                        };
                        self.shared.note_committed(sealed.id);

                        self.metrics
                            .engine(engine_id)
                            .thoughts
                            .fetch_add(1, Ordering::Relaxed);
                        self.engine_status[engine_id.index()].consecutive_errors = 0;
                        *produced += 1;

                        self.events.publish(CoreEvent::ThoughtCommitted {
                            cycle,
                            step,
                            engine_id,
                            thought_id: sealed.id,
                            content_summary: sealed.summary(),
                            importance: sealed.importance,
                            valence: sealed.emotional_valence,
                        });

                        let task = PersistenceTask {
                            thought: sealed,
                            prior_focus,
                        };
                        match self.pipeline.enqueue(task, self.config.persist_timeout).await {
                            Ok(()) => {}
                            Err(PersistenceError::QueueFull { waited }) => {
                                warn!(engine = %engine_id, step, ?waited, "persistence task dropped on backpressure");
                            }
                            Err(PersistenceError::Closed) => {
                                warn!(engine = %engine_id, step, "persistence pipeline closed");
                            }
                        }
                    }
                    None => {
                        // Delta-only contribution
                        if let Err(e) = self.shared.apply_delta(&delta) {
                            warn!(engine = %engine_id, step, error = %e, "delta rejected");
                        }
                        self.engine_status[engine_id.index()].consecutive_errors = 0;
                    }
                }

                if let Some(practice) = practice_request {
                    self.metrics.practice_requests.fetch_add(1, Ordering::Relaxed);
                    self.events.publish(CoreEvent::PracticeRequested {
                        engine_id,
                        topic: practice.topic,
                    });
                }
                Ok(())
            }
            DispatchOutcome::Replied(EngineReply::Cancelled) => {
                debug!(engine = %engine_id, step, "engine abandoned step on cancellation");
                Ok(())
            }
            DispatchOutcome::Replied(EngineReply::Failed { reason }) => {
                warn!(engine = %engine_id, step, reason, "engine step failed");
                self.metrics
                    .engine(engine_id)
                    .missing_thoughts
                    .fetch_add(1, Ordering::Relaxed);
                self.note_engine_error(engine_id, cycle);
                Ok(())
            }
            DispatchOutcome::TimedOut => {
                warn!(engine = %engine_id, step, "engine reply timed out");
                self.metrics
                    .engine(engine_id)
                    .missing_thoughts
                    .fetch_add(1, Ordering::Relaxed);
                self.note_engine_error(engine_id, cycle);
                Ok(())
            }
            DispatchOutcome::Transport(reason) => {
                warn!(engine = %engine_id, step, reason, "engine dispatch failed");
                self.metrics
                    .engine(engine_id)
                    .missing_thoughts
                    .fetch_add(1, Ordering::Relaxed);
                self.note_engine_error(engine_id, cycle);
                Ok(())
            }
        }
    }

    /// Record an engine error; two in a row within a cycle degrade it
    fn note_engine_error(&mut self, engine_id: EngineId, cycle: u64) {
        self.metrics
            .engine(engine_id)
            .errors
            .fetch_add(1, Ordering::Relaxed);
        let status = &mut self.engine_status[engine_id.index()];
        status.consecutive_errors = status.consecutive_errors.saturating_add(1);
        if status.consecutive_errors >= 2 && !status.degraded {
            status.degraded = true;
            warn!(engine = %engine_id, cycle, "engine degraded for the rest of the cycle");
            self.events
                .publish(CoreEvent::EngineDegraded { engine_id, cycle });
        }
    }
}
