//! Inference Engines
//!
//! Three stateful engine tasks, one per persona, implemented as actors with
//! typed mailboxes. Engines never self-drive: the orchestrator calls them
//! with a `StepMsg` and a deadline, and at pivotal steps probes them with a
//! `PivotalMsg` first. Each engine owns its local state exclusively; the
//! only things it shares are the immutable snapshots it is handed.

pub mod profile;
pub mod provider;
pub mod types;

pub use profile::EngineProfile;
pub use provider::{
    ContentProvider, Generated, GenerationOptions, GenerationRequest, ProviderError,
    ScriptedAction, ScriptedProvider, StubProvider,
};
pub use types::{EngineOutput, EngineReply, PivotalMsg, PracticeRequest, StepMsg, SyncAck};

use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;

use ractor::{Actor, ActorProcessingErr, ActorRef, RpcReplyPort};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::core::types::{ContextSnapshot, FutureOption, StateDelta, ThoughtDraft, ThoughtId};

/// Fatigue level above which an engine asks for consolidation practice
const PRACTICE_FATIGUE: f32 = 0.75;

/// Messages accepted by an engine mailbox
pub enum EngineMessage {
    /// Process one step and reply with a thought draft + state delta
    Step {
        msg: StepMsg,
        reply: RpcReplyPort<EngineReply>,
    },

    /// Pivotal rendezvous probe; must answer within the pivotal timeout
    PivotalSync {
        msg: PivotalMsg,
        reply: RpcReplyPort<SyncAck>,
    },
}

/// Spawn arguments for one engine
pub struct EngineArgs {
    pub profile: EngineProfile,
    pub provider: Arc<dyn ContentProvider>,

    /// Advisory generation deadline forwarded to the provider
    pub engine_timeout: Duration,

    pub cancel: CancellationToken,
}

/// Mutable engine-local state, owned exclusively by the actor task
pub struct EngineLocalState {
    profile: EngineProfile,
    provider: Arc<dyn ContentProvider>,
    engine_timeout: Duration,
    cancel: CancellationToken,

    /// Last step this engine processed
    last_step: Option<u8>,

    /// Last thought this engine emitted
    last_thought: Option<ThoughtId>,

    /// Rolling hypothesis set (salience engine only)
    hypotheses: Vec<FutureOption>,
}

impl EngineLocalState {
    fn build_prompt(&self, msg: &StepMsg) -> String {
        let mut prompt = format!(
            "You are the {} engine at step {} of cycle {}.",
            self.profile.name, msg.step, msg.cycle
        );
        if let (Some(last), Some(_)) = (self.last_step, self.last_thought) {
            let _ = write!(prompt, " Your previous contribution was at step {last}.");
        }
        if let Some(focus) = msg
            .working_memory
            .focus
            .and_then(|id| msg.working_memory.thoughts.iter().find(|t| t.id == id))
        {
            let _ = write!(prompt, " Current focus: {}.", focus.summary());
        }
        if !msg.related_concepts.is_empty() {
            let names: Vec<&str> = msg
                .related_concepts
                .iter()
                .map(|n| n.content.as_str())
                .collect();
            let _ = write!(prompt, " Related concepts: {}.", names.join(", "));
        }
        if !msg.recent_episodes.is_empty() {
            let _ = write!(prompt, " Recent episodes: {}.", msg.recent_episodes.len());
        }
        // Cross-stream awareness: what the other engines have been producing
        let foreign = msg
            .working_memory
            .thoughts
            .iter()
            .filter(|t| t.engine_id != self.profile.id)
            .count();
        if foreign > 0 {
            let _ = write!(prompt, " Other streams contributed {foreign} recent thoughts.");
        }
        if msg.state.fatigue > 0.5 {
            let _ = write!(prompt, " Fatigue is elevated ({:.2}).", msg.state.fatigue);
        }
        if !msg.state.future_options.is_empty() {
            let tags: Vec<&str> = msg
                .state
                .future_options
                .iter()
                .map(|o| o.tag.as_str())
                .collect();
            let _ = write!(prompt, " Anticipated directions: {}.", tags.join(", "));
        }
        prompt
    }

    /// Coherence sample: how well this output sits with the rest of the
    /// streams (importance agreement plus cross-stream presence)
    fn coherence_sample(&self, msg: &StepMsg, importance: f32) -> f32 {
        let total = msg.working_memory.thoughts.len();
        if total == 0 {
            return importance.clamp(0.0, 1.0);
        }
        let foreign = msg
            .working_memory
            .thoughts
            .iter()
            .filter(|t| t.engine_id != self.profile.id)
            .count();
        let cross = foreign as f32 / total as f32;
        ((importance + cross) / 2.0).clamp(0.0, 1.0)
    }

    /// Fold a produced thought into the rolling hypothesis set
    fn update_hypotheses(&mut self, content: &str, importance: f32, capacity: usize) {
        let tag: String = content
            .split_whitespace()
            .rev()
            .take(2)
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect::<Vec<_>>()
            .join(" ");
        if tag.is_empty() {
            return;
        }
        self.hypotheses.push(FutureOption::new(tag, importance));
        self.hypotheses
            .sort_by(|a, b| b.score.total_cmp(&a.score));
        self.hypotheses.truncate(capacity);
    }

    async fn process_step(&mut self, msg: StepMsg) -> EngineReply {
        if msg.cancel.is_cancelled() || self.cancel.is_cancelled() {
            return EngineReply::Cancelled;
        }

        let (thought_type, mode) = self.profile.classify(msg.step, msg.state.fatigue);
        let request = GenerationRequest {
            engine_id: self.profile.id,
            step: msg.step,
            cycle: msg.cycle,
            thought_type,
            mode,
            prompt: self.build_prompt(&msg),
            options: GenerationOptions {
                temperature: 0.7,
                max_tokens: 256,
                timeout: self.engine_timeout,
            },
        };

        let generated = tokio::select! {
            () = msg.cancel.cancelled() => return EngineReply::Cancelled,
            result = self.provider.generate(request) => result,
        };

        let mut delta = StateDelta {
            from_cycle: msg.cycle,
            ..StateDelta::default()
        };

        match generated {
            Ok(generated) => {
                // Hints pass through unclamped; the orchestrator's sealing
                // gate is the range enforcer
                let importance = generated
                    .importance
                    .unwrap_or_else(|| self.profile.base_importance(msg.step, msg.state.fatigue));
                let valence = generated.valence.unwrap_or(0.0);

                delta.coherence_sample = Some(self.coherence_sample(&msg, importance));
                delta.valence_sample = Some(valence);
                if self.profile.maintains_future_options() {
                    self.update_hypotheses(
                        &generated.content,
                        importance,
                        msg.state.future_options.len().max(5),
                    );
                    delta.future_options = Some(self.hypotheses.clone());
                }

                let draft = ThoughtDraft {
                    id: generated.thought_id.unwrap_or_else(ThoughtId::new),
                    content: generated.content,
                    thought_type,
                    mode,
                    engine_id: self.profile.id,
                    step_number: msg.step,
                    importance,
                    emotional_valence: valence,
                    context: ContextSnapshot {
                        cycle: msg.cycle,
                        focus: msg.state.focus,
                        past_context: msg.state.past_context.clone(),
                        related_concepts: msg
                            .related_concepts
                            .iter()
                            .map(|n| n.id.clone())
                            .collect(),
                    },
                };

                self.last_step = Some(msg.step);
                self.last_thought = Some(draft.id);

                let practice_request = if msg.state.fatigue > PRACTICE_FATIGUE {
                    Some(PracticeRequest {
                        topic: format!("{} consolidation", self.profile.name),
                        urgency: msg.state.fatigue,
                    })
                } else {
                    None
                };

                EngineReply::Produced(Box::new(EngineOutput {
                    thought: Some(draft),
                    delta,
                    practice_request,
                }))
            }
            Err(ProviderError::NoContent) => {
                // Delta-only contribution: the engine stays in the
                // conversation without adding a thought
                self.last_step = Some(msg.step);
                EngineReply::Produced(Box::new(EngineOutput {
                    thought: None,
                    delta,
                    practice_request: None,
                }))
            }
            Err(e) => {
                warn!(engine = %self.profile.id, step = msg.step, error = %e, "generation failed");
                EngineReply::Failed {
                    reason: e.to_string(),
                }
            }
        }
    }

    async fn process_pivotal(&self, msg: PivotalMsg) -> SyncAck {
        if self.cancel.is_cancelled() {
            return SyncAck::NotReady {
                reason: "cancelled".to_string(),
            };
        }
        let probe = self.provider.prepare_pivotal(self.profile.id, msg.step);
        match tokio::time::timeout(msg.deadline, probe).await {
            Ok(Ok(())) => SyncAck::Ready,
            Ok(Err(e)) => SyncAck::NotReady {
                reason: e.to_string(),
            },
            Err(_) => SyncAck::NotReady {
                reason: format!("readiness probe exceeded {:?}", msg.deadline),
            },
        }
    }
}

/// One inference engine as an actor
pub struct EngineActor;

#[ractor::async_trait]
impl Actor for EngineActor {
    type Msg = EngineMessage;
    type State = EngineLocalState;
    type Arguments = EngineArgs;

    async fn pre_start(
        &self,
        _myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        debug!(engine = %args.profile.id, name = args.profile.name, "engine starting");
        Ok(EngineLocalState {
            profile: args.profile,
            provider: args.provider,
            engine_timeout: args.engine_timeout,
            cancel: args.cancel,
            last_step: None,
            last_thought: None,
            hypotheses: Vec::new(),
        })
    }

    async fn handle(
        &self,
        _myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            EngineMessage::Step { msg, reply } => {
                let response = state.process_step(msg).await;
                if let Err(e) = reply.send(response) {
                    debug!(engine = %state.profile.id, "step reply dropped: {:?}", e);
                }
            }
            EngineMessage::PivotalSync { msg, reply } => {
                let response = state.process_pivotal(msg).await;
                if let Err(e) = reply.send(response) {
                    debug!(engine = %state.profile.id, "pivotal ack dropped: {:?}", e);
                }
            }
        }
        Ok(())
    }
}

/// Spawn the three engine actors
///
/// # Errors
///
/// Returns the ractor spawn error if any actor fails to start.
pub async fn spawn_engines(
    provider: Arc<dyn ContentProvider>,
    engine_timeout: Duration,
    cancel: &CancellationToken,
) -> Result<Vec<ActorRef<EngineMessage>>, ractor::SpawnErr> {
    let mut refs = Vec::with_capacity(3);
    for id in crate::core::types::EngineId::ALL {
        let profile = EngineProfile::for_engine(id);
        let (actor_ref, _handle) = Actor::spawn(
            None,
            EngineActor,
            EngineArgs {
                profile,
                provider: Arc::clone(&provider),
                engine_timeout,
                cancel: cancel.child_token(),
            },
        )
        .await?;
        refs.push(actor_ref);
    }
    Ok(refs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::state::StateSnapshot;
    use crate::core::working_memory::WorkingMemoryView;
    use ractor::rpc::CallResult;

    fn step_msg(step: u8, cycle: u64) -> StepMsg {
        StepMsg {
            step,
            cycle,
            state: StateSnapshot {
                coherence: 0.5,
                current_step: step,
                cycle_count: cycle,
                focus: None,
                past_context: vec![],
                future_options: vec![],
                fatigue: 0.0,
                emotional_valence_ema: 0.0,
            },
            related_concepts: vec![],
            recent_episodes: vec![],
            working_memory: WorkingMemoryView {
                thoughts: vec![],
                focus: None,
            },
            cancel: CancellationToken::new(),
        }
    }

    async fn spawn_one(provider: Arc<dyn ContentProvider>, id: u8) -> ActorRef<EngineMessage> {
        let (actor_ref, _) = Actor::spawn(
            None,
            EngineActor,
            EngineArgs {
                profile: EngineProfile::for_engine(crate::core::types::EngineId(id)),
                provider,
                engine_timeout: Duration::from_secs(3),
                cancel: CancellationToken::new(),
            },
        )
        .await
        .expect("engine must spawn");
        actor_ref
    }

    #[tokio::test]
    async fn engine_produces_scripted_thought() {
        let provider = Arc::new(ScriptedProvider::new());
        provider.produce(crate::core::types::EngineId(0), 0, "T00", 0.5, 0.0);
        let engine = spawn_one(provider, 0).await;

        let result = engine
            .call(
                |reply| EngineMessage::Step {
                    msg: step_msg(0, 0),
                    reply,
                },
                Some(Duration::from_secs(2)),
            )
            .await
            .expect("call must succeed");

        match result {
            CallResult::Success(EngineReply::Produced(output)) => {
                let draft = output.thought.expect("thought expected");
                assert_eq!(draft.content, "T00");
                assert_eq!(draft.step_number, 0);
                assert_eq!(draft.engine_id, crate::core::types::EngineId(0));
                assert_eq!(output.delta.from_cycle, 0);
            }
            other => panic!("unexpected reply: {other:?}"),
        }
        engine.stop(None);
    }

    #[tokio::test]
    async fn silent_slot_yields_delta_only_reply() {
        let provider = Arc::new(ScriptedProvider::new());
        let engine = spawn_one(provider, 1).await;

        let result = engine
            .call(
                |reply| EngineMessage::Step {
                    msg: step_msg(1, 0),
                    reply,
                },
                Some(Duration::from_secs(2)),
            )
            .await
            .expect("call must succeed");

        match result {
            CallResult::Success(EngineReply::Produced(output)) => {
                assert!(output.thought.is_none());
            }
            other => panic!("unexpected reply: {other:?}"),
        }
        engine.stop(None);
    }

    #[tokio::test]
    async fn failure_surfaces_as_failed_reply() {
        let provider = Arc::new(ScriptedProvider::new());
        provider.fail(crate::core::types::EngineId(2), 9, "offline");
        let engine = spawn_one(provider, 2).await;

        let result = engine
            .call(
                |reply| EngineMessage::Step {
                    msg: step_msg(9, 0),
                    reply,
                },
                Some(Duration::from_secs(2)),
            )
            .await
            .expect("call must succeed");

        assert!(matches!(
            result,
            CallResult::Success(EngineReply::Failed { .. })
        ));
        engine.stop(None);
    }

    #[tokio::test]
    async fn cancelled_token_short_circuits() {
        let provider = Arc::new(ScriptedProvider::new());
        provider.produce(crate::core::types::EngineId(0), 0, "T00", 0.5, 0.0);
        let engine = spawn_one(provider, 0).await;

        let mut msg = step_msg(0, 0);
        msg.cancel = CancellationToken::new();
        msg.cancel.cancel();

        let result = engine
            .call(
                |reply| EngineMessage::Step { msg, reply },
                Some(Duration::from_secs(2)),
            )
            .await
            .expect("call must succeed");

        assert!(matches!(result, CallResult::Success(EngineReply::Cancelled)));
        engine.stop(None);
    }

    #[tokio::test]
    async fn pivotal_ack_ready_by_default() {
        let provider = Arc::new(ScriptedProvider::new());
        let engine = spawn_one(provider, 1).await;

        let result = engine
            .call(
                |reply| EngineMessage::PivotalSync {
                    msg: PivotalMsg {
                        step: 1,
                        cycle: 0,
                        state: step_msg(1, 0).state,
                        deadline: Duration::from_secs(2),
                    },
                    reply,
                },
                Some(Duration::from_secs(2)),
            )
            .await
            .expect("call must succeed");

        assert!(matches!(result, CallResult::Success(SyncAck::Ready)));
        engine.stop(None);
    }

    #[tokio::test]
    async fn pivotal_delay_acks_not_ready_within_deadline() {
        let provider = Arc::new(ScriptedProvider::new());
        provider.delay(crate::core::types::EngineId(2), 7, Duration::from_secs(10));
        let engine = spawn_one(provider, 2).await;

        let result = engine
            .call(
                |reply| EngineMessage::PivotalSync {
                    msg: PivotalMsg {
                        step: 7,
                        cycle: 0,
                        state: step_msg(7, 0).state,
                        deadline: Duration::from_millis(100),
                    },
                    reply,
                },
                Some(Duration::from_secs(1)),
            )
            .await
            .expect("call transport must succeed");

        assert!(matches!(
            result,
            CallResult::Success(SyncAck::NotReady { .. })
        ));
        engine.stop(None);
    }

    #[tokio::test]
    async fn salience_engine_returns_future_options() {
        let provider = Arc::new(ScriptedProvider::new());
        provider.produce(
            crate::core::types::EngineId(2),
            8,
            "projection toward novelty",
            0.8,
            0.1,
        );
        let engine = spawn_one(provider, 2).await;

        let result = engine
            .call(
                |reply| EngineMessage::Step {
                    msg: step_msg(8, 0),
                    reply,
                },
                Some(Duration::from_secs(2)),
            )
            .await
            .expect("call must succeed");

        match result {
            CallResult::Success(EngineReply::Produced(output)) => {
                let options = output.delta.future_options.expect("salience sets options");
                assert!(!options.is_empty());
                assert_eq!(options[0].tag, "toward novelty");
            }
            other => panic!("unexpected reply: {other:?}"),
        }
        engine.stop(None);
    }
}
