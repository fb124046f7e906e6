//! Content Provider Seam
//!
//! Engines never generate text themselves; they call a [`ContentProvider`].
//! Production wiring points this at an LLM client. The crate ships two
//! local implementations:
//!
//! - [`StubProvider`]: runs the core without any model, synthesizing short
//!   content lines with randomized salience hints
//! - [`ScriptedProvider`]: recorded replies keyed by (engine, step) for
//!   deterministic tests, including delay and failure injection

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use thiserror::Error;

use crate::core::types::{EngineId, ThoughtId, ThoughtMode, ThoughtType};

/// Content generation errors
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("generation timed out after {after:?}")]
    Timeout { after: Duration },

    #[error("provider unavailable: {reason}")]
    Unavailable { reason: String },

    /// The provider has nothing for this slot; the engine replies with a
    /// state delta only
    #[error("no content for this slot")]
    NoContent,
}

/// Options forwarded with every generation call
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationOptions {
    pub temperature: f32,
    pub max_tokens: u32,

    /// Advisory deadline; providers are required to be cancellable within it
    pub timeout: Duration,
}

/// One generation request from an engine
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub engine_id: EngineId,
    pub step: u8,
    pub cycle: u64,
    pub thought_type: ThoughtType,
    pub mode: ThoughtMode,

    /// Assembled persona + context prompt
    pub prompt: String,

    pub options: GenerationOptions,
}

/// Successful generation result
#[derive(Debug, Clone)]
pub struct Generated {
    pub content: String,

    /// Importance hint; the engine falls back to its role baseline
    pub importance: Option<f32>,

    /// Valence hint
    pub valence: Option<f32>,

    /// Pre-assigned thought id; scripted runs use this for determinism
    pub thought_id: Option<ThoughtId>,
}

/// Pluggable content generation
#[async_trait]
pub trait ContentProvider: Send + Sync {
    /// Generate content for a step
    async fn generate(&self, request: GenerationRequest) -> Result<Generated, ProviderError>;

    /// Readiness probe ahead of a pivotal step
    ///
    /// The default is always ready; scripted providers use this to exercise
    /// barrier timeouts.
    async fn prepare_pivotal(&self, _engine_id: EngineId, _step: u8) -> Result<(), ProviderError> {
        Ok(())
    }
}

// =============================================================================
// Stub provider
// =============================================================================

/// Model-free provider that synthesizes short content lines
///
/// Salience hints are randomized around the request's type so the core
/// produces a plausible texture without any external dependency.
#[derive(Debug, Default)]
pub struct StubProvider;

impl StubProvider {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ContentProvider for StubProvider {
    async fn generate(&self, request: GenerationRequest) -> Result<Generated, ProviderError> {
        let verb = match request.thought_type {
            ThoughtType::Reflective => "reconsiders",
            ThoughtType::Exploratory => "probes",
            ThoughtType::Analytical => "decomposes",
            ThoughtType::Creative => "recombines",
            ThoughtType::Predictive => "projects",
            ThoughtType::Intentional => "commits to",
        };
        let content = format!(
            "{} {} the current context at step {}",
            request.engine_id, verb, request.step
        );

        let (importance, valence) = {
            let mut rng = rand::rng();
            let importance = rng.random_range(0.25..0.85);
            let valence = rng.random_range(-0.4..0.4);
            (importance, valence)
        };

        Ok(Generated {
            content,
            importance: Some(importance),
            valence: Some(valence),
            thought_id: None,
        })
    }
}

// =============================================================================
// Scripted provider
// =============================================================================

/// One scripted behavior for a (engine, step) slot
#[derive(Debug, Clone)]
pub enum ScriptedAction {
    /// Return this content with fixed hints
    Produce {
        content: String,
        importance: f32,
        valence: f32,
        thought_id: Option<ThoughtId>,
    },

    /// Reply with no thought (state delta only)
    Silent,

    /// Fail generation with the given reason
    Fail { reason: String },

    /// Sleep, then report a timeout; long delays exercise the caller's
    /// deadline paths
    Delay { delay: Duration },
}

/// Recorded-reply provider for deterministic tests
///
/// Actions are keyed by (engine, step) and consumed in order; the last
/// action of a slot repeats once the queue is exhausted. Unscripted slots
/// are silent.
#[derive(Debug, Default)]
pub struct ScriptedProvider {
    script: Mutex<HashMap<(EngineId, u8), SlotScript>>,
}

#[derive(Debug, Default)]
struct SlotScript {
    actions: Vec<ScriptedAction>,
    cursor: usize,
}

impl SlotScript {
    fn next(&mut self) -> Option<ScriptedAction> {
        if self.actions.is_empty() {
            return None;
        }
        let action = self.actions[self.cursor.min(self.actions.len() - 1)].clone();
        if self.cursor < self.actions.len() {
            self.cursor += 1;
        }
        Some(action)
    }
}

impl ScriptedProvider {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an action to a (engine, step) slot
    pub fn script(&self, engine: EngineId, step: u8, action: ScriptedAction) {
        self.script
            .lock()
            .expect("script mutex poisoned")
            .entry((engine, step))
            .or_default()
            .actions
            .push(action);
    }

    /// Shorthand: produce fixed content with importance and valence
    pub fn produce(&self, engine: EngineId, step: u8, content: &str, importance: f32, valence: f32) {
        self.script(
            engine,
            step,
            ScriptedAction::Produce {
                content: content.to_string(),
                importance,
                valence,
                thought_id: None,
            },
        );
    }

    /// Shorthand: produce with a pre-assigned thought id
    pub fn produce_with_id(
        &self,
        engine: EngineId,
        step: u8,
        content: &str,
        importance: f32,
        id: ThoughtId,
    ) {
        self.script(
            engine,
            step,
            ScriptedAction::Produce {
                content: content.to_string(),
                importance,
                valence: 0.0,
                thought_id: Some(id),
            },
        );
    }

    /// Shorthand: sleep at this slot
    pub fn delay(&self, engine: EngineId, step: u8, delay: Duration) {
        self.script(engine, step, ScriptedAction::Delay { delay });
    }

    /// Shorthand: fail at this slot
    pub fn fail(&self, engine: EngineId, step: u8, reason: &str) {
        self.script(
            engine,
            step,
            ScriptedAction::Fail {
                reason: reason.to_string(),
            },
        );
    }

    fn take(&self, engine: EngineId, step: u8) -> Option<ScriptedAction> {
        self.script
            .lock()
            .expect("script mutex poisoned")
            .get_mut(&(engine, step))
            .and_then(SlotScript::next)
    }
}

#[async_trait]
impl ContentProvider for ScriptedProvider {
    async fn generate(&self, request: GenerationRequest) -> Result<Generated, ProviderError> {
        match self.take(request.engine_id, request.step) {
            Some(ScriptedAction::Produce {
                content,
                importance,
                valence,
                thought_id,
            }) => Ok(Generated {
                content,
                importance: Some(importance),
                valence: Some(valence),
                thought_id,
            }),
            Some(ScriptedAction::Fail { reason }) => {
                Err(ProviderError::Unavailable { reason })
            }
            Some(ScriptedAction::Delay { delay }) => {
                tokio::time::sleep(delay).await;
                Err(ProviderError::Timeout { after: delay })
            }
            Some(ScriptedAction::Silent) | None => Err(ProviderError::NoContent),
        }
    }

    async fn prepare_pivotal(&self, engine_id: EngineId, step: u8) -> Result<(), ProviderError> {
        // Only delays block readiness; produce/fail/silent slots must stay
        // queued for the step dispatch that follows the barrier
        let delay = {
            let mut script = self.script.lock().expect("script mutex poisoned");
            match script.get_mut(&(engine_id, step)) {
                Some(slot) => {
                    let is_delay = matches!(
                        slot.actions.get(slot.cursor.min(slot.actions.len().saturating_sub(1))),
                        Some(ScriptedAction::Delay { .. })
                    );
                    if is_delay {
                        slot.next().and_then(|a| match a {
                            ScriptedAction::Delay { delay } => Some(delay),
                            _ => None,
                        })
                    } else {
                        None
                    }
                }
                None => None,
            }
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
            return Err(ProviderError::Timeout { after: delay });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(engine: u8, step: u8) -> GenerationRequest {
        GenerationRequest {
            engine_id: EngineId(engine),
            step,
            cycle: 0,
            thought_type: ThoughtType::Exploratory,
            mode: ThoughtMode::Expressive,
            prompt: "persona".to_string(),
            options: GenerationOptions {
                temperature: 0.7,
                max_tokens: 128,
                timeout: Duration::from_secs(3),
            },
        }
    }

    #[tokio::test]
    async fn stub_generates_content_in_range() {
        let provider = StubProvider::new();
        let generated = provider.generate(request(0, 3)).await.unwrap();
        assert!(!generated.content.is_empty());
        let importance = generated.importance.unwrap();
        assert!((0.0..=1.0).contains(&importance));
        let valence = generated.valence.unwrap();
        assert!((-1.0..=1.0).contains(&valence));
    }

    #[tokio::test]
    async fn scripted_replays_in_order() {
        let provider = ScriptedProvider::new();
        provider.produce(EngineId(0), 0, "first", 0.5, 0.0);
        provider.produce(EngineId(0), 0, "second", 0.6, 0.0);

        let a = provider.generate(request(0, 0)).await.unwrap();
        let b = provider.generate(request(0, 0)).await.unwrap();
        assert_eq!(a.content, "first");
        assert_eq!(b.content, "second");
    }

    #[tokio::test]
    async fn scripted_last_action_repeats() {
        let provider = ScriptedProvider::new();
        provider.produce(EngineId(0), 0, "only", 0.5, 0.0);
        for _ in 0..3 {
            let generated = provider.generate(request(0, 0)).await.unwrap();
            assert_eq!(generated.content, "only");
        }
    }

    #[tokio::test]
    async fn unscripted_slot_is_silent() {
        let provider = ScriptedProvider::new();
        assert!(matches!(
            provider.generate(request(1, 5)).await,
            Err(ProviderError::NoContent)
        ));
    }

    #[tokio::test]
    async fn scripted_failure_surfaces_reason() {
        let provider = ScriptedProvider::new();
        provider.fail(EngineId(2), 9, "model offline");
        let err = provider.generate(request(2, 9)).await.unwrap_err();
        assert!(matches!(err, ProviderError::Unavailable { reason } if reason == "model offline"));
    }

    #[tokio::test]
    async fn pivotal_readiness_defaults_to_ok() {
        let provider = ScriptedProvider::new();
        provider.produce(EngineId(1), 1, "pivot", 0.7, 0.0);
        assert!(provider.prepare_pivotal(EngineId(1), 1).await.is_ok());
        // The produce action is still queued for the step dispatch
        let generated = provider.generate(request(1, 1)).await.unwrap();
        assert_eq!(generated.content, "pivot");
    }

    #[tokio::test]
    async fn pivotal_delay_blocks_readiness() {
        let provider = ScriptedProvider::new();
        provider.delay(EngineId(2), 7, Duration::from_millis(50));
        let start = std::time::Instant::now();
        let result = provider.prepare_pivotal(EngineId(2), 7).await;
        assert!(result.is_err());
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[tokio::test]
    async fn scripted_id_is_honored() {
        let provider = ScriptedProvider::new();
        let id = ThoughtId::new();
        provider.produce_with_id(EngineId(0), 2, "pinned", 0.5, id);
        let generated = provider.generate(request(0, 2)).await.unwrap();
        assert_eq!(generated.thought_id, Some(id));
    }
}
