//! Persistence Pipeline
//!
//! Converts committed thoughts into hypergraph nodes and edges through a
//! bounded queue and a small worker pool. Writes are idempotent upserts
//! batched per thought (node first, then edges) so partial failure is safe
//! to retry. Transient store errors back off and retry; permanent errors
//! dead-letter the task and the cycle keeps going.
//!
//! # Write batch per thought
//!
//! 1. Upsert the thought node
//! 2. `thought --relates_to--> concept` for each related concept (0.6)
//! 3. `prior_focus --leads_to--> thought` when a prior focus existed (0.8)

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::core::types::{Thought, ThoughtId};
use crate::events::{CoreEvent, EventBus};
use crate::graph::{
    EdgeType, GraphError, HypergraphEdge, HypergraphNode, HypergraphStore, NodeType,
};
use crate::metrics::CoreMetrics;

/// Weight of a thought-to-concept relation
const RELATES_TO_WEIGHT: f32 = 0.6;

/// Weight of a focus-chain edge
const LEADS_TO_WEIGHT: f32 = 0.8;

/// Retry attempts for transient store errors
const MAX_ATTEMPTS: u32 = 3;

/// Base backoff, doubled per attempt
const BACKOFF_BASE: Duration = Duration::from_millis(25);

/// Pipeline errors
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("persistence queue full after {waited:?}")]
    QueueFull { waited: Duration },

    #[error("pipeline already shut down")]
    Closed,
}

/// One unit of persistence work
#[derive(Debug, Clone)]
pub struct PersistenceTask {
    /// The sealed thought to store
    pub thought: Thought,

    /// Focus item at commit time, tail of the leads-to chain
    pub prior_focus: Option<ThoughtId>,
}

/// A task that exhausted its retries
#[derive(Debug, Clone)]
pub struct DeadLetter {
    pub thought_id: ThoughtId,
    pub reason: String,
}

/// Bounded queue plus worker pool writing thoughts into the hypergraph
pub struct PersistencePipeline {
    tx: mpsc::Sender<PersistenceTask>,
    workers: Vec<JoinHandle<()>>,
    dead_letters: Arc<Mutex<Vec<DeadLetter>>>,
    metrics: Arc<CoreMetrics>,
    queue_capacity: usize,
}

impl PersistencePipeline {
    /// Start the pipeline with `workers` tasks draining a queue of
    /// `queue_capacity`
    #[must_use]
    pub fn start(
        store: Arc<dyn HypergraphStore>,
        metrics: Arc<CoreMetrics>,
        events: EventBus,
        queue_capacity: usize,
        workers: usize,
    ) -> Self {
        let (tx, rx) = mpsc::channel::<PersistenceTask>(queue_capacity);
        let rx = Arc::new(Mutex::new(rx));
        let dead_letters = Arc::new(Mutex::new(Vec::new()));

        let handles = (0..workers)
            .map(|worker| {
                let rx = Arc::clone(&rx);
                let store = Arc::clone(&store);
                let metrics = Arc::clone(&metrics);
                let events = events.clone();
                let dead_letters = Arc::clone(&dead_letters);
                tokio::spawn(async move {
                    loop {
                        let task = {
                            let mut rx = rx.lock().await;
                            rx.recv().await
                        };
                        let Some(task) = task else {
                            debug!(worker, "persistence worker draining done");
                            break;
                        };
                        persist_with_retry(&*store, &metrics, &events, &dead_letters, task).await;
                    }
                })
            })
            .collect();

        Self {
            tx,
            workers: handles,
            dead_letters,
            metrics,
            queue_capacity,
        }
    }

    /// Enqueue a task, blocking at most `persist_timeout` on a full queue
    ///
    /// # Errors
    ///
    /// `QueueFull` when the timeout elapses; the caller counts the drop and
    /// moves on - working memory is never rolled back.
    pub async fn enqueue(
        &self,
        task: PersistenceTask,
        persist_timeout: Duration,
    ) -> Result<(), PersistenceError> {
        let result = self.tx.send_timeout(task, persist_timeout).await;
        self.metrics.queue_depth.store(
            self.queue_capacity - self.tx.capacity(),
            Ordering::Relaxed,
        );
        match result {
            Ok(()) => Ok(()),
            Err(mpsc::error::SendTimeoutError::Timeout(_)) => {
                self.metrics.persistence_dropped.fetch_add(1, Ordering::Relaxed);
                Err(PersistenceError::QueueFull {
                    waited: persist_timeout,
                })
            }
            Err(mpsc::error::SendTimeoutError::Closed(_)) => Err(PersistenceError::Closed),
        }
    }

    /// Current queue depth
    #[must_use]
    pub fn depth(&self) -> usize {
        self.queue_capacity - self.tx.capacity()
    }

    /// Copy of the dead-letter list
    pub async fn dead_letters(&self) -> Vec<DeadLetter> {
        self.dead_letters.lock().await.clone()
    }

    /// Close the queue and wait for workers to drain, bounded by `timeout`
    ///
    /// Returns `true` when the drain completed; on timeout the remaining
    /// queue depth is reported as dead-lettered and workers are left to
    /// finish in the background.
    pub async fn drain(self, timeout: Duration) -> bool {
        let Self {
            tx,
            workers,
            dead_letters,
            metrics,
            queue_capacity,
        } = self;
        let remaining = queue_capacity - tx.capacity();
        drop(tx);

        let join_all = async {
            for handle in workers {
                let _ = handle.await;
            }
        };
        match tokio::time::timeout(timeout, join_all).await {
            Ok(()) => {
                metrics.queue_depth.store(0, Ordering::Relaxed);
                true
            }
            Err(_) => {
                warn!(
                    remaining,
                    "persistence drain incomplete, remaining items dead-lettered"
                );
                metrics
                    .dead_letters
                    .fetch_add(remaining as u64, Ordering::Relaxed);
                drop(dead_letters);
                false
            }
        }
    }
}

impl std::fmt::Debug for PersistencePipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistencePipeline")
            .field("queue_capacity", &self.queue_capacity)
            .field("depth", &self.depth())
            .finish_non_exhaustive()
    }
}

/// Build the hypergraph node for a thought
fn node_for(thought: &Thought) -> HypergraphNode {
    let mut node = HypergraphNode::new(thought.id.to_string(), NodeType::Thought, &thought.content)
        .with_importance(thought.importance);
    node.created_at = thought.created_at;
    node.updated_at = thought.created_at;
    node.metadata.insert("engine_id".into(), json!(thought.engine_id.0));
    node.metadata.insert("step".into(), json!(thought.step_number));
    node.metadata
        .insert("thought_type".into(), json!(thought.thought_type));
    node.metadata.insert("mode".into(), json!(thought.mode));
    node.metadata
        .insert("valence".into(), json!(thought.emotional_valence));
    node.metadata
        .insert("cycle".into(), json!(thought.context.cycle));
    node
}

/// Run the full write batch for one task, retrying transient errors
async fn persist_with_retry(
    store: &dyn HypergraphStore,
    metrics: &CoreMetrics,
    events: &EventBus,
    dead_letters: &Mutex<Vec<DeadLetter>>,
    task: PersistenceTask,
) {
    let thought_id = task.thought.id;
    let mut attempt = 0;
    loop {
        attempt += 1;
        match persist_once(store, &task).await {
            Ok(()) => {
                debug!(thought = %thought_id, attempt, "thought persisted");
                return;
            }
            Err(e) if e.is_transient() && attempt < MAX_ATTEMPTS => {
                let backoff = BACKOFF_BASE * 2_u32.pow(attempt - 1);
                warn!(thought = %thought_id, attempt, error = %e, "transient persistence error, backing off");
                tokio::time::sleep(backoff).await;
            }
            Err(e) => {
                error!(thought = %thought_id, attempt, error = %e, "persistence dead-letter");
                metrics.dead_letters.fetch_add(1, Ordering::Relaxed);
                events.publish(CoreEvent::PersistenceDeadLetter {
                    thought_id,
                    reason: e.to_string(),
                });
                dead_letters.lock().await.push(DeadLetter {
                    thought_id,
                    reason: e.to_string(),
                });
                return;
            }
        }
    }
}

/// One pass of the write batch: node, concept relations, focus chain
async fn persist_once(store: &dyn HypergraphStore, task: &PersistenceTask) -> Result<(), GraphError> {
    store.upsert_node(node_for(&task.thought)).await?;

    let thought_key = task.thought.id.to_string();
    for concept_id in &task.thought.context.related_concepts {
        let edge = HypergraphEdge::new(
            thought_key.clone(),
            concept_id.clone(),
            EdgeType::RelatesTo,
            RELATES_TO_WEIGHT,
        );
        match store.upsert_edge(edge).await {
            Ok(()) | Err(GraphError::MissingEndpoint { .. }) => {
                // A concept that vanished between context fetch and
                // persistence is not worth failing the batch over
            }
            Err(e) => return Err(e),
        }
    }

    if let Some(prior) = task.prior_focus {
        let edge = HypergraphEdge::new(
            prior.to_string(),
            thought_key,
            EdgeType::LeadsTo,
            LEADS_TO_WEIGHT,
        );
        match store.upsert_edge(edge).await {
            Ok(()) => {}
            Err(GraphError::MissingEndpoint { id }) => {
                // The prior focus is persisted by a sibling worker; surface
                // this as transient so the batch retries once it lands
                return Err(GraphError::Unavailable {
                    reason: format!("leads-to endpoint {id} not yet persisted"),
                });
            }
            Err(e) => return Err(e),
        }
    }
    Ok(())
}
