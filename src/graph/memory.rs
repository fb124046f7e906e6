//! In-Memory Hypergraph
//!
//! Process-local store backing tests and default wiring. Fault and latency
//! injection knobs let scenario tests exercise the pipeline's retry,
//! backpressure, and dead-letter paths without a real backend.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{
    EdgeType, GraphError, HypergraphEdge, HypergraphNode, HypergraphStore, NodeType, Result,
};

/// Process-local hypergraph store
#[derive(Debug, Default)]
pub struct InMemoryGraph {
    nodes: RwLock<HashMap<String, HypergraphNode>>,
    edges: RwLock<HashMap<(String, String, EdgeType), HypergraphEdge>>,
    /// Artificial write latency in milliseconds (0 = none)
    write_latency_ms: AtomicU64,
    /// Remaining writes to fail with a transient error
    transient_failures: AtomicUsize,
    /// Remaining writes to fail with a permanent error
    permanent_failures: AtomicUsize,
}

impl InMemoryGraph {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inject artificial latency into every write
    #[allow(clippy::cast_possible_truncation)]
    pub fn set_write_latency(&self, latency: Duration) {
        self.write_latency_ms
            .store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    /// Fail the next `n` writes with a transient error
    pub fn fail_transient(&self, n: usize) {
        self.transient_failures.store(n, Ordering::SeqCst);
    }

    /// Fail the next `n` writes with a permanent error
    pub fn fail_permanent(&self, n: usize) {
        self.permanent_failures.store(n, Ordering::SeqCst);
    }

    /// Number of stored nodes
    pub async fn node_count(&self) -> usize {
        self.nodes.read().await.len()
    }

    /// Number of stored edges
    pub async fn edge_count(&self) -> usize {
        self.edges.read().await.len()
    }

    async fn simulate_write_conditions(&self) -> Result<()> {
        let latency = self.write_latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        if take_one(&self.transient_failures) {
            return Err(GraphError::Unavailable {
                reason: "injected transient failure".to_string(),
            });
        }
        if take_one(&self.permanent_failures) {
            return Err(GraphError::Backend {
                reason: "injected permanent failure".to_string(),
            });
        }
        Ok(())
    }
}

/// Decrement the counter if positive, returning whether it fired
fn take_one(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

#[async_trait]
impl HypergraphStore for InMemoryGraph {
    async fn upsert_node(&self, node: HypergraphNode) -> Result<()> {
        self.simulate_write_conditions().await?;
        let mut nodes = self.nodes.write().await;
        match nodes.get_mut(&node.id) {
            Some(existing) => {
                // Idempotent re-upsert: refresh content and metadata, keep
                // the original creation stamp
                existing.content = node.content;
                existing.metadata = node.metadata;
                existing.importance = node.importance;
                existing.updated_at = node.updated_at;
            }
            None => {
                nodes.insert(node.id.clone(), node);
            }
        }
        Ok(())
    }

    async fn upsert_edge(&self, edge: HypergraphEdge) -> Result<()> {
        self.simulate_write_conditions().await?;
        {
            let nodes = self.nodes.read().await;
            if !nodes.contains_key(&edge.source_id) {
                return Err(GraphError::MissingEndpoint {
                    id: edge.source_id.clone(),
                });
            }
            if !nodes.contains_key(&edge.target_id) {
                return Err(GraphError::MissingEndpoint {
                    id: edge.target_id.clone(),
                });
            }
        }
        let key = (edge.source_id.clone(), edge.target_id.clone(), edge.edge_type);
        let mut edges = self.edges.write().await;
        match edges.get_mut(&key) {
            Some(existing) => {
                // Duplicate upserts keep the higher weight
                if edge.weight > existing.weight {
                    existing.weight = edge.weight;
                }
            }
            None => {
                edges.insert(key, edge);
            }
        }
        Ok(())
    }

    async fn get_node(&self, id: &str) -> Result<HypergraphNode> {
        self.nodes
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| GraphError::NotFound { id: id.to_string() })
    }

    async fn edges_from(&self, id: &str) -> Result<Vec<HypergraphEdge>> {
        Ok(self
            .edges
            .read()
            .await
            .values()
            .filter(|e| e.source_id == id)
            .cloned()
            .collect())
    }

    async fn query_by_type(&self, node_type: NodeType, limit: usize) -> Result<Vec<HypergraphNode>> {
        let mut matches: Vec<HypergraphNode> = self
            .nodes
            .read()
            .await
            .values()
            .filter(|n| n.node_type == node_type)
            .cloned()
            .collect();
        matches.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        matches.truncate(limit);
        Ok(matches)
    }
}
