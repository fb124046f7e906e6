//! Hypergraph Store
//!
//! Typed nodes and directional typed edges behind a narrow async trait.
//! The core assumes at-least-once durability and eventually consistent
//! reads; it never assumes multi-row atomicity, so every write is an
//! idempotent single-row upsert and the per-thought batch (node, then
//! edges) is safe under partial failure.
//!
//! Two backends ship with the crate:
//! - [`memory::InMemoryGraph`]: process-local, used by tests and defaults
//! - [`redis::RedisHypergraph`]: remote graph database over GRAPH.QUERY

pub mod memory;
pub mod redis;

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Graph store errors
#[derive(Debug, Error)]
pub enum GraphError {
    #[error("node not found: {id}")]
    NotFound { id: String },

    #[error("edge endpoint missing: {id}")]
    MissingEndpoint { id: String },

    #[error("conflicting upsert for node {id}: {reason}")]
    Conflict { id: String, reason: String },

    #[error("backend temporarily unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("backend rejected operation: {reason}")]
    Backend { reason: String },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl GraphError {
    /// Whether a retry may succeed
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable { .. })
    }
}

/// Result type for graph operations
pub type Result<T> = std::result::Result<T, GraphError>;

/// Node categories in the hypergraph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    Thought,
    Concept,
    Episode,
    Goal,
}

/// Edge categories in the hypergraph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeType {
    LeadsTo,
    RelatesTo,
    Evokes,
    ElaboratesOn,
}

/// A typed node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HypergraphNode {
    pub id: String,
    pub node_type: NodeType,
    pub content: String,
    pub metadata: HashMap<String, serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub importance: f32,
}

impl HypergraphNode {
    /// Create a node with empty metadata, stamped now
    #[must_use]
    pub fn new(id: impl Into<String>, node_type: NodeType, content: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            node_type,
            content: content.into(),
            metadata: HashMap::new(),
            created_at: now,
            updated_at: now,
            importance: 0.5,
        }
    }

    /// Attach a metadata entry
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Set the importance weighting
    #[must_use]
    pub fn with_importance(mut self, importance: f32) -> Self {
        self.importance = importance.clamp(0.0, 1.0);
        self
    }
}

/// A typed, directional, weighted edge
///
/// Duplicate upserts are idempotent and keep the higher weight.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HypergraphEdge {
    pub source_id: String,
    pub target_id: String,
    pub edge_type: EdgeType,
    pub weight: f32,
    pub created_at: DateTime<Utc>,
}

impl HypergraphEdge {
    #[must_use]
    pub fn new(
        source_id: impl Into<String>,
        target_id: impl Into<String>,
        edge_type: EdgeType,
        weight: f32,
    ) -> Self {
        Self {
            source_id: source_id.into(),
            target_id: target_id.into(),
            edge_type,
            weight: weight.clamp(0.0, 1.0),
            created_at: Utc::now(),
        }
    }
}

/// Narrow store contract the core is written against
///
/// Backends must tolerate concurrent readers and writers; the pipeline
/// performs no cross-node transactions.
#[async_trait]
pub trait HypergraphStore: Send + Sync {
    /// Insert or update a node, keyed by id
    async fn upsert_node(&self, node: HypergraphNode) -> Result<()>;

    /// Insert or update an edge, keyed by (source, target, type)
    ///
    /// Both endpoints must already exist; a missing endpoint is an error so
    /// no edge is ever queryable before its nodes.
    async fn upsert_edge(&self, edge: HypergraphEdge) -> Result<()>;

    /// Fetch a node by id
    async fn get_node(&self, id: &str) -> Result<HypergraphNode>;

    /// All outgoing edges of a node
    async fn edges_from(&self, id: &str) -> Result<Vec<HypergraphEdge>>;

    /// Nodes of a type, newest first, up to `limit`
    async fn query_by_type(&self, node_type: NodeType, limit: usize) -> Result<Vec<HypergraphNode>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(GraphError::Unavailable {
            reason: "connection reset".into()
        }
        .is_transient());
        assert!(!GraphError::NotFound { id: "x".into() }.is_transient());
        assert!(!GraphError::Backend {
            reason: "bad query".into()
        }
        .is_transient());
    }

    #[test]
    fn node_builder_clamps_importance() {
        let node = HypergraphNode::new("n1", NodeType::Thought, "content").with_importance(2.0);
        assert_eq!(node.importance, 1.0);
    }

    #[test]
    fn edge_weight_clamped() {
        let edge = HypergraphEdge::new("a", "b", EdgeType::LeadsTo, 1.7);
        assert_eq!(edge.weight, 1.0);
    }

    #[test]
    fn node_metadata_builder() {
        let node = HypergraphNode::new("n1", NodeType::Concept, "gravity")
            .with_metadata("origin", serde_json::json!("salience"));
        assert_eq!(node.metadata["origin"], serde_json::json!("salience"));
    }

    #[test]
    fn node_type_serde_snake_case() {
        let json = serde_json::to_string(&NodeType::Thought).unwrap();
        assert_eq!(json, "\"thought\"");
        let json = serde_json::to_string(&EdgeType::ElaboratesOn).unwrap();
        assert_eq!(json, "\"elaborates_on\"");
    }
}
