//! RedisGraph Hypergraph Backend
//!
//! Remote graph database reached over GRAPH.QUERY Cypher. Nodes carry a
//! `kind` property matching [`NodeType`]; edges are `REL` relationships with
//! a `kind` property matching [`EdgeType`]. Upserts are MERGE-based so
//! re-running a write is a no-op, and duplicate edges keep the higher
//! weight.

use chrono::{DateTime, Utc};
use redis::Client;
use tracing::debug;

use super::{
    EdgeType, GraphError, HypergraphEdge, HypergraphNode, HypergraphStore, NodeType, Result,
};
use async_trait::async_trait;

/// RedisGraph-backed hypergraph store
pub struct RedisHypergraph {
    client: Client,
    graph_name: String,
}

impl RedisHypergraph {
    /// Connect to a RedisGraph instance
    ///
    /// # Errors
    ///
    /// Returns `GraphError::Unavailable` if the client cannot be created.
    pub fn connect(redis_url: &str, graph_name: &str) -> Result<Self> {
        let client = Client::open(redis_url).map_err(|e| GraphError::Unavailable {
            reason: format!("failed to create Redis client: {e}"),
        })?;
        Ok(Self {
            client,
            graph_name: graph_name.to_string(),
        })
    }

    async fn run_query(&self, query: String) -> Result<redis::Value> {
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| GraphError::Unavailable {
                reason: e.to_string(),
            })?;

        redis::cmd("GRAPH.QUERY")
            .arg(&self.graph_name)
            .arg(query)
            .query_async(&mut conn)
            .await
            .map_err(|e| GraphError::Unavailable {
                reason: e.to_string(),
            })
    }

    /// Result rows of a GRAPH.QUERY response (`[headers, rows, stats]`)
    fn result_rows(result: &redis::Value) -> Vec<&redis::Value> {
        if let redis::Value::Array(sections) = result {
            if sections.len() >= 2 {
                if let redis::Value::Array(ref rows) = sections[1] {
                    return rows.iter().collect();
                }
            }
        }
        Vec::new()
    }

    fn parse_node_row(fields: &[redis::Value]) -> Option<HypergraphNode> {
        if fields.len() < 7 {
            return None;
        }
        let id = decode_text(&fields[0])?;
        let kind = decode_text(&fields[1])?;
        let node_type = parse_node_type(&kind)?;
        let content = decode_text(&fields[2]).unwrap_or_default();
        let metadata = decode_text(&fields[3])
            .and_then(|raw| serde_json::from_str(&raw).ok())
            .unwrap_or_default();
        let created_at = decode_text(&fields[4]).and_then(parse_timestamp)?;
        let updated_at = decode_text(&fields[5])
            .and_then(parse_timestamp)
            .unwrap_or(created_at);
        let importance = decode_number(&fields[6]).unwrap_or(0.5);

        Some(HypergraphNode {
            id,
            node_type,
            content,
            metadata,
            created_at,
            updated_at,
            importance,
        })
    }
}

/// Peel RedisGraph's single-element array wrapping off a scalar cell
fn unnest(value: &redis::Value) -> &redis::Value {
    let mut cell = value;
    while let redis::Value::Array(items) = cell {
        if items.len() != 1 {
            break;
        }
        cell = &items[0];
    }
    cell
}

/// Decode a textual result cell
fn decode_text(value: &redis::Value) -> Option<String> {
    match unnest(value) {
        redis::Value::BulkString(bytes) => {
            std::str::from_utf8(bytes).ok().map(str::to_owned)
        }
        redis::Value::SimpleString(s) => Some(s.clone()),
        _ => None,
    }
}

/// Decode a numeric result cell; RedisGraph returns weights as doubles but
/// older server versions stringify them
#[allow(clippy::cast_possible_truncation)]
fn decode_number(value: &redis::Value) -> Option<f32> {
    match unnest(value) {
        redis::Value::Double(d) => Some(*d as f32),
        redis::Value::Int(i) => Some(*i as f32),
        textual => decode_text(textual).and_then(|s| s.parse().ok()),
    }
}

/// Escape a string literal for embedding in a Cypher query
fn cypher_escape(raw: &str) -> String {
    raw.replace('\\', "\\\\").replace('\'', "\\'")
}

fn node_type_tag(node_type: NodeType) -> &'static str {
    match node_type {
        NodeType::Thought => "thought",
        NodeType::Concept => "concept",
        NodeType::Episode => "episode",
        NodeType::Goal => "goal",
    }
}

fn parse_node_type(tag: &str) -> Option<NodeType> {
    match tag {
        "thought" => Some(NodeType::Thought),
        "concept" => Some(NodeType::Concept),
        "episode" => Some(NodeType::Episode),
        "goal" => Some(NodeType::Goal),
        _ => None,
    }
}

fn edge_type_tag(edge_type: EdgeType) -> &'static str {
    match edge_type {
        EdgeType::LeadsTo => "leads_to",
        EdgeType::RelatesTo => "relates_to",
        EdgeType::Evokes => "evokes",
        EdgeType::ElaboratesOn => "elaborates_on",
    }
}

fn parse_edge_type(tag: &str) -> Option<EdgeType> {
    match tag {
        "leads_to" => Some(EdgeType::LeadsTo),
        "relates_to" => Some(EdgeType::RelatesTo),
        "evokes" => Some(EdgeType::Evokes),
        "elaborates_on" => Some(EdgeType::ElaboratesOn),
        _ => None,
    }
}

fn parse_timestamp(raw: String) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

#[async_trait]
impl HypergraphStore for RedisHypergraph {
    async fn upsert_node(&self, node: HypergraphNode) -> Result<()> {
        let id = cypher_escape(&node.id);
        let content = cypher_escape(&node.content);
        let metadata = cypher_escape(&serde_json::to_string(&node.metadata)?);
        let created_at = node.created_at.to_rfc3339();
        let updated_at = node.updated_at.to_rfc3339();
        let kind = node_type_tag(node.node_type);
        let importance = node.importance;

        // ON CREATE keeps the first creation stamp; every upsert refreshes
        // the mutable properties
        let query = format!(
            "MERGE (n:Node {{id: '{id}'}}) \
             ON CREATE SET n.created_at = '{created_at}' \
             SET n.kind = '{kind}', n.content = '{content}', \
                 n.metadata = '{metadata}', n.updated_at = '{updated_at}', \
                 n.importance = {importance}"
        );
        self.run_query(query).await?;
        debug!(id = %node.id, kind, "upserted hypergraph node");
        Ok(())
    }

    async fn upsert_edge(&self, edge: HypergraphEdge) -> Result<()> {
        // Endpoint existence is checked up front so an edge is never
        // queryable before its nodes
        self.get_node(&edge.source_id).await.map_err(|_| {
            GraphError::MissingEndpoint {
                id: edge.source_id.clone(),
            }
        })?;
        self.get_node(&edge.target_id).await.map_err(|_| {
            GraphError::MissingEndpoint {
                id: edge.target_id.clone(),
            }
        })?;

        let source = cypher_escape(&edge.source_id);
        let target = cypher_escape(&edge.target_id);
        let kind = edge_type_tag(edge.edge_type);
        let weight = edge.weight;
        let created_at = edge.created_at.to_rfc3339();

        // Duplicate upserts keep the higher weight
        let query = format!(
            "MATCH (a:Node {{id: '{source}'}}), (b:Node {{id: '{target}'}}) \
             MERGE (a)-[r:REL {{kind: '{kind}'}}]->(b) \
             ON CREATE SET r.weight = {weight}, r.created_at = '{created_at}' \
             SET r.weight = (CASE WHEN r.weight >= {weight} THEN r.weight ELSE {weight} END)"
        );
        self.run_query(query).await?;
        Ok(())
    }

    async fn get_node(&self, id: &str) -> Result<HypergraphNode> {
        let escaped = cypher_escape(id);
        let query = format!(
            "MATCH (n:Node {{id: '{escaped}'}}) \
             RETURN n.id, n.kind, n.content, n.metadata, n.created_at, n.updated_at, n.importance"
        );
        let result = self.run_query(query).await?;

        for row in Self::result_rows(&result) {
            if let redis::Value::Array(ref fields) = row {
                if let Some(node) = Self::parse_node_row(fields) {
                    return Ok(node);
                }
            }
        }
        Err(GraphError::NotFound { id: id.to_string() })
    }

    async fn edges_from(&self, id: &str) -> Result<Vec<HypergraphEdge>> {
        let escaped = cypher_escape(id);
        let query = format!(
            "MATCH (a:Node {{id: '{escaped}'}})-[r:REL]->(b:Node) \
             RETURN a.id, b.id, r.kind, r.weight, r.created_at"
        );
        let result = self.run_query(query).await?;

        let mut edges = Vec::new();
        for row in Self::result_rows(&result) {
            if let redis::Value::Array(ref fields) = row {
                if fields.len() < 5 {
                    continue;
                }
                let source = decode_text(&fields[0]);
                let target = decode_text(&fields[1]);
                let kind = decode_text(&fields[2]).and_then(|k| parse_edge_type(&k));
                let weight = decode_number(&fields[3]).unwrap_or(0.0);
                let created_at = decode_text(&fields[4])
                    .and_then(parse_timestamp)
                    .unwrap_or_else(Utc::now);

                if let (Some(source_id), Some(target_id), Some(edge_type)) = (source, target, kind)
                {
                    edges.push(HypergraphEdge {
                        source_id,
                        target_id,
                        edge_type,
                        weight,
                        created_at,
                    });
                }
            }
        }
        Ok(edges)
    }

    async fn query_by_type(&self, node_type: NodeType, limit: usize) -> Result<Vec<HypergraphNode>> {
        let kind = node_type_tag(node_type);
        let query = format!(
            "MATCH (n:Node {{kind: '{kind}'}}) \
             RETURN n.id, n.kind, n.content, n.metadata, n.created_at, n.updated_at, n.importance \
             ORDER BY n.created_at DESC LIMIT {limit}"
        );
        let result = self.run_query(query).await?;

        let mut nodes = Vec::new();
        for row in Self::result_rows(&result) {
            if let redis::Value::Array(ref fields) = row {
                if let Some(node) = Self::parse_node_row(fields) {
                    nodes.push(node);
                }
            }
        }
        Ok(nodes)
    }
}

impl std::fmt::Debug for RedisHypergraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisHypergraph")
            .field("graph_name", &self.graph_name)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cypher_escape_quotes_and_backslashes() {
        assert_eq!(cypher_escape("it's"), "it\\'s");
        assert_eq!(cypher_escape("a\\b"), "a\\\\b");
        assert_eq!(cypher_escape("plain"), "plain");
    }

    #[test]
    fn node_type_tags_roundtrip() {
        for t in [
            NodeType::Thought,
            NodeType::Concept,
            NodeType::Episode,
            NodeType::Goal,
        ] {
            assert_eq!(parse_node_type(node_type_tag(t)), Some(t));
        }
        assert_eq!(parse_node_type("unknown"), None);
    }

    #[test]
    fn edge_type_tags_roundtrip() {
        for t in [
            EdgeType::LeadsTo,
            EdgeType::RelatesTo,
            EdgeType::Evokes,
            EdgeType::ElaboratesOn,
        ] {
            assert_eq!(parse_edge_type(edge_type_tag(t)), Some(t));
        }
    }

    #[test]
    fn timestamp_roundtrip() {
        let now = Utc::now();
        let parsed = parse_timestamp(now.to_rfc3339()).unwrap();
        assert_eq!(parsed.timestamp_millis(), now.timestamp_millis());
    }

    #[test]
    fn decode_text_unwraps_nested_scalars() {
        let wrapped = redis::Value::Array(vec![redis::Value::Array(vec![
            redis::Value::SimpleString("inner".to_string()),
        ])]);
        assert_eq!(decode_text(&wrapped), Some("inner".to_string()));
        assert_eq!(
            decode_text(&redis::Value::BulkString(b"plain".to_vec())),
            Some("plain".to_string())
        );
        // Multi-element arrays are rows, not wrapped scalars
        let row = redis::Value::Array(vec![
            redis::Value::SimpleString("a".to_string()),
            redis::Value::SimpleString("b".to_string()),
        ]);
        assert_eq!(decode_text(&row), None);
    }

    #[test]
    fn decode_number_from_variants() {
        assert_eq!(decode_number(&redis::Value::Double(0.25)), Some(0.25));
        assert_eq!(decode_number(&redis::Value::Int(2)), Some(2.0));
        assert_eq!(
            decode_number(&redis::Value::BulkString(b"0.5".to_vec())),
            Some(0.5)
        );
        assert_eq!(decode_number(&redis::Value::Nil), None);
    }
}
