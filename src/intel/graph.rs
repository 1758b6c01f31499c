//! Wallet relationship graph
//!
//! Directed edges between wallets with out/in adjacency indices. Edges and
//! indices carry a 7 day TTL in the KV store; an in-memory write-through
//! cache serves BFS traversals without a round trip per node.

use chrono::Utc;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use crate::error::Result;
use crate::infra::KvStore;

const EDGE_EXPIRY_SECS: i64 = 7 * 24 * 3600;

/// Relationship kind between two wallets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeType {
    FundedBy,
    TransferredTo,
    DeployedFrom,
    Associated,
}

/// One directed edge
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletEdge {
    pub from: String,
    pub to: String,
    pub edge_type: EdgeType,
    pub first_seen_ms: i64,
    pub last_seen_ms: i64,
    pub tx_count: u64,
}

/// Wallet relationship store
pub struct WalletGraph {
    kv: Option<Arc<KvStore>>,
    prefix: String,
    edges: DashMap<(String, String), WalletEdge>,
    out: DashMap<String, HashSet<String>>,
    incoming: DashMap<String, HashSet<String>>,
}

impl WalletGraph {
    pub fn new(kv: Option<Arc<KvStore>>, prefix: &str) -> Self {
        Self {
            kv,
            prefix: prefix.to_string(),
            edges: DashMap::new(),
            out: DashMap::new(),
            incoming: DashMap::new(),
        }
    }

    fn edge_key(&self, from: &str, to: &str) -> String {
        format!("{}:graph:edge:{}:{}", self.prefix, from, to)
    }

    fn out_key(&self, node: &str) -> String {
        format!("{}:graph:out:{}", self.prefix, node)
    }

    fn in_key(&self, node: &str) -> String {
        format!("{}:graph:in:{}", self.prefix, node)
    }

    /// Upsert an edge, bumping `last_seen` and `tx_count`, and maintain the
    /// adjacency indices.
    pub async fn add_edge(&self, from: &str, to: &str, edge_type: EdgeType) -> Result<WalletEdge> {
        let now_ms = Utc::now().timestamp_millis();
        let key = (from.to_string(), to.to_string());

        let edge = {
            let mut entry = self.edges.entry(key).or_insert_with(|| WalletEdge {
                from: from.to_string(),
                to: to.to_string(),
                edge_type,
                first_seen_ms: now_ms,
                last_seen_ms: now_ms,
                tx_count: 0,
            });
            entry.last_seen_ms = now_ms;
            entry.tx_count += 1;
            entry.clone()
        };

        self.out
            .entry(from.to_string())
            .or_default()
            .insert(to.to_string());
        self.incoming
            .entry(to.to_string())
            .or_default()
            .insert(from.to_string());

        if let Some(kv) = &self.kv {
            let raw = serde_json::to_string(&edge)?;
            let edge_key = self.edge_key(from, to);
            kv.set_ex(&edge_key, &raw, EDGE_EXPIRY_SECS as u64).await?;

            let out_key = self.out_key(from);
            kv.sadd(&out_key, to).await?;
            kv.expire(&out_key, EDGE_EXPIRY_SECS).await?;

            let in_key = self.in_key(to);
            kv.sadd(&in_key, from).await?;
            kv.expire(&in_key, EDGE_EXPIRY_SECS).await?;
        }

        Ok(edge)
    }

    /// Neighbors in either direction.
    async fn neighbors(&self, node: &str) -> Result<HashSet<String>> {
        let mut all: HashSet<String> = self
            .out
            .get(node)
            .map(|s| s.clone())
            .unwrap_or_default();
        if let Some(incoming) = self.incoming.get(node) {
            all.extend(incoming.iter().cloned());
        }

        // Cold cache: fall back to the KV indices.
        if all.is_empty() {
            if let Some(kv) = &self.kv {
                all.extend(kv.smembers(&self.out_key(node)).await?);
                all.extend(kv.smembers(&self.in_key(node)).await?);
            }
        }
        Ok(all)
    }

    /// Iterative BFS over the undirected closure up to `max_depth`,
    /// excluding the root itself.
    pub async fn get_cluster(&self, root: &str, max_depth: usize) -> Result<HashSet<String>> {
        let mut visited: HashSet<String> = HashSet::new();
        visited.insert(root.to_string());

        let mut cluster = HashSet::new();
        let mut frontier: VecDeque<(String, usize)> = VecDeque::new();
        frontier.push_back((root.to_string(), 0));

        while let Some((node, depth)) = frontier.pop_front() {
            if depth >= max_depth {
                continue;
            }
            for neighbor in self.neighbors(&node).await? {
                if visited.insert(neighbor.clone()) {
                    cluster.insert(neighbor.clone());
                    frontier.push_back((neighbor, depth + 1));
                }
            }
        }

        Ok(cluster)
    }

    /// Whether two wallets share a cluster within `max_depth` hops.
    pub async fn are_connected(&self, a: &str, b: &str, max_depth: usize) -> Result<bool> {
        if a == b {
            return Ok(true);
        }
        Ok(self.get_cluster(a, max_depth).await?.contains(b))
    }
}
