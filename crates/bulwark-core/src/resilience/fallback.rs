//! One-hop fallback map between nodes.
//!
//! Each node has at most one direct fallback. Longer degradation chains
//! (A -> B -> C) exist only because B has its own entry; the resolver never
//! walks more than one hop per call and keeps no cursor, so `resolve` is
//! idempotent. Self-loops, duplicate sources and cycles are rejected when the
//! edge is added; a batch added through `add_fallbacks` lands whole or not
//! at all.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use bulwark_types::error::ConfigurationError;

#[derive(Debug, Default)]
pub struct FallbackResolver {
    edges: RwLock<HashMap<String, String>>,
}

impl FallbackResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `from -> to`.
    pub fn add_fallback(&self, from: &str, to: &str) -> Result<(), ConfigurationError> {
        let mut edges = self.edges.write().expect("fallback map lock poisoned");
        insert_edge(&mut edges, from, to)?;
        tracing::debug!(from, to, "fallback registered");
        Ok(())
    }

    /// Register every `(from, to)` pair in order, or none of them.
    pub fn add_fallbacks<'a>(
        &self,
        pairs: impl IntoIterator<Item = (&'a str, &'a str)>,
    ) -> Result<(), ConfigurationError> {
        let mut edges = self.edges.write().expect("fallback map lock poisoned");
        let mut staged = edges.clone();
        for (from, to) in pairs {
            insert_edge(&mut staged, from, to)?;
        }
        tracing::debug!(added = staged.len() - edges.len(), "fallbacks registered");
        *edges = staged;
        Ok(())
    }

    /// Direct fallback of `node_id`, if any.
    pub fn resolve(&self, node_id: &str) -> Option<String> {
        self.edges
            .read()
            .expect("fallback map lock poisoned")
            .get(node_id)
            .cloned()
    }

    /// Every node reachable from `node_id` by following fallbacks, in order.
    pub fn chain(&self, node_id: &str) -> Vec<String> {
        let edges = self.edges.read().expect("fallback map lock poisoned");
        let mut seen = HashSet::new();
        let mut chain = Vec::new();
        let mut cursor = node_id;
        while let Some(next) = edges.get(cursor) {
            if !seen.insert(next.as_str()) {
                break;
            }
            chain.push(next.clone());
            cursor = next;
        }
        chain
    }

    pub fn len(&self) -> usize {
        self.edges.read().expect("fallback map lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn insert_edge(
    edges: &mut HashMap<String, String>,
    from: &str,
    to: &str,
) -> Result<(), ConfigurationError> {
    if from == to {
        return Err(ConfigurationError::SelfFallback(from.to_string()));
    }

    if let Some(existing) = edges.get(from) {
        return Err(ConfigurationError::DuplicateFallback {
            from: from.to_string(),
            existing: existing.clone(),
        });
    }

    // Walking forward from `to` must never reach `from`.
    let mut cursor = to;
    while let Some(next) = edges.get(cursor) {
        if next == from {
            return Err(ConfigurationError::FallbackCycle {
                from: from.to_string(),
                to: to.to_string(),
            });
        }
        cursor = next;
    }

    edges.insert(from.to_string(), to.to_string());
    Ok(())
}
