//! DAG builder, cycle detection, and parallel wave computation.
//!
//! Uses `petgraph` to model node dependencies as a directed graph. Topological
//! sort detects cycles, and depth-based grouping produces parallel execution
//! waves where all nodes in a wave can run concurrently.

use std::collections::{HashMap, HashSet};

use bulwark_types::workflow::NodeSpec;
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};

use super::WorkflowError;

// ---------------------------------------------------------------------------
// Graph construction
// ---------------------------------------------------------------------------

/// Build the dependency graph (edge from dependency to dependent) and return
/// it in topological order.
fn sorted_graph(nodes: &[NodeSpec]) -> Result<(DiGraph<&str, ()>, Vec<NodeIndex>), WorkflowError> {
    let mut graph = DiGraph::<&str, ()>::new();
    let mut id_to_idx: HashMap<&str, NodeIndex> = HashMap::with_capacity(nodes.len());

    for node in nodes {
        let idx = graph.add_node(node.id.as_str());
        if id_to_idx.insert(node.id.as_str(), idx).is_some() {
            return Err(WorkflowError::DuplicateNode(node.id.clone()));
        }
    }

    for node in nodes {
        let to_idx = id_to_idx[node.id.as_str()];
        for dep in &node.depends_on {
            let from_idx = id_to_idx.get(dep.as_str()).ok_or_else(|| {
                WorkflowError::UnknownDependency(format!(
                    "node '{}' depends on unknown node '{}'",
                    node.id, dep
                ))
            })?;
            graph.add_edge(*from_idx, to_idx, ());
        }
    }

    let sorted = toposort(&graph, None).map_err(|cycle| {
        let node_id = graph[cycle.node_id()];
        WorkflowError::CycleDetected(format!("cycle detected involving node '{node_id}'"))
    })?;

    Ok((graph, sorted))
}

// ---------------------------------------------------------------------------
// Execution plan (wave computation)
// ---------------------------------------------------------------------------

/// Group `nodes` into parallel waves.
///
/// Each wave contains nodes whose dependencies are all satisfied by prior
/// waves. A node's depth is the longest dependency path leading to it; roots
/// have depth 0. Within a wave, nodes keep their declaration order.
pub fn build_execution_plan(nodes: &[NodeSpec]) -> Result<Vec<Vec<&NodeSpec>>, WorkflowError> {
    if nodes.is_empty() {
        return Ok(vec![]);
    }

    let (graph, sorted) = sorted_graph(nodes)?;
    let id_to_node: HashMap<&str, &NodeSpec> = nodes.iter().map(|n| (n.id.as_str(), n)).collect();

    let mut depths: HashMap<&str, usize> = HashMap::new();
    for &idx in &sorted {
        let node_id = graph[idx];
        let depth = id_to_node[node_id]
            .depends_on
            .iter()
            .map(|dep| depths.get(dep.as_str()).copied().unwrap_or(0) + 1)
            .max()
            .unwrap_or(0);
        depths.insert(node_id, depth);
    }

    let max_depth = depths.values().copied().max().unwrap_or(0);
    let mut waves: Vec<Vec<&NodeSpec>> = vec![vec![]; max_depth + 1];
    for node in nodes {
        waves[depths[node.id.as_str()]].push(node);
    }

    Ok(waves)
}

/// Validate that `nodes` form a DAG with unique ids and known dependencies.
pub fn validate_graph(nodes: &[NodeSpec]) -> Result<(), WorkflowError> {
    sorted_graph(nodes).map(|_| ())
}

// ---------------------------------------------------------------------------
// Transitive dependents
// ---------------------------------------------------------------------------

/// Every node that directly or transitively depends on `node_id`.
pub fn dependents_of<'a>(node_id: &str, nodes: &'a [NodeSpec]) -> Vec<&'a str> {
    let mut visited: HashSet<&str> = HashSet::new();
    let mut stack = vec![node_id];

    while let Some(current) = stack.pop() {
        for node in nodes {
            if node.depends_on.iter().any(|d| d == current) && visited.insert(node.id.as_str()) {
                stack.push(node.id.as_str());
            }
        }
    }

    nodes
        .iter()
        .map(|n| n.id.as_str())
        .filter(|id| visited.contains(id))
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
