//! Workflow graph shapes consumed by the wave runner.
//!
//! A graph only carries topology: which nodes exist and which outputs each
//! node consumes. Node behaviour is registered on the orchestrator.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::TerminalExecutionError;

/// A workflow graph: named set of nodes with data dependencies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowGraph {
    pub name: String,
    pub nodes: Vec<NodeSpec>,
}

/// A node in the graph. `id` must match a node registered on the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeSpec {
    pub id: String,
    /// Node ids whose outputs this node consumes (DAG edges).
    #[serde(default)]
    pub depends_on: Vec<String>,
}

impl NodeSpec {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            depends_on: Vec::new(),
        }
    }

    pub fn depends_on<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.depends_on = deps.into_iter().map(Into::into).collect();
        self
    }
}

/// Final status of a workflow run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowRunStatus {
    Completed,
    Failed,
    Cancelled,
}

/// Result of running a whole graph.
#[derive(Debug, Clone)]
pub struct WorkflowOutcome {
    pub run_id: Uuid,
    pub status: WorkflowRunStatus,
    /// Outputs of nodes that completed, keyed by node id.
    pub outputs: BTreeMap<String, serde_json::Value>,
    /// Terminal failures, in completion order.
    pub failures: Vec<TerminalExecutionError>,
    /// Nodes not run because an upstream node failed or the run was cancelled.
    pub skipped: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_graph_deserialize_defaults_depends_on() {
        let toml_str = r#"
name = "ingest"

[[nodes]]
id = "fetch"

[[nodes]]
id = "parse"
depends_on = ["fetch"]
"#;
        let graph: WorkflowGraph = toml::from_str(toml_str).unwrap();
        assert_eq!(graph.name, "ingest");
        assert!(graph.nodes[0].depends_on.is_empty());
        assert_eq!(graph.nodes[1], NodeSpec::new("parse").depends_on(["fetch"]));
    }
}
