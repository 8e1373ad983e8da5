//! Wave-based parallel execution of a workflow graph.
//!
//! # Execution flow
//!
//! 1. Build an execution plan via `build_execution_plan` and check that every
//!    graph node is registered on the orchestrator.
//! 2. For each wave, spawn every runnable node on a `JoinSet`; each task goes
//!    through `ExecutionOrchestrator::run_node_with_cancel`.
//! 3. A terminal failure blocks the failed node's transitive dependents; they
//!    are reported as skipped. Independent branches keep running.
//! 4. Cancellation stops scheduling new waves; in-flight nodes observe the
//!    same token and return without dead-lettering.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use bulwark_types::error::RunError;
use bulwark_types::event::ResilienceEvent;
use bulwark_types::workflow::{NodeSpec, WorkflowGraph, WorkflowOutcome, WorkflowRunStatus};
use serde_json::{Map, Value};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::resilience::ExecutionOrchestrator;

use super::WorkflowError;
use super::dag::{build_execution_plan, dependents_of};

pub struct WorkflowRunner {
    orchestrator: Arc<ExecutionOrchestrator>,
}

impl WorkflowRunner {
    pub fn new(orchestrator: Arc<ExecutionOrchestrator>) -> Self {
        Self { orchestrator }
    }

    pub fn orchestrator(&self) -> &Arc<ExecutionOrchestrator> {
        &self.orchestrator
    }

    /// Run `graph` to completion, failure or cancellation.
    ///
    /// Root nodes receive `input`; every other node receives an object
    /// mapping each dependency id to that dependency's output.
    pub async fn execute(
        &self,
        graph: &WorkflowGraph,
        input: Value,
        cancel: &CancellationToken,
    ) -> Result<WorkflowOutcome, WorkflowError> {
        let waves = build_execution_plan(&graph.nodes)?;
        if let Some(missing) = graph
            .nodes
            .iter()
            .find(|n| !self.orchestrator.is_registered(&n.id))
        {
            return Err(WorkflowError::UnregisteredNode(missing.id.clone()));
        }

        let run_id = Uuid::now_v7();
        let start = Instant::now();
        let event_bus = self.orchestrator.event_bus();
        event_bus.publish(ResilienceEvent::WorkflowRunStarted {
            run_id,
            workflow_name: graph.name.clone(),
            nodes: graph.nodes.len() as u32,
        });
        tracing::info!(
            run_id = %run_id,
            workflow = graph.name.as_str(),
            nodes = graph.nodes.len(),
            waves = waves.len(),
            "workflow run started"
        );

        let mut outputs: BTreeMap<String, Value> = BTreeMap::new();
        let mut failures = Vec::new();
        let mut skipped = Vec::new();
        let mut blocked: HashSet<String> = HashSet::new();
        let mut cancelled = false;

        for (wave_idx, wave) in waves.iter().enumerate() {
            if cancel.is_cancelled() {
                cancelled = true;
            }

            let mut join_set = JoinSet::new();
            for spec in wave {
                if cancelled || blocked.contains(&spec.id) {
                    skipped.push(spec.id.clone());
                    continue;
                }

                let orchestrator = Arc::clone(&self.orchestrator);
                let node_id = spec.id.clone();
                let node_input = node_input(spec, &input, &outputs);
                let token = cancel.clone();
                join_set.spawn(async move {
                    let result = orchestrator
                        .run_node_with_cancel(&node_id, node_input, &token)
                        .await;
                    (node_id, result)
                });
            }

            tracing::debug!(
                run_id = %run_id,
                wave = wave_idx,
                nodes = join_set.len(),
                "processing wave"
            );

            while let Some(joined) = join_set.join_next().await {
                let (node_id, result) = joined.map_err(|e| WorkflowError::Join(e.to_string()))?;
                match result {
                    Ok(output) => {
                        outputs.insert(node_id, output);
                    }
                    Err(RunError::Terminal(failure)) => {
                        let dependents = dependents_of(&node_id, &graph.nodes);
                        tracing::warn!(
                            run_id = %run_id,
                            node_id = node_id.as_str(),
                            blocked = dependents.len(),
                            "node failed, skipping dependents"
                        );
                        blocked.extend(dependents.into_iter().map(String::from));
                        failures.push(failure);
                    }
                    Err(RunError::Cancelled { .. }) => {
                        cancelled = true;
                        skipped.push(node_id);
                    }
                    Err(RunError::UnknownNode(id)) => {
                        return Err(WorkflowError::UnregisteredNode(id));
                    }
                }
            }
        }

        let status = if cancelled {
            WorkflowRunStatus::Cancelled
        } else if failures.is_empty() {
            WorkflowRunStatus::Completed
        } else {
            WorkflowRunStatus::Failed
        };
        let duration_ms = start.elapsed().as_millis() as u64;

        event_bus.publish(ResilienceEvent::WorkflowRunCompleted {
            run_id,
            workflow_name: graph.name.clone(),
            status,
            duration_ms,
        });
        tracing::info!(
            run_id = %run_id,
            workflow = graph.name.as_str(),
            status = ?status,
            completed = outputs.len(),
            failed = failures.len(),
            skipped = skipped.len(),
            duration_ms,
            "workflow run finished"
        );

        Ok(WorkflowOutcome {
            run_id,
            status,
            outputs,
            failures,
            skipped,
        })
    }
}

fn node_input(spec: &NodeSpec, input: &Value, outputs: &BTreeMap<String, Value>) -> Value {
    if spec.depends_on.is_empty() {
        return input.clone();
    }
    let deps: Map<String, Value> = spec
        .depends_on
        .iter()
        .map(|dep| (dep.clone(), outputs.get(dep).cloned().unwrap_or(Value::Null)))
        .collect();
    Value::Object(deps)
}
