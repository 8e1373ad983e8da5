//! Graph scheduling on top of the execution orchestrator.
//!
//! - `dag` -- DAG builder, cycle detection, parallel wave computation
//! - `runner` -- wave-based parallel execution with failure propagation

pub mod dag;
pub mod runner;

pub use runner::WorkflowRunner;

/// Errors raised before or while scheduling a workflow graph.
///
/// Node failures are not workflow errors; they are reported in
/// `WorkflowOutcome::failures`.
#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    /// A node references an unknown dependency.
    #[error("unknown dependency: {0}")]
    UnknownDependency(String),

    /// Dependency graph contains a cycle.
    #[error("cycle detected: {0}")]
    CycleDetected(String),

    /// Two nodes share an id.
    #[error("duplicate node: {0}")]
    DuplicateNode(String),

    /// A graph node has no implementation registered on the orchestrator.
    #[error("node '{0}' is not registered")]
    UnregisteredNode(String),

    /// A node task panicked or was aborted.
    #[error("task join error: {0}")]
    Join(String),
}
