//! Resilience core for workflow node execution.
//!
//! Retry policies, circuit breakers, fallbacks and a dead-letter queue are
//! composed by [`resilience::ExecutionOrchestrator`]; [`workflow::WorkflowRunner`]
//! schedules whole graphs through it. Shared data shapes live in
//! `bulwark-types`.

pub mod config;
pub mod event;
pub mod node;
pub mod resilience;
pub mod workflow;
