//! Failure handling around node execution.
//!
//! Each concern lives in its own component so it can be tested alone; the
//! [`ExecutionOrchestrator`] composes them per execution.

pub mod breaker;
pub mod dead_letter;
pub mod fallback;
pub mod metrics;
pub mod orchestrator;
pub mod retry;

pub use breaker::{BreakerPermit, CircuitBreaker, CircuitBreakerRegistry};
pub use dead_letter::DeadLetterQueue;
pub use fallback::FallbackResolver;
pub use metrics::AttemptMetrics;
pub use orchestrator::ExecutionOrchestrator;
pub use retry::RetryEngine;
