//! Resilience domain types: retry policies, breaker settings and snapshots,
//! dead-letter records, attempt records and metrics snapshots.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ConfigurationError, ErrorKind, NodeError};

// ---------------------------------------------------------------------------
// Retry policy
// ---------------------------------------------------------------------------

/// Delay progression between retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RetryStrategy {
    #[default]
    Immediate,
    Linear,
    Exponential,
    Fibonacci,
}

/// Retry configuration for a single node.
///
/// `max_retries = 0` means one attempt and no retries. An empty
/// `retryable_kinds` set retries every failure kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct RetryPolicy {
    #[serde(default)]
    pub max_retries: u32,
    #[serde(default)]
    pub strategy: RetryStrategy,
    #[serde(rename = "base_delay_ms", with = "duration_ms", default)]
    pub base_delay: Duration,
    #[serde(rename = "max_delay_ms", with = "duration_ms", default)]
    pub max_delay: Duration,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub retryable_kinds: BTreeSet<ErrorKind>,
}

impl RetryPolicy {
    pub fn new(
        max_retries: u32,
        strategy: RetryStrategy,
        base_delay: Duration,
        max_delay: Duration,
    ) -> Self {
        Self {
            max_retries,
            strategy,
            base_delay,
            max_delay,
            retryable_kinds: BTreeSet::new(),
        }
    }

    /// Retry up to `max_retries` times with no delay.
    pub fn immediate(max_retries: u32) -> Self {
        Self::new(max_retries, RetryStrategy::Immediate, Duration::ZERO, Duration::ZERO)
    }

    /// Restrict retries to the given failure kinds.
    pub fn with_retryable_kinds(mut self, kinds: impl IntoIterator<Item = ErrorKind>) -> Self {
        self.retryable_kinds = kinds.into_iter().collect();
        self
    }

    /// Reject malformed delay bounds.
    pub fn validate(&self, node_id: &str) -> Result<(), ConfigurationError> {
        if self.max_delay < self.base_delay {
            return Err(ConfigurationError::InvalidDelayBounds {
                node_id: node_id.to_string(),
                base_delay_ms: self.base_delay.as_millis(),
                max_delay_ms: self.max_delay.as_millis(),
            });
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Circuit breaker
// ---------------------------------------------------------------------------

/// Circuit breaker settings for a single node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakerConfig {
    /// Consecutive failures (while Closed) before the circuit opens.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    /// Consecutive successes (while HalfOpen) before the circuit closes.
    #[serde(default = "default_success_threshold")]
    pub success_threshold: u32,
    /// How long the circuit stays open before a probe is allowed.
    #[serde(rename = "open_timeout_ms", with = "duration_ms", default = "default_open_timeout")]
    pub open_timeout: Duration,
}

fn default_failure_threshold() -> u32 {
    3
}

fn default_success_threshold() -> u32 {
    1
}

fn default_open_timeout() -> Duration {
    Duration::from_secs(30)
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            success_threshold: default_success_threshold(),
            open_timeout: default_open_timeout(),
        }
    }
}

impl BreakerConfig {
    pub fn new(failure_threshold: u32, success_threshold: u32, open_timeout: Duration) -> Self {
        Self {
            failure_threshold,
            success_threshold,
            open_timeout,
        }
    }

    pub fn validate(&self, node_id: &str) -> Result<(), ConfigurationError> {
        if self.failure_threshold == 0 {
            return Err(ConfigurationError::InvalidThreshold {
                node_id: node_id.to_string(),
                field: "failure_threshold",
            });
        }
        if self.success_threshold == 0 {
            return Err(ConfigurationError::InvalidThreshold {
                node_id: node_id.to_string(),
                field: "success_threshold",
            });
        }
        Ok(())
    }
}

/// Externally visible breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half_open"),
        }
    }
}

/// Point-in-time view of one breaker, for operators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakerStatus {
    pub node_id: String,
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
    pub total_successes: u64,
    pub total_failures: u64,
    pub total_rejections: u64,
    /// Milliseconds until a probe is allowed (Open only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_in_ms: Option<u64>,
}

// ---------------------------------------------------------------------------
// Dead letters
// ---------------------------------------------------------------------------

/// One node tried while resolving a requested execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainHop {
    pub node_id: String,
    /// Node invocations on this hop (0 when the breaker rejected it).
    pub attempts: u32,
    /// The error that ended this hop.
    pub error: NodeError,
}

/// Record of an execution that exhausted retries and fallbacks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetterEntry {
    pub id: Uuid,
    /// The node the scheduler asked for.
    pub node_id: String,
    /// The last node in the fallback chain that failed.
    pub failed_node_id: String,
    pub timestamp: DateTime<Utc>,
    pub error: NodeError,
    /// Node invocations across the whole chain.
    pub attempt_count: u32,
    pub chain: Vec<ChainHop>,
    /// Input the execution was started with.
    pub input: serde_json::Value,
}

// ---------------------------------------------------------------------------
// Attempts and metrics
// ---------------------------------------------------------------------------

/// Outcome of a single node invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    Success,
    RetryableFailure,
    TerminalFailure,
}

/// One invocation of a node within an orchestrated execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionAttempt {
    pub node_id: String,
    /// 1-based within the current node of the chain.
    pub attempt_number: u32,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub outcome: AttemptOutcome,
}

/// Per-node attempt counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeAttemptCounts {
    /// Node invocations.
    pub attempts: u64,
    pub successes: u64,
    pub failures: u64,
    /// Attempts refused by the breaker (not counted in `attempts`).
    pub rejections: u64,
}

/// Snapshot returned by `ExecutionOrchestrator::metrics_snapshot`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub breaker_states: BTreeMap<String, CircuitState>,
    pub dead_letter_count: usize,
    pub attempts: BTreeMap<String, NodeAttemptCounts>,
}

// ---------------------------------------------------------------------------
// Duration (de)serialisation as integer milliseconds
// ---------------------------------------------------------------------------

pub(crate) mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
