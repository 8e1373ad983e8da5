use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::resilience::ChainHop;

// ---------------------------------------------------------------------------
// Error classification
// ---------------------------------------------------------------------------

/// Stable classification of a node failure.
///
/// Retry policies filter on this discriminator, so variants must never be
/// renamed once published in a config file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Timeout,
    Connection,
    RateLimited,
    Validation,
    Unknown,
    /// The node's circuit breaker rejected the attempt. Not a node fault.
    CircuitOpen,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Timeout => write!(f, "timeout"),
            ErrorKind::Connection => write!(f, "connection"),
            ErrorKind::RateLimited => write!(f, "rate_limited"),
            ErrorKind::Validation => write!(f, "validation"),
            ErrorKind::Unknown => write!(f, "unknown"),
            ErrorKind::CircuitOpen => write!(f, "circuit_open"),
        }
    }
}

impl FromStr for ErrorKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "timeout" => Ok(ErrorKind::Timeout),
            "connection" => Ok(ErrorKind::Connection),
            "rate_limited" => Ok(ErrorKind::RateLimited),
            "validation" => Ok(ErrorKind::Validation),
            "unknown" => Ok(ErrorKind::Unknown),
            "circuit_open" => Ok(ErrorKind::CircuitOpen),
            other => Err(format!("invalid error kind: '{other}'")),
        }
    }
}

// ---------------------------------------------------------------------------
// NodeError
// ---------------------------------------------------------------------------

/// A classified failure returned by a node (or synthesised by the
/// orchestrator for breaker rejections).
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{kind} error: {message}")]
pub struct NodeError {
    pub kind: ErrorKind,
    pub message: String,
}

impl NodeError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    pub fn connection(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Connection, message)
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::RateLimited, message)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unknown, message)
    }

    /// Breaker rejection for `node_id`.
    pub fn circuit_open(node_id: &str) -> Self {
        Self::new(
            ErrorKind::CircuitOpen,
            format!("circuit breaker for node '{node_id}' is open"),
        )
    }

    /// Whether the failure is of a transient nature (timeouts, connectivity,
    /// throttling). Policies with an empty `retryable_kinds` set retry every
    /// kind regardless of this.
    pub fn is_transient(&self) -> bool {
        matches!(
            self.kind,
            ErrorKind::Timeout | ErrorKind::Connection | ErrorKind::RateLimited
        )
    }
}

// ---------------------------------------------------------------------------
// TerminalExecutionError
// ---------------------------------------------------------------------------

/// Every recovery path for a requested node was exhausted.
///
/// `node_id` is always the node the scheduler asked for, even when the last
/// failure happened on a fallback; `failed_node_id` and `chain` say where.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error(
    "node '{node_id}' failed after {attempt_count} attempt(s) (last failure on '{failed_node_id}'): {error}"
)]
pub struct TerminalExecutionError {
    pub node_id: String,
    pub failed_node_id: String,
    pub attempt_count: u32,
    pub chain: Vec<ChainHop>,
    pub error: NodeError,
}

impl TerminalExecutionError {
    /// Node ids tried, in order.
    pub fn tried_nodes(&self) -> Vec<&str> {
        self.chain.iter().map(|hop| hop.node_id.as_str()).collect()
    }
}

// ---------------------------------------------------------------------------
// RunError
// ---------------------------------------------------------------------------

/// What a single orchestrated node execution can end in besides an output.
#[derive(Debug, Clone, Error)]
pub enum RunError {
    #[error(transparent)]
    Terminal(#[from] TerminalExecutionError),

    /// The surrounding workflow was cancelled; no dead letter was recorded.
    #[error("execution of node '{node_id}' was cancelled")]
    Cancelled { node_id: String },

    #[error("node '{0}' is not registered")]
    UnknownNode(String),
}

// ---------------------------------------------------------------------------
// ConfigurationError
// ---------------------------------------------------------------------------

/// Invalid resilience configuration. Raised at the misconfiguring call, never
/// deferred to execution time.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("node '{node_id}': max delay {max_delay_ms}ms is below base delay {base_delay_ms}ms")]
    InvalidDelayBounds {
        node_id: String,
        base_delay_ms: u128,
        max_delay_ms: u128,
    },

    #[error("node '{node_id}': {field} must be at least 1")]
    InvalidThreshold { node_id: String, field: &'static str },

    #[error("node '{0}' cannot fall back to itself")]
    SelfFallback(String),

    #[error("node '{from}' already falls back to '{existing}'")]
    DuplicateFallback { from: String, existing: String },

    #[error("fallback '{from}' -> '{to}' would create a cycle")]
    FallbackCycle { from: String, to: String },

    #[error("config parse error: {0}")]
    Parse(String),

    #[error("config io error: {0}")]
    Io(#[from] std::io::Error),
}
