//! Events published on the resilience event bus.
//!
//! Subscribers (dashboards, audit logs, tests) observe live retry, breaker
//! and fallback decisions without the orchestrator surfacing per-attempt
//! errors to the scheduler.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ErrorKind;
use crate::workflow::WorkflowRunStatus;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResilienceEvent {
    /// A node invocation failed.
    AttemptFailed {
        node_id: String,
        attempt: u32,
        kind: ErrorKind,
        error: String,
        will_retry: bool,
    },

    /// A retry was scheduled after `delay_ms`.
    RetryScheduled {
        node_id: String,
        retry_index: u32,
        delay_ms: u64,
    },

    CircuitOpened { node_id: String },

    CircuitHalfOpened { node_id: String },

    CircuitClosed { node_id: String },

    /// The breaker refused an attempt.
    CircuitRejected { node_id: String },

    /// Execution moved from `from` to its fallback `to`.
    FallbackActivated {
        requested_node_id: String,
        from: String,
        to: String,
    },

    /// The requested node produced an output, possibly via a fallback.
    NodeSucceeded {
        node_id: String,
        served_by: String,
        attempts: u32,
    },

    DeadLettered {
        entry_id: Uuid,
        node_id: String,
        failed_node_id: String,
        kind: ErrorKind,
    },

    NodeCancelled { node_id: String },

    WorkflowRunStarted {
        run_id: Uuid,
        workflow_name: String,
        nodes: u32,
    },

    WorkflowRunCompleted {
        run_id: Uuid,
        workflow_name: String,
        status: WorkflowRunStatus,
        duration_ms: u64,
    },
}

impl ResilienceEvent {
    /// The node the event concerns, if any.
    pub fn node_id(&self) -> Option<&str> {
        match self {
            ResilienceEvent::AttemptFailed { node_id, .. }
            | ResilienceEvent::RetryScheduled { node_id, .. }
            | ResilienceEvent::CircuitOpened { node_id }
            | ResilienceEvent::CircuitHalfOpened { node_id }
            | ResilienceEvent::CircuitClosed { node_id }
            | ResilienceEvent::CircuitRejected { node_id }
            | ResilienceEvent::NodeSucceeded { node_id, .. }
            | ResilienceEvent::DeadLettered { node_id, .. }
            | ResilienceEvent::NodeCancelled { node_id } => Some(node_id),
            ResilienceEvent::FallbackActivated { from, .. } => Some(from),
            ResilienceEvent::WorkflowRunStarted { .. }
            | ResilienceEvent::WorkflowRunCompleted { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serializes_with_type_tag() {
        let event = ResilienceEvent::CircuitOpened {
            node_id: "fetch".to_string(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "circuit_opened");
        assert_eq!(json["node_id"], "fetch");
    }

    #[test]
    fn test_node_id_accessor() {
        let event = ResilienceEvent::FallbackActivated {
            requested_node_id: "a".to_string(),
            from: "b".to_string(),
            to: "c".to_string(),
        };
        assert_eq!(event.node_id(), Some("b"));

        let event = ResilienceEvent::WorkflowRunStarted {
            run_id: Uuid::nil(),
            workflow_name: "wf".to_string(),
            nodes: 2,
        };
        assert_eq!(event.node_id(), None);
    }
}
