//! Execution orchestrator: breaker gating, retries, fallbacks and
//! dead-lettering for a single requested node execution.
//!
//! # Execution flow
//!
//! 1. Start on the requested node with a fresh retry budget.
//! 2. Ask the node's breaker for a permit. A rejection ends this hop with
//!    `CircuitOpen` immediately: no retry is consumed and no delay is taken.
//! 3. Execute the node and report the result on the permit.
//! 4. On failure, consult the node's retry policy; sleep the backoff delay
//!    (racing cancellation) and go back to 2, or end the hop.
//! 5. A failed hop moves to the node's fallback, which gets its own retry
//!    budget and breaker. With no fallback left the execution is terminal:
//!    exactly one dead letter is recorded and the scheduler receives a
//!    `TerminalExecutionError` naming the originally requested node.
//!
//! Cancellation at any await point abandons the execution without a dead
//! letter; a held HalfOpen probe slot is released when its permit drops.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use bulwark_types::config::ResilienceConfig;
use bulwark_types::error::{ConfigurationError, NodeError, RunError, TerminalExecutionError};
use bulwark_types::event::ResilienceEvent;
use bulwark_types::resilience::{
    AttemptOutcome, BreakerConfig, BreakerStatus, ChainHop, CircuitState, DeadLetterEntry,
    ExecutionAttempt, MetricsSnapshot, NodeAttemptCounts, RetryPolicy,
};
use chrono::Utc;
use dashmap::DashMap;
use serde_json::Value;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::event::EventBus;
use crate::node::{BoxNode, Node};

use super::breaker::CircuitBreakerRegistry;
use super::dead_letter::DeadLetterQueue;
use super::fallback::FallbackResolver;
use super::metrics::AttemptMetrics;
use super::retry::RetryEngine;

// ---------------------------------------------------------------------------
// HopOutcome
// ---------------------------------------------------------------------------

/// How the resilience loop on one node of the chain ended.
enum HopOutcome {
    Succeeded { output: Value, attempts: u32 },
    Failed { attempts: u32, error: NodeError },
    Cancelled,
}

// ---------------------------------------------------------------------------
// ExecutionOrchestrator
// ---------------------------------------------------------------------------

/// Drives breaker, retry and fallback decisions for node executions.
///
/// Registries are injected so callers can share or inspect them; per-node
/// configuration is installed eagerly and validated at the call site.
pub struct ExecutionOrchestrator {
    nodes: DashMap<String, Arc<BoxNode>>,
    policies: DashMap<String, RetryPolicy>,
    /// Applied to nodes without their own policy. `None` = single attempt.
    default_policy: RwLock<Option<RetryPolicy>>,
    breakers: Arc<CircuitBreakerRegistry>,
    fallbacks: Arc<FallbackResolver>,
    dead_letters: Arc<DeadLetterQueue>,
    metrics: AttemptMetrics,
    event_bus: EventBus,
}

impl ExecutionOrchestrator {
    pub fn new(
        breakers: Arc<CircuitBreakerRegistry>,
        fallbacks: Arc<FallbackResolver>,
        dead_letters: Arc<DeadLetterQueue>,
        event_bus: EventBus,
    ) -> Self {
        Self {
            nodes: DashMap::new(),
            policies: DashMap::new(),
            default_policy: RwLock::new(None),
            breakers,
            fallbacks,
            dead_letters,
            metrics: AttemptMetrics::new(),
            event_bus,
        }
    }

    // -----------------------------------------------------------------------
    // Configuration
    // -----------------------------------------------------------------------

    /// Register (or replace) the implementation behind `node_id`.
    pub fn register_node<N: Node + 'static>(&self, node_id: impl Into<String>, node: N) {
        self.nodes.insert(node_id.into(), Arc::new(BoxNode::new(node)));
    }

    pub fn is_registered(&self, node_id: &str) -> bool {
        self.nodes.contains_key(node_id)
    }

    pub fn configure_retry(
        &self,
        node_id: &str,
        policy: RetryPolicy,
    ) -> Result<(), ConfigurationError> {
        policy.validate(node_id)?;
        self.policies.insert(node_id.to_string(), policy);
        Ok(())
    }

    /// Policy for nodes that have none of their own.
    pub fn set_default_retry(&self, policy: RetryPolicy) -> Result<(), ConfigurationError> {
        policy.validate("<default>")?;
        *self
            .default_policy
            .write()
            .expect("default policy lock poisoned") = Some(policy);
        Ok(())
    }

    pub fn configure_circuit_breaker(
        &self,
        node_id: &str,
        failure_threshold: u32,
        success_threshold: u32,
        open_timeout: Duration,
    ) -> Result<(), ConfigurationError> {
        self.breakers.configure(
            node_id,
            BreakerConfig::new(failure_threshold, success_threshold, open_timeout),
        )
    }

    pub fn add_fallback(&self, from: &str, to: &str) -> Result<(), ConfigurationError> {
        self.fallbacks.add_fallback(from, to)
    }

    /// Install a parsed configuration file.
    ///
    /// Nothing is installed unless the whole file is accepted: policies and
    /// breaker settings are validated first, then the fallbacks are added as
    /// one batch in node-id order, and only then are policies and breakers
    /// installed.
    pub fn apply_config(&self, config: &ResilienceConfig) -> Result<(), ConfigurationError> {
        if let Some(default) = &config.defaults.retry {
            default.validate("<default>")?;
        }
        for (node_id, node) in &config.nodes {
            if let Some(retry) = &node.retry {
                retry.validate(node_id)?;
            }
            if let Some(breaker) = &node.breaker {
                breaker.validate(node_id)?;
            }
        }

        self.fallbacks.add_fallbacks(config.nodes.iter().filter_map(|(node_id, node)| {
            node.fallback
                .as_deref()
                .map(|fallback| (node_id.as_str(), fallback))
        }))?;

        if let Some(default) = &config.defaults.retry {
            self.set_default_retry(default.clone())?;
        }
        for (node_id, node) in &config.nodes {
            if let Some(retry) = &node.retry {
                self.configure_retry(node_id, retry.clone())?;
            }
            if let Some(breaker) = &node.breaker {
                self.breakers.configure(node_id, breaker.clone())?;
            }
        }

        tracing::info!(
            nodes = config.nodes.len(),
            fallbacks = self.fallbacks.len(),
            "resilience configuration applied"
        );
        Ok(())
    }

    /// Effective retry policy for `node_id`.
    pub fn policy(&self, node_id: &str) -> RetryPolicy {
        if let Some(policy) = self.policies.get(node_id) {
            return policy.value().clone();
        }
        self.default_policy
            .read()
            .expect("default policy lock poisoned")
            .clone()
            .unwrap_or_default()
    }

    // -----------------------------------------------------------------------
    // Execution
    // -----------------------------------------------------------------------

    /// Execute `node_id` with full resilience handling.
    pub async fn run_node(&self, node_id: &str, input: Value) -> Result<Value, RunError> {
        self.run_node_with_cancel(node_id, input, &CancellationToken::new())
            .await
    }

    /// Execute `node_id`, abandoning without a dead letter once `cancel` fires.
    pub async fn run_node_with_cancel(
        &self,
        node_id: &str,
        input: Value,
        cancel: &CancellationToken,
    ) -> Result<Value, RunError> {
        if !self.is_registered(node_id) {
            return Err(RunError::UnknownNode(node_id.to_string()));
        }

        let mut current = node_id.to_string();
        let mut chain: Vec<ChainHop> = Vec::new();
        let mut total_attempts: u32 = 0;

        let (failed_node_id, error) = loop {
            let outcome = self.run_hop(&current, &input, cancel).await;
            match outcome {
                HopOutcome::Succeeded { output, attempts } => {
                    total_attempts += attempts;
                    tracing::debug!(
                        node_id,
                        served_by = current.as_str(),
                        attempts = total_attempts,
                        "node execution succeeded"
                    );
                    self.event_bus.publish(ResilienceEvent::NodeSucceeded {
                        node_id: node_id.to_string(),
                        served_by: current,
                        attempts: total_attempts,
                    });
                    return Ok(output);
                }
                HopOutcome::Cancelled => return Err(self.cancelled(node_id)),
                HopOutcome::Failed { attempts, error } => {
                    total_attempts += attempts;
                    chain.push(ChainHop {
                        node_id: current.clone(),
                        attempts,
                        error: error.clone(),
                    });

                    let Some(next) = self.fallbacks.resolve(&current) else {
                        break (current, error);
                    };
                    if cancel.is_cancelled() {
                        return Err(self.cancelled(node_id));
                    }

                    tracing::warn!(
                        node_id,
                        from = current.as_str(),
                        to = next.as_str(),
                        remaining = ?self.fallbacks.chain(&current),
                        error = %error,
                        "node exhausted recovery, switching to fallback"
                    );
                    self.event_bus.publish(ResilienceEvent::FallbackActivated {
                        requested_node_id: node_id.to_string(),
                        from: current,
                        to: next.clone(),
                    });
                    current = next;
                }
            }
        };

        let entry = DeadLetterEntry {
            id: Uuid::now_v7(),
            node_id: node_id.to_string(),
            failed_node_id: failed_node_id.clone(),
            timestamp: Utc::now(),
            error: error.clone(),
            attempt_count: total_attempts,
            chain: chain.clone(),
            input,
        };

        tracing::error!(
            node_id,
            failed_node_id = failed_node_id.as_str(),
            attempts = total_attempts,
            hops = chain.len(),
            error = %error,
            "node execution dead-lettered"
        );
        self.event_bus.publish(ResilienceEvent::DeadLettered {
            entry_id: entry.id,
            node_id: node_id.to_string(),
            failed_node_id: failed_node_id.clone(),
            kind: error.kind,
        });
        self.dead_letters.record(entry);

        Err(RunError::Terminal(TerminalExecutionError {
            node_id: node_id.to_string(),
            failed_node_id,
            attempt_count: total_attempts,
            chain,
            error,
        }))
    }

    /// Breaker + retry loop for one node of the chain.
    async fn run_hop(&self, node_id: &str, input: &Value, cancel: &CancellationToken) -> HopOutcome {
        let Some(node) = self.nodes.get(node_id).map(|n| Arc::clone(n.value())) else {
            tracing::warn!(node_id, "fallback target is not registered");
            return HopOutcome::Failed {
                attempts: 0,
                error: NodeError::validation(format!("node '{node_id}' is not registered")),
            };
        };
        let policy = self.policy(node_id);
        let mut retry_index: u32 = 0;
        let mut invocations: u32 = 0;

        loop {
            if cancel.is_cancelled() {
                return HopOutcome::Cancelled;
            }

            let Some(permit) = self.breakers.try_acquire(node_id) else {
                self.metrics.record_rejection(node_id);
                self.event_bus.publish(ResilienceEvent::CircuitRejected {
                    node_id: node_id.to_string(),
                });
                return HopOutcome::Failed {
                    attempts: invocations,
                    error: NodeError::circuit_open(node_id),
                };
            };
            if permit.half_opened() {
                self.publish_transition(node_id, Some(CircuitState::HalfOpen));
            }
            if permit.is_probe() {
                tracing::debug!(node_id, "attempting half-open probe");
            }

            invocations += 1;
            let started_at = Utc::now();
            let start = Instant::now();

            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return HopOutcome::Cancelled,
                result = node.execute(input) => result,
            };
            let duration_ms = start.elapsed().as_millis() as u64;

            let error = match result {
                Ok(output) => {
                    let transition = permit.record_success();
                    self.publish_transition(node_id, transition);
                    self.metrics.record_attempt(&ExecutionAttempt {
                        node_id: node_id.to_string(),
                        attempt_number: retry_index + 1,
                        started_at,
                        duration_ms,
                        outcome: AttemptOutcome::Success,
                    });
                    return HopOutcome::Succeeded {
                        output,
                        attempts: invocations,
                    };
                }
                Err(error) => error,
            };

            let transition = permit.record_failure(&error);
            self.publish_transition(node_id, transition);

            let will_retry = RetryEngine::should_retry(&policy, retry_index, &error);
            self.metrics.record_attempt(&ExecutionAttempt {
                node_id: node_id.to_string(),
                attempt_number: retry_index + 1,
                started_at,
                duration_ms,
                outcome: if will_retry {
                    AttemptOutcome::RetryableFailure
                } else {
                    AttemptOutcome::TerminalFailure
                },
            });
            self.event_bus.publish(ResilienceEvent::AttemptFailed {
                node_id: node_id.to_string(),
                attempt: retry_index + 1,
                kind: error.kind,
                error: error.message.clone(),
                will_retry,
            });

            if !will_retry {
                tracing::warn!(
                    node_id,
                    attempts = invocations,
                    transient = error.is_transient(),
                    error = %error,
                    "node attempts exhausted"
                );
                return HopOutcome::Failed {
                    attempts: invocations,
                    error,
                };
            }

            let delay = RetryEngine::next_delay(&policy, retry_index);
            tracing::debug!(
                node_id,
                retry = retry_index + 1,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "retrying node"
            );
            self.event_bus.publish(ResilienceEvent::RetryScheduled {
                node_id: node_id.to_string(),
                retry_index,
                delay_ms: delay.as_millis() as u64,
            });

            if !delay.is_zero() {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return HopOutcome::Cancelled,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            retry_index += 1;
        }
    }

    fn cancelled(&self, node_id: &str) -> RunError {
        tracing::info!(node_id, "node execution cancelled");
        self.event_bus.publish(ResilienceEvent::NodeCancelled {
            node_id: node_id.to_string(),
        });
        RunError::Cancelled {
            node_id: node_id.to_string(),
        }
    }

    fn publish_transition(&self, node_id: &str, transition: Option<CircuitState>) {
        let node_id = node_id.to_string();
        let event = match transition {
            Some(CircuitState::Open) => ResilienceEvent::CircuitOpened { node_id },
            Some(CircuitState::HalfOpen) => ResilienceEvent::CircuitHalfOpened { node_id },
            Some(CircuitState::Closed) => ResilienceEvent::CircuitClosed { node_id },
            None => return,
        };
        self.event_bus.publish(event);
    }

    // -----------------------------------------------------------------------
    // Operator accessors
    // -----------------------------------------------------------------------

    pub fn list_dead_letters(&self) -> Vec<DeadLetterEntry> {
        self.dead_letters.list()
    }

    /// Drain the dead-letter queue, returning what was removed.
    pub fn clear_dead_letters(&self) -> Vec<DeadLetterEntry> {
        self.dead_letters.clear()
    }

    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            breaker_states: self.breakers.states(),
            dead_letter_count: self.dead_letters.len(),
            attempts: self.metrics.snapshot(),
        }
    }

    pub fn attempt_counts(&self, node_id: &str) -> NodeAttemptCounts {
        self.metrics.get(node_id)
    }

    pub fn breaker_status(&self, node_id: &str) -> Option<BreakerStatus> {
        self.breakers.status(node_id)
    }

    pub fn breakers(&self) -> &CircuitBreakerRegistry {
        &self.breakers
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }
}

impl Default for ExecutionOrchestrator {
    fn default() -> Self {
        Self::new(
            Arc::new(CircuitBreakerRegistry::new()),
            Arc::new(FallbackResolver::new()),
            Arc::new(DeadLetterQueue::new()),
            EventBus::default(),
        )
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
