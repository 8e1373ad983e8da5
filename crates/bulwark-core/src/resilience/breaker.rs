//! Per-node circuit breakers.
//!
//! `CircuitBreaker` is the Closed / Open / HalfOpen state machine for one
//! node. `CircuitBreakerRegistry` owns one breaker per configured node and
//! hands out `BreakerPermit`s: a permit is the right to make one attempt, and
//! dropping it without recording a result frees a HalfOpen probe slot so a
//! cancelled attempt cannot wedge the breaker.
//!
//! Every state transition starts a new epoch. A permit remembers the epoch
//! it was admitted in, and a result reported under an older epoch only
//! updates the totals: an attempt that started before the circuit tripped
//! can neither close it nor free the HalfOpen probe slot.
//!
//! Time comes from `tokio::time::Instant` so paused-clock tests can step
//! through open timeouts deterministically.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use bulwark_types::error::{ConfigurationError, NodeError};
use bulwark_types::resilience::{BreakerConfig, BreakerStatus, CircuitState};
use dashmap::DashMap;
use tokio::time::Instant;

// ---------------------------------------------------------------------------
// CircuitBreaker
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
enum BreakerState {
    /// Normal operation. Tracks consecutive failures toward the threshold.
    Closed { consecutive_failures: u32 },
    /// Calls rejected until `open_timeout` has elapsed since `opened_at`.
    Open { opened_at: Instant },
    /// Probing. At most one attempt in flight.
    HalfOpen {
        consecutive_successes: u32,
        probe_in_flight: bool,
    },
}

/// Result of asking a breaker for an attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Allowed; `probe` is true when this attempt holds the HalfOpen slot.
    Admitted { probe: bool, half_opened: bool },
    Rejected,
}

/// Circuit breaker for a single node.
#[derive(Debug)]
pub struct CircuitBreaker {
    node_id: String,
    config: BreakerConfig,
    state: BreakerState,
    epoch: u64,
    total_successes: u64,
    total_failures: u64,
    total_rejections: u64,
    last_error: Option<String>,
}

impl CircuitBreaker {
    pub fn new(node_id: impl Into<String>, config: BreakerConfig) -> Self {
        Self {
            node_id: node_id.into(),
            config,
            state: BreakerState::Closed {
                consecutive_failures: 0,
            },
            epoch: 0,
            total_successes: 0,
            total_failures: 0,
            total_rejections: 0,
            last_error: None,
        }
    }

    pub fn state(&self) -> CircuitState {
        match self.state {
            BreakerState::Closed { .. } => CircuitState::Closed,
            BreakerState::Open { .. } => CircuitState::Open,
            BreakerState::HalfOpen { .. } => CircuitState::HalfOpen,
        }
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Bumped on every state transition.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    fn enter(&mut self, state: BreakerState) {
        self.state = state;
        self.epoch += 1;
    }

    /// Decide whether an attempt may proceed at `now`.
    ///
    /// Open -> HalfOpen happens here, before the call is made, once the open
    /// timeout has elapsed; the admitted attempt is the probe.
    pub fn try_admit(&mut self, now: Instant) -> Admission {
        match self.state {
            BreakerState::Closed { .. } => Admission::Admitted {
                probe: false,
                half_opened: false,
            },
            BreakerState::Open { opened_at } => {
                if now.saturating_duration_since(opened_at) >= self.config.open_timeout {
                    self.enter(BreakerState::HalfOpen {
                        consecutive_successes: 0,
                        probe_in_flight: true,
                    });
                    Admission::Admitted {
                        probe: true,
                        half_opened: true,
                    }
                } else {
                    self.total_rejections += 1;
                    Admission::Rejected
                }
            }
            BreakerState::HalfOpen {
                consecutive_successes,
                probe_in_flight,
            } => {
                if probe_in_flight {
                    self.total_rejections += 1;
                    Admission::Rejected
                } else {
                    self.state = BreakerState::HalfOpen {
                        consecutive_successes,
                        probe_in_flight: true,
                    };
                    Admission::Admitted {
                        probe: true,
                        half_opened: false,
                    }
                }
            }
        }
    }

    /// Record a success for an attempt admitted in the current epoch.
    pub fn record_success(&mut self) -> Option<CircuitState> {
        self.record_success_for(self.epoch)
    }

    /// Record a success for an attempt admitted in `epoch`. Returns the new
    /// state on a transition.
    pub fn record_success_for(&mut self, epoch: u64) -> Option<CircuitState> {
        self.total_successes += 1;
        if epoch != self.epoch {
            tracing::debug!(node_id = self.node_id.as_str(), "ignoring stale success");
            return None;
        }

        match self.state {
            BreakerState::Closed { .. } => {
                self.state = BreakerState::Closed {
                    consecutive_failures: 0,
                };
                None
            }
            BreakerState::HalfOpen {
                consecutive_successes,
                ..
            } => {
                let successes = consecutive_successes + 1;
                if successes >= self.config.success_threshold {
                    self.enter(BreakerState::Closed {
                        consecutive_failures: 0,
                    });
                    Some(CircuitState::Closed)
                } else {
                    self.state = BreakerState::HalfOpen {
                        consecutive_successes: successes,
                        probe_in_flight: false,
                    };
                    None
                }
            }
            // Nothing is admitted while Open.
            BreakerState::Open { .. } => None,
        }
    }

    /// Record a failure at `now` for an attempt admitted in the current epoch.
    pub fn record_failure(&mut self, error: &str, now: Instant) -> Option<CircuitState> {
        self.record_failure_for(self.epoch, error, now)
    }

    /// Record a failure at `now` for an attempt admitted in `epoch`. Returns
    /// the new state on a transition.
    pub fn record_failure_for(
        &mut self,
        epoch: u64,
        error: &str,
        now: Instant,
    ) -> Option<CircuitState> {
        self.total_failures += 1;
        self.last_error = Some(error.to_string());
        if epoch != self.epoch {
            tracing::debug!(node_id = self.node_id.as_str(), "ignoring stale failure");
            return None;
        }

        match self.state {
            BreakerState::Closed {
                consecutive_failures,
            } => {
                let failures = consecutive_failures + 1;
                if failures >= self.config.failure_threshold {
                    self.enter(BreakerState::Open { opened_at: now });
                    Some(CircuitState::Open)
                } else {
                    self.state = BreakerState::Closed {
                        consecutive_failures: failures,
                    };
                    None
                }
            }
            BreakerState::HalfOpen { .. } => {
                self.enter(BreakerState::Open { opened_at: now });
                Some(CircuitState::Open)
            }
            BreakerState::Open { .. } => None,
        }
    }

    /// Free the HalfOpen probe slot held by a probe admitted in `epoch`,
    /// without recording a result.
    pub fn release_probe(&mut self, epoch: u64) {
        if epoch != self.epoch {
            return;
        }
        if let BreakerState::HalfOpen {
            consecutive_successes,
            probe_in_flight: true,
        } = self.state
        {
            self.state = BreakerState::HalfOpen {
                consecutive_successes,
                probe_in_flight: false,
            };
        }
    }

    pub fn status(&self, now: Instant) -> BreakerStatus {
        let (consecutive_failures, consecutive_successes, retry_in_ms) = match self.state {
            BreakerState::Closed {
                consecutive_failures,
            } => (consecutive_failures, 0, None),
            BreakerState::Open { opened_at } => {
                let remaining = self
                    .config
                    .open_timeout
                    .saturating_sub(now.saturating_duration_since(opened_at));
                (0, 0, Some(remaining.as_millis() as u64))
            }
            BreakerState::HalfOpen {
                consecutive_successes,
                ..
            } => (0, consecutive_successes, None),
        };

        BreakerStatus {
            node_id: self.node_id.clone(),
            state: self.state(),
            consecutive_failures,
            consecutive_successes,
            total_successes: self.total_successes,
            total_failures: self.total_failures,
            total_rejections: self.total_rejections,
            retry_in_ms,
        }
    }
}

// ---------------------------------------------------------------------------
// BreakerPermit
// ---------------------------------------------------------------------------

/// Right to make one attempt against a node.
///
/// Consume it with `record_success` / `record_failure`. Dropping it unsettled
/// (e.g. the attempt was cancelled) releases the HalfOpen probe it held.
#[derive(Debug)]
pub struct BreakerPermit {
    node_id: String,
    breaker: Option<Arc<Mutex<CircuitBreaker>>>,
    epoch: u64,
    probe: bool,
    half_opened: bool,
    settled: bool,
}

impl BreakerPermit {
    fn unguarded(node_id: &str) -> Self {
        Self {
            node_id: node_id.to_string(),
            breaker: None,
            epoch: 0,
            probe: false,
            half_opened: false,
            settled: false,
        }
    }

    /// True when acquiring this permit moved the breaker Open -> HalfOpen.
    pub fn half_opened(&self) -> bool {
        self.half_opened
    }

    pub fn is_probe(&self) -> bool {
        self.probe
    }

    /// Returns the new breaker state on a transition.
    pub fn record_success(mut self) -> Option<CircuitState> {
        self.settled = true;
        let breaker = self.breaker.as_ref()?;
        let transition = breaker
            .lock()
            .expect("circuit breaker lock poisoned")
            .record_success_for(self.epoch);
        log_transition(&self.node_id, transition);
        transition
    }

    /// Returns the new breaker state on a transition.
    pub fn record_failure(mut self, error: &NodeError) -> Option<CircuitState> {
        self.settled = true;
        let breaker = self.breaker.as_ref()?;
        let transition = breaker
            .lock()
            .expect("circuit breaker lock poisoned")
            .record_failure_for(self.epoch, &error.to_string(), Instant::now());
        log_transition(&self.node_id, transition);
        transition
    }

    /// Keep the slot held; the caller reports through
    /// `CircuitBreakerRegistry::record_result` instead.
    fn detach(mut self) {
        self.settled = true;
    }
}

impl Drop for BreakerPermit {
    fn drop(&mut self) {
        if self.settled || !self.probe {
            return;
        }
        if let Some(breaker) = &self.breaker {
            if let Ok(mut guard) = breaker.lock() {
                guard.release_probe(self.epoch);
                tracing::debug!(node_id = %self.node_id, "released unsettled probe");
            }
        }
    }
}

fn log_transition(node_id: &str, transition: Option<CircuitState>) {
    match transition {
        Some(CircuitState::Open) => tracing::warn!(node_id, "circuit opened"),
        Some(CircuitState::Closed) => tracing::info!(node_id, "circuit closed"),
        Some(CircuitState::HalfOpen) => tracing::debug!(node_id, "circuit half-open"),
        None => {}
    }
}

// ---------------------------------------------------------------------------
// CircuitBreakerRegistry
// ---------------------------------------------------------------------------

/// Owns one breaker per configured node.
///
/// Breakers are created lazily on a node's first attempt. Nodes without a
/// configuration are never gated.
#[derive(Debug, Default)]
pub struct CircuitBreakerRegistry {
    configs: DashMap<String, BreakerConfig>,
    breakers: DashMap<String, Arc<Mutex<CircuitBreaker>>>,
}

impl CircuitBreakerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install (or replace) the breaker settings for a node.
    ///
    /// Replacing settings resets the node's breaker to Closed.
    pub fn configure(
        &self,
        node_id: &str,
        config: BreakerConfig,
    ) -> Result<(), ConfigurationError> {
        config.validate(node_id)?;
        self.configs.insert(node_id.to_string(), config);
        self.breakers.remove(node_id);
        Ok(())
    }

    pub fn is_configured(&self, node_id: &str) -> bool {
        self.configs.contains_key(node_id)
    }

    fn breaker(&self, node_id: &str) -> Option<Arc<Mutex<CircuitBreaker>>> {
        if let Some(existing) = self.breakers.get(node_id) {
            return Some(Arc::clone(existing.value()));
        }
        let config = self.configs.get(node_id)?.value().clone();
        let breaker = self
            .breakers
            .entry(node_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(CircuitBreaker::new(node_id, config))));
        Some(Arc::clone(breaker.value()))
    }

    /// Ask for a permit to attempt `node_id`. `None` means the breaker
    /// rejected the attempt.
    pub fn try_acquire(&self, node_id: &str) -> Option<BreakerPermit> {
        let Some(breaker) = self.breaker(node_id) else {
            return Some(BreakerPermit::unguarded(node_id));
        };

        let (admission, epoch) = {
            let mut guard = breaker.lock().expect("circuit breaker lock poisoned");
            let admission = guard.try_admit(Instant::now());
            (admission, guard.epoch())
        };

        match admission {
            Admission::Admitted { probe, half_opened } => {
                if half_opened {
                    log_transition(node_id, Some(CircuitState::HalfOpen));
                }
                Some(BreakerPermit {
                    node_id: node_id.to_string(),
                    breaker: Some(breaker),
                    epoch,
                    probe,
                    half_opened,
                    settled: false,
                })
            }
            Admission::Rejected => {
                tracing::debug!(node_id, "circuit breaker rejected attempt");
                None
            }
        }
    }

    /// Whether an attempt on `node_id` may proceed now.
    ///
    /// A `true` answer may claim the HalfOpen probe slot; report the outcome
    /// with [`record_result`](Self::record_result) to release it.
    pub fn allow(&self, node_id: &str) -> bool {
        match self.try_acquire(node_id) {
            Some(permit) => {
                permit.detach();
                true
            }
            None => false,
        }
    }

    /// Report the outcome of an attempt admitted through [`allow`](Self::allow).
    pub fn record_result(&self, node_id: &str, success: bool) -> Option<CircuitState> {
        let breaker = self.breaker(node_id)?;
        let mut guard = breaker.lock().expect("circuit breaker lock poisoned");
        let transition = if success {
            guard.record_success()
        } else {
            guard.record_failure("attempt failed", Instant::now())
        };
        drop(guard);
        log_transition(node_id, transition);
        transition
    }

    /// Current state; unconfigured nodes read as Closed.
    pub fn state(&self, node_id: &str) -> CircuitState {
        self.breakers
            .get(node_id)
            .map(|b| b.lock().expect("circuit breaker lock poisoned").state())
            .unwrap_or(CircuitState::Closed)
    }

    /// Detailed status for a configured node.
    pub fn status(&self, node_id: &str) -> Option<BreakerStatus> {
        let breaker = self.breaker(node_id)?;
        let status = breaker
            .lock()
            .expect("circuit breaker lock poisoned")
            .status(Instant::now());
        Some(status)
    }

    /// States of every configured node, keyed by node id.
    pub fn states(&self) -> BTreeMap<String, CircuitState> {
        self.configs
            .iter()
            .map(|entry| (entry.key().clone(), self.state(entry.key())))
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
