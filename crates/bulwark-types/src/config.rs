//! Resilience configuration file types.
//!
//! `ResilienceConfig` represents a `resilience.toml` describing retry
//! policies, breakers and fallbacks per node. Every field has a default, so
//! an empty file is a valid (no-op) configuration.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::resilience::{BreakerConfig, RetryPolicy};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResilienceConfig {
    #[serde(default)]
    pub defaults: DefaultsConfig,

    /// Per-node settings keyed by node id.
    #[serde(default)]
    pub nodes: BTreeMap<String, NodeResilienceConfig>,
}

/// Settings applied to nodes that do not configure their own.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DefaultsConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryPolicy>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeResilienceConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryPolicy>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub breaker: Option<BreakerConfig>,

    /// Direct fallback node id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback: Option<String>,
}
