//! Shared domain types for Bulwark.
//!
//! Error taxonomy, retry/breaker settings, dead-letter and metrics records,
//! resilience events, configuration file shapes and workflow graph shapes.
//!
//! Zero infrastructure dependencies -- only serde, serde_json, uuid, chrono, thiserror.

pub mod config;
pub mod error;
pub mod event;
pub mod resilience;
pub mod workflow;
