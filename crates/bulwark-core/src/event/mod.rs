//! Event bus for resilience decisions.
//!
//! Provides an `EventBus` that distributes `ResilienceEvent` messages to all
//! subscribers via a `tokio::sync::broadcast` channel.

pub mod bus;

pub use bus::EventBus;
