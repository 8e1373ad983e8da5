//! Observability setup for processes embedding the bulwark runtime.

pub mod tracing_setup;
