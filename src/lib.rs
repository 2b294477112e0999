pub mod config;
pub mod domain;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod pipeline;

// Layered boundaries: use cases and ports, then adapters
pub mod app;
pub mod infra;
