//! # Provchain Node — Runtime Library
//!
//! The node binary's building blocks, exposed as a library so integration
//! tests can assemble a real HTTP node on an ephemeral port: CLI parsing,
//! logging bootstrap, Prometheus metrics, and the axum API router.

pub mod api;
pub mod cli;
pub mod logging;
pub mod metrics;
