//! Broker process plumbing around the `lruq` core.
//!
//! ## Structure
//!
//! - [`config`] - CLI / environment configuration.
//! - [`demo`] - in-process demo clients and workers.
//! - [`telemetry`] - logging, tracing and metrics setup.

pub mod config;
pub mod demo;
pub mod telemetry;
