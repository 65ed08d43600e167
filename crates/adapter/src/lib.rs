//! Metrics adapter daemon
//!
//! Wires the Prometheus backend, the custom and resource metrics providers
//! and the Kubernetes object lister into the HTTP API.

pub mod api;
pub mod backend;
pub mod config;
pub mod lister;
