//! Integration tests entry point for Fleetgate
//!
//! Run these tests using `cargo test --test integration_tests`.

mod common;
mod integration;

// Tests are defined within the integration module:
// - integration/gateway.rs - Routing, failover and error mapping
// - integration/admin.rs - Admin control surface
// - integration/health.rs - Health probes and status timelines
