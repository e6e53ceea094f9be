//! Integration tests for the Fleetgate gateway
//!
//! These tests run the full router against a wiremock upstream, covering
//! candidate selection, failover, admin controls and health reporting.

mod admin;
mod gateway;
mod health;
