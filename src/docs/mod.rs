//! API Documentation module
//!
//! Provides OpenAPI specification generation for the admin API using utoipa.

mod openapi;

pub use openapi::AdminApiDoc;
