//! Middleware module
//!
//! Contains Tower middleware for admin authentication.

pub mod admin_auth;
