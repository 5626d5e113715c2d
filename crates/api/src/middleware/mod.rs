//! Request middleware.
//!
//! - [`auth::require_basic_auth`] -- Checks the shared password when one is configured.

pub mod auth;
