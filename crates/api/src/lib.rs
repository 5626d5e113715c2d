//! trainq HTTP gateway library.
//!
//! Exposes the building blocks (config, state, error handling, routes,
//! middleware) so integration tests and the binary entrypoint share them.

pub mod config;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod router;
pub mod routes;
pub mod state;
