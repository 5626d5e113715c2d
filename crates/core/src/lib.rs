//! Shared domain types for the trainq job queue.
//!
//! Zero internal dependencies: the store, worker, gateway and client all
//! build on the types here.

pub mod error;
pub mod hashing;
pub mod job_id;
pub mod serialization;
pub mod training;
pub mod types;
