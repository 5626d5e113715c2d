//! Binary-safe payload encoding for the JSON wire format.
//!
//! Numeric arrays travel as base64 `.npy` text, models as a
//! [`ModelDocument`] whose weights are such arrays.

pub mod array;
pub mod model;

pub use array::{decode_array, encode_array, ArrayData, DType, NdArray};
pub use model::{decode_model, encode_model, ModelDocument};

/// Integrity digest of a submitted task body.
pub use crate::hashing::sha256_hex as digest;

/// A payload that is not a well-formed encoding.
#[derive(Debug, thiserror::Error)]
pub enum CorruptPayload {
    #[error("invalid base64: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("invalid JSON document: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unsupported dtype '{0}'")]
    UnsupportedDtype(String),

    #[error("shape needs {expected} elements but {actual} were supplied")]
    ShapeMismatch { expected: usize, actual: usize },

    #[error("weight {index}: {source}")]
    Weight {
        index: usize,
        #[source]
        source: Box<CorruptPayload>,
    },

    #[error("malformed array encoding: {0}")]
    Malformed(String),
}
