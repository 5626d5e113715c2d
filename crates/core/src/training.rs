//! Training request envelope and the capability traits a trainer implements.
//!
//! The numeric model itself is supplied from outside this crate through
//! [`Trainable`]; the queue only sees requests, progress callbacks and the
//! resulting [`ModelDocument`].

use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

use crate::error::CoreError;
use crate::serialization::{decode_array, CorruptPayload, ModelDocument, NdArray};

/// A training job as submitted by clients.
///
/// Every field is required and unknown fields are rejected, so a body that
/// deserializes into this type already satisfies the structural schema.
/// Numeric constraints are checked by [`TrainingRequest::check`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct TrainingRequest {
    pub architecture: String,
    pub weights: Vec<String>,
    pub loss: String,
    pub optimizer: String,
    pub x_train: String,
    pub y_train: String,
    #[validate(custom(function = "validate_shape"))]
    pub x_train_shape: Vec<u64>,
    #[validate(custom(function = "validate_shape"))]
    pub y_train_shape: Vec<u64>,
    pub epochs: i64,
    #[validate(range(min = 1))]
    pub batch_size: u64,
}

fn validate_shape(shape: &[u64]) -> Result<(), ValidationError> {
    if shape.iter().any(|&dim| dim < 1) {
        return Err(ValidationError::new("dimension_below_one"));
    }
    Ok(())
}

impl TrainingRequest {
    /// Parse and validate a request from an already-parsed JSON value.
    pub fn from_json_value(value: serde_json::Value) -> Result<Self, CoreError> {
        let request: Self = serde_json::from_value(value)
            .map_err(|e| CoreError::Validation(format!("Invalid training request: {e}")))?;
        request.check()?;
        Ok(request)
    }

    /// Check the numeric constraints of the schema.
    pub fn check(&self) -> Result<(), CoreError> {
        self.validate()
            .map_err(|e| CoreError::Validation(format!("Invalid training request: {e}")))
    }

    /// Number of samples per epoch: the leading dimension of `x_train_shape`.
    pub fn samples_per_epoch(&self) -> u64 {
        self.x_train_shape.first().copied().unwrap_or(0)
    }

    /// Decode `x_train` and reshape it to `x_train_shape`.
    pub fn x_train_array(&self) -> Result<NdArray, CorruptPayload> {
        reshape(decode_array(&self.x_train)?, &self.x_train_shape)
    }

    /// Decode `y_train` and reshape it to `y_train_shape`.
    pub fn y_train_array(&self) -> Result<NdArray, CorruptPayload> {
        reshape(decode_array(&self.y_train)?, &self.y_train_shape)
    }

    /// Decode every entry of `weights`.
    pub fn weight_arrays(&self) -> Result<Vec<NdArray>, CorruptPayload> {
        self.weights
            .iter()
            .enumerate()
            .map(|(index, w)| {
                decode_array(w).map_err(|e| CorruptPayload::Weight {
                    index,
                    source: Box::new(e),
                })
            })
            .collect()
    }
}

fn reshape(array: NdArray, shape: &[u64]) -> Result<NdArray, CorruptPayload> {
    let shape = shape
        .iter()
        .map(|&d| usize::try_from(d))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|_| CorruptPayload::Malformed("dimension does not fit in memory".into()))?;
    array.reshaped(shape)
}

/// Receives progress notifications from a running trainer.
///
/// Mirrors the epoch/batch callback structure of common training loops.
pub trait ProgressSink: Send {
    fn on_epoch_begin(&mut self, epoch: u64);

    /// Called after every processed batch with the number of samples in it.
    fn on_batch_end(&mut self, batch_samples: u64);

    fn on_epoch_end(&mut self, epoch: u64);
}

/// A sink that ignores every notification.
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn on_epoch_begin(&mut self, _epoch: u64) {}
    fn on_batch_end(&mut self, _batch_samples: u64) {}
    fn on_epoch_end(&mut self, _epoch: u64) {}
}

/// Why a training run did not produce a model.
#[derive(Debug, thiserror::Error)]
pub enum TrainingError {
    #[error("corrupt payload")]
    CorruptPayload(#[from] CorruptPayload),

    #[error("unsupported loss function '{0}'")]
    UnsupportedLoss(String),

    #[error("unsupported optimizer '{0}'")]
    UnsupportedOptimizer(String),

    #[error("incompatible shapes: {0}")]
    IncompatibleShapes(String),

    #[error("training did not converge: {0}")]
    Diverged(String),

    #[error("trainer panicked: {0}")]
    Panicked(String),
}

/// The long-running computation executed for each job.
///
/// Implementations run synchronously on a blocking thread and report
/// progress through `progress`. They must not panic on bad input; return a
/// [`TrainingError`] instead.
pub trait Trainable: Send + Sync + 'static {
    fn train(
        &self,
        request: &TrainingRequest,
        progress: &mut dyn ProgressSink,
    ) -> Result<ModelDocument, TrainingError>;
}

/// Render an error and its source chain as multi-line diagnostic text.
pub fn describe_failure(err: &(dyn std::error::Error + 'static)) -> String {
    let mut text = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        text.push_str("\n  caused by: ");
        text.push_str(&cause.to_string());
        source = cause.source();
    }
    text
}
