//! Background execution for the training queue: the job dispatcher, the
//! progress sink it hands to trainers, the finished-job reaper and a
//! reference linear-regression trainer.

pub mod dispatcher;
pub mod linear;
pub mod progress;
pub mod reaper;

pub use dispatcher::{JobDispatcher, TaskFailure};
pub use linear::LinearRegressionTrainer;
pub use reaper::Reaper;
