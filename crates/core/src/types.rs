/// Job identifiers are 32-character lowercase base32 strings.
pub type JobId = String;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Status of a freshly submitted job.
pub const STATUS_PENDING: f64 = 0.0;

/// Status of a job whose training completed.
pub const STATUS_COMPLETE: f64 = 100.0;

/// Sentinel status recorded when a job failed. Lies outside `[0, 100]`, so
/// pollers can detect failure without reading the result.
pub const STATUS_FAILED: f64 = -1.0;

/// Returns `true` if `status` is the failure sentinel.
pub fn is_failed_status(status: f64) -> bool {
    status < 0.0
}
