use std::str::FromStr;
use std::time::Duration;

/// Default request body cap. Training payloads carry whole datasets.
pub const DEFAULT_MAX_BODY_BYTES: usize = 512 * 1024 * 1024;

/// A configuration variable that is set but cannot be used.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{var} has invalid value '{value}': {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

/// Server configuration loaded from environment variables.
///
/// All fields have defaults suitable for local development; the default
/// database is in-memory and lost on exit.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `3000`).
    pub port: u16,
    /// SQLite connection string (default: `sqlite::memory:`).
    pub database_url: String,
    /// Shared password for HTTP basic auth. `None` disables auth.
    pub password: Option<String>,
    /// HTTP request timeout in seconds (default: `30`).
    pub request_timeout_secs: u64,
    /// Largest accepted request body in bytes (default: 512 MiB). `0`
    /// removes the limit.
    pub max_body_bytes: usize,
    /// How long finished jobs stay fetchable (default: 60 s).
    pub job_ttl: Duration,
    /// Reaper sweep interval (default: 30 s).
    pub reaper_interval: Duration,
    /// Dispatcher poll interval on an empty queue (default: 1000 ms).
    pub dispatch_poll_interval: Duration,
    /// Minimum spacing between progress writes (default: 500 ms).
    pub progress_interval: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 3000,
            database_url: trainq_db::IN_MEMORY_URL.into(),
            password: None,
            request_timeout_secs: 30,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            job_ttl: Duration::from_secs(60),
            reaper_interval: Duration::from_secs(30),
            dispatch_poll_interval: Duration::from_millis(1000),
            progress_interval: Duration::from_millis(500),
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                | Default           |
    /// |------------------------|-------------------|
    /// | `HOST`                 | `0.0.0.0`         |
    /// | `PORT`                 | `3000`            |
    /// | `DATABASE_URL`         | `sqlite::memory:` |
    /// | `TRAINQ_PASSWORD`      | unset (no auth)   |
    /// | `REQUEST_TIMEOUT_SECS` | `30`              |
    /// | `MAX_BODY_BYTES`       | `536870912`       |
    /// | `JOB_TTL_SECS`         | `60`              |
    /// | `REAPER_INTERVAL_SECS` | `30`              |
    /// | `DISPATCH_POLL_MS`     | `1000`            |
    /// | `PROGRESS_INTERVAL_MS` | `500`             |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Load configuration from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let reaper_interval = Duration::from_secs(parse_or(
            &lookup,
            "REAPER_INTERVAL_SECS",
            defaults.reaper_interval.as_secs(),
        )?);
        if reaper_interval.is_zero() {
            return Err(ConfigError::Invalid {
                var: "REAPER_INTERVAL_SECS",
                value: "0".into(),
                reason: "must be at least 1".into(),
            });
        }

        Ok(Self {
            host: lookup("HOST").unwrap_or(defaults.host),
            port: parse_or(&lookup, "PORT", defaults.port)?,
            database_url: lookup("DATABASE_URL")
                .filter(|url| !url.trim().is_empty())
                .unwrap_or(defaults.database_url),
            password: lookup("TRAINQ_PASSWORD").filter(|p| !p.is_empty()),
            request_timeout_secs: parse_or(
                &lookup,
                "REQUEST_TIMEOUT_SECS",
                defaults.request_timeout_secs,
            )?,
            max_body_bytes: parse_or(&lookup, "MAX_BODY_BYTES", defaults.max_body_bytes)?,
            job_ttl: Duration::from_secs(parse_or(
                &lookup,
                "JOB_TTL_SECS",
                defaults.job_ttl.as_secs(),
            )?),
            reaper_interval,
            dispatch_poll_interval: Duration::from_millis(parse_or(
                &lookup,
                "DISPATCH_POLL_MS",
                defaults.dispatch_poll_interval.as_millis() as u64,
            )?),
            progress_interval: Duration::from_millis(parse_or(
                &lookup,
                "PROGRESS_INTERVAL_MS",
                defaults.progress_interval.as_millis() as u64,
            )?),
        })
    }
}

fn parse_or<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
    default: T,
) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(var) {
        None => Ok(default),
        Some(value) => value.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            var,
            reason: e.to_string(),
            value,
        }),
    }
}
