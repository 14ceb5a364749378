use std::time::Duration;

use pivot_pipeline::config::ConfigError;

/// Headroom added on top of the pipeline budget for local work (staging,
/// publishing, thumbnail rendering).
const REQUEST_TIMEOUT_MARGIN_SECS: u64 = 60;

/// Server configuration loaded from environment variables.
///
/// All fields have defaults suitable for local development.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `3000`).
    pub port: u16,
    /// Allowed CORS origins, parsed from comma-separated `CORS_ORIGINS`.
    pub cors_origins: Vec<String>,
    /// HTTP request timeout in seconds. Synchronous stitch requests hold the
    /// connection for the whole job, so this is never below the pipeline's
    /// job budget.
    pub request_timeout_secs: u64,
    /// How long shutdown waits for background jobs to wind down (default: `30`).
    pub shutdown_timeout_secs: u64,
    /// Request body limit for multipart uploads (default: 512 MiB).
    pub max_upload_bytes: usize,
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// `job_budget` is the longest a job can spend on remote calls; see
    /// `Timeouts::job_budget`.
    ///
    /// | Env Var                | Default                    |
    /// |------------------------|----------------------------|
    /// | `HOST`                 | `0.0.0.0`                  |
    /// | `PORT`                 | `3000`                     |
    /// | `CORS_ORIGINS`         | `http://localhost:5173`    |
    /// | `REQUEST_TIMEOUT_SECS` | job budget + 60            |
    /// | `SHUTDOWN_TIMEOUT_SECS`| `30`                       |
    /// | `MAX_UPLOAD_MB`        | `512`                      |
    pub fn from_env(job_budget: Duration) -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok(), job_budget)
    }

    /// Same as [`from_env`](Self::from_env) but reading from `lookup`.
    pub fn from_lookup(
        lookup: impl Fn(&str) -> Option<String>,
        job_budget: Duration,
    ) -> Result<Self, ConfigError> {
        let host = lookup("HOST").unwrap_or_else(|| "0.0.0.0".into());

        let cors_origins: Vec<String> = lookup("CORS_ORIGINS")
            .unwrap_or_else(|| "http://localhost:5173".into())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let budget_secs = job_budget.as_secs();
        let request_timeout_secs = parse_var(
            &lookup,
            "REQUEST_TIMEOUT_SECS",
            budget_secs + REQUEST_TIMEOUT_MARGIN_SECS,
        )?;
        if request_timeout_secs < budget_secs {
            return Err(ConfigError::Invalid {
                key: "REQUEST_TIMEOUT_SECS",
                value: request_timeout_secs.to_string(),
                reason: format!(
                    "must be at least the pipeline job budget of {budget_secs}s \
                     (probe + 5 x command + 2 x transfer + 2 x engine timeouts)"
                ),
            });
        }

        Ok(Self {
            host,
            port: parse_var(&lookup, "PORT", 3000)?,
            cors_origins,
            request_timeout_secs,
            shutdown_timeout_secs: parse_var(&lookup, "SHUTDOWN_TIMEOUT_SECS", 30)?,
            max_upload_bytes: upload_limit_bytes(parse_var(&lookup, "MAX_UPLOAD_MB", 512)?)?,
        })
    }
}

/// `MAX_UPLOAD_MB` in bytes, rejecting values that overflow `usize`.
fn upload_limit_bytes(megabytes: usize) -> Result<usize, ConfigError> {
    megabytes
        .checked_mul(1024 * 1024)
        .ok_or_else(|| ConfigError::Invalid {
            key: "MAX_UPLOAD_MB",
            value: megabytes.to_string(),
            reason: "too large".into(),
        })
}

fn parse_var<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: T,
) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            key,
            value: raw.clone(),
            reason: e.to_string(),
        }),
    }
}
