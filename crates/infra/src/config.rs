//! Configuration loading and representation.
//!
//! Everything is read from environment variables once at startup; tests build a
//! config from an explicit lookup function instead.

use std::str::FromStr;
use std::time::Duration;

use streamlab_queue::QueueConfig;

pub const DEFAULT_PORT: u16 = 4000;
pub const DEFAULT_BUCKET: &str = "streamlab-dev";
pub const DEFAULT_REDIS_URL: &str = "redis://localhost:6379";
pub const DEFAULT_QUEUE_STREAM: &str = "streamlab:stages";
pub const DEFAULT_STUB_HLS_URL: &str = "https://test-streams.mux.dev/x36xhzz/x36xhzz.m3u8";

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{key} must be set{context}")]
    Missing { key: &'static str, context: &'static str },

    #[error("invalid value for {key}: {value:?} ({reason})")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// HTTP port.
    pub port: u16,
    /// Bucket holding uploads and stage outputs.
    pub bucket: String,
    /// Postgres + Redis instead of in-memory collaborators.
    pub use_persistent_stores: bool,
    pub database_url: Option<String>,
    pub redis_url: String,
    pub queue_stream: String,
    pub worker_concurrency: usize,
    pub queue: QueueConfig,
    /// Long-poll wait for a single receive.
    pub queue_wait: Duration,
    /// Placeholder playable URL attached by the Package stand-in, if enabled.
    pub stub_playable: Option<String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            bucket: DEFAULT_BUCKET.to_string(),
            use_persistent_stores: false,
            database_url: None,
            redis_url: DEFAULT_REDIS_URL.to_string(),
            queue_stream: DEFAULT_QUEUE_STREAM.to_string(),
            worker_concurrency: 2,
            queue: QueueConfig::default(),
            queue_wait: Duration::from_millis(1000),
            stub_playable: None,
        }
    }
}

impl PipelineConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let worker_concurrency = parse_or(&get, "WORKER_CONCURRENCY", defaults.worker_concurrency)?;
        if worker_concurrency == 0 {
            return Err(ConfigError::Invalid {
                key: "WORKER_CONCURRENCY",
                value: "0".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }

        let max_receive_count = parse_or(
            &get,
            "QUEUE_MAX_RECEIVE_COUNT",
            defaults.queue.max_receive_count,
        )?;
        if max_receive_count == 0 {
            return Err(ConfigError::Invalid {
                key: "QUEUE_MAX_RECEIVE_COUNT",
                value: "0".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }

        let visibility_ms = parse_or(
            &get,
            "QUEUE_VISIBILITY_TIMEOUT_MS",
            defaults.queue.visibility_timeout.as_millis() as u64,
        )?;
        let wait_ms = parse_or(&get, "QUEUE_WAIT_MS", defaults.queue_wait.as_millis() as u64)?;

        let stub_playable = if flag_or(&get, "USE_STUB_HLS", false)? {
            Some(get("STUB_HLS_URL").unwrap_or_else(|| DEFAULT_STUB_HLS_URL.to_string()))
        } else {
            None
        };

        Ok(Self {
            port: parse_or(&get, "PORT", defaults.port)?,
            bucket: get("BUCKET_NAME").unwrap_or(defaults.bucket),
            use_persistent_stores: flag_or(&get, "USE_PERSISTENT_STORES", false)?,
            database_url: get("DATABASE_URL"),
            redis_url: get("REDIS_URL").unwrap_or(defaults.redis_url),
            queue_stream: get("QUEUE_STREAM").unwrap_or(defaults.queue_stream),
            worker_concurrency,
            queue: QueueConfig {
                visibility_timeout: Duration::from_millis(visibility_ms),
                max_receive_count,
            },
            queue_wait: Duration::from_millis(wait_ms),
            stub_playable,
        })
    }

    pub fn database_url(&self) -> Result<&str, ConfigError> {
        self.database_url.as_deref().ok_or(ConfigError::Missing {
            key: "DATABASE_URL",
            context: " when USE_PERSISTENT_STORES=true",
        })
    }
}

fn parse_or<T, G>(get: &G, key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: core::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        None => Ok(default),
        Some(raw) => raw.trim().parse::<T>().map_err(|e| ConfigError::Invalid {
            key,
            value: raw,
            reason: e.to_string(),
        }),
    }
}

fn flag_or<G>(get: &G, key: &'static str, default: bool) -> Result<bool, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    let Some(raw) = get(key) else {
        return Ok(default);
    };
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Invalid {
            key,
            value: raw,
            reason: "expected a boolean".to_string(),
        }),
    }
}
