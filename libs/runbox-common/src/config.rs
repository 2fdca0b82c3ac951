use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Application configuration
/// Provides defaults with environment variable overrides
#[derive(Debug, Clone)]
pub struct Config {
    pub redis_url: String,
    pub default_timeout_ms: u64,
    pub max_timeout_ms: u64,
    /// Added to a job's timeout to get the caller's wait budget
    pub poll_margin_ms: u64,
    pub result_ttl_secs: u64,
    pub language_config_path: Option<String>,
}

/// Parse `value`, falling back to `default` when unset or invalid
pub fn parse_or<T: FromStr>(value: Option<String>, default: T) -> T {
    value.and_then(|v| v.parse().ok()).unwrap_or(default)
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from any key lookup; `from_env` passes the process environment
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            redis_url: get("REDIS_URL").unwrap_or_else(|| "redis://127.0.0.1:6379".to_string()),
            default_timeout_ms: parse_or(get("DEFAULT_TIMEOUT_MS"), 5000),
            max_timeout_ms: parse_or(get("MAX_TIMEOUT_MS"), 30000),
            poll_margin_ms: parse_or(get("POLL_MARGIN_MS"), 10000),
            result_ttl_secs: parse_or(get("RESULT_TTL_SECS"), 3600),
            language_config_path: get("LANGUAGE_CONFIG_PATH"),
        }
    }

    pub fn new() -> Self {
        Self::from_env()
    }

    /// Wait budget a caller should use for a job with `timeout_ms`.
    /// Never shorter than the execution timeout itself.
    pub fn wait_budget(&self, timeout_ms: u64) -> Duration {
        Duration::from_millis(timeout_ms.saturating_add(self.poll_margin_ms))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}
