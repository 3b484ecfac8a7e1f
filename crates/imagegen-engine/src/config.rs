use std::env;
use std::time::Duration;

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Process-wide knobs shared by every adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Upper bound for a single HTTP round trip.
    pub request_timeout: Duration,
    pub max_attempts: u32,
    /// Accept `test-` prefixed API keys without the usual checks.
    pub test_mode: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            test_mode: false,
        }
    }
}

impl EngineConfig {
    /// Reads `IMAGEGEN_REQUEST_TIMEOUT_SECS`, `IMAGEGEN_MAX_ATTEMPTS` and
    /// `IMAGEGEN_TEST_MODE`; unset or unparsable values keep their defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(non_empty_env)
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let request_timeout = lookup("IMAGEGEN_REQUEST_TIMEOUT_SECS")
            .and_then(|value| value.parse::<f64>().ok())
            .filter(|value| value.is_finite() && *value > 0.0)
            .map(|value| Duration::from_secs_f64(value.clamp(1.0, 600.0)))
            .unwrap_or(defaults.request_timeout);
        let max_attempts = lookup("IMAGEGEN_MAX_ATTEMPTS")
            .and_then(|value| value.parse::<u32>().ok())
            .map(|value| value.clamp(1, 10))
            .unwrap_or(defaults.max_attempts);
        let test_mode = lookup("IMAGEGEN_TEST_MODE")
            .map(|value| parse_flag(&value))
            .unwrap_or(defaults.test_mode);
        Self {
            request_timeout,
            max_attempts,
            test_mode,
        }
    }
}

fn parse_flag(raw: &str) -> bool {
    matches!(
        raw.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

pub(crate) fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// First non-empty value among `keys`, in order.
pub(crate) fn first_env(keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| non_empty_env(key))
}

pub(crate) fn api_base_from_env(key: &str, default: &str) -> String {
    non_empty_env(key)
        .map(|value| value.trim_end_matches('/').to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| default.to_string())
}
