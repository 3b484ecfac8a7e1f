use std::time::Duration;

use thiserror::Error;

use crate::providers::Operation;

type BoxedSource = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Every failure an adapter can surface, tagged with the provider that
/// produced it.
///
/// Callers decide on retries through [`ProviderError::is_retryable`] and never
/// need to inspect provider-specific payloads.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("[{provider}] invalid input: {message}")]
    InvalidInput { provider: String, message: String },

    #[error("[{provider}] not configured: set {}", .env_vars.join(" or "))]
    NotConfigured {
        provider: String,
        env_vars: Vec<String>,
    },

    #[error("[{provider}] {operation} is not supported by this provider")]
    Unsupported {
        provider: String,
        operation: Operation,
    },

    #[error("[{provider}] rate limit exceeded; retry in {:.1}s", .retry_after.as_secs_f64())]
    RateLimited {
        provider: String,
        retry_after: Duration,
    },

    #[error("[{provider}] transient failure: {message}")]
    Transient {
        provider: String,
        message: String,
        #[source]
        source: Option<BoxedSource>,
    },

    #[error("[{provider}] request failed: {message}")]
    Failed {
        provider: String,
        message: String,
        retryable: bool,
    },

    #[error("no configured provider available for {operation}")]
    NoProviderAvailable { operation: Operation },
}

impl ProviderError {
    pub fn invalid_input(provider: &str, message: impl Into<String>) -> Self {
        Self::InvalidInput {
            provider: provider.to_string(),
            message: message.into(),
        }
    }

    pub fn not_configured(provider: &str, env_vars: &[&str]) -> Self {
        Self::NotConfigured {
            provider: provider.to_string(),
            env_vars: env_vars.iter().map(|name| (*name).to_string()).collect(),
        }
    }

    pub fn unsupported(provider: &str, operation: Operation) -> Self {
        Self::Unsupported {
            provider: provider.to_string(),
            operation,
        }
    }

    pub fn rate_limited(provider: &str, retry_after: Duration) -> Self {
        Self::RateLimited {
            provider: provider.to_string(),
            retry_after,
        }
    }

    pub fn transient(provider: &str, message: impl Into<String>) -> Self {
        Self::Transient {
            provider: provider.to_string(),
            message: message.into(),
            source: None,
        }
    }

    pub fn transient_with_source(
        provider: &str,
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Transient {
            provider: provider.to_string(),
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Provider-reported failure. Not retried: a second attempt rarely changes
    /// a content or validation decision made on the provider side.
    pub fn failed(provider: &str, message: impl Into<String>) -> Self {
        Self::Failed {
            provider: provider.to_string(),
            message: message.into(),
            retryable: false,
        }
    }

    pub fn provider(&self) -> Option<&str> {
        match self {
            Self::InvalidInput { provider, .. }
            | Self::NotConfigured { provider, .. }
            | Self::Unsupported { provider, .. }
            | Self::RateLimited { provider, .. }
            | Self::Transient { provider, .. }
            | Self::Failed { provider, .. } => Some(provider.as_str()),
            Self::NoProviderAvailable { .. } => None,
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            Self::RateLimited { .. } | Self::Transient { .. } => true,
            Self::Failed { retryable, .. } => *retryable,
            Self::InvalidInput { .. }
            | Self::NotConfigured { .. }
            | Self::Unsupported { .. }
            | Self::NoProviderAvailable { .. } => false,
        }
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after, .. } => Some(*retry_after),
            _ => None,
        }
    }
}
