use std::fmt;
use std::sync::Arc;

use imagegen_contracts::providers::Operation;
use imagegen_contracts::{EditInput, GeneratedImage, ProviderError, ProviderResult};

use crate::cache::{digest_bytes, CacheKeyParts, ResponseCache};
use crate::config::{first_env, EngineConfig};
use crate::credentials::is_usable_api_key;
use crate::images::{self, ImageBuffer};
use crate::rate_limit::RateLimiter;
use crate::retry::{execute_with_retry, RetryPolicy};

pub const MAX_PROMPT_CHARS: usize = 4000;

/// Mutable state shared by every adapter of one registry.
#[derive(Debug, Default)]
pub struct SharedState {
    pub cache: ResponseCache,
    pub rate_limiter: RateLimiter,
}

/// The request fields an adapter call is keyed and logged by.
#[derive(Debug, Clone, Copy)]
pub struct CallSpec<'a> {
    pub operation: Operation,
    pub prompt: &'a str,
    pub model: &'a str,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub seed: Option<u64>,
    pub source_digest: Option<&'a str>,
}

/// Decoded edit inputs plus a digest that identifies them in the cache.
#[derive(Debug, Clone)]
pub struct EditSources {
    pub source: ImageBuffer,
    pub mask: Option<ImageBuffer>,
    pub digest: String,
}

/// Cross-cutting request handling every adapter delegates to: credentials,
/// validation, rate limiting, caching and retries.
#[derive(Clone)]
pub struct AdapterBase {
    name: &'static str,
    env_vars: &'static [&'static str],
    api_key: Option<String>,
    test_mode: bool,
    retry: RetryPolicy,
    shared: Arc<SharedState>,
}

impl fmt::Debug for AdapterBase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdapterBase")
            .field("name", &self.name)
            .field("env_vars", &self.env_vars)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("test_mode", &self.test_mode)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl AdapterBase {
    pub fn new(
        name: &'static str,
        env_vars: &'static [&'static str],
        api_key: Option<String>,
        config: &EngineConfig,
        shared: Arc<SharedState>,
    ) -> Self {
        Self {
            name,
            env_vars,
            api_key: api_key
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty()),
            test_mode: config.test_mode,
            retry: RetryPolicy::default().with_max_attempts(config.max_attempts),
            shared,
        }
    }

    /// Resolves the key from the first set variable in `env_vars`.
    pub fn from_env(
        name: &'static str,
        env_vars: &'static [&'static str],
        config: &EngineConfig,
        shared: Arc<SharedState>,
    ) -> Self {
        Self::new(name, env_vars, first_env(env_vars), config, shared)
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn required_env_vars(&self) -> &'static [&'static str] {
        self.env_vars
    }

    pub fn is_configured(&self) -> bool {
        is_usable_api_key(self.api_key.as_deref(), self.test_mode)
    }

    pub fn api_key(&self) -> Result<&str, ProviderError> {
        match self.api_key.as_deref() {
            Some(key) if self.is_configured() => Ok(key),
            _ => Err(ProviderError::not_configured(self.name, self.env_vars)),
        }
    }

    pub fn validate_prompt(&self, prompt: &str) -> Result<(), ProviderError> {
        if prompt.trim().is_empty() {
            return Err(ProviderError::invalid_input(self.name, "prompt is empty"));
        }
        let length = prompt.chars().count();
        if length > MAX_PROMPT_CHARS {
            return Err(ProviderError::invalid_input(
                self.name,
                format!("prompt is {length} characters; the limit is {MAX_PROMPT_CHARS}"),
            ));
        }
        Ok(())
    }

    pub fn image_buffer(&self, source: &str) -> Result<ImageBuffer, ProviderError> {
        images::image_buffer(self.name, source)
    }

    pub fn detect_image_dimensions(&self, source: &str) -> Result<(u32, u32), ProviderError> {
        images::detect_image_dimensions(self.name, source)
    }

    /// Output size for an edit: the caller's width and height when both are
    /// set, otherwise the decoded source's own dimensions.
    pub fn edit_dimensions(
        &self,
        input: &EditInput,
        sources: &EditSources,
    ) -> Result<(u32, u32), ProviderError> {
        match (input.width, input.height) {
            (Some(width), Some(height)) => Ok((width, height)),
            _ => images::buffer_dimensions(self.name, &sources.source),
        }
    }

    pub fn check_rate_limit(&self) -> Result<(), ProviderError> {
        self.shared.rate_limiter.check(self.name)
    }

    pub fn cache(&self) -> &ResponseCache {
        &self.shared.cache
    }

    pub fn execute_with_retry<T>(
        &self,
        operation: impl FnMut(u32) -> Result<T, ProviderError>,
    ) -> Result<T, ProviderError> {
        execute_with_retry(&self.retry, operation)
    }

    pub fn load_edit_sources(&self, input: &EditInput) -> Result<EditSources, ProviderError> {
        let source = self.image_buffer(&input.source_image)?;
        let mask = input
            .mask
            .as_deref()
            .map(|mask| self.image_buffer(mask))
            .transpose()?;
        let mut digest_input = source.bytes.clone();
        if let Some(mask) = mask.as_ref() {
            digest_input.extend_from_slice(&mask.bytes);
        }
        Ok(EditSources {
            digest: digest_bytes(&digest_input),
            source,
            mask,
        })
    }

    /// Checks credentials and the prompt, consults the cache, then performs `call` under the rate
    /// limiter and retry policy. `call` receives the API key and must return
    /// at least one image.
    pub fn run(
        &self,
        spec: CallSpec<'_>,
        mut call: impl FnMut(&str) -> Result<Vec<GeneratedImage>, ProviderError>,
    ) -> Result<ProviderResult, ProviderError> {
        let api_key = self.api_key()?;
        self.validate_prompt(spec.prompt)?;

        let key = CacheKeyParts {
            provider: self.name,
            operation: spec.operation,
            prompt: spec.prompt,
            model: spec.model,
            width: spec.width,
            height: spec.height,
            seed: spec.seed,
            source_digest: spec.source_digest,
        }
        .key();
        if let Some(hit) = self.shared.cache.get(&key) {
            tracing::debug!(provider = self.name, operation = %spec.operation, "cache hit");
            return Ok(hit);
        }

        tracing::debug!(
            provider = self.name,
            operation = %spec.operation,
            model = spec.model,
            "sending provider request"
        );
        let images = self.execute_with_retry(|_attempt| {
            self.check_rate_limit()?;
            call(api_key)
        })?;
        if images.is_empty() {
            return Err(ProviderError::failed(self.name, "provider returned no images"));
        }

        let result = ProviderResult::new(self.name, spec.model, images);
        self.shared.cache.insert(key, result.clone());
        Ok(result)
    }
}
