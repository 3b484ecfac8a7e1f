use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use imagegen_contracts::providers::{Operation, ProviderCapabilities, FLUX};
use imagegen_contracts::{EditInput, GenerateInput, GeneratedImage, ProviderError, ProviderResult};
use reqwest::blocking::Client as HttpClient;
use serde_json::{json, Value};

use super::{requested_dims, resolve_model, snap_dimension};
use crate::base::{AdapterBase, CallSpec, SharedState};
use crate::config::{api_base_from_env, EngineConfig};
use crate::http;
use crate::ImageProvider;

const DEFAULT_API_BASE: &str = "https://api.bfl.ai/v1";
const ENV_VARS: &[&str] = &["BFL_API_KEY", "FLUX_API_KEY"];
const DEFAULT_MODEL: &str = "flux-pro-1.1";
const DEFAULT_EDIT_MODEL: &str = "flux-kontext-pro";
const MODELS: &[&str] = &[
    "flux-pro-1.1",
    "flux-pro-1.1-ultra",
    "flux-dev",
    "flux-kontext-pro",
    "flux-kontext-max",
];
pub const POLL_INTERVAL: Duration = Duration::from_millis(500);
pub const POLL_DEADLINE: Duration = Duration::from_secs(120);
const MIN_DIMENSION: u32 = 256;
const MAX_DIMENSION: u32 = 1440;

/// Black Forest Labs API: submit a job, then poll its `polling_url`.
pub struct FluxProvider {
    base: AdapterBase,
    api_base: String,
    http: HttpClient,
    poll_interval: Duration,
    poll_deadline: Duration,
}

impl FluxProvider {
    pub fn from_env(config: &EngineConfig, shared: Arc<SharedState>) -> Self {
        Self::new(AdapterBase::from_env(FLUX, ENV_VARS, config, shared), config)
            .with_api_base(api_base_from_env("BFL_API_BASE", DEFAULT_API_BASE))
    }

    pub fn new(base: AdapterBase, config: &EngineConfig) -> Self {
        Self {
            base,
            api_base: DEFAULT_API_BASE.to_string(),
            http: http::build_client(config.request_timeout),
            poll_interval: POLL_INTERVAL,
            poll_deadline: POLL_DEADLINE,
        }
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_polling(mut self, interval: Duration, deadline: Duration) -> Self {
        self.poll_interval = interval;
        self.poll_deadline = deadline;
        self
    }

    fn normalize_dims(width: Option<u32>, height: Option<u32>) -> (u32, u32) {
        let (width, height) = requested_dims(width, height);
        (
            snap_dimension(width, 32, MIN_DIMENSION, MAX_DIMENSION),
            snap_dimension(height, 32, MIN_DIMENSION, MAX_DIMENSION),
        )
    }

    fn submit(&self, model: &str, payload: &Value, api_key: &str) -> Result<String, ProviderError> {
        let endpoint = format!("{}/{}", self.api_base, model);
        let request = self
            .http
            .post(&endpoint)
            .header("accept", "application/json")
            .header("x-key", api_key)
            .json(payload);
        let response = http::send(FLUX, request, "Flux request")?;
        let submitted = http::json_or_error(FLUX, response)?;
        if let Some(url) = http::str_field(&submitted, "polling_url") {
            return Ok(url.to_string());
        }
        let id = http::str_field(&submitted, "id")
            .ok_or_else(|| ProviderError::failed(FLUX, "response missing polling_url and id"))?;
        Ok(format!("{}/get_result?id={id}", self.api_base))
    }

    /// Polls until the job is ready and returns the sample URL.
    fn poll(&self, polling_url: &str, api_key: &str) -> Result<String, ProviderError> {
        let started = Instant::now();
        loop {
            let request = self
                .http
                .get(polling_url)
                .header("accept", "application/json")
                .header("x-key", api_key);
            let response = http::send(FLUX, request, "Flux poll")?;
            let payload = http::json_or_error(FLUX, response)?;
            let status = http::str_field(&payload, "status")
                .map(str::to_ascii_lowercase)
                .unwrap_or_default();
            match status.as_str() {
                "ready" => {
                    return payload
                        .get("result")
                        .and_then(|result| {
                            http::str_field(result, "sample")
                                .or_else(|| http::str_field(result, "url"))
                        })
                        .or_else(|| http::str_field(&payload, "sample"))
                        .map(str::to_string)
                        .ok_or_else(|| {
                            ProviderError::failed(FLUX, "ready response missing sample URL")
                        });
                }
                "error"
                | "failed"
                | "request moderated"
                | "content moderated"
                | "task not found" => {
                    return Err(ProviderError::failed(
                        FLUX,
                        format!(
                            "generation failed with status `{status}`: {}",
                            http::truncate_text(&payload.to_string(), 256)
                        ),
                    ));
                }
                _ => {}
            }
            if started.elapsed() >= self.poll_deadline {
                return Err(ProviderError::failed(
                    FLUX,
                    format!(
                        "polling timed out after {:.1}s",
                        self.poll_deadline.as_secs_f64()
                    ),
                ));
            }
            tracing::debug!(provider = FLUX, status = %status, "job still pending");
            thread::sleep(self.poll_interval);
        }
    }

    fn call(
        &self,
        model: &str,
        payload: &Value,
        api_key: &str,
    ) -> Result<Vec<GeneratedImage>, ProviderError> {
        let polling_url = self.submit(model, payload, api_key)?;
        let sample_url = self.poll(&polling_url, api_key)?;
        Ok(vec![http::download_image(FLUX, &self.http, &sample_url)?])
    }
}

impl ImageProvider for FluxProvider {
    fn name(&self) -> &str {
        self.base.name()
    }

    fn required_env_vars(&self) -> &[&str] {
        self.base.required_env_vars()
    }

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities {
            generate: true,
            edit: true,
            models: MODELS.iter().map(|model| model.to_string()).collect(),
            default_model: DEFAULT_MODEL.to_string(),
            max_width: MAX_DIMENSION,
            max_height: MAX_DIMENSION,
        }
    }

    fn is_configured(&self) -> bool {
        self.base.is_configured()
    }

    fn generate(&self, input: &GenerateInput) -> Result<ProviderResult, ProviderError> {
        let model = resolve_model(input.model.as_deref(), DEFAULT_MODEL);
        let (width, height) = Self::normalize_dims(input.width, input.height);
        let mut payload = json!({
            "prompt": input.prompt,
            "width": width,
            "height": height,
            "output_format": "png",
        });
        if let Some(seed) = input.seed {
            payload["seed"] = json!(seed);
        }
        let spec = CallSpec {
            operation: Operation::Generate,
            prompt: &input.prompt,
            model,
            width: input.width,
            height: input.height,
            seed: input.seed,
            source_digest: None,
        };
        self.base.run(spec, |api_key| self.call(model, &payload, api_key))
    }

    fn edit(&self, input: &EditInput) -> Result<ProviderResult, ProviderError> {
        self.base.api_key()?;
        let model = resolve_model(input.model.as_deref(), DEFAULT_EDIT_MODEL);
        let sources = self.base.load_edit_sources(input)?;
        if sources.mask.is_some() {
            tracing::debug!(provider = FLUX, "masks are not supported; ignoring mask");
        }
        let mut payload = json!({
            "prompt": input.prompt,
            "input_image": BASE64.encode(&sources.source.bytes),
            "output_format": "png",
        });
        if input.width.is_some() && input.height.is_some() {
            let (width, height) = Self::normalize_dims(input.width, input.height);
            payload["width"] = json!(width);
            payload["height"] = json!(height);
        }
        if let Some(seed) = input.seed {
            payload["seed"] = json!(seed);
        }
        let spec = CallSpec {
            operation: Operation::Edit,
            prompt: &input.prompt,
            model,
            width: input.width,
            height: input.height,
            seed: input.seed,
            source_digest: Some(&sources.digest),
        };
        self.base.run(spec, |api_key| self.call(model, &payload, api_key))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use httpmock::Method::{GET, POST};
    use httpmock::MockServer;
    use imagegen_contracts::{EditInput, GenerateInput, ProviderError};
    use serde_json::json;

    use super::{FluxProvider, ENV_VARS};
    use crate::providers::test_support::{
        png_data_url, should_skip_httpmock, test_base, test_config, TEST_KEY,
    };
    use crate::ImageProvider;

    fn provider(server: &MockServer) -> FluxProvider {
        FluxProvider::new(test_base("flux", ENV_VARS), &test_config())
            .with_api_base(server.base_url())
            .with_polling(Duration::from_millis(5), Duration::from_millis(200))
    }

    #[test]
    fn dims_snap_to_multiples_of_32() {
        assert_eq!(FluxProvider::normalize_dims(None, None), (1024, 1024));
        assert_eq!(FluxProvider::normalize_dims(Some(1000), Some(700)), (992, 704));
        assert_eq!(FluxProvider::normalize_dims(Some(4000), Some(64)), (1440, 256));
        assert_eq!(FluxProvider::normalize_dims(Some(u32::MAX), Some(512)), (1440, 512));
    }

    #[test]
    fn generate_submits_polls_and_downloads() -> anyhow::Result<()> {
        if should_skip_httpmock() {
            return Ok(());
        }
        let server = MockServer::start();
        let png = crate::images::tests::png_bytes(5, 5);
        let submit = server.mock(|when, then| {
            when.method(POST)
                .path("/flux-pro-1.1")
                .header("x-key", TEST_KEY)
                .body_includes("\"width\":512")
                .body_includes("\"seed\":42");
            then.status(200).json_body(json!({
                "id": "job-1",
                "polling_url": server.url("/poll/job-1"),
            }));
        });
        let poll = server.mock(|when, then| {
            when.method(GET).path("/poll/job-1").header("x-key", TEST_KEY);
            then.status(200).json_body(json!({
                "id": "job-1",
                "status": "Ready",
                "result": {"sample": server.url("/samples/job-1.png")},
            }));
        });
        let download = server.mock(|when, then| {
            when.method(GET).path("/samples/job-1.png");
            then.status(200)
                .header("content-type", "image/png")
                .body(png.clone());
        });

        let result = provider(&server).generate(
            &GenerateInput::new("a red circle")
                .with_size(512, 512)
                .with_seed(42),
        )?;
        submit.assert();
        poll.assert();
        download.assert();
        assert_eq!(result.provider, "flux");
        assert_eq!(result.images[0].bytes, png);
        Ok(())
    }

    #[test]
    fn moderated_job_fails_without_retry() {
        if should_skip_httpmock() {
            return;
        }
        let server = MockServer::start();
        let submit = server.mock(|when, then| {
            when.method(POST).path("/flux-kontext-pro").body_includes("\"input_image\"");
            then.status(200).json_body(json!({
                "id": "job-2",
                "polling_url": server.url("/poll/job-2"),
            }));
        });
        server.mock(|when, then| {
            when.method(GET).path("/poll/job-2");
            then.status(200)
                .json_body(json!({"id": "job-2", "status": "Content Moderated"}));
        });

        let err = provider(&server)
            .edit(&EditInput::new("make it blue", png_data_url()))
            .err();
        submit.assert();
        let Some(err) = err else {
            panic!("moderated job should fail");
        };
        assert!(matches!(err, ProviderError::Failed { retryable: false, .. }));
        assert!(err.to_string().contains("content moderated"));
    }

    #[test]
    fn pending_job_stops_at_deadline() {
        if should_skip_httpmock() {
            return;
        }
        let server = MockServer::start();
        let submit = server.mock(|when, then| {
            when.method(POST).path("/flux-pro-1.1");
            then.status(200).json_body(json!({"id": "job-3"}));
        });
        server.mock(|when, then| {
            when.method(GET).path("/get_result").query_param("id", "job-3");
            then.status(200).json_body(json!({"id": "job-3", "status": "Pending"}));
        });

        let err = provider(&server)
            .generate(&GenerateInput::new("a red circle"))
            .err();
        submit.assert();
        let message = err.map(|err| err.to_string()).unwrap_or_default();
        assert!(message.contains("timed out"));
    }
}
