use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use imagegen_contracts::providers::{Operation, ProviderCapabilities, REPLICATE};
use imagegen_contracts::{EditInput, GenerateInput, GeneratedImage, ProviderError, ProviderResult};
use reqwest::blocking::Client as HttpClient;
use serde_json::{json, Value};

use super::{nearest_aspect_ratio, requested_dims, resolve_model};
use crate::base::{AdapterBase, CallSpec, SharedState};
use crate::config::{api_base_from_env, EngineConfig};
use crate::http;
use crate::ImageProvider;

const DEFAULT_API_BASE: &str = "https://api.replicate.com/v1";
const ENV_VARS: &[&str] = &["REPLICATE_API_TOKEN", "REPLICATE_API_KEY"];
const DEFAULT_MODEL: &str = "black-forest-labs/flux-schnell";
const MODELS: &[&str] = &[
    "black-forest-labs/flux-schnell",
    "black-forest-labs/flux-dev",
    "black-forest-labs/flux-1.1-pro",
    "recraft-ai/recraft-v3",
];
pub const POLL_INTERVAL: Duration = Duration::from_secs(1);
pub const POLL_DEADLINE: Duration = Duration::from_secs(120);
const ASPECT_RATIOS: &[(&str, f64)] = &[
    ("1:1", 1.0),
    ("16:9", 16.0 / 9.0),
    ("9:16", 9.0 / 16.0),
    ("3:2", 3.0 / 2.0),
    ("2:3", 2.0 / 3.0),
    ("4:5", 4.0 / 5.0),
    ("5:4", 5.0 / 4.0),
    ("21:9", 21.0 / 9.0),
    ("9:21", 9.0 / 21.0),
];

/// Replicate predictions. Text-to-image only.
pub struct ReplicateProvider {
    base: AdapterBase,
    api_base: String,
    http: HttpClient,
    poll_interval: Duration,
    poll_deadline: Duration,
}

impl ReplicateProvider {
    pub fn from_env(config: &EngineConfig, shared: Arc<SharedState>) -> Self {
        Self::new(AdapterBase::from_env(REPLICATE, ENV_VARS, config, shared), config)
            .with_api_base(api_base_from_env("REPLICATE_API_BASE", DEFAULT_API_BASE))
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

    fn prediction_status(prediction: &Value) -> String {
        http::str_field(prediction, "status")
            .map(str::to_ascii_lowercase)
            .unwrap_or_default()
    }

    fn prediction_failed(prediction: &Value) -> ProviderError {
        let detail = prediction
            .get("error")
            .filter(|error| !error.is_null())
            .map(Value::to_string)
            .unwrap_or_else(|| Self::prediction_status(prediction));
        ProviderError::failed(
            REPLICATE,
            format!("prediction failed: {}", http::truncate_text(&detail, 256)),
        )
    }

    fn poll_prediction(&self, poll_url: &str, api_key: &str) -> Result<Value, ProviderError> {
        let started = Instant::now();
        loop {
            let request = self.http.get(poll_url).bearer_auth(api_key);
            let response = http::send(REPLICATE, request, "Replicate poll")?;
            let prediction = http::json_or_error(REPLICATE, response)?;
            match Self::prediction_status(&prediction).as_str() {
                "succeeded" => return Ok(prediction),
                "failed" | "canceled" => return Err(Self::prediction_failed(&prediction)),
                _ => {}
            }
            if started.elapsed() >= self.poll_deadline {
                return Err(ProviderError::failed(
                    REPLICATE,
                    format!(
                        "polling timed out after {:.1}s",
                        self.poll_deadline.as_secs_f64()
                    ),
                ));
            }
            thread::sleep(self.poll_interval);
        }
    }

    fn predict(
        &self,
        payload: &Value,
        api_key: &str,
    ) -> Result<Vec<GeneratedImage>, ProviderError> {
        let request = self
            .http
            .post(format!("{}/predictions", self.api_base))
            .bearer_auth(api_key)
            .header("Prefer", "wait")
            .json(payload);
        let response = http::send(REPLICATE, request, "Replicate request")?;
        let mut prediction = http::json_or_error(REPLICATE, response)?;
        match Self::prediction_status(&prediction).as_str() {
            "succeeded" => {}
            "starting" | "processing" => {
                let poll_url = prediction
                    .get("urls")
                    .and_then(|urls| http::str_field(urls, "get"))
                    .map(str::to_string)
                    .ok_or_else(|| {
                        ProviderError::failed(REPLICATE, "prediction missing poll URL")
                    })?;
                prediction = self.poll_prediction(&poll_url, api_key)?;
            }
            _ => return Err(Self::prediction_failed(&prediction)),
        }

        let mut urls = Vec::new();
        if let Some(output) = prediction.get("output") {
            http::collect_image_urls(output, &mut urls);
        }
        urls.iter()
            .map(|url| http::download_image(REPLICATE, &self.http, url))
            .collect()
    }
}

impl ImageProvider for ReplicateProvider {
    fn name(&self) -> &str {
        self.base.name()
    }

    fn required_env_vars(&self) -> &[&str] {
        self.base.required_env_vars()
    }

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities {
            generate: true,
            edit: false,
            models: MODELS.iter().map(|model| model.to_string()).collect(),
            default_model: DEFAULT_MODEL.to_string(),
            max_width: 1440,
            max_height: 1440,
        }
    }

    fn is_configured(&self) -> bool {
        self.base.is_configured()
    }

    fn generate(&self, input: &GenerateInput) -> Result<ProviderResult, ProviderError> {
        let model = resolve_model(input.model.as_deref(), DEFAULT_MODEL);
        let (width, height) = requested_dims(input.width, input.height);
        let mut prediction_input = json!({
            "prompt": input.prompt,
            "aspect_ratio": nearest_aspect_ratio(width, height, ASPECT_RATIOS),
            "num_outputs": 1,
            "output_format": "png",
        });
        if let Some(seed) = input.seed {
            prediction_input["seed"] = json!(seed);
        }
        let payload = json!({ "version": model, "input": prediction_input });
        let spec = CallSpec {
            operation: Operation::Generate,
            prompt: &input.prompt,
            model,
            width: input.width,
            height: input.height,
            seed: input.seed,
            source_digest: None,
        };
        self.base.run(spec, |api_key| self.predict(&payload, api_key))
    }

    fn edit(&self, _input: &EditInput) -> Result<ProviderResult, ProviderError> {
        Err(ProviderError::unsupported(REPLICATE, Operation::Edit))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use httpmock::Method::{GET, POST};
    use httpmock::MockServer;
    use imagegen_contracts::providers::Operation;
    use imagegen_contracts::{EditInput, GenerateInput, ProviderError};
    use serde_json::json;

    use super::{ReplicateProvider, ENV_VARS};
    use crate::providers::test_support::{
        png_data_url, should_skip_httpmock, test_base, test_config, TEST_KEY,
    };
    use crate::ImageProvider;

    fn provider(server: &MockServer) -> ReplicateProvider {
        ReplicateProvider::new(test_base("replicate", ENV_VARS), &test_config())
            .with_api_base(server.base_url())
            .with_polling(Duration::from_millis(5), Duration::from_millis(200))
    }

    #[test]
    fn edit_is_explicitly_unsupported() {
        let provider = ReplicateProvider::new(test_base("replicate", ENV_VARS), &test_config());
        assert!(!provider.capabilities().edit);
        let err = provider.edit(&EditInput::new("blue", png_data_url())).err();
        assert!(matches!(
            err,
            Some(ProviderError::Unsupported {
                operation: Operation::Edit,
                ..
            })
        ));
    }

    #[test]
    fn processing_prediction_is_polled() -> anyhow::Result<()> {
        if should_skip_httpmock() {
            return Ok(());
        }
        let server = MockServer::start();
        let png = crate::images::tests::png_bytes(4, 4);
        let create = server.mock(|when, then| {
            when.method(POST)
                .path("/predictions")
                .header("authorization", format!("Bearer {TEST_KEY}"))
                .header("prefer", "wait")
                .body_includes("\"version\":\"black-forest-labs/flux-schnell\"");
            then.status(201).json_body(json!({
                "id": "p1",
                "status": "processing",
                "urls": {"get": server.url("/predictions/p1")},
            }));
        });
        let poll = server.mock(|when, then| {
            when.method(GET).path("/predictions/p1");
            then.status(200).json_body(json!({
                "id": "p1",
                "status": "succeeded",
                "output": [server.url("/files/p1.png")],
            }));
        });
        let download = server.mock(|when, then| {
            when.method(GET).path("/files/p1.png");
            then.status(200)
                .header("content-type", "image/png")
                .body(png.clone());
        });

        let result = provider(&server).generate(&GenerateInput::new("a red circle"))?;
        create.assert();
        poll.assert();
        download.assert();
        assert_eq!(result.provider, "replicate");
        assert_eq!(result.images[0].bytes, png);
        Ok(())
    }

    #[test]
    fn failed_prediction_is_final() {
        if should_skip_httpmock() {
            return;
        }
        let server = MockServer::start();
        let create = server.mock(|when, then| {
            when.method(POST).path("/predictions");
            then.status(201).json_body(json!({
                "id": "p2",
                "status": "failed",
                "error": "NSFW content detected",
            }));
        });

        let err = provider(&server)
            .generate(&GenerateInput::new("a red circle"))
            .err();
        create.assert();
        let message = err.map(|err| err.to_string()).unwrap_or_default();
        assert!(message.contains("NSFW"));
    }
}
