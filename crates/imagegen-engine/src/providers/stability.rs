use std::sync::Arc;

use imagegen_contracts::providers::{Operation, ProviderCapabilities, STABILITY};
use imagegen_contracts::{EditInput, GenerateInput, GeneratedImage, ProviderError, ProviderResult};
use reqwest::blocking::multipart::Form;
use reqwest::blocking::{Client as HttpClient, Response as HttpResponse};
use serde_json::Value;

use super::{
    decode_base64_image, file_part, nearest_aspect_ratio, requested_dims, resolve_model,
};
use crate::base::{AdapterBase, CallSpec, SharedState};
use crate::config::{api_base_from_env, EngineConfig};
use crate::http;
use crate::ImageProvider;

const DEFAULT_API_BASE: &str = "https://api.stability.ai";
const ENV_VARS: &[&str] = &["STABILITY_API_KEY"];
const DEFAULT_MODEL: &str = "stable-image-core";
const DEFAULT_EDIT_MODEL: &str = "sd3.5-large";
const MODELS: &[&str] = &[
    "stable-image-core",
    "stable-image-ultra",
    "sd3.5-large",
    "sd3.5-large-turbo",
    "sd3.5-medium",
];
const EDIT_STRENGTH: &str = "0.6";
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

pub struct StabilityProvider {
    base: AdapterBase,
    api_base: String,
    http: HttpClient,
}

impl StabilityProvider {
    pub fn from_env(config: &EngineConfig, shared: Arc<SharedState>) -> Self {
        Self::new(AdapterBase::from_env(STABILITY, ENV_VARS, config, shared), config)
            .with_api_base(api_base_from_env("STABILITY_API_BASE", DEFAULT_API_BASE))
    }

    pub fn new(base: AdapterBase, config: &EngineConfig) -> Self {
        Self {
            base,
            api_base: DEFAULT_API_BASE.to_string(),
            http: http::build_client(config.request_timeout),
        }
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    /// Maps a model name to its endpoint and the `model` form field, if any.
    fn route(&self, model: &str) -> Result<(String, Option<String>), ProviderError> {
        let generate = format!("{}/v2beta/stable-image/generate", self.api_base);
        match model {
            "stable-image-core" | "core" => Ok((format!("{generate}/core"), None)),
            "stable-image-ultra" | "ultra" => Ok((format!("{generate}/ultra"), None)),
            sd3 if sd3.starts_with("sd3") => Ok((format!("{generate}/sd3"), Some(sd3.to_string()))),
            other => Err(ProviderError::invalid_input(
                STABILITY,
                format!("unknown model {other}"),
            )),
        }
    }

    fn decode_json_image(payload: &Value) -> Result<GeneratedImage, ProviderError> {
        let image_b64 = http::str_field(payload, "image")
            .or_else(|| http::str_field(payload, "base64"))
            .or_else(|| {
                payload
                    .get("artifacts")
                    .and_then(Value::as_array)
                    .and_then(|rows| rows.first())
                    .and_then(|row| http::str_field(row, "base64"))
            })
            .ok_or_else(|| ProviderError::failed(STABILITY, "JSON response missing image bytes"))?;
        decode_base64_image(STABILITY, image_b64, None)
    }

    fn read_image(response: HttpResponse) -> Result<GeneratedImage, ProviderError> {
        let filtered = response
            .headers()
            .get("finish-reason")
            .and_then(|value| value.to_str().ok())
            .is_some_and(|value| value.eq_ignore_ascii_case("CONTENT_FILTERED"));
        if filtered && response.status().is_success() {
            return Err(ProviderError::failed(STABILITY, "output was content filtered"));
        }
        let is_image = http::content_type(response.headers())
            .is_some_and(|value| value.starts_with("image/"));
        if is_image || !response.status().is_success() {
            return http::image_or_error(STABILITY, response);
        }
        let payload = http::json_or_error(STABILITY, response)?;
        Self::decode_json_image(&payload)
    }

    fn post(
        &self,
        endpoint: &str,
        form: Form,
        api_key: &str,
    ) -> Result<Vec<GeneratedImage>, ProviderError> {
        let request = self
            .http
            .post(endpoint)
            .bearer_auth(api_key)
            .header("accept", "image/*")
            .multipart(form);
        let response = http::send(STABILITY, request, "Stability request")?;
        Ok(vec![Self::read_image(response)?])
    }
}

impl ImageProvider for StabilityProvider {
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
            max_width: 1536,
            max_height: 1536,
        }
    }

    fn is_configured(&self) -> bool {
        self.base.is_configured()
    }

    fn generate(&self, input: &GenerateInput) -> Result<ProviderResult, ProviderError> {
        self.base.api_key()?;
        let model = resolve_model(input.model.as_deref(), DEFAULT_MODEL);
        let (endpoint, model_field) = self.route(model)?;
        let (width, height) = requested_dims(input.width, input.height);
        let aspect_ratio = nearest_aspect_ratio(width, height, ASPECT_RATIOS);
        let spec = CallSpec {
            operation: Operation::Generate,
            prompt: &input.prompt,
            model,
            width: input.width,
            height: input.height,
            seed: input.seed,
            source_digest: None,
        };
        self.base.run(spec, |api_key| {
            let mut form = Form::new()
                .text("prompt", input.prompt.clone())
                .text("aspect_ratio", aspect_ratio)
                .text("output_format", "png");
            if let Some(model) = model_field.as_ref() {
                form = form.text("model", model.clone());
            }
            if let Some(seed) = input.seed {
                form = form.text("seed", seed.to_string());
            }
            self.post(&endpoint, form, api_key)
        })
    }

    fn edit(&self, input: &EditInput) -> Result<ProviderResult, ProviderError> {
        self.base.api_key()?;
        let model = resolve_model(input.model.as_deref(), DEFAULT_EDIT_MODEL);
        let (endpoint, model_field) = self.route(model)?;
        let Some(model_field) = model_field else {
            return Err(ProviderError::invalid_input(
                STABILITY,
                format!("model {model} does not support image-to-image"),
            ));
        };
        let sources = self.base.load_edit_sources(input)?;
        let spec = CallSpec {
            operation: Operation::Edit,
            prompt: &input.prompt,
            model,
            width: input.width,
            height: input.height,
            seed: input.seed,
            source_digest: Some(&sources.digest),
        };
        self.base.run(spec, |api_key| {
            // Image-to-image keeps the source framing; aspect_ratio is rejected here.
            let mut form = Form::new()
                .text("prompt", input.prompt.clone())
                .text("mode", "image-to-image")
                .text("strength", EDIT_STRENGTH)
                .text("model", model_field.clone())
                .text("output_format", "png")
                .part("image", file_part(STABILITY, &sources.source)?);
            if let Some(seed) = input.seed {
                form = form.text("seed", seed.to_string());
            }
            self.post(&endpoint, form, api_key)
        })
    }
}
