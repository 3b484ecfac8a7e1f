use std::sync::Arc;

use imagegen_contracts::providers::{Operation, ProviderCapabilities, OPENAI};
use imagegen_contracts::{EditInput, GenerateInput, GeneratedImage, ProviderError, ProviderResult};
use reqwest::blocking::multipart::Form;
use reqwest::blocking::Client as HttpClient;
use serde_json::{json, Value};

use super::{
    decode_base64_image, file_part, nearest_aspect_ratio, requested_dims, resolve_model,
};
use crate::base::{AdapterBase, CallSpec, SharedState};
use crate::config::{api_base_from_env, EngineConfig};
use crate::http;
use crate::ImageProvider;

const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";
const ENV_VARS: &[&str] = &["OPENAI_API_KEY"];
const DEFAULT_MODEL: &str = "gpt-image-1";
const MODELS: &[&str] = &["gpt-image-1", "gpt-image-1-mini", "dall-e-3"];
const SIZES: &[(&str, f64)] = &[
    ("1024x1024", 1.0),
    ("1536x1024", 1536.0 / 1024.0),
    ("1024x1536", 1024.0 / 1536.0),
];

pub struct OpenAiProvider {
    base: AdapterBase,
    api_base: String,
    http: HttpClient,
}

impl OpenAiProvider {
    pub fn from_env(config: &EngineConfig, shared: Arc<SharedState>) -> Self {
        Self::new(AdapterBase::from_env(OPENAI, ENV_VARS, config, shared), config)
            .with_api_base(api_base_from_env("OPENAI_API_BASE", DEFAULT_API_BASE))
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

    /// OpenAI only accepts three sizes; anything else snaps by aspect ratio.
    fn normalize_size(width: Option<u32>, height: Option<u32>) -> &'static str {
        let (width, height) = requested_dims(width, height);
        nearest_aspect_ratio(width, height, SIZES)
    }

    fn is_gpt_image_model(model: &str) -> bool {
        model.to_ascii_lowercase().starts_with("gpt-image")
    }

    fn images_from_payload(&self, payload: &Value) -> Result<Vec<GeneratedImage>, ProviderError> {
        let rows = payload
            .get("data")
            .and_then(Value::as_array)
            .ok_or_else(|| ProviderError::failed(OPENAI, "response is missing `data`"))?;
        let mime_type = payload
            .get("output_format")
            .and_then(Value::as_str)
            .map(|format| format!("image/{}", format.replace("jpg", "jpeg")));
        let mut images = Vec::new();
        for row in rows {
            if let Some(b64) = http::str_field(row, "b64_json") {
                images.push(decode_base64_image(OPENAI, b64, mime_type.as_deref())?);
            } else if let Some(url) = http::str_field(row, "url") {
                images.push(http::download_image(OPENAI, &self.http, url)?);
            }
        }
        Ok(images)
    }
}

impl ImageProvider for OpenAiProvider {
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
        let model = resolve_model(input.model.as_deref(), DEFAULT_MODEL);
        let size = Self::normalize_size(input.width, input.height);
        let spec = CallSpec {
            operation: Operation::Generate,
            prompt: &input.prompt,
            model,
            width: input.width,
            height: input.height,
            seed: input.seed,
            source_digest: None,
        };
        let endpoint = format!("{}/images/generations", self.api_base);
        self.base.run(spec, |api_key| {
            let mut payload = json!({
                "model": model,
                "prompt": input.prompt,
                "n": 1,
                "size": size,
            });
            if !Self::is_gpt_image_model(model) {
                payload["response_format"] = json!("b64_json");
            }
            let request = self.http.post(&endpoint).bearer_auth(api_key).json(&payload);
            let response = http::send(OPENAI, request, "OpenAI generate request")?;
            let payload = http::json_or_error(OPENAI, response)?;
            self.images_from_payload(&payload)
        })
    }

    fn edit(&self, input: &EditInput) -> Result<ProviderResult, ProviderError> {
        self.base.api_key()?;
        let model = resolve_model(input.model.as_deref(), DEFAULT_MODEL);
        if !Self::is_gpt_image_model(model) {
            return Err(ProviderError::invalid_input(
                OPENAI,
                format!("model {model} does not support edits"),
            ));
        }
        let sources = self.base.load_edit_sources(input)?;
        let size = Self::normalize_size(input.width, input.height);
        let spec = CallSpec {
            operation: Operation::Edit,
            prompt: &input.prompt,
            model,
            width: input.width,
            height: input.height,
            seed: input.seed,
            source_digest: Some(&sources.digest),
        };
        let endpoint = format!("{}/images/edits", self.api_base);
        self.base.run(spec, |api_key| {
            // Multipart forms are consumed by send, so each attempt builds its own.
            let mut form = Form::new()
                .text("model", model.to_string())
                .text("prompt", input.prompt.clone())
                .text("n", "1")
                .text("size", size)
                .part("image", file_part(OPENAI, &sources.source)?);
            if let Some(mask) = sources.mask.as_ref() {
                form = form.part("mask", file_part(OPENAI, mask)?);
            }
            let request = self.http.post(&endpoint).bearer_auth(api_key).multipart(form);
            let response = http::send(OPENAI, request, "OpenAI edit request")?;
            let payload = http::json_or_error(OPENAI, response)?;
            self.images_from_payload(&payload)
        })
    }
}
