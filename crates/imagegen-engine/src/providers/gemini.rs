use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use imagegen_contracts::providers::{Operation, ProviderCapabilities, GEMINI};
use imagegen_contracts::{EditInput, GenerateInput, GeneratedImage, ProviderError, ProviderResult};
use reqwest::blocking::Client as HttpClient;
use serde_json::{json, Value};

use super::{decode_base64_image, nearest_aspect_ratio, requested_dims, resolve_model};
use crate::base::{AdapterBase, CallSpec, SharedState};
use crate::config::{api_base_from_env, EngineConfig};
use crate::http;
use crate::images::ImageBuffer;
use crate::ImageProvider;

const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
const ENV_VARS: &[&str] = &["GEMINI_API_KEY", "GOOGLE_API_KEY"];
const DEFAULT_MODEL: &str = "gemini-2.5-flash-image";
const MODELS: &[&str] = &["gemini-2.5-flash-image", "gemini-3-pro-image-preview"];
const ASPECT_RATIOS: &[(&str, f64)] = &[
    ("1:1", 1.0),
    ("2:3", 2.0 / 3.0),
    ("3:2", 3.0 / 2.0),
    ("3:4", 3.0 / 4.0),
    ("4:3", 4.0 / 3.0),
    ("4:5", 4.0 / 5.0),
    ("5:4", 5.0 / 4.0),
    ("9:16", 9.0 / 16.0),
    ("16:9", 16.0 / 9.0),
    ("21:9", 21.0 / 9.0),
];

pub struct GeminiProvider {
    base: AdapterBase,
    api_base: String,
    http: HttpClient,
}

impl GeminiProvider {
    pub fn from_env(config: &EngineConfig, shared: Arc<SharedState>) -> Self {
        Self::new(AdapterBase::from_env(GEMINI, ENV_VARS, config, shared), config)
            .with_api_base(api_base_from_env("GEMINI_API_BASE", DEFAULT_API_BASE))
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

    fn endpoint_for_model(&self, model: &str) -> String {
        let model_path = if model.starts_with("models/") {
            model.to_string()
        } else {
            format!("models/{model}")
        };
        format!("{}/{}:generateContent", self.api_base, model_path)
    }

    fn build_payload(
        prompt: &str,
        width: Option<u32>,
        height: Option<u32>,
        seed: Option<u64>,
        source: Option<&ImageBuffer>,
    ) -> Value {
        let mut parts = Vec::new();
        if let Some(source) = source {
            parts.push(json!({
                "inlineData": {
                    "mimeType": source.mime_type,
                    "data": base64_payload(source),
                }
            }));
        }
        parts.push(json!({ "text": prompt }));

        let (width, height) = requested_dims(width, height);
        let mut generation_config = json!({
            "candidateCount": 1,
            "responseModalities": ["IMAGE"],
            "imageConfig": {
                "aspectRatio": nearest_aspect_ratio(width, height, ASPECT_RATIOS),
            },
        });
        if let Some(seed) = seed {
            generation_config["seed"] = json!(seed);
        }
        json!({
            "contents": [{ "role": "user", "parts": parts }],
            "generationConfig": generation_config,
        })
    }

    fn extract_images(payload: &Value) -> Result<Vec<GeneratedImage>, ProviderError> {
        let mut out = Vec::new();
        let candidates = payload
            .get("candidates")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default();
        for candidate in candidates {
            let parts = candidate
                .get("content")
                .and_then(|content| content.get("parts"))
                .and_then(Value::as_array)
                .map(Vec::as_slice)
                .unwrap_or_default();
            for part in parts {
                let Some(inline) = part.get("inlineData").or_else(|| part.get("inline_data")) else {
                    continue;
                };
                let Some(data) = http::str_field(inline, "data") else {
                    continue;
                };
                let mime_type = http::str_field(inline, "mimeType")
                    .or_else(|| http::str_field(inline, "mime_type"));
                out.push(decode_base64_image(GEMINI, data, mime_type)?);
            }
        }
        if out.is_empty() {
            if let Some(reason) = payload
                .get("promptFeedback")
                .and_then(|feedback| http::str_field(feedback, "blockReason"))
            {
                return Err(ProviderError::failed(
                    GEMINI,
                    format!("prompt blocked: {reason}"),
                ));
            }
        }
        Ok(out)
    }

    fn call(
        &self,
        model: &str,
        payload: &Value,
        api_key: &str,
    ) -> Result<Vec<GeneratedImage>, ProviderError> {
        let request = self
            .http
            .post(self.endpoint_for_model(model))
            .header("x-goog-api-key", api_key)
            .json(payload);
        let response = http::send(GEMINI, request, "Gemini request")?;
        let payload = http::json_or_error(GEMINI, response)?;
        Self::extract_images(&payload)
    }
}

fn base64_payload(buffer: &ImageBuffer) -> String {
    BASE64.encode(&buffer.bytes)
}

impl ImageProvider for GeminiProvider {
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
            max_width: 2048,
            max_height: 2048,
        }
    }

    fn is_configured(&self) -> bool {
        self.base.is_configured()
    }

    fn generate(&self, input: &GenerateInput) -> Result<ProviderResult, ProviderError> {
        let model = resolve_model(input.model.as_deref(), DEFAULT_MODEL);
        let payload =
            Self::build_payload(&input.prompt, input.width, input.height, input.seed, None);
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
        let model = resolve_model(input.model.as_deref(), DEFAULT_MODEL);
        let sources = self.base.load_edit_sources(input)?;
        // Keep the source framing unless the caller asks for a new one.
        let (width, height) = self.base.edit_dimensions(input, &sources)?;
        let (width, height) = (Some(width), Some(height));
        let payload = Self::build_payload(
            &input.prompt,
            width,
            height,
            input.seed,
            Some(&sources.source),
        );
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
