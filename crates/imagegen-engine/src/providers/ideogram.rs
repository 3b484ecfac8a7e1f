use std::sync::Arc;

use imagegen_contracts::providers::{Operation, ProviderCapabilities, IDEOGRAM};
use imagegen_contracts::{EditInput, GenerateInput, GeneratedImage, ProviderError, ProviderResult};
use reqwest::blocking::multipart::Form;
use reqwest::blocking::Client as HttpClient;
use serde_json::Value;

use super::{file_part, nearest_aspect_ratio, requested_dims, resolve_model};
use crate::base::{AdapterBase, CallSpec, SharedState};
use crate::config::{api_base_from_env, EngineConfig};
use crate::http;
use crate::ImageProvider;

const DEFAULT_API_BASE: &str = "https://api.ideogram.ai";
const ENV_VARS: &[&str] = &["IDEOGRAM_API_KEY"];
const DEFAULT_MODEL: &str = "ideogram-v3";
const MODELS: &[&str] = &["ideogram-v3", "ideogram-v3-turbo", "ideogram-v3-quality"];
const REMIX_IMAGE_WEIGHT: &str = "50";
const ASPECT_RATIOS: &[(&str, f64)] = &[
    ("1x1", 1.0),
    ("16x9", 16.0 / 9.0),
    ("9x16", 9.0 / 16.0),
    ("4x3", 4.0 / 3.0),
    ("3x4", 3.0 / 4.0),
    ("3x2", 3.0 / 2.0),
    ("2x3", 2.0 / 3.0),
    ("16x10", 16.0 / 10.0),
    ("10x16", 10.0 / 16.0),
    ("4x5", 4.0 / 5.0),
    ("5x4", 5.0 / 4.0),
    ("2x1", 2.0),
    ("1x2", 0.5),
    ("3x1", 3.0),
    ("1x3", 1.0 / 3.0),
];

pub struct IdeogramProvider {
    base: AdapterBase,
    api_base: String,
    http: HttpClient,
}

impl IdeogramProvider {
    pub fn from_env(config: &EngineConfig, shared: Arc<SharedState>) -> Self {
        Self::new(AdapterBase::from_env(IDEOGRAM, ENV_VARS, config, shared), config)
            .with_api_base(api_base_from_env("IDEOGRAM_API_BASE", DEFAULT_API_BASE))
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

    fn rendering_speed(model: &str) -> Result<&'static str, ProviderError> {
        match model {
            "ideogram-v3" => Ok("DEFAULT"),
            "ideogram-v3-turbo" => Ok("TURBO"),
            "ideogram-v3-quality" => Ok("QUALITY"),
            other => Err(ProviderError::invalid_input(
                IDEOGRAM,
                format!("unknown model {other}"),
            )),
        }
    }

    fn base_form(
        prompt: &str,
        width: Option<u32>,
        height: Option<u32>,
        seed: Option<u64>,
        speed: &'static str,
    ) -> Form {
        let (width, height) = requested_dims(width, height);
        let mut form = Form::new()
            .text("prompt", prompt.to_string())
            .text("aspect_ratio", nearest_aspect_ratio(width, height, ASPECT_RATIOS))
            .text("rendering_speed", speed)
            .text("num_images", "1");
        if let Some(seed) = seed {
            form = form.text("seed", seed.to_string());
        }
        form
    }

    /// Downloads every safe result; unsafe results come back without a URL.
    fn download_results(&self, payload: &Value) -> Result<Vec<GeneratedImage>, ProviderError> {
        let rows = payload
            .get("data")
            .and_then(Value::as_array)
            .ok_or_else(|| ProviderError::failed(IDEOGRAM, "response is missing `data`"))?;
        let mut urls = Vec::new();
        let mut unsafe_results = 0;
        for row in rows {
            if row.get("is_image_safe").and_then(Value::as_bool) == Some(false) {
                unsafe_results += 1;
                continue;
            }
            http::collect_image_urls(row, &mut urls);
        }
        if urls.is_empty() && unsafe_results > 0 {
            return Err(ProviderError::failed(
                IDEOGRAM,
                "every result was flagged as unsafe",
            ));
        }
        urls.iter()
            .map(|url| http::download_image(IDEOGRAM, &self.http, url))
            .collect()
    }

    fn post(
        &self,
        endpoint: &str,
        form: Form,
        api_key: &str,
    ) -> Result<Vec<GeneratedImage>, ProviderError> {
        let request = self.http.post(endpoint).header("Api-Key", api_key).multipart(form);
        let response = http::send(IDEOGRAM, request, "Ideogram request")?;
        let payload = http::json_or_error(IDEOGRAM, response)?;
        self.download_results(&payload)
    }
}

impl ImageProvider for IdeogramProvider {
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
        let speed = Self::rendering_speed(model)?;
        let endpoint = format!("{}/v1/ideogram-v3/generate", self.api_base);
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
            let form = Self::base_form(&input.prompt, input.width, input.height, input.seed, speed);
            self.post(&endpoint, form, api_key)
        })
    }

    fn edit(&self, input: &EditInput) -> Result<ProviderResult, ProviderError> {
        self.base.api_key()?;
        let model = resolve_model(input.model.as_deref(), DEFAULT_MODEL);
        let speed = Self::rendering_speed(model)?;
        let sources = self.base.load_edit_sources(input)?;
        let (width, height) = self.base.edit_dimensions(input, &sources)?;
        let endpoint = format!("{}/v1/ideogram-v3/remix", self.api_base);
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
            let form = Self::base_form(&input.prompt, Some(width), Some(height), input.seed, speed)
                .text("image_weight", REMIX_IMAGE_WEIGHT)
                .part("image", file_part(IDEOGRAM, &sources.source)?);
            self.post(&endpoint, form, api_key)
        })
    }
}
