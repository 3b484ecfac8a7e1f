use std::sync::Arc;

use imagegen_contracts::providers::{Operation, ProviderCapabilities, FAL};
use imagegen_contracts::{EditInput, GenerateInput, GeneratedImage, ProviderError, ProviderResult};
use reqwest::blocking::Client as HttpClient;
use reqwest::header::AUTHORIZATION;
use serde_json::{json, Value};

use super::{requested_dims, resolve_model};
use crate::base::{AdapterBase, CallSpec, SharedState};
use crate::config::{api_base_from_env, EngineConfig};
use crate::http;
use crate::images;
use crate::ImageProvider;

const DEFAULT_API_BASE: &str = "https://fal.run";
const ENV_VARS: &[&str] = &["FAL_KEY", "FAL_API_KEY"];
const DEFAULT_MODEL: &str = "fal-ai/flux/schnell";
const DEFAULT_EDIT_MODEL: &str = "fal-ai/flux/dev/image-to-image";
const MODELS: &[&str] = &[
    "fal-ai/flux/schnell",
    "fal-ai/flux/dev",
    "fal-ai/flux/dev/image-to-image",
    "fal-ai/fast-sdxl",
];
const EDIT_STRENGTH: f64 = 0.85;

pub struct FalProvider {
    base: AdapterBase,
    api_base: String,
    http: HttpClient,
}

impl FalProvider {
    pub fn from_env(config: &EngineConfig, shared: Arc<SharedState>) -> Self {
        Self::new(AdapterBase::from_env(FAL, ENV_VARS, config, shared), config)
            .with_api_base(api_base_from_env("FAL_API_BASE", DEFAULT_API_BASE))
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

    fn endpoint(&self, model: &str) -> String {
        if model.starts_with("http://") || model.starts_with("https://") {
            return model.to_string();
        }
        format!("{}/{}", self.api_base, model.trim_start_matches('/'))
    }

    /// Results are either hosted URLs or, in sync mode, inline data URLs.
    fn images_from_payload(&self, payload: &Value) -> Result<Vec<GeneratedImage>, ProviderError> {
        let inline: Vec<&str> = payload
            .get("images")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default()
            .iter()
            .filter_map(|row| http::str_field(row, "url"))
            .filter(|url| url.starts_with("data:"))
            .collect();
        let mut out = inline
            .into_iter()
            .map(|url| {
                images::image_buffer(FAL, url)
                    .map(|buffer| GeneratedImage::new(buffer.bytes, buffer.mime_type))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let mut urls = Vec::new();
        http::collect_image_urls(payload, &mut urls);
        for url in urls {
            out.push(http::download_image(FAL, &self.http, &url)?);
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
            .post(self.endpoint(model))
            .header(AUTHORIZATION, format!("Key {api_key}"))
            .json(payload);
        let response = http::send(FAL, request, "Fal request")?;
        let payload = http::json_or_error(FAL, response)?;
        self.images_from_payload(&payload)
    }
}

impl ImageProvider for FalProvider {
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
        let (width, height) = requested_dims(input.width, input.height);
        let mut payload = json!({
            "prompt": input.prompt,
            "image_size": { "width": width, "height": height },
            "num_images": 1,
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
        let mut payload = json!({
            "prompt": input.prompt,
            "image_url": sources.source.to_data_url(),
            "strength": EDIT_STRENGTH,
            "num_images": 1,
        });
        if let Some(mask) = sources.mask.as_ref() {
            payload["mask_url"] = json!(mask.to_data_url());
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
    use httpmock::Method::{GET, POST};
    use httpmock::MockServer;
    use imagegen_contracts::{EditInput, GenerateInput};
    use serde_json::json;

    use super::{FalProvider, ENV_VARS};
    use crate::providers::test_support::{
        png_data_url, should_skip_httpmock, test_base, test_config, TEST_KEY,
    };
    use crate::ImageProvider;

    fn provider(server: &MockServer) -> FalProvider {
        FalProvider::new(test_base("fal", ENV_VARS), &test_config())
            .with_api_base(server.base_url())
    }

    #[test]
    fn absolute_model_urls_are_used_as_is() {
        let provider = FalProvider::new(test_base("fal", ENV_VARS), &test_config());
        assert_eq!(provider.endpoint("fal-ai/flux/schnell"), "https://fal.run/fal-ai/flux/schnell");
        assert_eq!(
            provider.endpoint("https://queue.fal.run/fal-ai/x"),
            "https://queue.fal.run/fal-ai/x"
        );
    }

    #[test]
    fn generate_downloads_hosted_images() -> anyhow::Result<()> {
        if should_skip_httpmock() {
            return Ok(());
        }
        let server = MockServer::start();
        let png = crate::images::tests::png_bytes(4, 2);
        let mock = server.mock(|when, then| {
            when.method(POST)
                .path("/fal-ai/flux/schnell")
                .header("authorization", format!("Key {TEST_KEY}"))
                .body_includes("\"width\":512")
                .body_includes("\"height\":512");
            then.status(200).json_body(json!({
                "images": [{"url": server.url("/files/a.png"), "content_type": "image/png"}],
                "seed": 7,
            }));
        });
        let download = server.mock(|when, then| {
            when.method(GET).path("/files/a.png");
            then.status(200)
                .header("content-type", "image/png")
                .body(png.clone());
        });

        let result =
            provider(&server).generate(&GenerateInput::new("a red circle").with_size(512, 512))?;
        mock.assert();
        download.assert();
        assert_eq!(result.model, "fal-ai/flux/schnell");
        assert_eq!(result.images[0].bytes, png);
        Ok(())
    }

    #[test]
    fn edit_accepts_inline_results() -> anyhow::Result<()> {
        if should_skip_httpmock() {
            return Ok(());
        }
        let server = MockServer::start();
        let data_url = png_data_url();
        let mock = server.mock(|when, then| {
            when.method(POST)
                .path("/fal-ai/flux/dev/image-to-image")
                .body_includes("\"image_url\":\"data:image/png;base64,");
            then.status(200).json_body(json!({
                "images": [{"url": data_url, "content_type": "image/png"}],
            }));
        });

        let result = provider(&server).edit(&EditInput::new("make it blue", png_data_url()))?;
        mock.assert();
        assert_eq!(result.images.len(), 1);
        assert_eq!(result.images[0].mime_type, "image/png");
        assert_eq!(result.images[0].bytes, crate::images::tests::png_bytes(4, 4));
        Ok(())
    }
}
