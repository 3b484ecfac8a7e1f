use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use imagegen_contracts::{GeneratedImage, ProviderError};
use reqwest::blocking::multipart::Part as MultipartPart;

use crate::images::{self, ImageBuffer};

mod fal;
mod flux;
mod gemini;
mod ideogram;
mod openai;
mod replicate;
mod stability;

pub use fal::FalProvider;
pub use flux::FluxProvider;
pub use gemini::GeminiProvider;
pub use ideogram::IdeogramProvider;
pub use openai::OpenAiProvider;
pub use replicate::ReplicateProvider;
pub use stability::StabilityProvider;

pub(crate) const DEFAULT_DIMENSION: u32 = 1024;

pub(crate) fn requested_dims(width: Option<u32>, height: Option<u32>) -> (u32, u32) {
    match (width, height) {
        (Some(width), Some(height)) if width > 0 && height > 0 => (width, height),
        (Some(width), None) if width > 0 => (width, width),
        (None, Some(height)) if height > 0 => (height, height),
        _ => (DEFAULT_DIMENSION, DEFAULT_DIMENSION),
    }
}

/// The caller's model when it is set and not blank, else `default`.
pub(crate) fn resolve_model<'a>(requested: Option<&'a str>, default: &'a str) -> &'a str {
    requested
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .unwrap_or(default)
}

/// Picks the label whose ratio is closest to `width / height`.
pub(crate) fn nearest_aspect_ratio(
    width: u32,
    height: u32,
    candidates: &[(&'static str, f64)],
) -> &'static str {
    let fallback = candidates.first().map(|(label, _)| *label).unwrap_or("1:1");
    if width == 0 || height == 0 {
        return fallback;
    }
    let ratio = width as f64 / height as f64;
    let mut best = fallback;
    let mut best_delta = f64::MAX;
    for (label, value) in candidates {
        let delta = (ratio - value).abs();
        if delta < best_delta {
            best_delta = delta;
            best = label;
        }
    }
    best
}

/// Rounds to the nearest multiple of `multiple` inside `[min, max]`.
pub(crate) fn snap_dimension(value: u32, multiple: u32, min: u32, max: u32) -> u32 {
    let multiple = multiple.max(1);
    let value = value.clamp(min, max);
    let rounded = (value.saturating_add(multiple / 2) / multiple).saturating_mul(multiple);
    rounded.clamp(min, max)
}

pub(crate) fn decode_base64_image(
    provider: &str,
    payload: &str,
    mime_type: Option<&str>,
) -> Result<GeneratedImage, ProviderError> {
    let bytes = BASE64
        .decode(payload.trim().as_bytes())
        .map_err(|err| {
            ProviderError::failed(provider, format!("image base64 decode failed: {err}"))
        })?;
    if bytes.is_empty() {
        return Err(ProviderError::failed(provider, "provider returned an empty image"));
    }
    let mime_type = mime_type
        .map(str::to_string)
        .or_else(|| images::sniff_mime(&bytes).map(str::to_string))
        .unwrap_or_else(|| "image/png".to_string());
    Ok(GeneratedImage::new(bytes, mime_type))
}

pub(crate) fn file_part(
    provider: &str,
    buffer: &ImageBuffer,
) -> Result<MultipartPart, ProviderError> {
    MultipartPart::bytes(buffer.bytes.clone())
        .file_name(buffer.file_name())
        .mime_str(&buffer.mime_type)
        .map_err(|err| {
            ProviderError::invalid_input(provider, format!("bad image mime type: {err}"))
        })
}


#[cfg(test)]
mod tests {
    use imagegen_contracts::{EditInput, ProviderError};

    use super::test_support::{test_config, unconfigured_base};
    use super::{
        nearest_aspect_ratio, requested_dims, resolve_model, snap_dimension, FalProvider,
        FluxProvider, GeminiProvider, IdeogramProvider, OpenAiProvider, StabilityProvider,
    };
    use crate::ImageProvider;

    #[test]
    fn unconfigured_edits_report_missing_credentials_first() {
        let config = test_config();
        let providers: Vec<Box<dyn ImageProvider>> = vec![
            Box::new(OpenAiProvider::new(
                unconfigured_base("openai", &["OPENAI_API_KEY"]),
                &config,
            )),
            Box::new(GeminiProvider::new(
                unconfigured_base("gemini", &["GEMINI_API_KEY"]),
                &config,
            )),
            Box::new(FluxProvider::new(unconfigured_base("flux", &["BFL_API_KEY"]), &config)),
            Box::new(IdeogramProvider::new(
                unconfigured_base("ideogram", &["IDEOGRAM_API_KEY"]),
                &config,
            )),
            Box::new(StabilityProvider::new(
                unconfigured_base("stability", &["STABILITY_API_KEY"]),
                &config,
            )),
            Box::new(FalProvider::new(unconfigured_base("fal", &["FAL_KEY"]), &config)),
        ];
        // Relative source path and an edit-incapable model would both be
        // InvalidInput on a configured adapter.
        let input = EditInput::new("make it blue", "relative/in.png").with_model("dall-e-3");
        for provider in &providers {
            let err = provider.edit(&input).err();
            assert!(
                matches!(err, Some(ProviderError::NotConfigured { .. })),
                "{} returned {err:?}",
                provider.name()
            );
        }
    }

    #[test]
    fn blank_model_falls_back_to_default() {
        assert_eq!(resolve_model(None, "m1"), "m1");
        assert_eq!(resolve_model(Some("  "), "m1"), "m1");
        assert_eq!(resolve_model(Some(" flux-dev "), "m1"), "flux-dev");
    }

    #[test]
    fn dims_default_to_square() {
        assert_eq!(requested_dims(None, None), (1024, 1024));
        assert_eq!(requested_dims(Some(512), None), (512, 512));
        assert_eq!(requested_dims(Some(0), Some(0)), (1024, 1024));
        assert_eq!(requested_dims(Some(640), Some(480)), (640, 480));
    }

    #[test]
    fn aspect_ratio_snaps_to_closest() {
        let candidates = [("1:1", 1.0), ("16:9", 16.0 / 9.0), ("9:16", 9.0 / 16.0)];
        assert_eq!(nearest_aspect_ratio(1920, 1080, &candidates), "16:9");
        assert_eq!(nearest_aspect_ratio(500, 520, &candidates), "1:1");
        assert_eq!(nearest_aspect_ratio(0, 10, &candidates), "1:1");
    }

    #[test]
    fn dimensions_snap_to_multiples() {
        assert_eq!(snap_dimension(500, 32, 256, 1440), 512);
        assert_eq!(snap_dimension(100, 32, 256, 1440), 256);
        assert_eq!(snap_dimension(4000, 32, 256, 1440), 1440);
        assert_eq!(snap_dimension(u32::MAX, 32, 256, 1440), 1440);
        assert_eq!(snap_dimension(u32::MAX - 1, 64, 0, u32::MAX), u32::MAX - 63);
    }
}
