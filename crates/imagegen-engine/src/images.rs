use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use image::ImageReader;
use imagegen_contracts::types::encode_data_url;
use imagegen_contracts::ProviderError;

/// Largest source image accepted for edits and uploads (10 MiB).
pub const MAX_IMAGE_BYTES: usize = 10 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageBuffer {
    pub bytes: Vec<u8>,
    pub mime_type: String,
}

impl ImageBuffer {
    pub fn to_data_url(&self) -> String {
        encode_data_url(&self.bytes, &self.mime_type)
    }

    pub fn file_name(&self) -> String {
        format!("image.{}", extension_for_mime(&self.mime_type))
    }
}

/// Loads an image from a `data:` URL, an absolute path or a `file://` URL.
///
/// Every failure is non-retryable: a bad source does not improve on retry.
pub fn image_buffer(provider: &str, source: &str) -> Result<ImageBuffer, ProviderError> {
    let trimmed = source.trim();
    if trimmed.is_empty() {
        return Err(ProviderError::invalid_input(provider, "image source is empty"));
    }
    if let Some(rest) = trimmed.strip_prefix("data:") {
        return decode_data_url(provider, rest);
    }
    let path = resolve_path(provider, trimmed)?;
    read_image_file(provider, &path)
}

pub fn detect_image_dimensions(provider: &str, source: &str) -> Result<(u32, u32), ProviderError> {
    buffer_dimensions(provider, &image_buffer(provider, source)?)
}

pub fn buffer_dimensions(
    provider: &str,
    buffer: &ImageBuffer,
) -> Result<(u32, u32), ProviderError> {
    dimensions_of(&buffer.bytes).ok_or_else(|| {
        ProviderError::invalid_input(provider, "could not determine image dimensions")
    })
}

/// Reads width/height from the image header without decoding pixels.
pub fn dimensions_of(bytes: &[u8]) -> Option<(u32, u32)> {
    ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .ok()?
        .into_dimensions()
        .ok()
}

pub fn sniff_mime(bytes: &[u8]) -> Option<&'static str> {
    image::guess_format(bytes)
        .ok()
        .map(|format| format.to_mime_type())
}

fn decode_data_url(provider: &str, rest: &str) -> Result<ImageBuffer, ProviderError> {
    let Some((header, payload)) = rest.split_once(',') else {
        return Err(ProviderError::invalid_input(provider, "malformed data URL"));
    };
    let mut params = header.split(';');
    let declared_mime = params
        .next()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_ascii_lowercase);
    if !params.any(|param| param.trim().eq_ignore_ascii_case("base64")) {
        return Err(ProviderError::invalid_input(
            provider,
            "data URL must be base64 encoded",
        ));
    }
    let payload = payload.trim();
    if payload.len() / 4 * 3 > MAX_IMAGE_BYTES + 3 {
        return Err(too_large(provider, payload.len() / 4 * 3));
    }
    let bytes = BASE64
        .decode(payload.as_bytes())
        .map_err(|err| ProviderError::invalid_input(provider, format!("invalid base64: {err}")))?;
    if bytes.len() > MAX_IMAGE_BYTES {
        return Err(too_large(provider, bytes.len()));
    }
    if bytes.is_empty() {
        return Err(ProviderError::invalid_input(provider, "data URL payload is empty"));
    }
    let mime_type = declared_mime
        .or_else(|| sniff_mime(&bytes).map(str::to_string))
        .unwrap_or_else(|| "image/png".to_string());
    Ok(ImageBuffer { bytes, mime_type })
}

fn resolve_path(provider: &str, source: &str) -> Result<PathBuf, ProviderError> {
    if source.starts_with("file://") {
        let url = reqwest::Url::parse(source).map_err(|err| {
            ProviderError::invalid_input(provider, format!("invalid file URL: {err}"))
        })?;
        return url
            .to_file_path()
            .map_err(|_| ProviderError::invalid_input(provider, "file URL is not a local path"));
    }
    let path = PathBuf::from(source);
    if !path.is_absolute() {
        return Err(ProviderError::invalid_input(
            provider,
            format!(
                "image source must be a data URL, an absolute path or a file:// URL (got {source})"
            ),
        ));
    }
    Ok(path)
}

fn read_image_file(provider: &str, path: &Path) -> Result<ImageBuffer, ProviderError> {
    let metadata = fs::metadata(path).map_err(|err| {
        ProviderError::invalid_input(provider, format!("failed reading {}: {err}", path.display()))
    })?;
    if metadata.len() > MAX_IMAGE_BYTES as u64 {
        return Err(too_large(provider, metadata.len() as usize));
    }
    let bytes = fs::read(path).map_err(|err| {
        ProviderError::invalid_input(provider, format!("failed reading {}: {err}", path.display()))
    })?;
    let mime_type = sniff_mime(&bytes)
        .or_else(|| mime_for_path(path))
        .unwrap_or("image/png")
        .to_string();
    Ok(ImageBuffer { bytes, mime_type })
}

fn too_large(provider: &str, size: usize) -> ProviderError {
    ProviderError::invalid_input(
        provider,
        format!("image is {size} bytes; the limit is {MAX_IMAGE_BYTES} bytes"),
    )
}

fn mime_for_path(path: &Path) -> Option<&'static str> {
    let ext = path
        .extension()
        .and_then(|value| value.to_str())
        .map(|value| value.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "webp" => Some("image/webp"),
        "gif" => Some("image/gif"),
        _ => None,
    }
}

pub(crate) fn extension_for_mime(mime: &str) -> &'static str {
    let lowered = mime.to_ascii_lowercase();
    if lowered.contains("jpeg") || lowered.contains("jpg") {
        return "jpg";
    }
    if lowered.contains("webp") {
        return "webp";
    }
    if lowered.contains("gif") {
        return "gif";
    }
    "png"
}
