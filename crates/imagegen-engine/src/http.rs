use std::time::Duration;

use imagegen_contracts::{GeneratedImage, ProviderError};
use reqwest::blocking::{Client as HttpClient, RequestBuilder, Response as HttpResponse};
use reqwest::header::{HeaderMap, CONTENT_TYPE, RETRY_AFTER};
use reqwest::StatusCode;
use serde_json::Value;

use crate::images::sniff_mime;

const ERROR_BODY_MAX_CHARS: usize = 512;
const DEFAULT_RATE_LIMIT_WAIT: Duration = Duration::from_secs(1);
const MAX_RETRY_AFTER: Duration = Duration::from_secs(60);

pub(crate) fn build_client(timeout: Duration) -> HttpClient {
    HttpClient::builder()
        .timeout(timeout)
        .build()
        .unwrap_or_else(|err| {
            tracing::warn!(error = %err, "falling back to default HTTP client");
            HttpClient::new()
        })
}

/// Sends the request, classifying transport failures. Timeouts and
/// connection errors are retryable; anything else is not.
pub(crate) fn send(
    provider: &str,
    request: RequestBuilder,
    label: &str,
) -> Result<HttpResponse, ProviderError> {
    request.send().map_err(|err| transport_error(provider, label, err))
}

pub(crate) fn transport_error(provider: &str, label: &str, err: reqwest::Error) -> ProviderError {
    if err.is_timeout() || err.is_connect() || err.is_request() {
        let message = format!("{label} failed: {err}");
        return ProviderError::transient_with_source(provider, message, err);
    }
    ProviderError::failed(provider, format!("{label} failed: {err}"))
}

pub(crate) fn status_error(
    provider: &str,
    status: StatusCode,
    headers: &HeaderMap,
    body: &str,
) -> ProviderError {
    let code = status.as_u16();
    let detail = truncate_text(body.trim(), ERROR_BODY_MAX_CHARS);
    if status == StatusCode::TOO_MANY_REQUESTS {
        return ProviderError::rate_limited(
            provider,
            retry_after_header(headers).unwrap_or(DEFAULT_RATE_LIMIT_WAIT),
        );
    }
    if status == StatusCode::REQUEST_TIMEOUT || status.is_server_error() {
        return ProviderError::transient(provider, format!("HTTP {code}: {detail}"));
    }
    if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
        return ProviderError::failed(
            provider,
            format!("API key rejected (HTTP {code}): {detail}"),
        );
    }
    ProviderError::failed(provider, format!("HTTP {code}: {detail}"))
}

pub(crate) fn json_or_error(
    provider: &str,
    response: HttpResponse,
) -> Result<Value, ProviderError> {
    let status = response.status();
    let headers = response.headers().clone();
    let body = response
        .text()
        .map_err(|err| transport_error(provider, "response body read", err))?;
    if !status.is_success() {
        return Err(status_error(provider, status, &headers, &body));
    }
    serde_json::from_str(&body).map_err(|err| {
        ProviderError::failed(
            provider,
            format!(
                "invalid JSON payload ({err}): {}",
                truncate_text(&body, ERROR_BODY_MAX_CHARS)
            ),
        )
    })
}

/// Reads a binary image response, failing on non-2xx statuses.
pub(crate) fn image_or_error(
    provider: &str,
    response: HttpResponse,
) -> Result<GeneratedImage, ProviderError> {
    let status = response.status();
    if !status.is_success() {
        let headers = response.headers().clone();
        let body = response.text().unwrap_or_default();
        return Err(status_error(provider, status, &headers, &body));
    }
    let declared = content_type(response.headers());
    let bytes = response
        .bytes()
        .map_err(|err| transport_error(provider, "image body read", err))?
        .to_vec();
    if bytes.is_empty() {
        return Err(ProviderError::failed(provider, "image response was empty"));
    }
    let mime_type = declared
        .filter(|value| value.starts_with("image/"))
        .or_else(|| sniff_mime(&bytes).map(str::to_string))
        .unwrap_or_else(|| "image/png".to_string());
    Ok(GeneratedImage::new(bytes, mime_type))
}

pub(crate) fn download_image(
    provider: &str,
    http: &HttpClient,
    url: &str,
) -> Result<GeneratedImage, ProviderError> {
    tracing::debug!(provider, url, "downloading generated image");
    let response = send(provider, http.get(url), "image download")?;
    image_or_error(provider, response)
}

pub(crate) fn content_type(headers: &HeaderMap) -> Option<String> {
    headers
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(|value| {
            value
                .split(';')
                .next()
                .unwrap_or_default()
                .trim()
                .to_ascii_lowercase()
        })
        .filter(|value| !value.is_empty())
}

fn retry_after_header(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<f64>().ok())
        .and_then(|value| Duration::try_from_secs_f64(value).ok())
        .map(|wait| wait.min(MAX_RETRY_AFTER))
}

pub(crate) fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}

/// Trimmed, non-empty string field.
pub(crate) fn str_field<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|item| !item.is_empty())
}

/// Collects http(s) URLs from nested `url`/`urls`/`images`/`image`/`output`
/// fields, keeping first-seen order.
pub(crate) fn collect_image_urls(value: &Value, out: &mut Vec<String>) {
    match value {
        Value::String(url) => {
            let trimmed = url.trim();
            if trimmed.starts_with("http") && !out.iter().any(|existing| existing == trimmed) {
                out.push(trimmed.to_string());
            }
        }
        Value::Array(rows) => {
            for row in rows {
                collect_image_urls(row, out);
            }
        }
        Value::Object(obj) => {
            for key in ["url", "urls", "images", "image", "output", "data"] {
                if let Some(nested) = obj.get(key) {
                    collect_image_urls(nested, out);
                }
            }
        }
        _ => {}
    }
}
