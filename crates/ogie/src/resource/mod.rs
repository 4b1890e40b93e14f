// ABOUTME: Primary document fetch: builds the per-call FetchContext and runs the redirect-safe hop loop.
// ABOUTME: Enforces HTML content types, the 10 MB ceiling and optional charset conversion.

pub mod charset;
pub(crate) mod redirect;

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, CONTENT_TYPE, USER_AGENT};

use crate::error::OgieError;
use crate::options::{ExtractOptions, DEFAULT_ACCEPT, DEFAULT_USER_AGENT};
use self::redirect::{follow_redirects, read_body, validate_target, HopPolicy};

/// Maximum allowed response size (10 MB).
pub const MAX_RESPONSE_SIZE: usize = 10 * 1024 * 1024;

/// Resolved, per-call fetch parameters.
#[derive(Debug, Clone)]
pub struct FetchContext {
    pub timeout: Duration,
    pub max_redirects: u32,
    pub headers: HeaderMap,
    pub allow_private_urls: bool,
    pub convert_charset: bool,
    pub original_url: String,
}

impl FetchContext {
    /// Validate options and build headers. Fails before any network activity.
    pub fn new(url: &str, options: &ExtractOptions) -> Result<Self, OgieError> {
        options.validate(url)?;
        Ok(Self {
            timeout: options.resolved_timeout(),
            max_redirects: options.resolved_max_redirects(),
            headers: build_headers(url, options)?,
            allow_private_urls: options.allows_private_urls(),
            convert_charset: options.wants_charset_conversion(),
            original_url: url.to_string(),
        })
    }

    fn hop_policy(&self) -> HopPolicy {
        HopPolicy {
            timeout: self.timeout,
            max_redirects: self.max_redirects,
            allow_private_urls: self.allow_private_urls,
        }
    }
}

/// A successfully fetched HTML document.
#[derive(Debug, Clone)]
pub struct FetchResult {
    pub html: String,
    pub final_url: String,
    pub status_code: u16,
    pub content_type: String,
    /// Only set when charset conversion was requested.
    pub charset: Option<String>,
}

fn has_line_break(s: &str) -> bool {
    s.contains('\r') || s.contains('\n')
}

/// Default Accept and User-Agent, then the caller's headers on top.
fn build_headers(url: &str, options: &ExtractOptions) -> Result<HeaderMap, OgieError> {
    for (key, value) in &options.headers {
        if has_line_break(key) || has_line_break(value) {
            return Err(OgieError::fetch(
                url,
                "Invalid header: header name or value contains forbidden characters (\\r or \\n)",
            ));
        }
    }

    let mut headers = HeaderMap::new();
    headers.insert(ACCEPT, HeaderValue::from_static(DEFAULT_ACCEPT));
    let agent = options.user_agent.as_deref().unwrap_or(DEFAULT_USER_AGENT);
    if has_line_break(agent) {
        return Err(OgieError::fetch(url, "Invalid header: user agent contains forbidden characters"));
    }
    headers.insert(USER_AGENT, header_value(url, agent)?);

    for (key, value) in &options.headers {
        let name = HeaderName::from_bytes(key.as_bytes()).map_err(|e| {
            OgieError::fetch(url, format!("Invalid header name: {}", key)).with_source(e)
        })?;
        headers.insert(name, header_value(url, value)?);
    }
    Ok(headers)
}

fn header_value(url: &str, value: &str) -> Result<HeaderValue, OgieError> {
    HeaderValue::from_str(value)
        .map_err(|e| OgieError::fetch(url, "Invalid header value").with_source(e))
}

fn is_html_content_type(content_type: &str) -> bool {
    let lower = content_type.to_ascii_lowercase();
    lower.contains("text/html") || lower.contains("application/xhtml+xml")
}

/// Fetch an HTML document with manual, validated redirect handling.
pub async fn fetch_url(
    client: &reqwest::Client,
    url: &str,
    options: &ExtractOptions,
) -> Result<FetchResult, OgieError> {
    let ctx = FetchContext::new(url, options)?;
    fetch_with_context(client, &ctx).await
}

pub async fn fetch_with_context(
    client: &reqwest::Client,
    ctx: &FetchContext,
) -> Result<FetchResult, OgieError> {
    validate_target(&ctx.original_url, ctx.allow_private_urls)?;

    let redirected = follow_redirects(
        client,
        &ctx.original_url,
        &ctx.headers,
        &ctx.hop_policy(),
    )
    .await?;
    let response = redirected.response;
    let final_url = redirected.final_url;

    let status = response.status();
    if !status.is_success() {
        return Err(OgieError::http_status(
            &final_url,
            status.as_u16(),
            status.canonical_reason().unwrap_or("Unknown Status"),
        ));
    }

    let content_type = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    if !is_html_content_type(&content_type) {
        return Err(OgieError::fetch(
            &final_url,
            format!("Expected HTML content, received: {}", content_type),
        ));
    }

    let body = read_body(response, MAX_RESPONSE_SIZE, &final_url, ctx.timeout).await?;

    let (html, charset) = if ctx.convert_charset {
        let info = charset::detect_charset(&body, Some(&content_type));
        (charset::decode_html(&body, &info.charset), Some(info.charset))
    } else {
        (charset::decode_utf8_lossy(&body), None)
    };

    Ok(FetchResult {
        html,
        final_url,
        status_code: status.as_u16(),
        content_type,
        charset,
    })
}
