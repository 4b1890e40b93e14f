// ABOUTME: Manual redirect following with per-hop SSRF validation, loop detection and a hop budget.
// ABOUTME: Also holds the size-capped body reader shared by the document and oEmbed fetches.

use std::collections::HashSet;
use std::time::Duration;

use bytes::Bytes;
use futures::{Stream, StreamExt, TryStreamExt};
use reqwest::header::{HeaderMap, CONTENT_LENGTH, LOCATION};
use reqwest::Response;
use tracing::debug;
use url::Url;

use crate::error::OgieError;
use crate::urls::{is_private_url, is_valid_url};

/// Per-fetch parameters for the hop loop.
#[derive(Debug, Clone)]
pub(crate) struct HopPolicy {
    pub timeout: Duration,
    pub max_redirects: u32,
    pub allow_private_urls: bool,
}

/// The first non-redirect response of a chain and the URL it came from.
#[derive(Debug)]
pub(crate) struct Redirected {
    pub response: Response,
    pub final_url: String,
}

/// Reject anything that is not http(s), or that is private unless explicitly allowed.
pub(crate) fn validate_target(url: &str, allow_private_urls: bool) -> Result<(), OgieError> {
    if !is_valid_url(url) {
        return Err(OgieError::invalid_url(
            url,
            "Invalid URL: must be a valid HTTP or HTTPS URL",
        ));
    }
    if !allow_private_urls && is_private_url(url) {
        return Err(OgieError::invalid_url(
            url,
            "URL points to a private/internal network address",
        ));
    }
    Ok(())
}

/// Map a transport failure onto TIMEOUT or FETCH_ERROR.
pub(crate) fn transport_error(url: &str, err: reqwest::Error, timeout: Duration) -> OgieError {
    if err.is_timeout() {
        OgieError::timeout(
            url,
            format!("Request timeout after {}ms", timeout.as_millis()),
        )
        .with_source(err)
    } else {
        let message = err.to_string();
        OgieError::fetch(url, message).with_source(err)
    }
}

fn loop_key(url: &str) -> String {
    Url::parse(url)
        .map(|u| u.to_string())
        .unwrap_or_else(|_| url.to_string())
}

fn is_downgrade(from: &str, to: &str) -> bool {
    let scheme = |s: &str| Url::parse(s).map(|u| u.scheme().to_string()).ok();
    scheme(from).as_deref() == Some("https") && scheme(to).as_deref() == Some("http")
}

fn next_hop(headers: &HeaderMap, current: &str) -> Result<String, OgieError> {
    let location = headers
        .get(LOCATION)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| {
            OgieError::fetch(current, "Redirect response without valid Location header")
        })?;

    let base = Url::parse(current)
        .map_err(|e| OgieError::fetch(current, "invalid redirect base").with_source(e))?;
    base.join(location).map(|u| u.to_string()).map_err(|e| {
        OgieError::fetch(current, format!("invalid redirect target: {}", location)).with_source(e)
    })
}

/// Decide where a 3xx response from `current` may lead: resolve its Location,
/// refuse https to http, then validate the target before it is requested.
fn redirect_target(
    headers: &HeaderMap,
    current: &str,
    policy: &HopPolicy,
) -> Result<String, OgieError> {
    let next = next_hop(headers, current)?;
    if is_downgrade(current, &next) {
        return Err(OgieError::fetch(
            current,
            "HTTPS to HTTP protocol downgrade is not allowed",
        ));
    }
    validate_target(&next, policy.allow_private_urls)?;
    Ok(next)
}

/// Issue GETs starting at `start_url`, following 3xx responses by hand.
///
/// At most `max_redirects + 1` requests are made. Loop and budget failures
/// are attributed to `start_url`; per-hop failures name the hop.
pub(crate) async fn follow_redirects(
    client: &reqwest::Client,
    start_url: &str,
    headers: &HeaderMap,
    policy: &HopPolicy,
) -> Result<Redirected, OgieError> {
    let mut current = start_url.to_string();
    let mut visited: HashSet<String> = HashSet::new();

    for attempt in 0..=policy.max_redirects {
        validate_target(&current, policy.allow_private_urls)?;
        if !visited.insert(loop_key(&current)) {
            return Err(OgieError::redirect_limit(start_url, "Redirect loop detected"));
        }

        let response = client
            .get(&current)
            .headers(headers.clone())
            .timeout(policy.timeout)
            .send()
            .await
            .map_err(|e| transport_error(&current, e, policy.timeout))?;

        let status = response.status();
        if !status.is_redirection() {
            return Ok(Redirected {
                response,
                final_url: current,
            });
        }
        if attempt == policy.max_redirects {
            break;
        }

        let next = redirect_target(response.headers(), &current, policy)?;
        if visited.contains(&loop_key(&next)) {
            return Err(OgieError::redirect_limit(start_url, "Redirect loop detected"));
        }

        debug!(from = %current, to = %next, status = status.as_u16(), "following redirect");
        current = next;
    }

    Err(OgieError::redirect_limit(
        start_url,
        format!("Maximum redirects ({}) exceeded", policy.max_redirects),
    ))
}

/// Reject a response whose declared Content-Length is over `limit`.
pub(crate) fn check_declared_length(
    response: &Response,
    limit: usize,
    url: &str,
) -> Result<(), OgieError> {
    let declared = response.content_length().or_else(|| {
        response
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.trim().parse::<u64>().ok())
    });
    match declared {
        Some(size) if size > limit as u64 => Err(OgieError::fetch(
            url,
            format!(
                "Response size {} bytes exceeds maximum allowed size of {} bytes",
                size, limit
            ),
        )),
        _ => Ok(()),
    }
}

/// Collect a byte stream, failing as soon as more than `limit` bytes arrive.
pub(crate) async fn read_capped<S>(stream: S, limit: usize, url: &str) -> Result<Vec<u8>, OgieError>
where
    S: Stream<Item = Result<Bytes, OgieError>>,
{
    let mut stream = std::pin::pin!(stream);
    let mut buf: Vec<u8> = Vec::new();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        if buf.len() + chunk.len() > limit {
            return Err(OgieError::fetch(
                url,
                format!("Response size exceeds maximum allowed size of {} bytes", limit),
            ));
        }
        buf.extend_from_slice(&chunk);
    }
    Ok(buf)
}

/// Read a response body under both the declared and the actual size ceiling.
pub(crate) async fn read_body(
    response: Response,
    limit: usize,
    url: &str,
    timeout: Duration,
) -> Result<Vec<u8>, OgieError> {
    check_declared_length(&response, limit, url)?;
    let owned = url.to_string();
    let stream = response
        .bytes_stream()
        .map_err(move |e| transport_error(&owned, e, timeout));
    read_capped(stream, limit, url).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;
    use pretty_assertions::assert_eq;

    fn chunks(parts: &[&'static [u8]]) -> impl Stream<Item = Result<Bytes, OgieError>> {
        stream::iter(
            parts
                .iter()
                .map(|p| Ok(Bytes::from_static(*p)))
                .collect::<Vec<_>>(),
        )
    }

    #[tokio::test]
    async fn read_capped_accepts_body_at_limit() {
        let body = read_capped(chunks(&[b"abc", b"def"]), 6, "https://a.com").await;
        assert_eq!(body.expect("at limit is fine"), b"abcdef".to_vec());
    }

    #[tokio::test]
    async fn read_capped_rejects_body_over_limit() {
        let err = read_capped(chunks(&[b"abc", b"def", b"g"]), 6, "https://a.com")
            .await
            .expect_err("over limit");
        assert!(err.is_fetch());
        assert!(err.message().contains("exceeds maximum allowed size"));
    }

    #[tokio::test]
    async fn read_capped_propagates_stream_errors() {
        let items = vec![
            Ok(Bytes::from_static(b"ab")),
            Err(OgieError::timeout("https://a.com", "Request timeout after 10ms")),
        ];
        let err = read_capped(stream::iter(items), 100, "https://a.com")
            .await
            .expect_err("stream error");
        assert!(err.is_timeout());
    }

    #[test]
    fn validate_target_rules() {
        assert!(validate_target("https://example.com", false).is_ok());
        assert!(validate_target("ftp://example.com", false)
            .expect_err("bad scheme")
            .is_invalid_url());
        assert!(validate_target("http://127.0.0.1", false)
            .expect_err("private")
            .is_invalid_url());
        assert!(validate_target("http://127.0.0.1", true).is_ok());
        assert!(validate_target("ftp://127.0.0.1", true).is_err());
    }

    #[test]
    fn downgrade_detection() {
        assert!(is_downgrade("https://a.com/x", "http://a.com/y"));
        assert!(!is_downgrade("http://a.com/x", "https://a.com/y"));
        assert!(!is_downgrade("https://a.com/x", "https://b.com/y"));
    }

    fn hop_policy() -> HopPolicy {
        HopPolicy {
            timeout: Duration::from_secs(5),
            max_redirects: 5,
            allow_private_urls: false,
        }
    }

    fn location(value: &'static str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(LOCATION, reqwest::header::HeaderValue::from_static(value));
        headers
    }

    #[test]
    fn redirect_from_https_to_http_is_refused() {
        let err = redirect_target(
            &location("http://news.example.org/plain"),
            "https://news.example.org/secure",
            &hop_policy(),
        )
        .expect_err("downgrade");
        assert!(err.is_fetch());
        assert_eq!(err.message(), "HTTPS to HTTP protocol downgrade is not allowed");
        assert_eq!(err.url(), "https://news.example.org/secure");
    }

    #[test]
    fn redirect_target_keeps_scheme_for_relative_and_upgrades() {
        let policy = hop_policy();
        assert_eq!(
            redirect_target(&location("/next"), "https://news.example.org/a", &policy)
                .expect("relative stays https"),
            "https://news.example.org/next"
        );
        assert_eq!(
            redirect_target(
                &location("https://news.example.org/b"),
                "http://news.example.org/a",
                &policy
            )
            .expect("upgrade is fine"),
            "https://news.example.org/b"
        );
    }

    #[test]
    fn redirect_target_validates_before_request() {
        let err = redirect_target(
            &location("https://10.0.0.5/admin"),
            "https://news.example.org/a",
            &hop_policy(),
        )
        .expect_err("private target");
        assert!(err.is_invalid_url());

        let err = redirect_target(&HeaderMap::new(), "https://news.example.org/a", &hop_policy())
            .expect_err("no location");
        assert_eq!(err.message(), "Redirect response without valid Location header");
    }

    #[test]
    fn loop_key_normalizes_trailing_slash() {
        assert_eq!(loop_key("http://a.com"), loop_key("http://a.com/"));
        assert_ne!(loop_key("http://a.com/x"), loop_key("http://a.com/y"));
    }
}
