// ABOUTME: Best-effort oEmbed fetch against a discovered JSON endpoint, reusing the redirect-safe hop loop.
// ABOUTME: Parses the four oEmbed resource shapes; every failure degrades to "no oEmbed data".

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, USER_AGENT};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::OgieError;
use crate::options::ExtractOptions;
use crate::resource::redirect::{follow_redirects, read_body, HopPolicy};
use crate::resource::MAX_RESPONSE_SIZE;
use crate::result::OEmbedDiscovery;

pub const DEFAULT_OEMBED_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_OEMBED_USER_AGENT: &str =
    concat!("digests-ogie-oembed/", env!("CARGO_PKG_VERSION"));

/// Fields shared by every oEmbed resource type.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OEmbedCommon {
    pub version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_age: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumbnail_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumbnail_width: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumbnail_height: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum OEmbedData {
    Photo {
        #[serde(flatten)]
        common: OEmbedCommon,
        url: String,
        width: u32,
        height: u32,
    },
    Video {
        #[serde(flatten)]
        common: OEmbedCommon,
        html: String,
        width: u32,
        height: u32,
    },
    Rich {
        #[serde(flatten)]
        common: OEmbedCommon,
        html: String,
        width: u32,
        height: u32,
    },
    Link {
        #[serde(flatten)]
        common: OEmbedCommon,
    },
}

impl OEmbedData {
    pub fn common(&self) -> &OEmbedCommon {
        match self {
            OEmbedData::Photo { common, .. }
            | OEmbedData::Video { common, .. }
            | OEmbedData::Rich { common, .. }
            | OEmbedData::Link { common } => common,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            OEmbedData::Photo { .. } => "photo",
            OEmbedData::Video { .. } => "video",
            OEmbedData::Rich { .. } => "rich",
            OEmbedData::Link { .. } => "link",
        }
    }
}

fn string_field(obj: &serde_json::Map<String, Value>, key: &str) -> Option<String> {
    match obj.get(key)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

// Providers send dimensions as integers, floats or numeric strings.
fn number_field(obj: &serde_json::Map<String, Value>, key: &str) -> Option<u64> {
    match obj.get(key)? {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| f.is_finite() && *f >= 0.0).map(|f| f as u64)),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|f| *f >= 0.0).map(|f| f as u64),
        _ => None,
    }
}

fn dimension(obj: &serde_json::Map<String, Value>, key: &str) -> Option<u32> {
    number_field(obj, key).and_then(|n| u32::try_from(n).ok())
}

/// Validate a decoded oEmbed body and convert it to one of the four shapes.
pub fn parse_oembed_response(value: &Value) -> Option<OEmbedData> {
    let obj = value.as_object()?;
    let kind = string_field(obj, "type")?.to_ascii_lowercase();
    let common = OEmbedCommon {
        version: string_field(obj, "version").unwrap_or_else(|| "1.0".to_string()),
        title: string_field(obj, "title"),
        author_name: string_field(obj, "author_name"),
        author_url: string_field(obj, "author_url"),
        provider_name: string_field(obj, "provider_name"),
        provider_url: string_field(obj, "provider_url"),
        cache_age: number_field(obj, "cache_age"),
        thumbnail_url: string_field(obj, "thumbnail_url"),
        thumbnail_width: dimension(obj, "thumbnail_width"),
        thumbnail_height: dimension(obj, "thumbnail_height"),
    };

    match kind.as_str() {
        "photo" => Some(OEmbedData::Photo {
            url: string_field(obj, "url")?,
            width: dimension(obj, "width")?,
            height: dimension(obj, "height")?,
            common,
        }),
        "video" => Some(OEmbedData::Video {
            html: string_field(obj, "html")?,
            width: dimension(obj, "width")?,
            height: dimension(obj, "height")?,
            common,
        }),
        "rich" => Some(OEmbedData::Rich {
            html: string_field(obj, "html")?,
            width: dimension(obj, "width")?,
            height: dimension(obj, "height")?,
            common,
        }),
        "link" => Some(OEmbedData::Link { common }),
        _ => None,
    }
}

fn oembed_headers(endpoint: &str, options: &ExtractOptions) -> Result<HeaderMap, OgieError> {
    let agent = options
        .user_agent
        .as_deref()
        .unwrap_or(DEFAULT_OEMBED_USER_AGENT);
    let agent = HeaderValue::from_str(agent).map_err(|e| {
        OgieError::oembed(endpoint, "oEmbed fetch error: invalid user agent").with_source(e)
    })?;
    let mut headers = HeaderMap::new();
    headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
    headers.insert(USER_AGENT, agent);
    Ok(headers)
}

fn into_oembed_error(endpoint: &str, err: OgieError, timeout: Duration) -> OgieError {
    let message = if err.is_timeout() {
        format!("oEmbed fetch timeout after {}ms", timeout.as_millis())
    } else {
        format!("oEmbed fetch error: {}", err.message())
    };
    OgieError::oembed(endpoint, message).with_source(err)
}

/// Fetch and parse an oEmbed endpoint. All failures are OEMBED_ERROR.
pub async fn fetch_oembed(
    client: &reqwest::Client,
    endpoint: &str,
    options: &ExtractOptions,
) -> Result<OEmbedData, OgieError> {
    let policy = HopPolicy {
        timeout: options.timeout.unwrap_or(DEFAULT_OEMBED_TIMEOUT),
        max_redirects: options.resolved_max_redirects(),
        allow_private_urls: options.allows_private_urls(),
    };
    let headers = oembed_headers(endpoint, options)?;

    let redirected = follow_redirects(client, endpoint, &headers, &policy)
        .await
        .map_err(|e| into_oembed_error(endpoint, e, policy.timeout))?;

    let status = redirected.response.status();
    if !status.is_success() {
        return Err(OgieError::oembed(
            endpoint,
            format!("oEmbed fetch failed with status {}", status.as_u16()),
        ));
    }

    let body = read_body(
        redirected.response,
        MAX_RESPONSE_SIZE,
        &redirected.final_url,
        policy.timeout,
    )
    .await
    .map_err(|e| into_oembed_error(endpoint, e, policy.timeout))?;

    let value: Value = serde_json::from_slice(&body).map_err(|e| {
        OgieError::oembed(
            endpoint,
            "Failed to parse oEmbed JSON: malformed response body",
        )
        .with_source(e)
    })?;

    parse_oembed_response(&value)
        .ok_or_else(|| OgieError::oembed(endpoint, "Failed to parse oEmbed response"))
}

/// Fetch oEmbed data when requested and advertised, absorbing every failure.
pub(crate) async fn maybe_fetch_oembed(
    client: &reqwest::Client,
    discovery: Option<&OEmbedDiscovery>,
    options: &ExtractOptions,
) -> Option<OEmbedData> {
    if !options.wants_oembed() {
        return None;
    }
    let Some(endpoint) = discovery.and_then(|d| d.json_url.as_deref()) else {
        debug!("no JSON oEmbed endpoint discovered");
        return None;
    };
    match fetch_oembed(client, endpoint, options).await {
        Ok(data) => Some(data),
        Err(err) => {
            warn!(endpoint, error = %err, "oEmbed fetch failed");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn parses_photo_with_string_dimensions() {
        let data = parse_oembed_response(&json!({
            "type": "photo",
            "version": "1.0",
            "url": "https://a.com/p.jpg",
            "width": "640",
            "height": 480.0,
            "provider_name": "A"
        }))
        .expect("valid photo");
        assert_eq!(
            data,
            OEmbedData::Photo {
                common: OEmbedCommon {
                    version: "1.0".to_string(),
                    provider_name: Some("A".to_string()),
                    ..Default::default()
                },
                url: "https://a.com/p.jpg".to_string(),
                width: 640,
                height: 480,
            }
        );
    }

    #[test]
    fn type_specific_fields_are_required() {
        assert!(parse_oembed_response(&json!({"type": "photo", "url": "x", "width": 1})).is_none());
        assert!(parse_oembed_response(&json!({"type": "video", "width": 1, "height": 1})).is_none());
        assert!(parse_oembed_response(&json!({"type": "rich", "html": "<i/>", "height": 1})).is_none());
        assert!(parse_oembed_response(&json!({"type": "link"})).is_some());
        assert!(parse_oembed_response(&json!({"type": "widget"})).is_none());
        assert!(parse_oembed_response(&json!({"version": "1.0"})).is_none());
        assert!(parse_oembed_response(&json!(["type", "link"])).is_none());
    }

    #[test]
    fn version_defaults_and_kind() {
        let data = parse_oembed_response(&json!({
            "type": "video",
            "html": "<iframe></iframe>",
            "width": 560,
            "height": 315
        }))
        .expect("valid video");
        assert_eq!(data.kind(), "video");
        assert_eq!(data.common().version, "1.0");
    }

    #[test]
    fn serializes_with_type_tag() {
        let data = OEmbedData::Link {
            common: OEmbedCommon {
                version: "1.0".to_string(),
                title: Some("T".to_string()),
                ..Default::default()
            },
        };
        let value = serde_json::to_value(&data).unwrap();
        assert_eq!(value, json!({"type": "link", "version": "1.0", "title": "T"}));
    }
}
