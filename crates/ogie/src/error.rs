// ABOUTME: Error types for ogie: the closed ErrorCode set, the ErrorTag discriminant and OgieError.
// ABOUTME: Provides per-kind constructors, JSON serialization and structural guards that survive serialization.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Stable error codes. The set is closed; `OEmbedError` is the reserved slot
/// used for oEmbed failures, which are always absorbed before reaching callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    InvalidUrl,
    FetchError,
    Timeout,
    RedirectLimit,
    ParseError,
    #[serde(rename = "OEMBED_ERROR")]
    OEmbedError,
}

impl ErrorCode {
    pub const ALL: [ErrorCode; 6] = [
        ErrorCode::InvalidUrl,
        ErrorCode::FetchError,
        ErrorCode::Timeout,
        ErrorCode::RedirectLimit,
        ErrorCode::ParseError,
        ErrorCode::OEmbedError,
    ];

    /// The wire spelling of the code, e.g. `INVALID_URL`.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::InvalidUrl => "INVALID_URL",
            ErrorCode::FetchError => "FETCH_ERROR",
            ErrorCode::Timeout => "TIMEOUT",
            ErrorCode::RedirectLimit => "REDIRECT_LIMIT",
            ErrorCode::ParseError => "PARSE_ERROR",
            ErrorCode::OEmbedError => "OEMBED_ERROR",
        }
    }

    /// Parse a wire spelling back into a code.
    pub fn from_wire(s: &str) -> Option<ErrorCode> {
        ErrorCode::ALL.into_iter().find(|c| c.as_str() == s)
    }

    /// The tag every error carrying this code must have.
    pub fn tag(&self) -> ErrorTag {
        match self {
            ErrorCode::FetchError | ErrorCode::Timeout | ErrorCode::RedirectLimit => {
                ErrorTag::FetchError
            }
            ErrorCode::ParseError => ErrorTag::ParseError,
            ErrorCode::InvalidUrl | ErrorCode::OEmbedError => ErrorTag::BaseError,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Discriminant of the error variant, serialized as `_tag`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorTag {
    BaseError,
    FetchError,
    ParseError,
}

impl ErrorTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorTag::BaseError => "BaseError",
            ErrorTag::FetchError => "FetchError",
            ErrorTag::ParseError => "ParseError",
        }
    }

    /// Human name of the variant, used as `name` in serialized errors.
    pub fn name(&self) -> &'static str {
        match self {
            ErrorTag::BaseError => "OgieError",
            ErrorTag::FetchError => "FetchError",
            ErrorTag::ParseError => "ParseError",
        }
    }

    fn from_wire(s: &str) -> Option<ErrorTag> {
        [ErrorTag::BaseError, ErrorTag::FetchError, ErrorTag::ParseError]
            .into_iter()
            .find(|t| t.as_str() == s)
    }
}

/// The error type returned by every ogie operation.
///
/// Built only through the per-kind constructors, so `code` and `tag` always agree.
#[derive(Debug, thiserror::Error)]
pub struct OgieError {
    code: ErrorCode,
    url: String,
    message: String,
    status_code: Option<u16>,
    #[source]
    source: Option<anyhow::Error>,
}

impl fmt::Display for OgieError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ogie: {}", self.code)?;
        if !self.url.is_empty() {
            write!(f, " {}", self.url)?;
        }
        write!(f, ": {}", self.message)
    }
}

/// Serializable view of an [`OgieError`]. The cause chain is deliberately absent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorJson {
    #[serde(rename = "_tag")]
    pub tag: ErrorTag,
    pub name: String,
    pub code: ErrorCode,
    pub message: String,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
}

impl OgieError {
    fn new(code: ErrorCode, url: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code,
            url: url.into(),
            message: message.into(),
            status_code: None,
            source: None,
        }
    }

    /// Malformed or disallowed target, detected before any I/O.
    pub fn invalid_url(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidUrl, url, message)
    }

    /// Generic transport, protocol or policy failure.
    pub fn fetch(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorCode::FetchError, url, message)
    }

    /// Non-success HTTP status.
    pub fn http_status(url: impl Into<String>, status: u16, reason: &str) -> Self {
        let mut err = Self::new(
            ErrorCode::FetchError,
            url,
            format!("HTTP {}: {}", status, reason),
        );
        err.status_code = Some(status);
        err
    }

    /// A single request exceeded its deadline.
    pub fn timeout(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Timeout, url, message)
    }

    /// Redirect loop or exhausted hop budget.
    pub fn redirect_limit(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorCode::RedirectLimit, url, message)
    }

    /// Document parsing failure, or an uncategorized failure at the orchestrator boundary.
    pub fn parse(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ParseError, url, message)
    }

    /// oEmbed failure. Never escapes extraction; used for logging.
    pub fn oembed(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorCode::OEmbedError, url, message)
    }

    /// Attach the underlying cause.
    pub fn with_source(mut self, source: impl Into<anyhow::Error>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn code(&self) -> ErrorCode {
        self.code
    }

    pub fn tag(&self) -> ErrorTag {
        self.code.tag()
    }

    pub fn name(&self) -> &'static str {
        self.tag().name()
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn status_code(&self) -> Option<u16> {
        self.status_code
    }

    /// Returns true if this is an InvalidUrl error.
    pub fn is_invalid_url(&self) -> bool {
        self.code == ErrorCode::InvalidUrl
    }

    /// Returns true if this is a generic fetch error.
    pub fn is_fetch(&self) -> bool {
        self.code == ErrorCode::FetchError
    }

    /// Returns true if this is a Timeout error.
    pub fn is_timeout(&self) -> bool {
        self.code == ErrorCode::Timeout
    }

    /// Returns true if this is a RedirectLimit error.
    pub fn is_redirect_limit(&self) -> bool {
        self.code == ErrorCode::RedirectLimit
    }

    /// Returns true if this is a ParseError.
    pub fn is_parse(&self) -> bool {
        self.code == ErrorCode::ParseError
    }

    pub fn to_json(&self) -> ErrorJson {
        ErrorJson {
            tag: self.tag(),
            name: self.name().to_string(),
            code: self.code,
            message: self.message.clone(),
            url: self.url.clone(),
            status_code: self.status_code,
        }
    }

    /// Find an `OgieError` anywhere in an error's source chain.
    pub fn find<'a>(err: &'a (dyn std::error::Error + 'static)) -> Option<&'a OgieError> {
        let mut current: Option<&(dyn std::error::Error + 'static)> = Some(err);
        while let Some(e) = current {
            if let Some(found) = e.downcast_ref::<OgieError>() {
                return Some(found);
            }
            current = e.source();
        }
        None
    }
}

impl Serialize for OgieError {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

fn tag_and_code(value: &serde_json::Value) -> Option<(ErrorTag, ErrorCode)> {
    let tag = value.get("_tag")?.as_str().and_then(ErrorTag::from_wire)?;
    let code = value.get("code")?.as_str().and_then(ErrorCode::from_wire)?;
    Some((tag, code))
}

/// Structural check for a serialized ogie error of any variant.
pub fn is_ogie_error(value: &serde_json::Value) -> bool {
    tag_and_code(value).is_some()
}

/// Structural check for a serialized fetch-layer error.
pub fn is_fetch_error(value: &serde_json::Value) -> bool {
    matches!(tag_and_code(value), Some((ErrorTag::FetchError, _)))
}

/// Structural check for a serialized parse-layer error.
pub fn is_parse_error(value: &serde_json::Value) -> bool {
    matches!(tag_and_code(value), Some((ErrorTag::ParseError, _)))
}
