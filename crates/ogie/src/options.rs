// ABOUTME: Per-call ExtractOptions with chainable setters, plus ClientBuilder for constructing a Client.
// ABOUTME: Every option is optional; absence means the documented default.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::cache::MetadataCache;
use crate::client::Client;
use crate::error::OgieError;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_MAX_REDIRECTS: u32 = 5;
pub const DEFAULT_USER_AGENT: &str = concat!("digests-ogie/", env!("CARGO_PKG_VERSION"));
pub const DEFAULT_ACCEPT: &str = "text/html,application/xhtml+xml";

/// Options for a single extraction.
#[derive(Debug, Clone, Default)]
pub struct ExtractOptions {
    pub timeout: Option<Duration>,
    pub max_redirects: Option<u32>,
    pub headers: HashMap<String, String>,
    pub user_agent: Option<String>,
    /// Base URL used to resolve relative links in HTML-string mode.
    pub base_url: Option<String>,
    /// Keep og.title/og.description strictly from OpenGraph tags.
    pub only_open_graph: Option<bool>,
    pub allow_private_urls: Option<bool>,
    pub fetch_oembed: Option<bool>,
    pub convert_charset: Option<bool>,
    pub cache: Option<Arc<dyn MetadataCache>>,
    /// Disables caching even when `cache` is set.
    pub disable_cache: bool,
    /// Skip the cache read; the result is still written back.
    pub bypass_cache: bool,
}

impl ExtractOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn max_redirects(mut self, max: u32) -> Self {
        self.max_redirects = Some(max);
        self
    }

    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub fn only_open_graph(mut self, only: bool) -> Self {
        self.only_open_graph = Some(only);
        self
    }

    pub fn allow_private_urls(mut self, allow: bool) -> Self {
        self.allow_private_urls = Some(allow);
        self
    }

    pub fn fetch_oembed(mut self, fetch: bool) -> Self {
        self.fetch_oembed = Some(fetch);
        self
    }

    pub fn convert_charset(mut self, convert: bool) -> Self {
        self.convert_charset = Some(convert);
        self
    }

    pub fn cache(mut self, cache: Arc<dyn MetadataCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn disable_cache(mut self) -> Self {
        self.disable_cache = true;
        self
    }

    pub fn bypass_cache(mut self, bypass: bool) -> Self {
        self.bypass_cache = bypass;
        self
    }

    /// The cache to use for this call, if caching is on.
    pub fn active_cache(&self) -> Option<&Arc<dyn MetadataCache>> {
        if self.disable_cache {
            return None;
        }
        self.cache.as_ref()
    }

    pub(crate) fn resolved_timeout(&self) -> Duration {
        self.timeout.unwrap_or(DEFAULT_TIMEOUT)
    }

    pub(crate) fn resolved_max_redirects(&self) -> u32 {
        self.max_redirects.unwrap_or(DEFAULT_MAX_REDIRECTS)
    }

    pub(crate) fn allows_private_urls(&self) -> bool {
        self.allow_private_urls.unwrap_or(false)
    }

    pub(crate) fn wants_oembed(&self) -> bool {
        self.fetch_oembed.unwrap_or(false)
    }

    pub(crate) fn wants_charset_conversion(&self) -> bool {
        self.convert_charset.unwrap_or(false)
    }

    pub(crate) fn skips_fallbacks(&self) -> bool {
        self.only_open_graph.unwrap_or(false)
    }

    /// Checks that must pass before any I/O.
    pub(crate) fn validate(&self, url: &str) -> Result<(), OgieError> {
        if self.timeout.is_some_and(|t| t.is_zero()) {
            return Err(OgieError::fetch(url, "timeout must be a positive duration"));
        }
        Ok(())
    }
}

/// Client-wide settings.
#[derive(Debug, Clone, Default)]
pub struct Options {
    pub http_client: Option<reqwest::Client>,
}

/// Builder for constructing Client instances with custom configuration.
#[derive(Debug, Clone, Default)]
pub struct ClientBuilder {
    opts: Options,
}

impl ClientBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a custom HTTP client. It must not follow redirects on its own.
    pub fn http_client(mut self, client: reqwest::Client) -> Self {
        self.opts.http_client = Some(client);
        self
    }

    /// Build the Client with the configured options.
    pub fn build(self) -> Result<Client, OgieError> {
        Client::new(self.opts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn defaults_resolve() {
        let opts = ExtractOptions::new();
        assert_eq!(opts.resolved_timeout(), Duration::from_secs(10));
        assert_eq!(opts.resolved_max_redirects(), 5);
        assert!(!opts.allows_private_urls());
        assert!(!opts.wants_oembed());
        assert!(opts.active_cache().is_none());
        assert!(DEFAULT_USER_AGENT.starts_with("digests-ogie/"));
    }

    #[test]
    fn disable_cache_wins_over_instance() {
        let cache = crate::cache::create_cache(Default::default());
        let opts = ExtractOptions::new().cache(cache.clone());
        assert!(opts.active_cache().is_some());
        let opts = opts.disable_cache();
        assert!(opts.active_cache().is_none());
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let err = ExtractOptions::new()
            .timeout(Duration::ZERO)
            .validate("https://a.com")
            .expect_err("zero timeout");
        assert!(err.is_fetch());
        assert!(ExtractOptions::new()
            .timeout(Duration::from_millis(1))
            .validate("https://a.com")
            .is_ok());
    }
}
