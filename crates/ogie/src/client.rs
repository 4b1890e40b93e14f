// ABOUTME: The Client that orchestrates single extractions: validate, cache lookup, fetch, parse, oEmbed, cache store.
// ABOUTME: Also provides extract_from_html for parsing caller-supplied markup without network or cache.

use std::panic::{catch_unwind, AssertUnwindSafe};

use tracing::{debug, instrument, warn};

use crate::cache::generate_cache_key;
use crate::error::OgieError;
use crate::oembed::maybe_fetch_oembed;
use crate::options::{ClientBuilder, ExtractOptions, Options};
use crate::parser::parse_document;
use crate::resource::fetch_url;
use crate::resource::redirect::validate_target;
use crate::result::ExtractResult;

/// Attribution used for errors and URLs in HTML-string mode.
pub const HTML_INPUT: &str = "html-input";

/// Metadata extraction client. Cheap to clone; clones share the HTTP connection pool.
#[derive(Debug, Clone)]
pub struct Client {
    http: reqwest::Client,
}

fn default_http_client() -> Result<reqwest::Client, OgieError> {
    reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .gzip(true)
        .brotli(true)
        .deflate(true)
        .build()
        .map_err(|e| OgieError::fetch("", "failed to build HTTP client").with_source(e))
}

impl Client {
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// Create a Client. Redirects are always followed by the client itself, so a
    /// supplied transport must be built with `redirect::Policy::none()`.
    pub fn new(opts: Options) -> Result<Self, OgieError> {
        let http = match opts.http_client {
            Some(http) => http,
            None => default_http_client()?,
        };
        Ok(Self { http })
    }

    /// Fetch `url` and extract its metadata.
    ///
    /// Invalid or private targets fail with INVALID_URL before the cache or the
    /// network is touched. Cache and oEmbed failures never fail the extraction.
    #[instrument(level = "debug", skip(self, options), fields(url = %url))]
    pub async fn extract(&self, url: &str, options: &ExtractOptions) -> ExtractResult {
        validate_target(url, options.allows_private_urls())?;

        let cache = options.active_cache();
        let cache_key = cache.map(|_| generate_cache_key(url, options));

        if let (Some(cache), Some(key)) = (cache, cache_key.as_deref()) {
            if options.bypass_cache {
                debug!(key, "cache bypassed");
            } else {
                match cache.get(key) {
                    Ok(Some(hit)) => {
                        debug!(key, "cache hit");
                        return Ok(hit);
                    }
                    Ok(None) => debug!(key, "cache miss"),
                    Err(err) => warn!(key, error = %err, "cache read failed"),
                }
            }
        }

        let fetched = fetch_url(&self.http, url, options).await?;

        let html = fetched.html;
        let base = fetched.final_url.clone();
        let parsed = tokio::task::spawn_blocking(move || parse_document(&html, Some(&base)))
            .await
            .map_err(|e| OgieError::parse(url, "Failed to parse document").with_source(e))?;

        let mut metadata = parsed.into_metadata(url, &fetched.final_url, options.skips_fallbacks());
        metadata.oembed =
            maybe_fetch_oembed(&self.http, metadata.oembed_discovery.as_ref(), options).await;
        metadata.status_code = Some(fetched.status_code);
        metadata.content_type = Some(fetched.content_type);
        metadata.charset = fetched.charset;

        if let (Some(cache), Some(key)) = (cache, cache_key.as_deref()) {
            if let Err(err) = cache.set(key, metadata.clone()) {
                warn!(key, error = %err, "cache write failed");
            }
        }

        Ok(metadata)
    }

    /// Extract metadata from an HTML string. Relative URLs resolve against
    /// `options.base_url` when set.
    pub fn extract_from_html(&self, html: &str, options: &ExtractOptions) -> ExtractResult {
        parse_html_input(html, options)
    }
}

/// HTML-string extraction. Touches neither the network nor the cache, so it
/// needs no HTTP client.
pub(crate) fn parse_html_input(html: &str, options: &ExtractOptions) -> ExtractResult {
    if html.trim().is_empty() {
        return Err(OgieError::parse(
            HTML_INPUT,
            "HTML input must be a non-empty string",
        ));
    }

    let base_url = options.base_url.as_deref();
    let parsed = catch_unwind(AssertUnwindSafe(|| parse_document(html, base_url)))
        .map_err(|_| OgieError::parse(HTML_INPUT, "Failed to parse document"))?;

    let url = base_url.unwrap_or(HTML_INPUT);
    Ok(parsed.into_metadata(url, url, options.skips_fallbacks()))
}
