// ABOUTME: Main library entry point for Ogie, the web page metadata extractor.
// ABOUTME: Re-exports the public API and offers free functions backed by a shared default Client.

//! Ogie - OpenGraph, Twitter Card and page metadata extraction.
//!
//! Pages are fetched with manual, per-hop validated redirects so that
//! untrusted URLs cannot reach private networks, then parsed into a single
//! [`Metadata`] value.
//!
//! # Example
//!
//! ```no_run
//! use digests_ogie::{extract, ExtractOptions};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), digests_ogie::OgieError> {
//!     let meta = extract("https://example.com", &ExtractOptions::new()).await?;
//!     println!("{:?}", meta.og.title);
//!     Ok(())
//! }
//! ```

pub mod bulk;
pub mod cache;
pub mod client;
pub mod error;
pub mod oembed;
pub mod options;
pub mod parser;
pub mod resource;
pub mod result;
pub mod urls;

use once_cell::sync::OnceCell;

pub use crate::bulk::{
    BulkOptions, BulkProgress, BulkResult, BulkResultItem, BulkStats, ProgressCallback,
};
pub use crate::cache::{create_cache, generate_cache_key, CacheOptions, MemoryCache, MetadataCache};
pub use crate::client::Client;
pub use crate::error::{is_fetch_error, is_ogie_error, is_parse_error, ErrorCode, ErrorTag, OgieError};
pub use crate::oembed::{fetch_oembed, OEmbedData};
pub use crate::options::{ClientBuilder, ExtractOptions, Options};
pub use crate::resource::{fetch_url, FetchResult};
pub use crate::result::{ExtractResult, Metadata};
pub use crate::urls::{is_private_url, is_safe_url, is_valid_url};

// Built on first network use. Its connection pool is bound to the tokio
// runtime that first drives it, so the free functions assume one runtime per
// process. Build a `Client` per runtime otherwise.
static SHARED_CLIENT: OnceCell<Client> = OnceCell::new();

fn shared_client() -> Result<&'static Client, OgieError> {
    SHARED_CLIENT.get_or_try_init(|| Client::new(Options::default()))
}

/// Extract metadata from `url` with the shared default client.
///
/// The shared client lives for the whole process. Call this from a single
/// tokio runtime; tests or tools that create several runtimes should build
/// their own [`Client`].
pub async fn extract(url: &str, options: &ExtractOptions) -> ExtractResult {
    shared_client()?.extract(url, options).await
}

/// Extract metadata from an HTML string. No network or cache access, and no
/// HTTP client is built.
pub fn extract_from_html(html: &str, options: &ExtractOptions) -> ExtractResult {
    crate::client::parse_html_input(html, options)
}

/// Extract metadata from many URLs with the shared default client. Same
/// single-runtime rule as [`extract`].
pub async fn extract_bulk<S: AsRef<str>>(
    urls: &[S],
    options: &BulkOptions,
) -> Result<BulkResult, OgieError> {
    shared_client()?.extract_bulk(urls, options).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn html_extraction_does_not_build_the_shared_client() {
        let html = r#"<html><head><meta property="og:title" content="Offline"></head></html>"#;
        let meta = extract_from_html(html, &ExtractOptions::new().base_url("https://example.com/a"))
            .unwrap();
        assert_eq!(meta.og.title.as_deref(), Some("Offline"));
        assert_eq!(meta.final_url, "https://example.com/a");
        assert!(SHARED_CLIENT.get().is_none());

        let err = extract_from_html("  ", &ExtractOptions::new()).unwrap_err();
        assert!(err.is_parse());
    }
}
