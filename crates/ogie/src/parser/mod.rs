// ABOUTME: Document parsing entry point: runs every vocabulary extractor over one parsed HTML tree.
// ABOUTME: Infallible for any input string; malformed or empty HTML yields empty or partial fields.

mod basic;
mod links;
mod meta;
mod opengraph;
mod twitter;

use scraper::Html;

use crate::result::{
    BasicMetaData, FeedsData, JsonLdData, Metadata, OEmbedDiscovery, OpenGraphData,
    TwitterCardData,
};

/// Every vocabulary extracted from one document, before fallbacks are applied.
#[derive(Debug, Clone, Default)]
pub struct ParsedDocument {
    pub og: OpenGraphData,
    pub twitter: TwitterCardData,
    pub basic: BasicMetaData,
    pub feeds: FeedsData,
    pub oembed_discovery: OEmbedDiscovery,
    pub json_ld: JsonLdData,
}

/// Parse `html`, resolving relative URLs against `base_url` when given.
pub fn parse_document(html: &str, base_url: Option<&str>) -> ParsedDocument {
    let doc = Html::parse_document(html);
    let tags = meta::MetaTags::from_document(&doc);

    ParsedDocument {
        og: opengraph::parse_open_graph(&tags, base_url),
        twitter: twitter::parse_twitter_card(&tags, base_url),
        basic: basic::parse_basic_meta(&doc, &tags, base_url),
        feeds: links::parse_feeds(&doc, base_url),
        oembed_discovery: links::parse_oembed_discovery(&doc, base_url),
        json_ld: links::parse_json_ld(&doc),
    }
}

impl ParsedDocument {
    /// Assemble Metadata. Unless `skip_fallbacks`, og.title and og.description
    /// fall back to the Twitter card and then to basic meta.
    pub fn into_metadata(
        self,
        request_url: &str,
        final_url: &str,
        skip_fallbacks: bool,
    ) -> Metadata {
        let mut og = self.og;
        if !skip_fallbacks {
            og.title = og
                .title
                .or_else(|| self.twitter.title.clone())
                .or_else(|| self.basic.title.clone());
            og.description = og
                .description
                .or_else(|| self.twitter.description.clone())
                .or_else(|| self.basic.description.clone());
        }

        Metadata {
            request_url: request_url.to_string(),
            final_url: final_url.to_string(),
            og,
            twitter: self.twitter,
            basic: self.basic,
            json_ld: (!self.json_ld.items.is_empty()).then_some(self.json_ld),
            feeds: (!self.feeds.feeds.is_empty()).then_some(self.feeds),
            oembed_discovery: (!self.oembed_discovery.is_empty()).then_some(self.oembed_discovery),
            ..Default::default()
        }
    }
}
