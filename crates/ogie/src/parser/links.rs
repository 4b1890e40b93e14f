// ABOUTME: Discovery of alternate links (RSS, Atom and JSON feeds, oEmbed endpoints) and JSON-LD blocks.
// ABOUTME: Relative hrefs resolve against the document base URL; duplicate feed URLs are dropped.

use scraper::Html;
use serde_json::Value;

use crate::result::{Feed, FeedKind, FeedsData, JsonLdData, OEmbedDiscovery};
use crate::urls::resolve_url;

use super::meta::{attr, selector};

fn feed_kind(mime: &str) -> Option<FeedKind> {
    match mime {
        "application/rss+xml" => Some(FeedKind::Rss),
        "application/atom+xml" => Some(FeedKind::Atom),
        "application/feed+json" | "application/json" => Some(FeedKind::Json),
        _ => None,
    }
}

fn has_rel(el: &scraper::ElementRef<'_>, wanted: &str) -> bool {
    el.value()
        .attr("rel")
        .is_some_and(|r| r.split_whitespace().any(|t| t.eq_ignore_ascii_case(wanted)))
}

fn link_type(el: &scraper::ElementRef<'_>) -> Option<String> {
    attr(el, "type").map(|t| t.to_ascii_lowercase())
}

pub(crate) fn parse_feeds(doc: &Html, base_url: Option<&str>) -> FeedsData {
    let mut feeds: Vec<Feed> = Vec::new();
    let Some(sel) = selector("link[href][type]") else {
        return FeedsData { feeds };
    };
    for el in doc.select(&sel) {
        if !has_rel(&el, "alternate") {
            continue;
        }
        let Some(kind) = link_type(&el).as_deref().and_then(feed_kind) else {
            continue;
        };
        let Some(href) = attr(&el, "href") else {
            continue;
        };
        let url = resolve_url(&href, base_url);
        if feeds.iter().any(|f| f.url == url) {
            continue;
        }
        feeds.push(Feed {
            url,
            kind,
            title: attr(&el, "title"),
        });
    }
    FeedsData { feeds }
}

pub(crate) fn parse_oembed_discovery(doc: &Html, base_url: Option<&str>) -> OEmbedDiscovery {
    let mut discovery = OEmbedDiscovery::default();
    let Some(sel) = selector("link[href][type]") else {
        return discovery;
    };
    for el in doc.select(&sel) {
        let (Some(mime), Some(href)) = (link_type(&el), attr(&el, "href")) else {
            continue;
        };
        match mime.as_str() {
            "application/json+oembed" if discovery.json_url.is_none() => {
                discovery.json_url = Some(resolve_url(&href, base_url));
            }
            "text/xml+oembed" | "application/xml+oembed" if discovery.xml_url.is_none() => {
                discovery.xml_url = Some(resolve_url(&href, base_url));
            }
            _ => {}
        }
    }
    discovery
}

fn flatten_json_ld(value: Value, out: &mut Vec<Value>) {
    match value {
        Value::Array(items) => {
            for item in items {
                flatten_json_ld(item, out);
            }
        }
        Value::Object(mut obj) => match obj.remove("@graph") {
            Some(graph) => flatten_json_ld(graph, out),
            None => out.push(Value::Object(obj)),
        },
        _ => {}
    }
}

/// Parse every `application/ld+json` script. Malformed blocks are skipped.
pub(crate) fn parse_json_ld(doc: &Html) -> JsonLdData {
    let mut items = Vec::new();
    let Some(sel) = selector("script[type]") else {
        return JsonLdData { items };
    };
    for el in doc.select(&sel) {
        let is_ld = el
            .value()
            .attr("type")
            .is_some_and(|t| t.trim().eq_ignore_ascii_case("application/ld+json"));
        if !is_ld {
            continue;
        }
        let raw: String = el.text().collect();
        if let Ok(value) = serde_json::from_str::<Value>(raw.trim()) {
            flatten_json_ld(value, &mut items);
        }
    }
    JsonLdData { items }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    const BASE: Option<&str> = Some("https://example.com/blog/");

    #[test]
    fn discovers_feeds_of_each_kind() {
        let doc = Html::parse_document(
            r#"<link rel="alternate" type="application/rss+xml" title="RSS" href="/rss.xml">
            <link rel="alternate" type="Application/Atom+XML" href="atom.xml">
            <link rel="alternate" type="application/feed+json" href="https://example.com/feed.json">
            <link rel="alternate" type="text/html" hreflang="fr" href="/fr/">
            <link rel="stylesheet" type="application/rss+xml" href="/not-a-feed">"#,
        );
        let feeds = parse_feeds(&doc, BASE).feeds;
        assert_eq!(
            feeds,
            vec![
                Feed {
                    url: "https://example.com/rss.xml".to_string(),
                    kind: FeedKind::Rss,
                    title: Some("RSS".to_string()),
                },
                Feed {
                    url: "https://example.com/blog/atom.xml".to_string(),
                    kind: FeedKind::Atom,
                    title: None,
                },
                Feed {
                    url: "https://example.com/feed.json".to_string(),
                    kind: FeedKind::Json,
                    title: None,
                },
            ]
        );
    }

    #[test]
    fn discovers_oembed_endpoints() {
        let doc = Html::parse_document(
            r#"<link rel="alternate" type="application/json+oembed" href="/oembed?format=json">
            <link rel="alternate" type="text/xml+oembed" href="//example.com/oembed?format=xml">"#,
        );
        let discovery = parse_oembed_discovery(&doc, BASE);
        assert_eq!(
            discovery.json_url.as_deref(),
            Some("https://example.com/oembed?format=json")
        );
        assert_eq!(
            discovery.xml_url.as_deref(),
            Some("https://example.com/oembed?format=xml")
        );
    }

    #[test]
    fn json_ld_flattens_graphs_and_skips_garbage() {
        let doc = Html::parse_document(
            r#"<script type="application/ld+json">{"@type": "Article", "headline": "H"}</script>
            <script type="application/ld+json">{"@context": "https://schema.org", "@graph": [{"@type": "Person"}, {"@type": "WebSite"}]}</script>
            <script type="application/ld+json">[{"@type": "Organization"}]</script>
            <script type="application/ld+json">{ not json </script>
            <script type="text/javascript">{"@type": "Ignored"}</script>"#,
        );
        let items = parse_json_ld(&doc).items;
        assert_eq!(
            items,
            vec![
                json!({"@type": "Article", "headline": "H"}),
                json!({"@type": "Person"}),
                json!({"@type": "WebSite"}),
                json!({"@type": "Organization"}),
            ]
        );
    }
}
