// ABOUTME: Basic HTML metadata: <title>, standard meta names, canonical link, charset and favicons.
// ABOUTME: Favicons keep their rel, type, sizes and color; the primary favicon prefers a plain "icon" link.

use once_cell::sync::Lazy;
use regex::Regex;
use scraper::Html;

use crate::resource::charset::normalize_charset;
use crate::result::{BasicMetaData, Favicon};
use crate::urls::resolve_url;

use super::meta::{attr, selector, text, MetaTags};

static HTTP_EQUIV_CHARSET_RE: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"(?i)charset=([^\s;]+)").ok());

const ICON_RELS: &[&str] = &[
    "icon",
    "shortcut icon",
    "apple-touch-icon",
    "apple-touch-icon-precomposed",
    "mask-icon",
    "fluid-icon",
];

fn document_charset(doc: &Html) -> Option<String> {
    let sel = selector("meta[charset]")?;
    if let Some(el) = doc.select(&sel).next() {
        if let Some(charset) = attr(&el, "charset") {
            return Some(normalize_charset(&charset));
        }
    }

    let sel = selector("meta[http-equiv]")?;
    let re = HTTP_EQUIV_CHARSET_RE.as_ref()?;
    doc.select(&sel)
        .filter(|el| {
            el.value()
                .attr("http-equiv")
                .is_some_and(|v| v.trim().eq_ignore_ascii_case("content-type"))
        })
        .filter_map(|el| attr(&el, "content"))
        .find_map(|content| {
            re.captures(&content)
                .and_then(|c| c.get(1))
                .map(|m| normalize_charset(m.as_str()))
        })
}

fn link_rel(el: &scraper::ElementRef<'_>) -> Option<String> {
    attr(el, "rel").map(|r| r.split_whitespace().collect::<Vec<_>>().join(" ").to_ascii_lowercase())
}

pub(crate) fn parse_favicons(doc: &Html, base_url: Option<&str>) -> (Vec<Favicon>, Option<String>) {
    let mut favicons: Vec<Favicon> = Vec::new();
    let mut manifest = None;
    let Some(sel) = selector("link[rel][href]") else {
        return (favicons, manifest);
    };

    for el in doc.select(&sel) {
        let (Some(rel), Some(href)) = (link_rel(&el), attr(&el, "href")) else {
            continue;
        };
        if rel == "manifest" {
            manifest.get_or_insert_with(|| resolve_url(&href, base_url));
            continue;
        }
        if !ICON_RELS.contains(&rel.as_str()) {
            continue;
        }
        let url = resolve_url(&href, base_url);
        if favicons.iter().any(|f| f.url == url) {
            continue;
        }
        favicons.push(Favicon {
            url,
            rel,
            mime_type: attr(&el, "type"),
            sizes: attr(&el, "sizes"),
            color: attr(&el, "color"),
        });
    }
    (favicons, manifest)
}

/// The icon a browser tab would show.
pub(crate) fn primary_favicon(favicons: &[Favicon]) -> Option<String> {
    favicons
        .iter()
        .find(|f| f.rel == "icon" || f.rel == "shortcut icon")
        .or_else(|| favicons.first())
        .map(|f| f.url.clone())
}

pub(crate) fn parse_basic_meta(doc: &Html, tags: &MetaTags, base_url: Option<&str>) -> BasicMetaData {
    let title = selector("title")
        .and_then(|sel| doc.select(&sel).next().map(|el| text(&el)))
        .filter(|t| !t.is_empty());

    let canonical = selector("link[rel][href]").and_then(|sel| {
        doc.select(&sel)
            .filter(|el| link_rel(el).as_deref() == Some("canonical"))
            .find_map(|el| attr(&el, "href"))
            .map(|href| resolve_url(&href, base_url))
    });

    let (favicons, manifest_url) = parse_favicons(doc, base_url);

    BasicMetaData {
        title,
        description: tags.first("description"),
        canonical,
        favicon: primary_favicon(&favicons),
        favicons,
        manifest_url,
        author: tags.first("author"),
        charset: document_charset(doc),
        keywords: tags.first("keywords"),
        robots: tags.first("robots"),
        viewport: tags.first("viewport"),
        theme_color: tags.first("theme-color"),
        generator: tags.first("generator"),
        application_name: tags.first("application-name"),
        referrer: tags.first("referrer"),
    }
}
