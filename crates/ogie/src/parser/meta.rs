// ABOUTME: Collects every <meta> tag once, keyed by its lowercased property or name attribute.
// ABOUTME: Vocabulary parsers read from this ordered list instead of re-querying the DOM.

use scraper::{ElementRef, Html, Selector};

/// Parse a selector that is known to be valid, skipping it otherwise.
pub(crate) fn selector(css: &str) -> Option<Selector> {
    Selector::parse(css).ok()
}

/// Trimmed, non-empty attribute value.
pub(crate) fn attr(el: &ElementRef<'_>, name: &str) -> Option<String> {
    el.value()
        .attr(name)
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Whitespace-collapsed text content of an element.
pub(crate) fn text(el: &ElementRef<'_>) -> String {
    el.text().collect::<Vec<_>>().join(" ").split_whitespace().collect::<Vec<_>>().join(" ")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct MetaTag {
    pub key: String,
    pub content: String,
}

/// Document-ordered meta tags.
#[derive(Debug, Clone, Default)]
pub(crate) struct MetaTags {
    tags: Vec<MetaTag>,
}

impl MetaTags {
    pub fn from_document(doc: &Html) -> Self {
        let mut tags = Vec::new();
        let Some(sel) = selector("meta") else {
            return Self { tags };
        };
        for el in doc.select(&sel) {
            let Some(content) = attr(&el, "content") else {
                continue;
            };
            // A tag may carry both attributes; each is a separate key.
            for key_attr in ["property", "name"] {
                if let Some(key) = attr(&el, key_attr) {
                    tags.push(MetaTag {
                        key: key.to_ascii_lowercase(),
                        content: content.clone(),
                    });
                }
            }
        }
        Self { tags }
    }

    /// First value for `key`.
    pub fn first(&self, key: &str) -> Option<String> {
        self.tags
            .iter()
            .find(|t| t.key == key)
            .map(|t| t.content.clone())
    }

    /// Every value for `key`, in document order, without duplicates.
    pub fn all(&self, key: &str) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for t in self.tags.iter().filter(|t| t.key == key) {
            if !out.contains(&t.content) {
                out.push(t.content.clone());
            }
        }
        out
    }

    pub fn iter(&self) -> impl Iterator<Item = &MetaTag> {
        self.tags.iter()
    }
}
