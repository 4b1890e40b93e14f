// ABOUTME: Twitter Card extraction: card type, site and creator accounts, title and description.
// ABOUTME: Image and player groups are resolved against the document base URL.

use crate::result::{TwitterCardData, TwitterImage, TwitterPlayer};
use crate::urls::resolve_url;

use super::meta::MetaTags;

fn dimension(tags: &MetaTags, key: &str) -> Option<u32> {
    tags.first(key).and_then(|v| v.trim().parse().ok())
}

pub(crate) fn parse_twitter_card(tags: &MetaTags, base_url: Option<&str>) -> TwitterCardData {
    let image = tags
        .first("twitter:image")
        .or_else(|| tags.first("twitter:image:src"))
        .map(|url| TwitterImage {
            url: resolve_url(&url, base_url),
            alt: tags.first("twitter:image:alt"),
        });

    let player = tags.first("twitter:player").map(|url| TwitterPlayer {
        url: resolve_url(&url, base_url),
        width: dimension(tags, "twitter:player:width"),
        height: dimension(tags, "twitter:player:height"),
        stream: tags
            .first("twitter:player:stream")
            .map(|s| resolve_url(&s, base_url)),
        stream_content_type: tags.first("twitter:player:stream:content_type"),
    });

    TwitterCardData {
        card: tags.first("twitter:card"),
        site: tags.first("twitter:site"),
        site_id: tags.first("twitter:site:id"),
        creator: tags.first("twitter:creator"),
        creator_id: tags.first("twitter:creator:id"),
        title: tags.first("twitter:title"),
        description: tags.first("twitter:description"),
        image,
        player,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use scraper::Html;

    #[test]
    fn parses_card_fields() {
        let doc = Html::parse_document(
            r#"<meta name="twitter:card" content="player">
            <meta name="TWITTER:SITE" content="@site">
            <meta name="twitter:site:id" content="123">
            <meta name="twitter:creator" content="@me">
            <meta name="twitter:title" content="T">
            <meta name="twitter:image:src" content="/card.png">
            <meta name="twitter:image:alt" content="Card">
            <meta name="twitter:player" content="https://p.com/embed">
            <meta name="twitter:player:width" content="480">
            <meta name="twitter:player:height" content="270">
            <meta name="twitter:player:stream" content="https://p.com/s.mp4">"#,
        );
        let card = parse_twitter_card(&MetaTags::from_document(&doc), Some("https://x.com/a"));
        assert_eq!(card.card.as_deref(), Some("player"));
        assert_eq!(card.site.as_deref(), Some("@site"));
        assert_eq!(card.site_id.as_deref(), Some("123"));
        assert_eq!(
            card.image,
            Some(TwitterImage {
                url: "https://x.com/card.png".to_string(),
                alt: Some("Card".to_string()),
            })
        );
        let player = card.player.expect("player");
        assert_eq!(player.width, Some(480));
        assert_eq!(player.height, Some(270));
        assert_eq!(player.stream.as_deref(), Some("https://p.com/s.mp4"));
    }

    #[test]
    fn empty_document_yields_default() {
        let doc = Html::parse_document("");
        let card = parse_twitter_card(&MetaTags::from_document(&doc), None);
        assert_eq!(card, TwitterCardData::default());
    }
}
