// ABOUTME: OpenGraph extraction including structured og:image, og:video and og:audio groups.
// ABOUTME: A bare or :url property opens a new group; :secure_url, :type, :width, :height and :alt annotate the latest one.

use crate::result::{OpenGraphAudio, OpenGraphData, OpenGraphImage, OpenGraphVideo};
use crate::urls::resolve_url;

use super::meta::MetaTags;

fn dimension(value: &str) -> Option<u32> {
    value.trim().parse::<u32>().ok()
}

pub(crate) fn parse_open_graph(tags: &MetaTags, base_url: Option<&str>) -> OpenGraphData {
    let resolve = |v: &str| resolve_url(v, base_url);

    let mut images: Vec<OpenGraphImage> = Vec::new();
    let mut videos: Vec<OpenGraphVideo> = Vec::new();
    let mut audio: Vec<OpenGraphAudio> = Vec::new();

    for tag in tags.iter() {
        let value = tag.content.as_str();
        match tag.key.as_str() {
            "og:image" | "og:image:url" => {
                let url = resolve(value);
                if !images.iter().any(|i| i.url == url) {
                    images.push(OpenGraphImage {
                        url,
                        ..Default::default()
                    });
                }
            }
            "og:image:secure_url" => {
                if let Some(img) = images.last_mut() {
                    img.secure_url = Some(resolve(value));
                }
            }
            "og:image:type" => {
                if let Some(img) = images.last_mut() {
                    img.mime_type = Some(value.to_string());
                }
            }
            "og:image:width" => {
                if let Some(img) = images.last_mut() {
                    img.width = dimension(value);
                }
            }
            "og:image:height" => {
                if let Some(img) = images.last_mut() {
                    img.height = dimension(value);
                }
            }
            "og:image:alt" => {
                if let Some(img) = images.last_mut() {
                    img.alt = Some(value.to_string());
                }
            }
            "og:video" | "og:video:url" => {
                let url = resolve(value);
                if !videos.iter().any(|v| v.url == url) {
                    videos.push(OpenGraphVideo {
                        url,
                        ..Default::default()
                    });
                }
            }
            "og:video:secure_url" => {
                if let Some(v) = videos.last_mut() {
                    v.secure_url = Some(resolve(value));
                }
            }
            "og:video:type" => {
                if let Some(v) = videos.last_mut() {
                    v.mime_type = Some(value.to_string());
                }
            }
            "og:video:width" => {
                if let Some(v) = videos.last_mut() {
                    v.width = dimension(value);
                }
            }
            "og:video:height" => {
                if let Some(v) = videos.last_mut() {
                    v.height = dimension(value);
                }
            }
            "og:audio" | "og:audio:url" => {
                let url = resolve(value);
                if !audio.iter().any(|a| a.url == url) {
                    audio.push(OpenGraphAudio {
                        url,
                        ..Default::default()
                    });
                }
            }
            "og:audio:secure_url" => {
                if let Some(a) = audio.last_mut() {
                    a.secure_url = Some(resolve(value));
                }
            }
            "og:audio:type" => {
                if let Some(a) = audio.last_mut() {
                    a.mime_type = Some(value.to_string());
                }
            }
            _ => {}
        }
    }

    OpenGraphData {
        title: tags.first("og:title"),
        og_type: tags.first("og:type"),
        url: tags.first("og:url").map(|u| resolve(&u)),
        description: tags.first("og:description"),
        site_name: tags.first("og:site_name"),
        locale: tags.first("og:locale"),
        locale_alternate: tags.all("og:locale:alternate"),
        determiner: tags.first("og:determiner"),
        images,
        videos,
        audio,
    }
}
