//! Media references inside a post's content region.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use url::Url;

use super::media_filename;

static CONTENT_REGIONS: LazyLock<[Selector; 3]> = LazyLock::new(|| {
    [
        Selector::parse("div.entry-content").expect("Invalid selector"),
        Selector::parse("article").expect("Invalid selector"),
        Selector::parse("body").expect("Invalid selector"),
    ]
});

static MEDIA_TAGS: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("img, a").expect("Invalid selector"));

/// Platform thumbnails carry a `-<width>wi` suffix on the asset id.
static THUMBNAIL_SUFFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"-\d+wi$").expect("Invalid thumbnail regex"));

/// One media file a post refers to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaRef {
    /// Absolute URL as referenced by the page.
    pub url: Url,
    /// Full-size variant to try first, for platform-hosted thumbnails.
    pub preferred: Option<Url>,
    /// File name under the post's media directory.
    pub filename: String,
}

/// The element holding a post's body: `div.entry-content`, else `article`,
/// else `body`.
#[must_use]
pub fn content_region(document: &Html) -> Option<ElementRef<'_>> {
    CONTENT_REGIONS
        .iter()
        .find_map(|selector| document.select(selector).next())
}

/// Collect media references from the content region of `html`.
///
/// Every `img[src]` counts; anchors count only when they point into the
/// platform's media storage (`media_path_marker`). References are listed once,
/// in document order.
#[must_use]
pub fn discover_media(
    html: &str,
    page_url: &Url,
    media_path_marker: &str,
    platform_host_marker: &str,
) -> Vec<MediaRef> {
    let document = Html::parse_document(html);
    let Some(region) = content_region(&document) else {
        return Vec::new();
    };

    let mut seen = HashSet::new();
    let mut media = Vec::new();

    for (index, tag) in region.select(&MEDIA_TAGS).enumerate() {
        let element = tag.value();
        let is_image = element.name() == "img";
        let link = if is_image {
            element.attr("src")
        } else {
            element.attr("href")
        };

        let Some(link) = link.map(str::trim).filter(|l| !l.is_empty()) else {
            continue;
        };
        if link.starts_with("data:") {
            continue;
        }
        let Ok(url) = page_url.join(link) else {
            continue;
        };
        if !matches!(url.scheme(), "http" | "https") {
            continue;
        }
        if !is_image && !url.as_str().contains(media_path_marker) {
            continue;
        }
        if !seen.insert(url.to_string()) {
            continue;
        }

        let preferred = if is_image && url.as_str().contains(platform_host_marker) {
            full_size_url(&url)
        } else {
            None
        };

        media.push(MediaRef {
            filename: media_filename(&url, index),
            url,
            preferred,
        });
    }

    media
}

/// The URL with its thumbnail suffix removed, when it has one.
#[must_use]
pub fn full_size_url(url: &Url) -> Option<Url> {
    if url.query().is_some() || url.fragment().is_some() {
        return None;
    }

    let path = url.path();
    let stripped = THUMBNAIL_SUFFIX.replace(path, "");
    if stripped == path {
        return None;
    }

    let mut full = url.clone();
    full.set_path(&stripped);
    Some(full)
}
