use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use tracing::{debug, warn};
use url::Url;

use crate::config::BlogRoot;
use crate::constants::PERMALINK_LABEL;

static LINK_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("a[href]").expect("Invalid selector"));

static NEXT_SELECTOR: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse("div.pager-inner span.pager-right a").expect("Invalid selector")
});

/// Date-segmented post path, e.g. `/2020/01/some-post.html`.
static DATED_POST_PATH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/\d{4}/\d{2}/[^/]+\.html").expect("Invalid post path regex"));

static PAGE_NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/page/(\d+)/?$").expect("Invalid page number regex"));

/// What a listing page yielded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingScan {
    /// Post permalinks in document order, each listed once.
    pub links: Vec<String>,
    /// Whether the page links to `page + 1`.
    pub has_next: bool,
}

/// Extract permalinks and next-page validity from one listing page.
#[must_use]
pub fn scan_listing(html: &str, page_url: &Url, root: &BlogRoot, page: u32) -> ListingScan {
    let document = Html::parse_document(html);

    let mut links = extract_marked_permalinks(&document, page_url, root);
    if links.is_empty() {
        debug!(page, "No marked permalinks, trying date-path fallback");
        links = extract_dated_links(&document, page_url);
    }

    ListingScan {
        links,
        has_next: has_valid_next_link(&document, page),
    }
}

/// Anchors whose visible text is exactly the permalink label and which point
/// under the blog root.
fn extract_marked_permalinks(document: &Html, page_url: &Url, root: &BlogRoot) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut links = Vec::new();

    for element in document.select(&LINK_SELECTOR) {
        if anchor_text(&element) != PERMALINK_LABEL {
            continue;
        }
        let Some(url) = element
            .value()
            .attr("href")
            .and_then(|href| page_url.join(href).ok())
        else {
            continue;
        };

        let url = url.to_string();
        if root.contains(&url) && seen.insert(url.clone()) {
            links.push(url);
        }
    }

    links
}

/// Any anchor shaped like a dated post, whatever its text or host.
fn extract_dated_links(document: &Html, page_url: &Url) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut links = Vec::new();

    for element in document.select(&LINK_SELECTOR) {
        let Some(href) = element.value().attr("href") else {
            continue;
        };
        if !DATED_POST_PATH.is_match(href) {
            continue;
        }
        if let Ok(url) = page_url.join(href) {
            let url = url.to_string();
            if seen.insert(url.clone()) {
                links.push(url);
            }
        }
    }

    links
}

/// The pager's next control must say "next" (or `»`) and point at exactly
/// `page + 1`.
fn has_valid_next_link(document: &Html, page: u32) -> bool {
    let Some(next) = document.select(&NEXT_SELECTOR).next() else {
        debug!(page, "No next link in pager");
        return false;
    };

    let text = anchor_text(&next).to_lowercase();
    if !text.contains("next") && !text.contains('»') {
        debug!(page, text = %text, "Pager link is not a next link");
        return false;
    }

    let Some(href) = next.value().attr("href") else {
        return false;
    };

    let Some(target) = PAGE_NUMBER
        .captures(href)
        .and_then(|caps| caps[1].parse::<u32>().ok())
    else {
        warn!(page, href = %href, "Next link has an unexpected URL format");
        return false;
    };

    if target != page + 1 {
        warn!(page, target, "Next link does not point at the following page");
        return false;
    }

    true
}

fn anchor_text(element: &ElementRef) -> String {
    element.text().collect::<String>().trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn root() -> BlogRoot {
        BlogRoot::parse("https://x.typepad.com/blog/").unwrap()
    }

    fn page_url(n: u32) -> Url {
        Url::parse(&root().page_url(n)).unwrap()
    }

    fn pager(href: &str, text: &str) -> String {
        format!(
            r#"<div class="pager-inner"><span class="pager-right"><a href="{href}">{text}</a></span></div>"#
        )
    }

    #[test]
    fn test_marked_permalinks_in_order() {
        let html = r#"<html><body>
            <a href="/blog/2020/02/second.html"> Permalink </a>
            <a href="https://x.typepad.com/blog/2020/01/first.html">Permalink</a>
            <a href="/blog/2020/02/second.html">Permalink</a>
            <a href="https://other.typepad.com/else/2020/01/x.html">Permalink</a>
            <a href="/blog/2020/03/third.html">Read more</a>
            </body></html>"#;

        let scan = scan_listing(html, &page_url(1), &root(), 1);
        assert_eq!(
            scan.links,
            vec![
                "https://x.typepad.com/blog/2020/02/second.html",
                "https://x.typepad.com/blog/2020/01/first.html",
            ]
        );
        assert!(!scan.has_next);
    }

    #[test]
    fn test_fallback_only_when_no_marked_links() {
        let html = r#"<html><body>
            <a href="/blog/2019/12/older-post.html">Older post</a>
            <a href="https://mirror.example.com/2019/11/mirrored.html">Mirror</a>
            <a href="/blog/about.html">About</a>
            </body></html>"#;

        let scan = scan_listing(html, &page_url(2), &root(), 2);
        assert_eq!(
            scan.links,
            vec![
                "https://x.typepad.com/blog/2019/12/older-post.html",
                "https://mirror.example.com/2019/11/mirrored.html",
            ]
        );
    }

    #[test]
    fn test_next_link_valid() {
        let html = format!("<html><body>{}</body></html>", pager("/blog/page/4/", "Next »"));
        assert!(scan_listing(&html, &page_url(3), &root(), 3).has_next);

        let raquo_only = format!("<html><body>{}</body></html>", pager("/blog/page/4", "»"));
        assert!(scan_listing(&raquo_only, &page_url(3), &root(), 3).has_next);
    }

    #[test]
    fn test_next_link_sanity_guard() {
        let skip_ahead = format!("<html><body>{}</body></html>", pager("/blog/page/7/", "Next"));
        assert!(!scan_listing(&skip_ahead, &page_url(3), &root(), 3).has_next);

        let wrong_text = format!("<html><body>{}</body></html>", pager("/blog/page/4/", "Older"));
        assert!(!scan_listing(&wrong_text, &page_url(3), &root(), 3).has_next);

        let bad_href = format!("<html><body>{}</body></html>", pager("/blog/?page=4", "Next"));
        assert!(!scan_listing(&bad_href, &page_url(3), &root(), 3).has_next);
    }
}
