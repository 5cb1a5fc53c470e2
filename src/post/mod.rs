//! Post records read back from the saved post documents.

pub mod date;

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use scraper::{ElementRef, Html, Selector};
use tracing::{debug, warn};
use url::Url;

pub use date::{resolve_publish_date, DateSource};

static ENTRY_TITLE: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("h3.entry-header").expect("Invalid selector"));
static ANY_H3: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("h3").expect("Invalid selector"));
static CANONICAL_LINK: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("link[rel=canonical][href]").expect("Invalid selector"));
static PERMALINK_ANCHOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("a.permalink[href]").expect("Invalid selector"));
static DATE_LINES: LazyLock<[Selector; 3]> = LazyLock::new(|| {
    [
        Selector::parse("p.entry-footer-info").expect("Invalid selector"),
        Selector::parse("p.posted").expect("Invalid selector"),
        Selector::parse("h2.date-header").expect("Invalid selector"),
    ]
});
static CLASSED_DIVS: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("div[class]").expect("Invalid selector"));
static CONTENT_BODIES: LazyLock<[Selector; 2]> = LazyLock::new(|| {
    [
        Selector::parse("div.entry-body").expect("Invalid selector"),
        Selector::parse("div.entry-content").expect("Invalid selector"),
    ]
});

const UNTITLED: &str = "Untitled Post";
const AUTHOR_CLASS_PREFIX: &str = "entry-author-";

/// A post ready for rewriting and export.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Post {
    /// Saved document name without `.html`; also the post's media directory.
    pub basename: String,
    pub title: String,
    pub url: Url,
    /// Last path segment of `url` without `.html`.
    pub post_name: String,
    pub author: String,
    pub published: NaiveDateTime,
    pub date_source: DateSource,
    /// Inner markup of the content region.
    pub content: String,
}

/// Values used when a document lacks them.
#[derive(Debug, Clone)]
pub struct PostDefaults<'a> {
    /// Base for reconstructing a post URL from its file name.
    pub blog_url: &'a Url,
    pub author: &'a str,
    pub now: NaiveDateTime,
}

/// Parse one saved post. Returns `None` when the document has no content
/// region.
#[must_use]
pub fn parse_post(html: &str, file_name: &str, defaults: &PostDefaults<'_>) -> Option<Post> {
    let document = Html::parse_document(html);

    let content = CONTENT_BODIES
        .iter()
        .find_map(|selector| document.select(selector).next())?
        .inner_html();

    let basename = file_name.strip_suffix(".html").unwrap_or(file_name).to_string();

    let title = document
        .select(&ENTRY_TITLE)
        .next()
        .or_else(|| document.select(&ANY_H3).next())
        .map(|el| collapse_whitespace(&el))
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| UNTITLED.to_string());

    let url = original_url(&document, defaults.blog_url, &basename);
    let post_name = post_name(&url);

    let author = document
        .select(&CLASSED_DIVS)
        .find_map(|div| {
            div.value()
                .classes()
                .find_map(|class| class.strip_prefix(AUTHOR_CLASS_PREFIX))
                .filter(|name| !name.is_empty())
                .map(ToString::to_string)
        })
        .unwrap_or_else(|| defaults.author.to_string());

    let date_line = DATE_LINES
        .iter()
        .find_map(|selector| document.select(selector).next())
        .map(|el| collapse_whitespace(&el));
    let (published, date_source) =
        resolve_publish_date(date_line.as_deref(), file_name, defaults.now);

    match (date_source, &date_line) {
        (DateSource::FileName, Some(line)) => {
            warn!(file = %file_name, date = %line, "Could not parse date, using file name");
        }
        (DateSource::Now, _) => warn!(file = %file_name, "Could not determine date, using current time"),
        _ => {}
    }

    Some(Post {
        basename,
        title,
        url,
        post_name,
        author,
        published,
        date_source,
        content,
    })
}

/// Read and parse every `*.html` document directly under `posts_dir`, in
/// file-name order.
///
/// # Errors
///
/// Returns an error if the directory cannot be listed or a file cannot be
/// read.
pub async fn load_posts(posts_dir: &Path, defaults: &PostDefaults<'_>) -> Result<Vec<Post>> {
    let mut files: Vec<PathBuf> = Vec::new();
    let mut entries = tokio::fs::read_dir(posts_dir)
        .await
        .with_context(|| format!("Failed to list posts directory: {}", posts_dir.display()))?;

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let is_html = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("html"));
        if is_html && entry.file_type().await?.is_file() {
            files.push(path);
        }
    }
    files.sort();

    let mut posts = Vec::with_capacity(files.len());
    for path in files {
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let bytes = tokio::fs::read(&path)
            .await
            .with_context(|| format!("Failed to read post: {}", path.display()))?;
        let html = String::from_utf8_lossy(&bytes);

        match parse_post(&html, &file_name, defaults) {
            Some(post) => {
                debug!(file = %file_name, title = %post.title, "Parsed post");
                posts.push(post);
            }
            None => warn!(file = %file_name, "No content body found, skipping post"),
        }
    }

    Ok(posts)
}

/// `link[rel=canonical]`, else `a.permalink`, else `<blog>/<basename>.html`.
fn original_url(document: &Html, blog_url: &Url, basename: &str) -> Url {
    document
        .select(&CANONICAL_LINK)
        .chain(document.select(&PERMALINK_ANCHOR))
        .filter_map(|el| el.value().attr("href"))
        .find_map(|href| blog_url.join(href.trim()).ok())
        .or_else(|| blog_url.join(&format!("{basename}.html")).ok())
        .unwrap_or_else(|| blog_url.clone())
}

fn post_name(url: &Url) -> String {
    let last = url.path().trim_matches('/').rsplit('/').next().unwrap_or_default();
    last.replace(".html", "")
}

fn collapse_whitespace(element: &ElementRef) -> String {
    element
        .text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use chrono::{Datelike, NaiveDate};

    use super::*;

    fn blog() -> Url {
        Url::parse("https://x.typepad.com/blog/").unwrap()
    }

    fn parse(html: &str, file_name: &str) -> Option<Post> {
        let blog = blog();
        let defaults = PostDefaults {
            blog_url: &blog,
            author: "admin",
            now: NaiveDate::from_ymd_opt(2026, 1, 1)
                .unwrap()
                .and_hms_opt(0, 0, 0)
                .unwrap(),
        };
        parse_post(html, file_name, &defaults)
    }

    const FULL_POST: &str = r#"<html><head>
        <link rel="canonical" href="https://x.typepad.com/blog/2020/01/hello-world.html">
        </head><body>
        <h2 class="date-header">January 05, 2020</h2>
        <div class="entry-author-ron entry">
          <h3 class="entry-header">Hello
             <em>World</em></h3>
          <div class="entry-body"><p>First post.</p></div>
          <p class="posted">Posted by Ron on January 05, 2020 at 09:15 AM in Misc | Permalink</p>
        </div></body></html>"#;

    #[test]
    fn test_parse_full_post() {
        let post = parse(FULL_POST, "2020_01_0000_hello-world.html").unwrap();

        assert_eq!(post.basename, "2020_01_0000_hello-world");
        assert_eq!(post.title, "Hello World");
        assert_eq!(post.url.as_str(), "https://x.typepad.com/blog/2020/01/hello-world.html");
        assert_eq!(post.post_name, "hello-world");
        assert_eq!(post.author, "ron");
        assert_eq!(post.content, "<p>First post.</p>");
        // `p.posted` comes before `h2.date-header` in tier order.
        assert_eq!(post.date_source, DateSource::Markup);
        assert_eq!(post.published.format("%Y-%m-%d %H:%M").to_string(), "2020-01-05 09:15");
    }

    #[test]
    fn test_parse_fallbacks() {
        let html = r#"<html><body><h3>Plain</h3>
            <div class="entry-content"><p>Body</p></div></body></html>"#;
        let post = parse(html, "2018_07_0003_plain.html").unwrap();

        assert_eq!(post.title, "Plain");
        assert_eq!(post.url.as_str(), "https://x.typepad.com/blog/2018_07_0003_plain.html");
        assert_eq!(post.post_name, "2018_07_0003_plain");
        assert_eq!(post.author, "admin");
        assert_eq!(post.date_source, DateSource::FileName);
        assert_eq!(post.published.month(), 7);
    }

    #[test]
    fn test_permalink_anchor_and_untitled() {
        let html = r#"<html><body>
            <div class="entry-body">x</div>
            <a class="permalink" href="/blog/2015/10/older.html">Permalink</a>
            </body></html>"#;
        let post = parse(html, "0001_older.html").unwrap();

        assert_eq!(post.title, UNTITLED);
        assert_eq!(post.post_name, "older");
        assert_eq!(post.date_source, DateSource::Now);
    }

    #[test]
    fn test_missing_content_region() {
        assert!(parse("<html><body><h3>T</h3></body></html>", "x.html").is_none());
    }
}
