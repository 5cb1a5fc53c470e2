//! WordPress WXR export of the archived posts.

use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{NaiveDateTime, Utc};
use tracing::info;
use url::Url;

use crate::config::{ArchiveLayout, Config};
use crate::dedup::load_mapping;
use crate::fs_utils::write_atomic;
use crate::post::{load_posts, Post, PostDefaults};
use crate::rewriter::{ContentRewriter, RewriteTarget};

const RFC822_FORMAT: &str = "%a, %d %b %Y %H:%M:%S +0000";
const WP_DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Channel-level metadata for the export files.
#[derive(Debug, Clone)]
pub struct Channel {
    pub title: String,
    pub link: String,
    pub generated_at: NaiveDateTime,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ExportSummary {
    pub posts: usize,
    pub files: Vec<PathBuf>,
}

/// Loads the mapping and saved posts, rewrites each post and writes the
/// import files.
pub struct WxrExporter {
    config: Config,
    layout: ArchiveLayout,
}

impl WxrExporter {
    #[must_use]
    pub fn new(config: &Config) -> Self {
        Self {
            layout: config.layout(),
            config: config.clone(),
        }
    }

    /// # Errors
    ///
    /// Returns an error if the mapping file is missing, no posts can be read,
    /// or the output cannot be written.
    pub async fn run(&self) -> Result<ExportSummary> {
        let mapping = load_mapping(&self.layout.file_map()).await?;
        info!(mappings = mapping.len(), "Loaded file map");

        let rewriter = ContentRewriter::new(&self.config, &mapping)?;
        let blog_url = Url::parse(&self.config.blog_url).context("Invalid blog URL")?;
        let now = Utc::now().naive_utc();
        let defaults = PostDefaults {
            blog_url: &blog_url,
            author: &self.config.default_author,
            now,
        };

        let posts = load_posts(&self.layout.posts_dir(), &defaults).await?;
        if posts.is_empty() {
            anyhow::bail!(
                "No post documents found in {}",
                self.layout.posts_dir().display()
            );
        }
        info!(posts = posts.len(), "Converting posts");

        let items: Vec<String> = posts
            .iter()
            .enumerate()
            .map(|(index, post)| {
                let content = rewriter.rewrite(
                    &post.content,
                    &RewriteTarget {
                        post_dir: &post.basename,
                        post_url: &post.url,
                    },
                );
                render_item(post, &content, index + 1)
            })
            .collect();

        let channel = Channel {
            title: self.config.blog_title.clone(),
            link: self.config.blog_url.clone(),
            generated_at: now,
        };

        let export_dir = self.layout.export_dir();
        let mut files = Vec::new();
        for (name, chunk) in chunk_items(&items, self.config.max_posts_per_file) {
            let path = export_dir.join(name);
            write_atomic(&path, render_document(&channel, chunk).as_bytes())
                .await
                .with_context(|| format!("Failed to write export file: {}", path.display()))?;
            info!(path = %path.display(), posts = chunk.len(), "Wrote WordPress import file");
            files.push(path);
        }

        Ok(ExportSummary {
            posts: items.len(),
            files,
        })
    }
}

/// `import.xml` for everything, or `import-part-N.xml` chunks of `max` items.
fn chunk_items(items: &[String], max: usize) -> Vec<(String, &[String])> {
    if max == 0 {
        return vec![("import.xml".to_string(), items)];
    }
    items
        .chunks(max)
        .enumerate()
        .map(|(i, chunk)| (format!("import-part-{}.xml", i + 1), chunk))
        .collect()
}

/// Generate a WXR 1.2 document around pre-rendered items.
#[must_use]
pub fn render_document(channel: &Channel, items: &[String]) -> String {
    let title = xml_escape(&channel.title);
    let link = xml_escape(&channel.link);
    let pub_date = channel.generated_at.format(RFC822_FORMAT);
    let items = items.concat();

    format!(
        r#"<?xml version="1.0" encoding="UTF-8" ?>
<rss version="2.0"
    xmlns:excerpt="http://wordpress.org/export/1.2/excerpt/"
    xmlns:content="http://purl.org/rss/1.0/modules/content/"
    xmlns:wfw="http://wellformedweb.org/CommentAPI/"
    xmlns:dc="http://purl.org/dc/elements/1.1/"
    xmlns:wp="http://wordpress.org/export/1.2/"
>
<channel>
    <title>{title}</title>
    <link>{link}</link>
    <description>An archive of a Typepad blog.</description>
    <pubDate>{pub_date}</pubDate>
    <language>en-US</language>
    <wp:wxr_version>1.2</wp:wxr_version>
{items}
</channel>
</rss>
"#
    )
}

/// One `<item>` for a post with already rewritten content.
#[must_use]
pub fn render_item(post: &Post, content: &str, post_id: usize) -> String {
    let title = xml_escape(&post.title);
    let link = xml_escape(post.url.as_str());
    let pub_date = post.published.format(RFC822_FORMAT);
    let wp_date = post.published.format(WP_DATE_FORMAT);
    let creator = cdata(&post.author);
    let guid = xml_escape(&post.post_name);
    let post_name = cdata(&post.post_name);
    let content = cdata(content);

    format!(
        r#"
    <item>
        <title>{title}</title>
        <link>{link}</link>
        <pubDate>{pub_date}</pubDate>
        <dc:creator>{creator}</dc:creator>
        <guid isPermaLink="false">{guid}</guid>
        <description></description>
        <content:encoded>{content}</content:encoded>
        <excerpt:encoded><![CDATA[]]></excerpt:encoded>
        <wp:post_id>{post_id}</wp:post_id>
        <wp:post_date><![CDATA[{wp_date}]]></wp:post_date>
        <wp:post_date_gmt><![CDATA[{wp_date}]]></wp:post_date_gmt>
        <wp:comment_status><![CDATA[closed]]></wp:comment_status>
        <wp:ping_status><![CDATA[closed]]></wp:ping_status>
        <wp:post_name>{post_name}</wp:post_name>
        <wp:status><![CDATA[publish]]></wp:status>
        <wp:post_parent>0</wp:post_parent>
        <wp:menu_order>0</wp:menu_order>
        <wp:post_type><![CDATA[post]]></wp:post_type>
        <wp:post_password><![CDATA[]]></wp:post_password>
        <wp:is_sticky>0</wp:is_sticky>
    </item>
"#
    )
}

/// Wrap `text` in CDATA, splitting any terminator it contains.
fn cdata(text: &str) -> String {
    format!("<![CDATA[{}]]>", text.replace("]]>", "]]]]><![CDATA[>"))
}

fn xml_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;
    use crate::post::DateSource;

    fn post() -> Post {
        Post {
            basename: "2020_01_0000_a".to_string(),
            title: "Fish & Chips <3".to_string(),
            url: Url::parse("https://x.typepad.com/blog/2020/01/a.html").unwrap(),
            post_name: "a".to_string(),
            author: "ron".to_string(),
            published: NaiveDate::from_ymd_opt(2020, 1, 5)
                .unwrap()
                .and_hms_opt(9, 15, 0)
                .unwrap(),
            date_source: DateSource::Markup,
            content: String::new(),
        }
    }

    #[test]
    fn test_cdata_splits_terminator() {
        assert_eq!(cdata("a]]>b"), "<![CDATA[a]]]]><![CDATA[>b]]>");
        assert_eq!(cdata("plain"), "<![CDATA[plain]]>");
    }

    #[test]
    fn test_xml_escape() {
        assert_eq!(xml_escape("<script>"), "&lt;script&gt;");
        assert_eq!(xml_escape("a & b"), "a &amp; b");
    }

    #[test]
    fn test_render_item() {
        let item = render_item(&post(), "<p>x]]>y</p>", 7);

        assert!(item.contains("<title>Fish &amp; Chips &lt;3</title>"));
        assert!(item.contains("<pubDate>Sun, 05 Jan 2020 09:15:00 +0000</pubDate>"));
        assert!(item.contains("<wp:post_id>7</wp:post_id>"));
        assert!(item.contains("<wp:post_date><![CDATA[2020-01-05 09:15:00]]></wp:post_date>"));
        assert!(item.contains("<content:encoded><![CDATA[<p>x]]]]><![CDATA[>y</p>]]></content:encoded>"));
        assert!(item.contains("<dc:creator><![CDATA[ron]]></dc:creator>"));
    }

    #[test]
    fn test_render_document() {
        let channel = Channel {
            title: "My Blog".to_string(),
            link: "https://x.typepad.com/blog/".to_string(),
            generated_at: NaiveDate::from_ymd_opt(2026, 1, 1)
                .unwrap()
                .and_hms_opt(0, 0, 0)
                .unwrap(),
        };
        let doc = render_document(&channel, &["<item/>".to_string()]);

        assert!(doc.starts_with(r#"<?xml version="1.0" encoding="UTF-8" ?>"#));
        assert!(doc.contains("<title>My Blog</title>"));
        assert!(doc.contains("<wp:wxr_version>1.2</wp:wxr_version>\n<item/>\n</channel>"));
    }

    #[test]
    fn test_chunking() {
        let items: Vec<String> = (0..5).map(|i| i.to_string()).collect();

        let single = chunk_items(&items, 0);
        assert_eq!(single.len(), 1);
        assert_eq!(single[0].0, "import.xml");
        assert_eq!(single[0].1.len(), 5);

        let parts = chunk_items(&items, 2);
        let names: Vec<&str> = parts.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, ["import-part-1.xml", "import-part-2.xml", "import-part-3.xml"]);
        assert_eq!(parts[2].1.len(), 1);
    }
}
