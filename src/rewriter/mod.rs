//! Post content cleanup and reference rewriting.
//!
//! The rewriter runs a fixed sequence of passes over a post's content
//! fragment. Each pass parses the current markup, plans its edits, and
//! re-renders, so later passes see the result of earlier ones. Every pass
//! leaves markup it already handled untouched, which makes the whole pipeline
//! idempotent.

pub mod lookup;

use std::sync::LazyLock;

use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use tracing::debug;
use url::Url;

use crate::config::{BlogRoot, Config, ConfigError};
use crate::constants::{MEDIA_EXTENSIONS, POPUP_VIEWER_MARKER};
use crate::dedup::CanonicalMapping;
use crate::html::{edit_fragment, has_ancestor, HtmlEdits};

pub use lookup::MediaLookup;

static PARAGRAPHS: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("p").expect("Invalid selector"));
static CELLS: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("td, th").expect("Invalid selector"));
static DIVS: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("div").expect("Invalid selector"));
static LINE_BREAKS: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("br").expect("Invalid selector"));
static LINKS: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("a[href]").expect("Invalid selector"));
static IMAGES: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("img").expect("Invalid selector"));

/// `/YYYY/MM/slug.html` at the end of a post URL path.
static POST_PATH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"/(\d{4})/(\d{2})/([^/]+)\.html?$").expect("Invalid post path regex")
});

static FLOAT_STYLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)float\s*:\s*(left|right)\s*;?").expect("Invalid float style regex")
});

/// One rewriting pass, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pass {
    Boilerplate,
    StrayCells,
    UnwrapDivs,
    CollapseLineBreaks,
    Links,
    Images,
}

impl Pass {
    pub const ORDER: [Self; 6] = [
        Self::Boilerplate,
        Self::StrayCells,
        Self::UnwrapDivs,
        Self::CollapseLineBreaks,
        Self::Links,
        Self::Images,
    ];
}

/// Which passes run and how references are rewritten.
#[derive(Debug, Clone)]
pub struct RewriteOptions {
    pub boilerplate_signatures: Vec<Vec<String>>,
    pub unwrap_stray_cells: bool,
    pub unwrap_divs: bool,
    pub collapse_line_breaks: bool,
    pub rewrite_links: bool,
    pub rewrite_images: bool,
    /// Unwrap or drop popup-viewer links during the link pass.
    pub scrub_popups: bool,
    pub media_url_prefix: String,
    pub post_url_prefix: String,
    pub media_path_marker: String,
}

impl RewriteOptions {
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            boilerplate_signatures: config.boilerplate_signatures.clone(),
            unwrap_stray_cells: true,
            unwrap_divs: config.unwrap_divs,
            collapse_line_breaks: config.collapse_line_breaks,
            rewrite_links: true,
            rewrite_images: true,
            scrub_popups: config.scrub_popups,
            media_url_prefix: config.media_url_prefix.clone(),
            post_url_prefix: config.post_url_prefix.clone(),
            media_path_marker: config.media_path_marker.clone(),
        }
    }

    #[must_use]
    pub fn is_enabled(&self, pass: Pass) -> bool {
        match pass {
            Pass::Boilerplate => !self.boilerplate_signatures.is_empty(),
            Pass::StrayCells => self.unwrap_stray_cells,
            Pass::UnwrapDivs => self.unwrap_divs,
            Pass::CollapseLineBreaks => self.collapse_line_breaks,
            Pass::Links => self.rewrite_links,
            Pass::Images => self.rewrite_images,
        }
    }
}

/// The post whose content is being rewritten.
#[derive(Debug, Clone, Copy)]
pub struct RewriteTarget<'a> {
    /// Name of the post's media directory under `posts/`.
    pub post_dir: &'a str,
    /// Original post URL; relative references resolve against it.
    pub post_url: &'a Url,
}

pub struct ContentRewriter {
    options: RewriteOptions,
    root: BlogRoot,
    lookup: MediaLookup,
}

impl ContentRewriter {
    /// # Errors
    ///
    /// Returns an error if the configured blog URL is invalid.
    pub fn new(config: &Config, mapping: &CanonicalMapping) -> Result<Self, ConfigError> {
        Ok(Self::with_options(
            RewriteOptions::from_config(config),
            config.blog_root()?,
            mapping,
        ))
    }

    #[must_use]
    pub fn with_options(options: RewriteOptions, root: BlogRoot, mapping: &CanonicalMapping) -> Self {
        Self {
            options,
            root,
            lookup: MediaLookup::new(mapping),
        }
    }

    /// Run every enabled pass over `content`.
    #[must_use]
    pub fn rewrite(&self, content: &str, target: &RewriteTarget<'_>) -> String {
        let mut html = content.to_string();

        for pass in Pass::ORDER {
            if !self.options.is_enabled(pass) {
                continue;
            }
            let mut planned = 0;
            html = edit_fragment(&html, |doc, edits| {
                self.plan(pass, doc, edits, target);
                planned = edits.len();
            });
            if planned > 0 {
                debug!(post = %target.post_dir, ?pass, edits = planned, "Applied rewrite pass");
            }
        }

        html
    }

    fn plan(&self, pass: Pass, doc: &Html, edits: &mut HtmlEdits, target: &RewriteTarget<'_>) {
        match pass {
            Pass::Boilerplate => self.plan_boilerplate(doc, edits),
            Pass::StrayCells => plan_stray_cells(doc, edits),
            Pass::UnwrapDivs => {
                for div in doc.select(&DIVS) {
                    edits.unwrap(div.id());
                }
            }
            Pass::CollapseLineBreaks => {
                for br in doc.select(&LINE_BREAKS) {
                    edits.replace_with_text(br.id(), " ");
                }
            }
            Pass::Links => self.plan_links(doc, edits, target),
            Pass::Images => self.plan_images(doc, edits, target),
        }
    }

    fn plan_boilerplate(&self, doc: &Html, edits: &mut HtmlEdits) {
        for paragraph in doc.select(&PARAGRAPHS) {
            let text: String = paragraph.text().collect();
            let matches = self
                .options
                .boilerplate_signatures
                .iter()
                .filter(|signature| !signature.is_empty())
                .any(|signature| signature.iter().all(|part| text.contains(part.as_str())));
            if matches {
                edits.remove(paragraph.id());
            }
        }
    }

    fn plan_links(&self, doc: &Html, edits: &mut HtmlEdits, target: &RewriteTarget<'_>) {
        for link in doc.select(&LINKS) {
            let href = link.value().attr("href").unwrap_or_default().trim();

            if self.options.scrub_popups && href.contains(POPUP_VIEWER_MARKER) {
                if link.select(&IMAGES).next().is_some() {
                    edits.unwrap(link.id());
                } else if is_blank(&link) {
                    edits.remove(link.id());
                }
                continue;
            }

            let Some(url) = self.resolvable(href, target.post_url) else {
                continue;
            };

            if let Some(post_path) = self.internal_post_path(&url) {
                edits.set_attr(link.id(), "href", post_path);
            } else if self.is_media_link(&url) {
                if let Some(canonical) = self.lookup.resolve(target.post_dir, &url) {
                    edits.set_attr(
                        link.id(),
                        "href",
                        format!("{}{canonical}", self.options.media_url_prefix),
                    );
                }
            }
        }
    }

    fn plan_images(&self, doc: &Html, edits: &mut HtmlEdits, target: &RewriteTarget<'_>) {
        for image in doc.select(&IMAGES) {
            let element = image.value();

            let src = element.attr("src").unwrap_or_default().trim();
            if let Some(url) = self.resolvable(src, target.post_url) {
                if let Some(canonical) = self.lookup.resolve(target.post_dir, &url) {
                    edits.set_attr(
                        image.id(),
                        "src",
                        format!("{}{canonical}", self.options.media_url_prefix),
                    );
                }
            }

            let Some(style) = element.attr("style") else {
                continue;
            };
            let Some(caps) = FLOAT_STYLE.captures(style) else {
                continue;
            };

            let align = if caps[1].eq_ignore_ascii_case("left") {
                "alignleft"
            } else {
                "alignright"
            };
            let classes = element.attr("class").unwrap_or_default();
            if !classes.split_whitespace().any(|c| c == align) {
                let merged = format!("{classes} {align}");
                edits.set_attr(image.id(), "class", merged.trim());
            }

            let remaining = FLOAT_STYLE.replace_all(style, "");
            let remaining = remaining.trim().trim_matches(';').trim();
            if remaining.is_empty() {
                edits.remove_attr(image.id(), "style");
            } else {
                edits.set_attr(image.id(), "style", remaining);
            }
        }
    }

    /// Absolute http(s) URL for a reference that has not been rewritten yet.
    fn resolvable(&self, reference: &str, base: &Url) -> Option<Url> {
        if reference.is_empty()
            || reference.starts_with('#')
            || reference.starts_with("data:")
            || reference.starts_with(&self.options.media_url_prefix)
        {
            return None;
        }
        let url = base.join(reference).ok()?;
        matches!(url.scheme(), "http" | "https").then_some(url)
    }

    /// New-site path for a link to another post of this blog.
    fn internal_post_path(&self, url: &Url) -> Option<String> {
        if !self.root.contains(url.as_str()) || self.is_media_link(url) {
            return None;
        }
        let caps = POST_PATH.captures(url.path())?;
        let mut path = format!(
            "{}{}/{}/{}/",
            self.options.post_url_prefix, &caps[1], &caps[2], &caps[3]
        );
        if let Some(fragment) = url.fragment() {
            path.push('#');
            path.push_str(fragment);
        }
        Some(path)
    }

    fn is_media_link(&self, url: &Url) -> bool {
        if url.as_str().contains(&self.options.media_path_marker) {
            return true;
        }
        url.path()
            .rsplit('/')
            .next()
            .and_then(|file| file.rsplit_once('.'))
            .is_some_and(|(_, ext)| MEDIA_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
    }
}

fn plan_stray_cells(doc: &Html, edits: &mut HtmlEdits) {
    for cell in doc.select(&CELLS) {
        if !has_ancestor(&cell, "tr") {
            edits.unwrap(cell.id());
        }
    }
}

fn is_blank(element: &ElementRef) -> bool {
    element.text().all(|t| t.trim().is_empty())
        && !element.children().any(|child| child.value().is_element())
}
