//! Localize the stylesheets, scripts and icons a post page depends on.
//!
//! Every asset lands in one shared directory next to the post documents, so
//! a theme stylesheet used by a thousand posts is fetched once.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::LazyLock;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use regex::{Captures, Regex};
use scraper::{Html, Selector};
use tracing::{debug, warn};
use url::Url;

use super::asset_filename;
use crate::fetch::{FetchEngine, FetchError, FetchMode};
use crate::fs_utils::{existing_download, write_atomic};
use crate::html::{render_document, HtmlEdits};

/// Imported stylesheets deeper than this are saved but not scanned.
const MAX_STYLESHEET_DEPTH: usize = 3;

static LINK_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("link[href]").expect("Invalid selector"));
static SCRIPT_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("script[src]").expect("Invalid selector"));

static CSS_IMPORT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"@import\s+(?:url\(\s*)?['"]?([^'")\s;]+)['"]?\s*\)?"#)
        .expect("Invalid @import regex")
});
static CSS_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"url\(\s*['"]?([^'")]+?)['"]?\s*\)"#).expect("Invalid url() regex")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AssetKind {
    Stylesheet,
    Script,
    Icon,
}

impl AssetKind {
    fn attr(self) -> &'static str {
        match self {
            Self::Script => "src",
            Self::Stylesheet | Self::Icon => "href",
        }
    }
}

/// A page whose asset references have been localized where possible.
#[derive(Debug, Clone)]
pub struct ResolvedPage {
    pub html: String,
    pub resolved: usize,
    pub failed: usize,
}

/// Downloads page assets into a shared directory and rewrites references.
#[derive(Debug, Clone)]
pub struct AssetResolver {
    engine: FetchEngine,
    assets_dir: PathBuf,
}

impl AssetResolver {
    #[must_use]
    pub fn new(engine: FetchEngine, assets_dir: PathBuf) -> Self {
        Self { engine, assets_dir }
    }

    /// Localize every stylesheet, script and icon referenced by `html`.
    ///
    /// References that cannot be fetched are logged and left pointing at the
    /// original location.
    ///
    /// # Errors
    ///
    /// Returns an error only for local failures (creating the assets
    /// directory or writing a file).
    pub async fn resolve(&self, html: &str, page_url: &Url) -> Result<ResolvedPage, FetchError> {
        tokio::fs::create_dir_all(&self.assets_dir)
            .await
            .map_err(|source| FetchError::Io {
                path: self.assets_dir.clone(),
                source,
            })?;

        let references = discover_references(html);
        let mut local_names: HashMap<String, String> = HashMap::new();
        let mut failed = 0;

        for (kind, reference) in references {
            let Some(target) = resolve_reference(page_url, &reference) else {
                continue;
            };

            let result = match kind {
                AssetKind::Stylesheet => {
                    let mut visited = HashSet::new();
                    self.localize_stylesheet(target.clone(), 0, &mut visited).await
                }
                AssetKind::Script | AssetKind::Icon => self.download_asset(&target).await,
            };

            match result {
                Ok(name) => {
                    local_names.insert(reference, name);
                }
                Err(e) if e.is_local() => return Err(e),
                Err(e) => {
                    warn!(url = %target, "Asset download failed: {e}");
                    failed += 1;
                }
            }
        }

        debug!(
            page = %page_url,
            resolved = local_names.len(),
            failed,
            "Resolved page assets"
        );

        Ok(ResolvedPage {
            html: rewrite_references(html, &local_names),
            resolved: local_names.len(),
            failed,
        })
    }

    /// Fetch a stylesheet, localize what it references, and save it.
    /// Returns the local file name.
    fn localize_stylesheet<'a>(
        &'a self,
        url: Url,
        depth: usize,
        visited: &'a mut HashSet<String>,
    ) -> BoxFuture<'a, Result<String, FetchError>> {
        async move {
            let filename = asset_filename(&url);
            let dest = self.assets_dir.join(&filename);

            if existing_download(&dest).await.is_some() || !visited.insert(url.to_string()) {
                return Ok(filename);
            }

            let css = self.engine.fetch_text(url.as_str()).await?;
            let mut replacements = HashMap::new();

            for (reference, is_import) in css_references(&css) {
                let Some(target) = resolve_reference(&url, &reference) else {
                    continue;
                };

                let result = if is_import && depth < MAX_STYLESHEET_DEPTH {
                    self.localize_stylesheet(target.clone(), depth + 1, visited)
                        .await
                } else {
                    self.download_asset(&target).await
                };

                match result {
                    Ok(name) => {
                        replacements.insert(reference, name);
                    }
                    Err(e) if e.is_local() => return Err(e),
                    Err(e) => warn!(url = %target, stylesheet = %url, "Stylesheet asset failed: {e}"),
                }
            }

            let rewritten = rewrite_css(&css, &replacements);
            write_atomic(&dest, rewritten.as_bytes())
                .await
                .map_err(|source| FetchError::Io {
                    path: dest.clone(),
                    source,
                })?;

            Ok(filename)
        }
        .boxed()
    }

    /// Download an opaque asset. Returns the local file name.
    async fn download_asset(&self, url: &Url) -> Result<String, FetchError> {
        let dest = self.assets_dir.join(asset_filename(url));

        let path = match existing_download(&dest).await {
            Some(path) => path,
            None => {
                self.engine
                    .fetch_to_file(url.as_str(), &dest, FetchMode::Standard)
                    .await?
                    .path
            }
        };

        Ok(path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| asset_filename(url)))
    }
}

/// Resolve a reference against its document, ignoring inline and non-HTTP ones.
fn resolve_reference(base: &Url, reference: &str) -> Option<Url> {
    let reference = reference.trim();
    if reference.is_empty() || reference.starts_with('#') || reference.starts_with("data:") {
        return None;
    }
    base.join(reference)
        .ok()
        .filter(|url| matches!(url.scheme(), "http" | "https"))
}

fn rel_tokens(rel: &str) -> impl Iterator<Item = String> + '_ {
    rel.split_whitespace().map(str::to_ascii_lowercase)
}

fn classify_link(rel: Option<&str>, link_type: Option<&str>) -> Option<AssetKind> {
    let rel = rel.unwrap_or("");
    if rel_tokens(rel).any(|t| t == "stylesheet")
        || link_type.is_some_and(|t| t.eq_ignore_ascii_case("text/css"))
    {
        return Some(AssetKind::Stylesheet);
    }
    if rel_tokens(rel).any(|t| t == "icon" || t == "apple-touch-icon") {
        return Some(AssetKind::Icon);
    }
    None
}

/// Asset references in document order, each listed once.
fn discover_references(html: &str) -> Vec<(AssetKind, String)> {
    let document = Html::parse_document(html);
    let mut seen = HashSet::new();
    let mut references = Vec::new();

    for link in document.select(&LINK_SELECTOR) {
        let element = link.value();
        let Some(kind) = classify_link(element.attr("rel"), element.attr("type")) else {
            continue;
        };
        if let Some(href) = element.attr("href") {
            if seen.insert(href.to_string()) {
                references.push((kind, href.to_string()));
            }
        }
    }

    for script in document.select(&SCRIPT_SELECTOR) {
        if let Some(src) = script.value().attr("src") {
            if seen.insert(src.to_string()) {
                references.push((AssetKind::Script, src.to_string()));
            }
        }
    }

    references
}

/// Point localized references at `assets/<file>`.
fn rewrite_references(html: &str, local_names: &HashMap<String, String>) -> String {
    let document = Html::parse_document(html);
    let mut edits = HtmlEdits::new();

    let links = document.select(&LINK_SELECTOR).filter_map(|link| {
        let element = link.value();
        classify_link(element.attr("rel"), element.attr("type")).map(|kind| (link, kind))
    });
    let scripts = document
        .select(&SCRIPT_SELECTOR)
        .map(|script| (script, AssetKind::Script));

    for (element, kind) in links.chain(scripts) {
        let attr = kind.attr();
        if let Some(name) = element.value().attr(attr).and_then(|v| local_names.get(v)) {
            edits.set_attr(element.id(), attr, format!("{}/{name}", crate::constants::ASSETS_DIR));
        }
    }

    if edits.is_empty() {
        return html.to_string();
    }
    render_document(document, edits)
}

/// `@import` and `url()` references in a stylesheet, flagged when imported.
fn css_references(css: &str) -> Vec<(String, bool)> {
    let mut order = Vec::new();
    let mut imports: HashMap<String, bool> = HashMap::new();

    let found = CSS_IMPORT
        .captures_iter(css)
        .map(|c| (c[1].to_string(), true))
        .chain(CSS_URL.captures_iter(css).map(|c| (c[1].to_string(), false)));

    for (reference, is_import) in found {
        match imports.get_mut(&reference) {
            Some(flag) => *flag |= is_import,
            None => {
                order.push(reference.clone());
                imports.insert(reference, is_import);
            }
        }
    }

    order
        .into_iter()
        .map(|reference| {
            let is_import = imports.get(&reference).copied().unwrap_or(false);
            (reference, is_import)
        })
        .collect()
}

/// Rewrite localized stylesheet references to `./<file>`.
fn rewrite_css(css: &str, replacements: &HashMap<String, String>) -> String {
    if replacements.is_empty() {
        return css.to_string();
    }

    let imported = CSS_IMPORT.replace_all(css, |caps: &Captures| match replacements.get(&caps[1]) {
        Some(name) => format!("@import url(\"./{name}\")"),
        None => caps[0].to_string(),
    });

    CSS_URL
        .replace_all(&imported, |caps: &Captures| match replacements.get(&caps[1]) {
            Some(name) => format!("url(\"./{name}\")"),
            None => caps[0].to_string(),
        })
        .into_owned()
}
