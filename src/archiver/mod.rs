use std::sync::LazyLock;

use regex::Regex;
use sha2::{Digest, Sha256};
use url::Url;

pub mod assets;
pub mod media;
pub mod worker;

pub use assets::AssetResolver;
pub use worker::{DownloadStats, Downloader};

static DATE_SEGMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/(\d{4})/(\d{2})/").expect("Invalid date segment regex"));

static UNSAFE_ASSET_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^\w\-.]").expect("Invalid asset filename regex"));

/// Sanitize a filename so it is safe on disk and in URLs.
///
/// Anything outside `[A-Za-z0-9_.-]` becomes an underscore, runs of
/// underscores collapse, and the stem is capped at 200 bytes. The extension is
/// preserved.
///
/// # Examples
///
/// ```
/// # use typepad_archiver::archiver::sanitize_filename;
/// assert_eq!(sanitize_filename("My Photo #1.jpg"), "My_Photo_1.jpg");
/// assert_eq!(sanitize_filename("2020_01_0003_x_a.jpg"), "2020_01_0003_x_a.jpg");
/// ```
#[must_use]
pub fn sanitize_filename(filename: &str) -> String {
    let (name, ext) = match filename.rfind('.') {
        Some(dot_pos) if dot_pos > 0 => filename.split_at(dot_pos),
        _ => (filename, ""),
    };

    let clean = |s: &str| -> String {
        s.chars()
            .map(|c| match c {
                '-' | '_' | '.' => c,
                c if c.is_ascii_alphanumeric() => c,
                _ => '_',
            })
            .collect()
    };

    let sanitized_name = clean(name)
        .split('_')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("_");

    const MAX_NAME_LENGTH: usize = 200;
    let truncated_name = if sanitized_name.len() > MAX_NAME_LENGTH {
        &sanitized_name[..MAX_NAME_LENGTH]
    } else {
        &sanitized_name
    };

    format!("{truncated_name}{}", clean(ext))
}

/// Deterministic base name for a post, from its URL and backlog ordinal.
///
/// `https://x/blog/2020/01/hello.html` at ordinal 3 becomes
/// `2020_01_0003_hello`; URLs without a `/YYYY/MM/` segment become
/// `0003_hello`.
#[must_use]
pub fn post_basename(url: &str, ordinal: usize) -> String {
    let path = Url::parse(url).map_or_else(|_| url.to_string(), |u| u.path().to_string());

    let last = path.trim_end_matches('/').rsplit('/').next().unwrap_or("");
    let slug = last.rsplit_once('.').map_or(last, |(stem, _)| stem);
    let slug = sanitize_filename(if slug.is_empty() { "post" } else { slug });

    match DATE_SEGMENT.captures(&path) {
        Some(caps) => format!("{}_{}_{ordinal:04}_{slug}", &caps[1], &caps[2]),
        None => format!("{ordinal:04}_{slug}"),
    }
}

/// Local name for a media reference: its last path segment, or
/// `media_<index>` when the path has none.
#[must_use]
pub fn media_filename(url: &Url, index: usize) -> String {
    let last = url
        .path_segments()
        .and_then(|mut segments| segments.next_back())
        .unwrap_or("");
    if last.is_empty() {
        format!("media_{index}")
    } else {
        sanitize_filename(last)
    }
}

/// Local name for a shared asset such as a stylesheet or script.
///
/// Uses the last path segment (or the last two, or the host, when the path
/// ends in `/`), adds an 8-hex-digit digest of the query string, and replaces
/// anything outside `[A-Za-z0-9_.-]`.
#[must_use]
pub fn asset_filename(url: &Url) -> String {
    let parts: Vec<&str> = url
        .path_segments()
        .map(|segments| segments.filter(|s| !s.is_empty()).collect())
        .unwrap_or_default();

    let mut filename = if url.path().ends_with('/') || parts.is_empty() {
        match parts.len() {
            0 => url.host_str().unwrap_or("asset").replace('.', "_"),
            1 => parts[0].to_string(),
            n => parts[n - 2..].join("_"),
        }
    } else {
        parts[parts.len() - 1].to_string()
    };

    if let Some(query) = url.query().filter(|q| !q.is_empty()) {
        let digest = &hex::encode(Sha256::digest(query.as_bytes()))[..8];
        filename = match filename.rfind('.') {
            Some(dot) if dot > 0 => format!("{}_{digest}{}", &filename[..dot], &filename[dot..]),
            _ => format!("{filename}_{digest}"),
        };
    }

    UNSAFE_ASSET_CHARS.replace_all(&filename, "_").into_owned()
}
