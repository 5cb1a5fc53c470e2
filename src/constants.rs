//! Shared constants used across the application.

/// User agent string used for archival HTTP requests.
///
/// A realistic browser user agent; legacy blog hosts frequently reject
/// unknown clients.
pub const ARCHIVAL_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Visible text of the anchor the platform puts under every post on a listing page.
pub const PERMALINK_LABEL: &str = "Permalink";

/// Path fragment of the platform's image popup viewer.
pub const POPUP_VIEWER_MARKER: &str = ".shared/image.html";

/// Directory (under the data dir) holding one document per post.
pub const POSTS_DIR: &str = "posts";

/// Directory (under the posts dir) holding site-wide stylesheets, scripts and icons.
pub const ASSETS_DIR: &str = "assets";

/// File extensions treated as downloadable media rather than web pages.
pub const MEDIA_EXTENSIONS: &[&str] = &[
    "jpg", "jpeg", "png", "gif", "webp", "svg", "bmp", "tif", "tiff", "pdf", "doc", "docx", "xls",
    "xlsx", "ppt", "pptx", "mp3", "wav", "mp4", "mov", "zip", "rar",
];
