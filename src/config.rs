use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;
use url::Url;

use crate::fetch::RetryPolicy;

/// The platform's per-post footer line.
const DEFAULT_BOILERPLATE_SIGNATURES: &str = "Permalink|Comments|TrackBack";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    #[error("invalid value for {name}: {message}")]
    InvalidValue { name: String, message: String },
    #[error("failed to parse {name} as integer: {source}")]
    ParseInt {
        name: String,
        #[source]
        source: std::num::ParseIntError,
    },
    #[error("failed to parse {name} as boolean: {value}")]
    ParseBool { name: String, value: String },
}

/// Which nearest-neighbour structure the media deduplicator uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DedupIndexKind {
    /// Full scan over every accepted fingerprint.
    Linear,
    /// Block-partitioned Hamming index.
    Bucketed,
}

/// Application configuration loaded from environment variables.
///
/// Built once at startup and handed to every component by value or reference.
#[derive(Debug, Clone)]
pub struct Config {
    // Source
    pub blog_url: String,
    pub username: Option<String>,
    pub password: Option<String>,

    // Storage
    pub data_dir: PathBuf,

    // Crawl
    pub page_retry: RetryPolicy,
    pub page_delay: Duration,

    // Downloads
    pub worker_concurrency: usize,
    pub fetch_retry: RetryPolicy,
    pub request_timeout: Duration,
    /// Substring identifying links into the platform's media storage.
    pub media_path_marker: String,
    /// Substring identifying images served by the platform itself.
    pub platform_host_marker: String,

    // Media dedup
    pub hash_difference_threshold: u32,
    pub dedup_index: DedupIndexKind,

    // Rewriting
    /// A paragraph containing every substring of any signature is dropped.
    pub boilerplate_signatures: Vec<Vec<String>>,
    pub scrub_popups: bool,
    pub unwrap_divs: bool,
    pub collapse_line_breaks: bool,
    pub media_url_prefix: String,
    pub post_url_prefix: String,

    // Export
    pub blog_title: String,
    pub default_author: String,
    pub max_posts_per_file: usize,
}

impl Config {
    /// Configuration with defaults for everything except the source URL and
    /// the data directory.
    #[must_use]
    pub fn new(blog_url: impl Into<String>, data_dir: impl Into<PathBuf>) -> Self {
        Self {
            blog_url: blog_url.into(),
            username: None,
            password: None,
            data_dir: data_dir.into(),
            page_retry: RetryPolicy::new(5, Duration::from_secs(30)),
            page_delay: Duration::from_millis(500),
            worker_concurrency: 8,
            fetch_retry: RetryPolicy::new(3, Duration::from_secs(5)),
            request_timeout: Duration::from_secs(20),
            media_path_marker: ".typepad.com/.a/".to_string(),
            platform_host_marker: ".typepad.com/".to_string(),
            hash_difference_threshold: 2,
            dedup_index: DedupIndexKind::Linear,
            boilerplate_signatures: parse_signatures(DEFAULT_BOILERPLATE_SIGNATURES),
            scrub_popups: true,
            unwrap_divs: false,
            collapse_line_breaks: false,
            media_url_prefix: "/wp-content/uploads/typepad_media/".to_string(),
            post_url_prefix: "/".to_string(),
            blog_title: "Archived Typepad Blog".to_string(),
            default_author: "admin".to_string(),
            max_posts_per_file: 0,
        }
    }

    /// Configuration for tests: tiny retry delays, no politeness delay.
    #[must_use]
    pub fn for_testing(blog_url: impl Into<String>, data_dir: impl Into<PathBuf>) -> Self {
        Self {
            page_retry: RetryPolicy::new(3, Duration::from_millis(10)),
            page_delay: Duration::ZERO,
            worker_concurrency: 2,
            fetch_retry: RetryPolicy::new(3, Duration::from_millis(10)),
            request_timeout: Duration::from_secs(5),
            ..Self::new(blog_url, data_dir)
        }
    }

    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if required environment variables are missing or invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::new(
            required_env("BLOG_URL")?,
            PathBuf::from(env_or_default("DATA_DIR", ".")),
        );

        Ok(Self {
            username: optional_env("BASIC_AUTH_USERNAME"),
            password: optional_env("BASIC_AUTH_PASSWORD"),

            page_retry: RetryPolicy::new(
                parse_env_u32("PAGE_MAX_RETRIES", defaults.page_retry.max_attempts)?,
                Duration::from_secs(parse_env_u64("PAGE_RETRY_DELAY_SECS", 30)?),
            ),
            page_delay: Duration::from_millis(parse_env_u64("PAGE_DELAY_MS", 500)?),

            worker_concurrency: parse_env_usize("WORKER_CONCURRENCY", defaults.worker_concurrency)?,
            fetch_retry: RetryPolicy::new(
                parse_env_u32("FETCH_MAX_RETRIES", defaults.fetch_retry.max_attempts)?,
                Duration::from_secs(parse_env_u64("FETCH_RETRY_DELAY_SECS", 5)?),
            ),
            request_timeout: Duration::from_secs(parse_env_u64("REQUEST_TIMEOUT_SECS", 20)?),
            media_path_marker: env_or_default("MEDIA_PATH_MARKER", &defaults.media_path_marker),
            platform_host_marker: env_or_default(
                "PLATFORM_HOST_MARKER",
                &defaults.platform_host_marker,
            ),

            hash_difference_threshold: parse_env_u32(
                "HASH_DIFFERENCE_THRESHOLD",
                defaults.hash_difference_threshold,
            )?,
            dedup_index: parse_dedup_index(&env_or_default("DEDUP_INDEX", "linear"))?,

            boilerplate_signatures: std::env::var("BOILERPLATE_SIGNATURES")
                .map_or_else(|_| defaults.boilerplate_signatures.clone(), |v| parse_signatures(&v)),
            scrub_popups: parse_env_bool("SCRUB_POPUPS", defaults.scrub_popups)?,
            unwrap_divs: parse_env_bool("UNWRAP_DIVS", defaults.unwrap_divs)?,
            collapse_line_breaks: parse_env_bool(
                "COLLAPSE_LINE_BREAKS",
                defaults.collapse_line_breaks,
            )?,
            media_url_prefix: env_or_default("MEDIA_URL_PREFIX", &defaults.media_url_prefix),
            post_url_prefix: env_or_default("POST_URL_PREFIX", &defaults.post_url_prefix),

            blog_title: env_or_default("BLOG_TITLE", &defaults.blog_title),
            default_author: env_or_default("DEFAULT_AUTHOR", &defaults.default_author),
            max_posts_per_file: parse_env_usize("MAX_POSTS_PER_FILE", 0)?,

            ..defaults
        })
    }

    /// Validate that the configuration is usable.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.worker_concurrency == 0 {
            return Err(ConfigError::InvalidValue {
                name: "WORKER_CONCURRENCY".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if self.page_retry.max_attempts == 0 || self.fetch_retry.max_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                name: "MAX_RETRIES".to_string(),
                message: "retry budgets must allow at least 1 attempt".to_string(),
            });
        }
        if self.username.is_some() != self.password.is_some() {
            return Err(ConfigError::InvalidValue {
                name: "BASIC_AUTH_USERNAME".to_string(),
                message: "username and password must be set together".to_string(),
            });
        }
        self.blog_root()?;
        Ok(())
    }

    /// Derive the listing root from `blog_url`.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL has no scheme or host.
    pub fn blog_root(&self) -> Result<BlogRoot, ConfigError> {
        BlogRoot::parse(&self.blog_url)
    }

    /// Basic credentials, if both halves are configured.
    #[must_use]
    pub fn credentials(&self) -> Option<(&str, &str)> {
        match (self.username.as_deref(), self.password.as_deref()) {
            (Some(user), Some(pass)) => Some((user, pass)),
            _ => None,
        }
    }

    #[must_use]
    pub fn layout(&self) -> ArchiveLayout {
        ArchiveLayout::new(&self.data_dir)
    }
}

/// The blog being archived: `{scheme}://{host}/{name}/`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlogRoot {
    pub name: String,
    /// Root prefix every permalink must start with (ends with `/`).
    pub prefix: Url,
}

impl BlogRoot {
    /// Parse a blog URL such as `https://example.typepad.com/myblog/`.
    ///
    /// The blog name is the first path segment, or the first host label when
    /// the path is empty.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL cannot be parsed or lacks a host.
    pub fn parse(blog_url: &str) -> Result<Self, ConfigError> {
        let invalid = |message: &str| ConfigError::InvalidValue {
            name: "BLOG_URL".to_string(),
            message: message.to_string(),
        };

        let parsed = Url::parse(blog_url)
            .map_err(|e| invalid(&format!("{e}; include the scheme, e.g. https://")))?;
        let host = parsed
            .host_str()
            .ok_or_else(|| invalid("URL has no host"))?;
        if parsed.scheme() != "http" && parsed.scheme() != "https" {
            return Err(invalid("scheme must be http or https"));
        }

        let name = parsed
            .path_segments()
            .and_then(|mut segments| segments.find(|s| !s.is_empty()))
            .map(ToString::to_string)
            .or_else(|| host.split('.').next().map(ToString::to_string))
            .ok_or_else(|| invalid("cannot derive blog name"))?;

        let authority = match parsed.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        };
        let prefix = Url::parse(&format!("{}://{authority}/{name}/", parsed.scheme()))
            .map_err(|e| invalid(&e.to_string()))?;

        Ok(Self { name, prefix })
    }

    /// URL of a listing page.
    #[must_use]
    pub fn page_url(&self, page: u32) -> String {
        format!("{}page/{page}/", self.prefix)
    }

    /// Whether `url` lives under this blog.
    #[must_use]
    pub fn contains(&self, url: &str) -> bool {
        url.starts_with(self.prefix.as_str())
    }
}

/// On-disk layout rooted at the data directory.
#[derive(Debug, Clone)]
pub struct ArchiveLayout {
    pub root: PathBuf,
}

impl ArchiveLayout {
    #[must_use]
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }

    #[must_use]
    pub fn permalinks_file(&self) -> PathBuf {
        self.root.join("permalinks.txt")
    }

    #[must_use]
    pub fn scanned_file(&self) -> PathBuf {
        self.root.join("scanned.txt")
    }

    #[must_use]
    pub fn downloaded_file(&self) -> PathBuf {
        self.root.join("downloaded_permalinks.txt")
    }

    #[must_use]
    pub fn crawl_complete_file(&self) -> PathBuf {
        self.root.join("crawl_complete.txt")
    }

    #[must_use]
    pub fn raw_pages_dir(&self) -> PathBuf {
        self.root.join("raw-paged-data")
    }

    #[must_use]
    pub fn posts_dir(&self) -> PathBuf {
        self.root.join(crate::constants::POSTS_DIR)
    }

    #[must_use]
    pub fn assets_dir(&self) -> PathBuf {
        self.posts_dir().join(crate::constants::ASSETS_DIR)
    }

    #[must_use]
    pub fn export_dir(&self) -> PathBuf {
        self.root.join("wordpress_export")
    }

    #[must_use]
    pub fn media_store_dir(&self) -> PathBuf {
        self.export_dir().join("typepad_media")
    }

    #[must_use]
    pub fn file_map(&self) -> PathBuf {
        self.export_dir().join("file_map.json")
    }
}

fn required_env(name: &str) -> Result<String, ConfigError> {
    std::env::var(name).map_err(|_| ConfigError::MissingEnvVar(name.to_string()))
}

fn optional_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|s| !s.is_empty())
}

fn env_or_default(name: &str, default: &str) -> String {
    std::env::var(name)
        .ok()
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn parse_env_u64(name: &str, default: u64) -> Result<u64, ConfigError> {
    match std::env::var(name) {
        Ok(val) if !val.is_empty() => val.parse().map_err(|e| ConfigError::ParseInt {
            name: name.to_string(),
            source: e,
        }),
        _ => Ok(default),
    }
}

fn parse_env_u32(name: &str, default: u32) -> Result<u32, ConfigError> {
    match std::env::var(name) {
        Ok(val) if !val.is_empty() => val.parse().map_err(|e| ConfigError::ParseInt {
            name: name.to_string(),
            source: e,
        }),
        _ => Ok(default),
    }
}

fn parse_env_usize(name: &str, default: usize) -> Result<usize, ConfigError> {
    match std::env::var(name) {
        Ok(val) if !val.is_empty() => val.parse().map_err(|e| ConfigError::ParseInt {
            name: name.to_string(),
            source: e,
        }),
        _ => Ok(default),
    }
}

fn parse_env_bool(name: &str, default: bool) -> Result<bool, ConfigError> {
    match std::env::var(name) {
        Ok(val) if !val.is_empty() => match val.to_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Ok(true),
            "false" | "0" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::ParseBool {
                name: name.to_string(),
                value: val,
            }),
        },
        _ => Ok(default),
    }
}

/// `a|b;c|d` is two signatures, each a set of substrings.
fn parse_signatures(value: &str) -> Vec<Vec<String>> {
    value
        .split(';')
        .map(|signature| {
            signature
                .split('|')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(ToString::to_string)
                .collect::<Vec<_>>()
        })
        .filter(|signature| !signature.is_empty())
        .collect()
}

fn parse_dedup_index(value: &str) -> Result<DedupIndexKind, ConfigError> {
    match value.to_lowercase().as_str() {
        "linear" => Ok(DedupIndexKind::Linear),
        "bucketed" => Ok(DedupIndexKind::Bucketed),
        _ => Err(ConfigError::InvalidValue {
            name: "DEDUP_INDEX".to_string(),
            message: format!("must be 'linear' or 'bucketed', got '{value}'"),
        }),
    }
}
