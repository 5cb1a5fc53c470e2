//! HTTP retrieval with bounded retries and file-type resolution.

mod retry;
pub mod sniff;

use std::path::{Path, PathBuf};
use std::time::Duration;

use reqwest::{Client, Response, StatusCode};
use thiserror::Error;
use tracing::debug;

pub use retry::{FetchMode, RetryPolicy};

use crate::config::Config;
use crate::constants::ARCHIVAL_USER_AGENT;
use crate::fs_utils::write_atomic;

/// Why a fetch did not produce a body.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("not found (404): {url}")]
    NotFound { url: String },
    #[error("server error ({status}): {url}")]
    ServerError { url: String, status: u16 },
    #[error("unexpected status ({status}): {url}")]
    UnexpectedStatus { url: String, status: u16 },
    #[error("request failed for {url}: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("gave up after {attempts} attempts: {source}")]
    Exhausted {
        attempts: u32,
        #[source]
        source: Box<FetchError>,
    },
    #[error("failed to write {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
}

impl FetchError {
    /// The resource definitively does not exist.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// A local failure (disk), not a remote one.
    #[must_use]
    pub fn is_local(&self) -> bool {
        matches!(self, Self::Io { .. } | Self::Client(_))
    }
}

/// A body held in memory together with its declared type.
#[derive(Debug, Clone)]
pub struct FetchedBody {
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
}

/// Result of writing a fetched body to disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fetched {
    /// Final path, including any inferred extension.
    pub path: PathBuf,
    pub bytes_written: u64,
}

/// Shared HTTP client plus the retry policy its call sites use.
#[derive(Debug, Clone)]
pub struct FetchEngine {
    client: Client,
    credentials: Option<(String, String)>,
    retry: RetryPolicy,
}

impl FetchEngine {
    /// Build an engine from configuration, using the download retry policy.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(config: &Config) -> Result<Self, FetchError> {
        Self::with_timeout(config, config.request_timeout)
    }

    fn with_timeout(config: &Config, timeout: Duration) -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(ARCHIVAL_USER_AGENT)
            .build()
            .map_err(FetchError::Client)?;

        Ok(Self {
            client,
            credentials: config
                .credentials()
                .map(|(user, pass)| (user.to_string(), pass.to_string())),
            retry: config.fetch_retry,
        })
    }

    /// Same client and credentials, different retry budget.
    #[must_use]
    pub fn with_retry(&self, retry: RetryPolicy) -> Self {
        Self {
            retry,
            ..self.clone()
        }
    }

    /// One request, classified by status.
    async fn send(&self, url: &str) -> Result<Response, FetchError> {
        let mut request = self.client.get(url);
        if let Some((user, pass)) = &self.credentials {
            request = request.basic_auth(user, Some(pass));
        }

        let response = request.send().await.map_err(|source| FetchError::Transport {
            url: url.to_string(),
            source,
        })?;

        let status = response.status();
        debug!(url = %url, status = status.as_u16(), "Received response");

        if status.is_success() {
            Ok(response)
        } else if status == StatusCode::NOT_FOUND {
            Err(FetchError::NotFound {
                url: url.to_string(),
            })
        } else if status.is_server_error() {
            Err(FetchError::ServerError {
                url: url.to_string(),
                status: status.as_u16(),
            })
        } else {
            Err(FetchError::UnexpectedStatus {
                url: url.to_string(),
                status: status.as_u16(),
            })
        }
    }

    /// Fetch a body with retries according to `mode`.
    ///
    /// # Errors
    ///
    /// Returns the classified failure once the retry policy gives up.
    pub async fn fetch_body(&self, url: &str, mode: FetchMode) -> Result<FetchedBody, FetchError> {
        self.retry
            .run(url, |e| mode.is_retriable(e), |_| async {
                let response = self.send(url).await?;
                let content_type = response
                    .headers()
                    .get(reqwest::header::CONTENT_TYPE)
                    .and_then(|v| v.to_str().ok())
                    .map(ToString::to_string);
                let bytes = response
                    .bytes()
                    .await
                    .map_err(|source| FetchError::Transport {
                        url: url.to_string(),
                        source,
                    })?;
                Ok(FetchedBody {
                    bytes: bytes.to_vec(),
                    content_type,
                })
            })
            .await
    }

    /// Fetch a document as text.
    ///
    /// # Errors
    ///
    /// Returns the classified failure once the retry policy gives up.
    pub async fn fetch_text(&self, url: &str) -> Result<String, FetchError> {
        let body = self.fetch_body(url, FetchMode::Standard).await?;
        Ok(String::from_utf8_lossy(&body.bytes).into_owned())
    }

    /// Fetch `url` and write it to `dest`.
    ///
    /// When `dest` has no extension one is inferred from the declared
    /// content type, then from the body's signature; failing both the file is
    /// stored as-is. Callers check for an existing download first.
    ///
    /// # Errors
    ///
    /// Returns the classified network failure, or `Io` if the write fails.
    pub async fn fetch_to_file(
        &self,
        url: &str,
        dest: &Path,
        mode: FetchMode,
    ) -> Result<Fetched, FetchError> {
        let body = self.fetch_body(url, mode).await?;
        let path = resolve_destination(dest, body.content_type.as_deref(), &body.bytes);

        write_atomic(&path, &body.bytes)
            .await
            .map_err(|source| FetchError::Io {
                path: path.clone(),
                source,
            })?;

        debug!(url = %url, path = %path.display(), bytes = body.bytes.len(), "Saved download");

        Ok(Fetched {
            path,
            bytes_written: body.bytes.len() as u64,
        })
    }
}

/// Apply the extension cascade: declared type, then signature, then nothing.
#[must_use]
pub fn resolve_destination(dest: &Path, content_type: Option<&str>, body: &[u8]) -> PathBuf {
    if dest.extension().is_some() {
        return dest.to_path_buf();
    }

    let extension = content_type
        .and_then(sniff::extension_for_content_type)
        .or_else(|| sniff::sniff_extension(body));

    match (extension, dest.file_name()) {
        (Some(ext), Some(name)) => {
            let mut name = name.to_os_string();
            name.push(ext);
            dest.with_file_name(name)
        }
        _ => dest.to_path_buf(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_beats_signature() {
        let path = resolve_destination(Path::new("/m/abc"), Some("image/png"), b"GIF89a\0\0\0\0");
        assert_eq!(path, PathBuf::from("/m/abc.png"));
    }

    #[test]
    fn test_signature_when_header_unknown() {
        let path = resolve_destination(
            Path::new("/m/abc"),
            Some("application/octet-stream"),
            b"GIF89a\0\0\0\0",
        );
        assert_eq!(path, PathBuf::from("/m/abc.gif"));
    }

    #[test]
    fn test_existing_extension_kept() {
        let path = resolve_destination(Path::new("/m/photo.jpeg"), Some("image/png"), b"");
        assert_eq!(path, PathBuf::from("/m/photo.jpeg"));
    }

    #[test]
    fn test_unresolved_stays_bare() {
        let path = resolve_destination(Path::new("/m/blob"), None, b"just some text here");
        assert_eq!(path, PathBuf::from("/m/blob"));
    }

    #[test]
    fn test_error_classification() {
        let not_found = FetchError::NotFound {
            url: "u".to_string(),
        };
        assert!(not_found.is_not_found());
        assert!(!not_found.is_local());

        let io = FetchError::Io {
            path: PathBuf::from("/x"),
            source: std::io::Error::other("disk full"),
        };
        assert!(io.is_local());
    }
}
