use std::ops::AddAssign;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use url::Url;

use super::assets::AssetResolver;
use super::media::{discover_media, MediaRef};
use super::post_basename;
use crate::config::Config;
use crate::fetch::{FetchEngine, FetchError, FetchMode};
use crate::fs_utils::{existing_download, write_atomic};
use crate::progress::{ProgressEvent, ProgressSender, ProgressStore, ProgressWriter};

/// Counters reported at the end of a download run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DownloadStats {
    pub posts_processed: usize,
    /// Already complete from an earlier run, or gone from the source (404).
    pub posts_skipped: usize,
    pub posts_failed: usize,
    pub media_downloaded: usize,
    pub media_skipped: usize,
    pub media_failed: usize,
}

impl AddAssign for DownloadStats {
    fn add_assign(&mut self, other: Self) {
        self.posts_processed += other.posts_processed;
        self.posts_skipped += other.posts_skipped;
        self.posts_failed += other.posts_failed;
        self.media_downloaded += other.media_downloaded;
        self.media_skipped += other.media_skipped;
        self.media_failed += other.media_failed;
    }
}

/// What happened to one post.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PostOutcome {
    Completed(DownloadStats),
    NotFound,
    Failed,
}

impl PostOutcome {
    /// Whether the permalink can be recorded as done.
    fn is_final(self) -> bool {
        matches!(self, Self::Completed(_) | Self::NotFound)
    }

    fn stats(self) -> DownloadStats {
        match self {
            Self::Completed(stats) => stats,
            Self::NotFound => DownloadStats {
                posts_skipped: 1,
                ..DownloadStats::default()
            },
            Self::Failed => DownloadStats {
                posts_failed: 1,
                ..DownloadStats::default()
            },
        }
    }
}

/// State shared by every post task.
struct PostContext {
    engine: FetchEngine,
    assets: AssetResolver,
    posts_dir: PathBuf,
    media_path_marker: String,
    platform_host_marker: String,
}

/// Bounded worker pool that downloads every post in the backlog.
pub struct Downloader {
    context: Arc<PostContext>,
    progress: ProgressStore,
    semaphore: Arc<Semaphore>,
}

impl Downloader {
    /// Create a downloader from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: &Config) -> Result<Self, FetchError> {
        let engine = FetchEngine::new(config)?;
        let layout = config.layout();
        let assets = AssetResolver::new(engine.clone(), layout.assets_dir());

        Ok(Self {
            context: Arc::new(PostContext {
                engine,
                assets,
                posts_dir: layout.posts_dir(),
                media_path_marker: config.media_path_marker.clone(),
                platform_host_marker: config.platform_host_marker.clone(),
            }),
            progress: ProgressStore::new(layout),
            semaphore: Arc::new(Semaphore::new(config.worker_concurrency)),
        })
    }

    /// Process every permalink not yet recorded as downloaded.
    ///
    /// Cancelling `shutdown` stops new posts from starting; posts already in
    /// flight run to completion and are recorded.
    ///
    /// # Errors
    ///
    /// Returns an error if the backlog is missing or the progress log cannot
    /// be written.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<DownloadStats> {
        let backlog = self.progress.load_backlog().await?;
        let done = self.progress.downloaded().await?;

        tokio::fs::create_dir_all(&self.context.posts_dir)
            .await
            .with_context(|| {
                format!(
                    "Failed to create posts directory: {}",
                    self.context.posts_dir.display()
                )
            })?;

        let mut stats = DownloadStats::default();
        let pending: Vec<(usize, String)> = backlog
            .into_iter()
            .enumerate()
            .filter(|(_, url)| {
                let already = done.contains(url);
                if already {
                    stats.posts_skipped += 1;
                }
                !already
            })
            .collect();

        info!(
            pending = pending.len(),
            already_downloaded = stats.posts_skipped,
            "Starting post downloads"
        );

        let writer = ProgressWriter::start(self.progress.layout());
        let mut handles = Vec::new();

        for (ordinal, url) in pending {
            let permit = tokio::select! {
                permit = self.semaphore.clone().acquire_owned() => permit?,
                () = shutdown.cancelled() => {
                    info!("Shutdown requested, not starting further posts");
                    break;
                }
            };

            let context = Arc::clone(&self.context);
            let sender = writer.sender();

            let handle = tokio::spawn(async move {
                let _permit = permit;
                process_and_record(&context, &sender, ordinal, &url).await
            });
            handles.push(handle);
        }

        for handle in handles {
            match handle.await {
                Ok(outcome) => stats += outcome,
                Err(e) => {
                    error!("Worker task panicked: {e}");
                    stats.posts_failed += 1;
                }
            }
        }

        let recorded = writer.finish().await?;
        debug!(recorded, "Progress writer finished");

        Ok(stats)
    }
}

async fn process_and_record(
    context: &PostContext,
    sender: &ProgressSender,
    ordinal: usize,
    url: &str,
) -> DownloadStats {
    let outcome = match process_post(context, ordinal, url).await {
        Ok(outcome) => outcome,
        Err(e) => {
            error!(url = %url, "Post aborted: {e}");
            PostOutcome::Failed
        }
    };

    if outcome.is_final() {
        if let Err(e) = sender
            .send(ProgressEvent::PostCompleted(url.to_string()))
            .await
        {
            error!(url = %url, "Failed to record post: {e}");
            return PostOutcome::Failed.stats();
        }
    }

    outcome.stats()
}

/// Download one post, its assets, and its media.
///
/// Remote failures are absorbed into the outcome; only local I/O failures
/// propagate.
async fn process_post(
    context: &PostContext,
    ordinal: usize,
    url: &str,
) -> Result<PostOutcome, FetchError> {
    let Ok(page_url) = Url::parse(url) else {
        warn!(url = %url, "Skipping malformed permalink");
        return Ok(PostOutcome::Failed);
    };

    let html = match context.engine.fetch_text(url).await {
        Ok(html) => html,
        Err(e) if e.is_not_found() => {
            warn!(url = %url, "Post not found (404), skipping");
            return Ok(PostOutcome::NotFound);
        }
        Err(e) if e.is_local() => return Err(e),
        Err(e) => {
            error!(url = %url, "Failed to fetch post: {e}");
            return Ok(PostOutcome::Failed);
        }
    };

    let basename = post_basename(url, ordinal);
    let html_path = context.posts_dir.join(format!("{basename}.html"));
    save(&html_path, html.as_bytes()).await?;

    let page = context.assets.resolve(&html, &page_url).await?;
    save(&html_path, page.html.as_bytes()).await?;

    let media = discover_media(
        &page.html,
        &page_url,
        &context.media_path_marker,
        &context.platform_host_marker,
    );

    let mut stats = DownloadStats {
        posts_processed: 1,
        ..DownloadStats::default()
    };

    if !media.is_empty() {
        let media_dir = context.posts_dir.join(&basename);
        tokio::fs::create_dir_all(&media_dir)
            .await
            .map_err(|source| FetchError::Io {
                path: media_dir.clone(),
                source,
            })?;

        for reference in &media {
            let dest = media_dir.join(&reference.filename);
            if existing_download(&dest).await.is_some() {
                stats.media_skipped += 1;
                continue;
            }

            match fetch_media(&context.engine, reference, &dest).await {
                Ok(()) => stats.media_downloaded += 1,
                Err(e) if e.is_local() => return Err(e),
                Err(e) => {
                    warn!(url = %url, media = %reference.url, "All download attempts failed for media: {e}");
                    stats.media_failed += 1;
                }
            }
        }
    }

    debug!(
        url = %url,
        basename = %basename,
        media = media.len(),
        assets = page.resolved,
        failed_assets = page.failed,
        "Post downloaded"
    );

    Ok(PostOutcome::Completed(stats))
}

/// Try the full-size variant without retrying server errors, then the
/// referenced URL with the full retry budget.
async fn fetch_media(engine: &FetchEngine, media: &MediaRef, dest: &Path) -> Result<(), FetchError> {
    if let Some(preferred) = &media.preferred {
        match engine
            .fetch_to_file(preferred.as_str(), dest, FetchMode::FailFast)
            .await
        {
            Ok(_) => return Ok(()),
            Err(e) if e.is_local() => return Err(e),
            Err(e) => debug!(url = %preferred, "Full-size variant failed, falling back: {e}"),
        }
    }

    engine
        .fetch_to_file(media.url.as_str(), dest, FetchMode::Standard)
        .await
        .map(|_| ())
}

async fn save(path: &Path, contents: &[u8]) -> Result<(), FetchError> {
    write_atomic(path, contents)
        .await
        .map_err(|source| FetchError::Io {
            path: path.to_path_buf(),
            source,
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_finality() {
        assert!(PostOutcome::Completed(DownloadStats::default()).is_final());
        assert!(PostOutcome::NotFound.is_final());
        assert!(!PostOutcome::Failed.is_final());
    }

    #[test]
    fn test_stats_accumulate() {
        let mut total = DownloadStats::default();
        total += PostOutcome::NotFound.stats();
        total += PostOutcome::Failed.stats();
        total += DownloadStats {
            posts_processed: 1,
            media_downloaded: 3,
            media_failed: 1,
            ..DownloadStats::default()
        };

        assert_eq!(total.posts_processed, 1);
        assert_eq!(total.posts_skipped, 1);
        assert_eq!(total.posts_failed, 1);
        assert_eq!(total.media_downloaded, 3);
        assert_eq!(total.media_failed, 1);
    }
}
