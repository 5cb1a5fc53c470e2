//! Durable, line-oriented progress logs that make every stage resumable.
//!
//! Each log is append-only and written only after its unit of work has fully
//! succeeded. The crawler appends directly (it is sequential); concurrent
//! download workers hand completion events to a single [`ProgressWriter`]
//! task instead of sharing a file handle.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::config::ArchiveLayout;

#[derive(Debug, Error)]
pub enum ProgressError {
    #[error("permalink file not found: {} (run the crawl stage first)", path.display())]
    BacklogMissing { path: PathBuf },
    #[error("progress log I/O failed for {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("progress writer stopped before all events were written")]
    WriterClosed,
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> ProgressError + '_ {
    move |source| ProgressError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Read/append access to the progress logs under one data directory.
#[derive(Debug, Clone)]
pub struct ProgressStore {
    layout: ArchiveLayout,
}

impl ProgressStore {
    #[must_use]
    pub fn new(layout: ArchiveLayout) -> Self {
        Self { layout }
    }

    #[must_use]
    pub fn layout(&self) -> &ArchiveLayout {
        &self.layout
    }

    /// Page numbers already scanned. Unparseable lines are skipped with a warning.
    ///
    /// # Errors
    ///
    /// Returns an error if the log exists but cannot be read.
    pub async fn scanned_pages(&self) -> Result<HashSet<u32>, ProgressError> {
        let path = self.layout.scanned_file();
        let mut pages = HashSet::new();

        for line in read_lines(&path).await? {
            match line.parse::<u32>() {
                Ok(page) => {
                    pages.insert(page);
                }
                Err(_) => warn!(path = %path.display(), line = %line, "Could not parse scanned page"),
            }
        }

        Ok(pages)
    }

    /// The post backlog, deduplicated in first-seen order.
    ///
    /// # Errors
    ///
    /// Returns [`ProgressError::BacklogMissing`] if the crawl never produced one.
    pub async fn load_backlog(&self) -> Result<Vec<String>, ProgressError> {
        let path = self.layout.permalinks_file();
        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Err(ProgressError::BacklogMissing { path });
        }

        let raw = read_lines(&path).await?;
        let total = raw.len();
        let mut seen = HashSet::with_capacity(total);
        let unique: Vec<String> = raw.into_iter().filter(|url| seen.insert(url.clone())).collect();

        debug!(total, unique = unique.len(), "Loaded permalink backlog");
        Ok(unique)
    }

    /// Permalinks whose posts have been fully processed.
    ///
    /// # Errors
    ///
    /// Returns an error if the log exists but cannot be read.
    pub async fn downloaded(&self) -> Result<HashSet<String>, ProgressError> {
        Ok(read_lines(&self.layout.downloaded_file())
            .await?
            .into_iter()
            .collect())
    }

    /// Final listing page, if a previous crawl ran to the end.
    ///
    /// # Errors
    ///
    /// Returns an error if the marker exists but cannot be read.
    pub async fn crawl_completed_at(&self) -> Result<Option<u32>, ProgressError> {
        Ok(read_lines(&self.layout.crawl_complete_file())
            .await?
            .first()
            .and_then(|line| line.parse().ok()))
    }

    /// Record that the listing ended at `page`.
    ///
    /// # Errors
    ///
    /// Returns an error if the marker cannot be written.
    pub async fn mark_crawl_complete(&self, page: u32) -> Result<(), ProgressError> {
        let path = self.layout.crawl_complete_file();
        tokio::fs::write(&path, format!("{page}\n"))
            .await
            .map_err(io_error(&path))
    }

    /// Append newly found permalinks to the backlog.
    ///
    /// # Errors
    ///
    /// Returns an error if the backlog cannot be appended to.
    pub async fn append_permalinks(&self, links: &[String]) -> Result<(), ProgressError> {
        append_lines(&self.layout.permalinks_file(), links).await
    }

    /// Record that `page` has been scanned and its permalinks saved.
    ///
    /// # Errors
    ///
    /// Returns an error if the log cannot be appended to.
    pub async fn mark_page_scanned(&self, page: u32) -> Result<(), ProgressError> {
        append_lines(&self.layout.scanned_file(), &[page.to_string()]).await
    }
}

/// A unit of download work that finished and must be remembered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    PostCompleted(String),
}

/// Cloneable handle workers use to report completions.
#[derive(Debug, Clone)]
pub struct ProgressSender {
    tx: mpsc::Sender<ProgressEvent>,
}

impl ProgressSender {
    /// Queue an event for the writer.
    ///
    /// # Errors
    ///
    /// Returns [`ProgressError::WriterClosed`] if the writer task has stopped.
    pub async fn send(&self, event: ProgressEvent) -> Result<(), ProgressError> {
        self.tx
            .send(event)
            .await
            .map_err(|_| ProgressError::WriterClosed)
    }
}

/// The single task that owns the downloaded-permalinks log.
pub struct ProgressWriter {
    sender: ProgressSender,
    handle: JoinHandle<Result<usize, ProgressError>>,
}

impl ProgressWriter {
    /// Spawn the writer task appending to the downloaded log.
    #[must_use]
    pub fn start(layout: &ArchiveLayout) -> Self {
        let path = layout.downloaded_file();
        let (tx, mut rx) = mpsc::channel::<ProgressEvent>(256);

        let handle = tokio::spawn(async move {
            let mut written = 0usize;
            while let Some(event) = rx.recv().await {
                match event {
                    ProgressEvent::PostCompleted(url) => {
                        if let Err(e) = append_lines(&path, &[url]).await {
                            error!("Failed to record completed post: {e}");
                            return Err(e);
                        }
                        written += 1;
                    }
                }
            }
            Ok(written)
        });

        Self {
            sender: ProgressSender { tx },
            handle,
        }
    }

    #[must_use]
    pub fn sender(&self) -> ProgressSender {
        self.sender.clone()
    }

    /// Close the channel and wait for every queued event to be written.
    ///
    /// All [`ProgressSender`] clones must be dropped first, or this waits forever.
    ///
    /// # Errors
    ///
    /// Returns the writer's I/O error, if it hit one.
    pub async fn finish(self) -> Result<usize, ProgressError> {
        drop(self.sender);
        self.handle
            .await
            .map_err(|_| ProgressError::WriterClosed)?
    }
}

async fn read_lines(path: &Path) -> Result<Vec<String>, ProgressError> {
    match tokio::fs::read_to_string(path).await {
        Ok(contents) => Ok(contents
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(ToString::to_string)
            .collect()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(source) => Err(ProgressError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

async fn append_lines(path: &Path, lines: &[String]) -> Result<(), ProgressError> {
    if lines.is_empty() {
        return Ok(());
    }

    let mut buffer = String::new();
    for line in lines {
        buffer.push_str(line);
        buffer.push('\n');
    }

    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
        .map_err(io_error(path))?;
    file.write_all(buffer.as_bytes())
        .await
        .map_err(io_error(path))?;
    file.flush().await.map_err(io_error(path))
}
