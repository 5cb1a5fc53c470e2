//! Sequential walk over the blog's paginated listing.

pub mod link_extractor;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::{BlogRoot, Config};
use crate::fetch::FetchEngine;
use crate::fs_utils::write_atomic;
use crate::progress::ProgressStore;

pub use link_extractor::{scan_listing, ListingScan};

/// Give up after this many listing pages in a row fail without a 404.
const MAX_CONSECUTIVE_SKIPS: u32 = 25;

/// Result of fetching and scanning one listing page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageOutcome {
    /// The page does not exist: end of the listing.
    Stop,
    /// The page could not be retrieved; move on to the next one.
    Skip,
    /// The page was scanned.
    Continue(ListingScan),
}

/// Totals for one crawl run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CrawlSummary {
    pub pages_scanned: u32,
    pub pages_resumed: u32,
    pub pages_skipped: u32,
    pub permalinks_found: usize,
    /// The listing was walked to its end (now or in an earlier run).
    pub completed: bool,
}

/// Walks listing pages and records the permalinks they contain.
pub struct Crawler {
    engine: FetchEngine,
    root: BlogRoot,
    progress: ProgressStore,
    raw_pages_dir: PathBuf,
    page_delay: Duration,
}

impl Crawler {
    /// Create a crawler from configuration. Listing pages use the page retry
    /// budget rather than the download one.
    ///
    /// # Errors
    ///
    /// Returns an error if the blog URL is invalid or the HTTP client cannot
    /// be built.
    pub fn new(config: &Config) -> Result<Self> {
        let root = config.blog_root()?;
        let engine = FetchEngine::new(config)?.with_retry(config.page_retry);
        let layout = config.layout();

        Ok(Self {
            engine,
            root,
            raw_pages_dir: layout.raw_pages_dir(),
            progress: ProgressStore::new(layout),
            page_delay: config.page_delay,
        })
    }

    /// Fetch listing page `page` and classify the result.
    ///
    /// Not-found ends the listing; retriable failures that exhaust the budget
    /// and unexpected statuses skip the page.
    ///
    /// # Errors
    ///
    /// Returns an error only if the raw page cannot be saved.
    pub async fn scan(&self, page: u32) -> Result<PageOutcome> {
        let url = self.root.page_url(page);
        debug!(page, url = %url, "Fetching listing page");

        let html = match self.engine.fetch_text(&url).await {
            Ok(html) => html,
            Err(e) if e.is_not_found() => {
                info!(page, "Listing page not found (404), assuming end of blog");
                return Ok(PageOutcome::Stop);
            }
            Err(e) if e.is_local() => return Err(e.into()),
            Err(e) => {
                warn!(page, "Skipping listing page: {e}");
                return Ok(PageOutcome::Skip);
            }
        };

        let raw_path = self.raw_pages_dir.join(format!("page_{page}.html"));
        write_atomic(&raw_path, html.as_bytes())
            .await
            .with_context(|| format!("Failed to save listing page: {}", raw_path.display()))?;

        let page_url = Url::parse(&url).context("Listing page URL is invalid")?;
        Ok(PageOutcome::Continue(scan_listing(&html, &page_url, &self.root, page)))
    }

    /// Walk the listing from page 1, skipping pages already scanned.
    ///
    /// # Errors
    ///
    /// Returns an error if the progress logs cannot be read or written.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<CrawlSummary> {
        let mut summary = CrawlSummary::default();

        if let Some(last_page) = self.progress.crawl_completed_at().await? {
            info!(last_page, "Listing already fully crawled, nothing to fetch");
            summary.completed = true;
            return Ok(summary);
        }

        tokio::fs::create_dir_all(&self.raw_pages_dir)
            .await
            .with_context(|| {
                format!(
                    "Failed to create raw page directory: {}",
                    self.raw_pages_dir.display()
                )
            })?;

        let scanned = self.progress.scanned_pages().await?;
        if !scanned.is_empty() {
            info!(pages = scanned.len(), "Resuming crawl");
        }

        let mut page: u32 = 1;
        let mut fetched_any = false;
        let mut consecutive_skips = 0;

        loop {
            if scanned.contains(&page) {
                summary.pages_resumed += 1;
                page += 1;
                continue;
            }

            if fetched_any {
                tokio::select! {
                    () = tokio::time::sleep(self.page_delay) => {}
                    () = shutdown.cancelled() => {
                        info!(page, "Shutdown requested, stopping crawl");
                        break;
                    }
                }
            } else if shutdown.is_cancelled() {
                break;
            }
            fetched_any = true;

            match self.scan(page).await? {
                PageOutcome::Stop => {
                    self.conclude(page.saturating_sub(1), &mut summary).await?;
                    break;
                }
                PageOutcome::Skip => {
                    summary.pages_skipped += 1;
                    consecutive_skips += 1;
                    if consecutive_skips >= MAX_CONSECUTIVE_SKIPS {
                        warn!(
                            page,
                            consecutive_skips, "Too many listing pages failed in a row, stopping crawl"
                        );
                        break;
                    }
                    page += 1;
                }
                PageOutcome::Continue(scan) => {
                    consecutive_skips = 0;
                    self.progress.append_permalinks(&scan.links).await?;
                    self.progress.mark_page_scanned(page).await?;
                    summary.pages_scanned += 1;
                    summary.permalinks_found += scan.links.len();
                    debug!(page, found = scan.links.len(), "Scanned listing page");

                    if !scan.has_next {
                        info!(page, "No valid next link, concluding crawl");
                        self.conclude(page, &mut summary).await?;
                        break;
                    }
                    page += 1;
                }
            }
        }

        Ok(summary)
    }

    /// Mark the crawl complete at `last_page`, unless a page before it was
    /// skipped this run. Without the marker the next run retries the gaps.
    async fn conclude(&self, last_page: u32, summary: &mut CrawlSummary) -> Result<()> {
        if summary.pages_skipped > 0 {
            warn!(
                last_page,
                skipped = summary.pages_skipped,
                "Listing ended with skipped pages, leaving crawl open for the next run"
            );
            return Ok(());
        }
        self.progress.mark_crawl_complete(last_page).await?;
        summary.completed = true;
        Ok(())
    }
}
