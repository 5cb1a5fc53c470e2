use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use typepad_archiver::archiver::Downloader;
use typepad_archiver::config::Config;
use typepad_archiver::crawler::Crawler;
use typepad_archiver::dedup::MediaDeduplicator;
use typepad_archiver::export::WxrExporter;

/// Pipeline stage selected on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Crawl,
    Download,
    Media,
    Export,
    All,
}

impl Stage {
    fn parse(arg: Option<&str>) -> Result<Self> {
        match arg.map(str::to_lowercase).as_deref() {
            None | Some("all") => Ok(Self::All),
            Some("crawl") => Ok(Self::Crawl),
            Some("download") => Ok(Self::Download),
            Some("media") => Ok(Self::Media),
            Some("export") => Ok(Self::Export),
            Some(other) => anyhow::bail!(
                "Unknown stage '{other}'. Usage: typepad-archiver [crawl|download|media|export|all]"
            ),
        }
    }

    fn includes(self, stage: Self) -> bool {
        self == Self::All || self == stage
    }
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("Fatal error: {e:#}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    init_tracing()?;

    let arg = std::env::args().nth(1);
    let stage = Stage::parse(arg.as_deref())?;

    let config = Config::from_env().context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;

    info!(
        blog_url = %config.blog_url,
        data_dir = %config.data_dir.display(),
        ?stage,
        "Starting typepad-archiver"
    );

    tokio::fs::create_dir_all(&config.data_dir)
        .await
        .with_context(|| {
            format!(
                "Failed to create data directory: {}",
                config.data_dir.display()
            )
        })?;

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("Shutdown signal received, finishing in-flight work");
        signal_token.cancel();
    });

    if stage.includes(Stage::Crawl) {
        let crawler = Crawler::new(&config).context("Failed to initialize crawler")?;
        let summary = crawler.run(shutdown.clone()).await?;
        info!(
            pages_scanned = summary.pages_scanned,
            pages_resumed = summary.pages_resumed,
            pages_skipped = summary.pages_skipped,
            permalinks_found = summary.permalinks_found,
            completed = summary.completed,
            "Crawl finished"
        );
        if !summary.completed {
            warn!("Listing not fully crawled; rerun to continue");
        }
    }

    if shutdown.is_cancelled() {
        return Ok(());
    }

    if stage.includes(Stage::Download) {
        let downloader = Downloader::new(&config).context("Failed to initialize downloader")?;
        let stats = downloader.run(shutdown.clone()).await?;
        info!(
            posts_processed = stats.posts_processed,
            posts_skipped = stats.posts_skipped,
            posts_failed = stats.posts_failed,
            media_downloaded = stats.media_downloaded,
            media_skipped = stats.media_skipped,
            media_failed = stats.media_failed,
            "Download finished"
        );
        if stats.posts_failed > 0 {
            warn!(failed = stats.posts_failed, "Some posts failed; rerun to retry them");
        }
    }

    if shutdown.is_cancelled() {
        return Ok(());
    }

    if stage.includes(Stage::Media) {
        let (_, summary) = MediaDeduplicator::new(&config).run().await?;
        info!(
            files = summary.files,
            stored = summary.stored,
            duplicates = summary.duplicates,
            unreadable = summary.unreadable,
            "Media stage finished"
        );
    }

    if stage.includes(Stage::Export) {
        let summary = WxrExporter::new(&config).run().await?;
        info!(
            posts = summary.posts,
            files = summary.files.len(),
            "Export finished"
        );
    }

    info!("Done");
    Ok(())
}

fn init_tracing() -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,typepad_archiver=debug"));

    // Check if JSON logging is requested
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| matches!(v.to_lowercase().as_str(), "json" | "structured"))
        .unwrap_or(false);

    if use_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
            .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {e}"))?;
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .try_init()
            .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {e}"))?;
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
