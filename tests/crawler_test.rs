//! Integration tests for the listing crawler.

use std::path::Path;

use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use typepad_archiver::config::Config;
use typepad_archiver::crawler::Crawler;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn test_config(server: &MockServer, data_dir: &Path) -> Config {
    Config::for_testing(format!("{}/blog/", server.uri()), data_dir)
}

/// A listing page with two marked permalinks and, optionally, a pager link.
fn listing_page(page: u32, next_target: Option<u32>) -> String {
    let pager = next_target.map_or_else(String::new, |target| {
        format!(
            r#"<div class="pager-inner"><span class="pager-right"><a href="/blog/page/{target}/">Next &raquo;</a></span></div>"#
        )
    });
    format!(
        r#"<html><body>
        <div class="entry"><h3>Post {page}a</h3><a href="/blog/2020/{page:02}/post-{page}a.html">Permalink</a></div>
        <div class="entry"><h3>Post {page}b</h3><a href="/blog/2020/{page:02}/post-{page}b.html">Permalink</a></div>
        {pager}
        </body></html>"#
    )
}

async fn mount_page(server: &MockServer, page: u32, body: String, times: u64) {
    Mock::given(method("GET"))
        .and(path(format!("/blog/page/{page}/")))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .expect(times)
        .mount(server)
        .await;
}

async fn mount_missing(server: &MockServer, page: u32, times: u64) {
    Mock::given(method("GET"))
        .and(path(format!("/blog/page/{page}/")))
        .respond_with(ResponseTemplate::new(404))
        .expect(times)
        .mount(server)
        .await;
}

fn read_lines(path: &Path) -> Vec<String> {
    std::fs::read_to_string(path)
        .unwrap_or_default()
        .lines()
        .map(ToString::to_string)
        .collect()
}

#[tokio::test]
async fn test_crawl_stops_at_first_missing_page() {
    let server = MockServer::start().await;
    let temp_dir = TempDir::new().unwrap();
    let config = test_config(&server, temp_dir.path());

    for page in 1..=3 {
        mount_page(&server, page, listing_page(page, Some(page + 1)), 1).await;
    }
    mount_missing(&server, 4, 1).await;

    let crawler = Crawler::new(&config).unwrap();
    let summary = crawler.run(CancellationToken::new()).await.unwrap();

    assert!(summary.completed);
    assert_eq!(summary.pages_scanned, 3);
    assert_eq!(summary.permalinks_found, 6);

    let layout = config.layout();
    let permalinks = read_lines(&layout.permalinks_file());
    assert_eq!(permalinks.len(), 6);
    assert_eq!(permalinks[0], format!("{}/blog/2020/01/post-1a.html", server.uri()));
    assert_eq!(permalinks[5], format!("{}/blog/2020/03/post-3b.html", server.uri()));
    assert_eq!(read_lines(&layout.scanned_file()), ["1", "2", "3"]);
    assert_eq!(read_lines(&layout.crawl_complete_file()), ["3"]);
    assert!(layout.raw_pages_dir().join("page_2.html").exists());
}

#[tokio::test]
async fn test_completed_crawl_makes_no_requests() {
    let server = MockServer::start().await;
    let temp_dir = TempDir::new().unwrap();
    let config = test_config(&server, temp_dir.path());

    mount_page(&server, 1, listing_page(1, Some(2)), 1).await;
    mount_page(&server, 2, listing_page(2, None), 1).await;

    Crawler::new(&config)
        .unwrap()
        .run(CancellationToken::new())
        .await
        .unwrap();

    server.reset().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let summary = Crawler::new(&config)
        .unwrap()
        .run(CancellationToken::new())
        .await
        .unwrap();

    assert!(summary.completed);
    assert_eq!(summary.pages_scanned, 0);
    assert_eq!(read_lines(&config.layout().permalinks_file()).len(), 4);
}

#[tokio::test]
async fn test_resume_skips_scanned_pages() {
    let server = MockServer::start().await;
    let temp_dir = TempDir::new().unwrap();
    let config = test_config(&server, temp_dir.path());
    let layout = config.layout();

    std::fs::write(layout.scanned_file(), "1\n2\nnot-a-page\n").unwrap();
    std::fs::write(
        layout.permalinks_file(),
        format!("{}/blog/2020/01/post-1a.html\n", server.uri()),
    )
    .unwrap();

    mount_page(&server, 1, listing_page(1, Some(2)), 0).await;
    mount_page(&server, 2, listing_page(2, Some(3)), 0).await;
    mount_page(&server, 3, listing_page(3, Some(4)), 1).await;
    mount_missing(&server, 4, 1).await;

    let summary = Crawler::new(&config)
        .unwrap()
        .run(CancellationToken::new())
        .await
        .unwrap();

    assert!(summary.completed);
    assert_eq!(summary.pages_resumed, 2);
    assert_eq!(summary.pages_scanned, 1);
    assert_eq!(read_lines(&layout.permalinks_file()).len(), 3);
}

#[tokio::test]
async fn test_next_link_to_wrong_page_stops_crawl() {
    let server = MockServer::start().await;
    let temp_dir = TempDir::new().unwrap();
    let config = test_config(&server, temp_dir.path());

    mount_page(&server, 1, listing_page(1, Some(5)), 1).await;
    mount_page(&server, 2, listing_page(2, Some(3)), 0).await;
    mount_page(&server, 5, listing_page(5, None), 0).await;

    let summary = Crawler::new(&config)
        .unwrap()
        .run(CancellationToken::new())
        .await
        .unwrap();

    assert!(summary.completed);
    assert_eq!(summary.pages_scanned, 1);
    assert_eq!(read_lines(&config.layout().crawl_complete_file()), ["1"]);
}

#[tokio::test]
async fn test_fallback_extracts_dated_links() {
    let server = MockServer::start().await;
    let temp_dir = TempDir::new().unwrap();
    let config = test_config(&server, temp_dir.path());

    let body = r#"<html><body>
        <h3><a href="/blog/2019/05/first-entry.html">First entry</a></h3>
        <p><a href="/blog/2019/04/second-entry.html">Continue reading</a></p>
        <a href="/blog/about.html">About</a>
        </body></html>"#;
    mount_page(&server, 1, body.to_string(), 1).await;

    let summary = Crawler::new(&config)
        .unwrap()
        .run(CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(summary.permalinks_found, 2);
    assert_eq!(
        read_lines(&config.layout().permalinks_file()),
        [
            format!("{}/blog/2019/05/first-entry.html", server.uri()),
            format!("{}/blog/2019/04/second-entry.html", server.uri()),
        ]
    );
}

#[tokio::test]
async fn test_server_errors_skip_page_after_retries() {
    let server = MockServer::start().await;
    let temp_dir = TempDir::new().unwrap();
    let config = test_config(&server, temp_dir.path());

    Mock::given(method("GET"))
        .and(path("/blog/page/1/"))
        .respond_with(ResponseTemplate::new(503))
        .expect(u64::from(config.page_retry.max_attempts))
        .mount(&server)
        .await;
    mount_page(&server, 2, listing_page(2, None), 1).await;

    let summary = Crawler::new(&config)
        .unwrap()
        .run(CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(summary.pages_skipped, 1);
    assert_eq!(summary.pages_scanned, 1);
    assert!(!summary.completed);
    assert_eq!(read_lines(&config.layout().scanned_file()), ["2"]);
    assert!(!config.layout().crawl_complete_file().exists());
}

#[tokio::test]
async fn test_skipped_page_retried_on_next_run() {
    let server = MockServer::start().await;
    let temp_dir = TempDir::new().unwrap();
    let config = test_config(&server, temp_dir.path());
    let layout = config.layout();

    mount_page(&server, 1, listing_page(1, Some(2)), 1).await;
    Mock::given(method("GET"))
        .and(path("/blog/page/2/"))
        .respond_with(ResponseTemplate::new(503))
        .expect(u64::from(config.page_retry.max_attempts))
        .mount(&server)
        .await;
    mount_missing(&server, 3, 1).await;

    let first = Crawler::new(&config)
        .unwrap()
        .run(CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(first.pages_skipped, 1);
    assert!(!first.completed);
    assert!(!layout.crawl_complete_file().exists());
    assert_eq!(read_lines(&layout.permalinks_file()).len(), 2);

    // Page 2 recovers; page 1 is not fetched again.
    server.reset().await;
    mount_page(&server, 1, listing_page(1, Some(2)), 0).await;
    mount_page(&server, 2, listing_page(2, Some(3)), 1).await;
    mount_missing(&server, 3, 1).await;

    let second = Crawler::new(&config)
        .unwrap()
        .run(CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(second.pages_resumed, 1);
    assert_eq!(second.pages_scanned, 1);
    assert_eq!(second.pages_skipped, 0);
    assert!(second.completed);
    assert_eq!(read_lines(&layout.crawl_complete_file()), ["2"]);

    let permalinks = read_lines(&layout.permalinks_file());
    assert_eq!(permalinks.len(), 4);
    assert!(permalinks.iter().any(|l| l.ends_with("/blog/2020/02/post-2a.html")));
    let mut scanned = read_lines(&layout.scanned_file());
    scanned.sort();
    assert_eq!(scanned, ["1", "2"]);
}

#[tokio::test]
async fn test_cancelled_crawl_fetches_nothing() {
    let server = MockServer::start().await;
    let temp_dir = TempDir::new().unwrap();
    let config = test_config(&server, temp_dir.path());

    mount_page(&server, 1, listing_page(1, Some(2)), 0).await;

    let shutdown = CancellationToken::new();
    shutdown.cancel();
    let summary = Crawler::new(&config).unwrap().run(shutdown).await.unwrap();

    assert!(!summary.completed);
    assert!(!config.layout().crawl_complete_file().exists());
}
