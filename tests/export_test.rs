//! End-to-end tests for rewriting and WXR export of archived posts.

use std::path::Path;

use tempfile::TempDir;
use typepad_archiver::config::Config;
use typepad_archiver::dedup::CanonicalMapping;
use typepad_archiver::export::WxrExporter;

const POST_A: &str = r#"<html><head>
<link rel="canonical" href="https://x.typepad.com/blog/2020/01/a.html">
</head><body>
<h2 class="date-header">January 05, 2020</h2>
<div class="entry-author-ron">
<h3 class="entry-header">Fish &amp; Chips</h3>
<div class="entry-body">
<p><a href="https://x.typepad.com/.shared/image.html?/photos/uncategorized/a.png"><img src="https://x.typepad.com/.a/6a00aa-500wi" style="float:left"></a></p>
<p>See <a href="https://x.typepad.com/blog/2020/01/b.html">B</a> and <a href="https://x.typepad.com/.a/report.pdf">the report</a>.</p>
<p>Permalink | Comments (0) | TrackBack (0)</p>
</div></div>
</body></html>"#;

const POST_B: &str = r#"<html><head>
<link rel="canonical" href="https://x.typepad.com/blog/2020/01/b.html">
</head><body>
<h3 class="entry-header">Second</h3>
<div class="entry-body"><p><img src="copy.png"></p><p><abbr title="a]]>b">ab</abbr></p></div>
</body></html>"#;

fn write(root: &Path, relative: &str, contents: &str) {
    let path = root.join(relative);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, contents).unwrap();
}

fn setup(root: &Path) {
    write(root, "posts/2020_01_0000_a.html", POST_A);
    write(root, "posts/2020_01_0001_b.html", POST_B);
    write(root, "posts/2020_02_0002_c.html", "<html><body><h3>No body</h3></body></html>");

    let mapping: CanonicalMapping = [
        ("posts/2020_01_0000_a/6a00aa-500wi.png", "2020_01_0000_a_6a00aa-500wi.png"),
        ("posts/2020_01_0000_a/report.pdf", "2020_01_0000_a_report.pdf"),
        ("posts/2020_01_0001_b/copy.png", "2020_01_0000_a_6a00aa-500wi.png"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect();
    write(
        root,
        "wordpress_export/file_map.json",
        &serde_json::to_string_pretty(&mapping).unwrap(),
    );
}

#[tokio::test]
async fn test_export_rewrites_posts() {
    let temp_dir = TempDir::new().unwrap();
    setup(temp_dir.path());
    let config = Config {
        blog_title: "Fish Blog".to_string(),
        ..Config::for_testing("https://x.typepad.com/blog/", temp_dir.path())
    };

    let summary = WxrExporter::new(&config).run().await.unwrap();
    assert_eq!(summary.posts, 2);
    assert_eq!(summary.files.len(), 1);

    let xml = std::fs::read_to_string(config.layout().export_dir().join("import.xml")).unwrap();

    assert!(xml.contains("<title>Fish Blog</title>"));
    assert!(xml.contains("<title>Fish &amp; Chips</title>"));
    assert!(xml.contains("<dc:creator><![CDATA[ron]]></dc:creator>"));
    assert!(xml.contains("<pubDate>Sun, 05 Jan 2020 00:00:00 +0000</pubDate>"));
    assert!(xml.contains("<wp:post_name><![CDATA[a]]></wp:post_name>"));

    // Popup link scrubbed, image mapped and aligned.
    assert!(!xml.contains(".shared/image.html"));
    assert!(xml.contains(r#"src="/wp-content/uploads/typepad_media/2020_01_0000_a_6a00aa-500wi.png""#));
    assert!(xml.contains(r#"class="alignleft""#));
    assert!(!xml.contains("float:left"));

    // Internal and media links.
    assert!(xml.contains(r#"href="/2020/01/b/""#));
    assert!(xml.contains(r#"href="/wp-content/uploads/typepad_media/2020_01_0000_a_report.pdf""#));
    assert!(!xml.contains("TrackBack"));

    // The duplicate in post B points at post A's copy.
    let post_b = &xml[xml.find("<title>Second</title>").unwrap()..];
    assert!(post_b.contains(r#"<img src="/wp-content/uploads/typepad_media/2020_01_0000_a_6a00aa-500wi.png">"#));
    assert!(post_b.contains(r#"title="a]]]]><![CDATA[>b""#));

    // Posts are numbered in file-name order.
    let a_pos = xml.find("<wp:post_id>1</wp:post_id>").unwrap();
    let b_pos = xml.find("<wp:post_id>2</wp:post_id>").unwrap();
    assert!(a_pos < xml.find("<title>Second</title>").unwrap());
    assert!(a_pos < b_pos);
}

#[tokio::test]
async fn test_export_splits_into_parts() {
    let temp_dir = TempDir::new().unwrap();
    setup(temp_dir.path());
    let config = Config {
        max_posts_per_file: 1,
        ..Config::for_testing("https://x.typepad.com/blog/", temp_dir.path())
    };

    let summary = WxrExporter::new(&config).run().await.unwrap();

    let export_dir = config.layout().export_dir();
    assert_eq!(
        summary.files,
        [
            export_dir.join("import-part-1.xml"),
            export_dir.join("import-part-2.xml"),
        ]
    );
    let part_two = std::fs::read_to_string(&summary.files[1]).unwrap();
    assert!(part_two.contains("<title>Second</title>"));
    assert!(!part_two.contains("Fish &amp; Chips"));
    assert!(!export_dir.join("import.xml").exists());
}

#[tokio::test]
async fn test_export_requires_file_map() {
    let temp_dir = TempDir::new().unwrap();
    write(temp_dir.path(), "posts/2020_01_0000_a.html", POST_A);
    let config = Config::for_testing("https://x.typepad.com/blog/", temp_dir.path());

    let err = WxrExporter::new(&config).run().await.unwrap_err();
    assert!(format!("{err:#}").contains("file_map.json"));
}
