mod common;

use common::{FakeBrowser, ScriptedPage};
use site_backup::{BackupConfig, BackupOrchestrator, FetchOutcome, ResourceKind};
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;
use url::Url;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

fn test_config(root: &Path) -> BackupConfig {
    BackupConfig {
        mirror_root: root.join("www"),
        staging_dir: root.join("staging"),
        throttle: Duration::from_millis(0),
        fetch_timeout: Duration::from_millis(300),
        navigation_timeout: Duration::from_millis(500),
        ..BackupConfig::default()
    }
}

/// Every file under `root`, relative and sorted.
fn mirror_files(root: &Path) -> Vec<String> {
    fn walk(dir: &Path, root: &Path, out: &mut Vec<String>) {
        for entry in fs::read_dir(dir).unwrap() {
            let path = entry.unwrap().path();
            if path.is_dir() {
                walk(&path, root, out);
            } else {
                out.push(path.strip_prefix(root).unwrap().to_string_lossy().replace('\\', "/"));
            }
        }
    }
    let mut files = Vec::new();
    walk(root, root, &mut files);
    files.sort();
    files
}

fn single_page_site(site: &Url) -> FakeBrowser {
    let photo = site.join("/img/photo.jpg").unwrap();
    let html = format!(
        r#"<html><body><article><a class="download" href="{}">Download</a></article></body></html>"#,
        photo
    );
    FakeBrowser::new(vec![(
        site.to_string(),
        ScriptedPage::document(site.as_str(), &html)
            .with_anchors("article a.download", &[photo.as_str()]),
    )])
}

#[tokio::test]
async fn test_single_page_with_one_image() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/img/photo.jpg"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"jpeg bytes".to_vec()))
        .expect(1)
        .mount(&server)
        .await;

    let temp_dir = tempdir().unwrap();
    let config = test_config(temp_dir.path());
    let site = Url::parse(&server.uri()).unwrap();
    let browser = single_page_site(&site);

    let orchestrator = BackupOrchestrator::new(config.clone(), site.clone());
    let report = orchestrator.run(browser.clone()).await.unwrap();

    assert_eq!(report.total_failures(), 0);
    assert!(report.is_complete());
    assert_eq!(mirror_files(&config.mirror_root), vec!["img/photo.jpg", "index.html"]);
    assert_eq!(fs::read(config.mirror_root.join("img/photo.jpg")).unwrap(), b"jpeg bytes");
    assert_eq!(report.capture.captured, 1);
    assert_eq!(report.registry.downloaded, 1);

    assert_eq!(
        browser.visited(),
        vec![
            site.to_string(),
            site.join("/index2.html").unwrap().to_string(),
            site.join("/data/proofs/").unwrap().to_string(),
        ]
    );
    server.verify().await;
}

#[tokio::test]
async fn test_rerun_against_complete_mirror_fetches_nothing() {
    let server = MockServer::start().await;
    let temp_dir = tempdir().unwrap();
    let config = test_config(temp_dir.path());
    let site = Url::parse(&server.uri()).unwrap();

    {
        let _guard = Mock::given(method("GET"))
            .and(path("/img/photo.jpg"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"jpeg bytes".to_vec()))
            .expect(1)
            .mount_as_scoped(&server)
            .await;

        let first = BackupOrchestrator::new(config.clone(), site.clone())
            .run(single_page_site(&site))
            .await
            .unwrap();
        assert!(first.is_complete());
    }

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"changed".to_vec()))
        .expect(0)
        .mount(&server)
        .await;

    let orchestrator = BackupOrchestrator::new(config.clone(), site.clone());
    let second = orchestrator.run(single_page_site(&site)).await.unwrap();

    assert_eq!(second.total_failures(), 0);
    assert_eq!(second.registry.downloaded, 0);
    assert_eq!(second.registry.skipped, 1);
    assert_eq!(fs::read(config.mirror_root.join("img/photo.jpg")).unwrap(), b"jpeg bytes");
    server.verify().await;
}

/// Stalls past the fetch timeout for the first `slow_calls` requests.
struct SlowThenFast {
    calls: AtomicUsize,
    slow_calls: usize,
}

impl Respond for SlowThenFast {
    fn respond(&self, _request: &Request) -> ResponseTemplate {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        let template = ResponseTemplate::new(200).set_body_bytes(b"proof".to_vec());
        if call < self.slow_calls {
            template.set_delay(Duration::from_secs(2))
        } else {
            template
        }
    }
}

#[tokio::test]
async fn test_timeouts_then_success_and_persistent_failure() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/data/proofs/eventually.png"))
        .respond_with(SlowThenFast {
            calls: AtomicUsize::new(0),
            slow_calls: 2,
        })
        .expect(3)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/data/proofs/never.png"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
        .expect(3)
        .mount(&server)
        .await;

    let temp_dir = tempdir().unwrap();
    let config = test_config(temp_dir.path());
    let site = Url::parse(&server.uri()).unwrap();

    let proofs_url = site.join("/data/proofs/").unwrap();
    let eventually = site.join("/data/proofs/eventually.png").unwrap();
    let never = site.join("/data/proofs/never.png").unwrap();
    let browser = FakeBrowser::new(vec![(
        proofs_url.to_string(),
        ScriptedPage::document(proofs_url.as_str(), "<html>proofs</html>").with_anchors(
            "a",
            &[
                eventually.as_str(),
                never.as_str(),
                site.join("/index.html").unwrap().as_str(),
                site.join("/data/").unwrap().as_str(),
            ],
        ),
    )]);

    let orchestrator = BackupOrchestrator::new(config.clone(), site.clone());
    let report = orchestrator.run(browser).await.unwrap();

    assert_eq!(report.total_failures(), 1);
    assert!(!report.is_complete());
    assert_eq!(
        report.summary_line(),
        "1 file failed to download. Run the backup again to retry it."
    );
    assert_eq!(fs::read(config.mirror_root.join("data/proofs/eventually.png")).unwrap(), b"proof");
    assert!(!config.mirror_root.join("data/proofs/never.png").exists());
    assert_eq!(orchestrator.registry().outcome(never.as_str()), Some(FetchOutcome::Failed));
    server.verify().await;
}

#[tokio::test]
async fn test_location_links_rewritten_in_captured_documents() {
    let temp_dir = tempdir().unwrap();
    let config = test_config(temp_dir.path());
    let site = Url::parse("https://site.example/").unwrap();

    let html = concat!(
        r#"<nav><li onclick="location.href='https://site.example/foo?x=1#y'">Foo</li></nav>"#,
        r#"<script src="https://site.example/js/app.js"></script>"#,
        r#"<script src="https://cdn.example/lib/jquery.js"></script>"#,
    );
    let browser = FakeBrowser::new(vec![(
        site.to_string(),
        ScriptedPage::document(site.as_str(), html)
            .with_load("https://site.example/js/app.js", ResourceKind::Script, b"app()")
            .with_load("https://cdn.example/lib/jquery.js", ResourceKind::Script, b"jquery()"),
    )]);

    let report = BackupOrchestrator::new(config.clone(), site.clone())
        .run(browser)
        .await
        .unwrap();
    assert!(report.is_complete());

    let saved = fs::read_to_string(config.mirror_root.join("index.html")).unwrap();
    assert_eq!(
        saved,
        concat!(
            r#"<nav><li onclick="location.href='/foo?x=1#y'">Foo</li></nav>"#,
            r#"<script src="/js/app.js"></script>"#,
            r#"<script src="/cdn.example/lib/jquery.js"></script>"#,
        )
    );
    // Each rewritten script reference points at where the script was stored.
    assert_eq!(fs::read(config.mirror_root.join("js/app.js")).unwrap(), b"app()");
    assert_eq!(
        fs::read(config.mirror_root.join("cdn.example/lib/jquery.js")).unwrap(),
        b"jquery()"
    );
}

#[tokio::test]
async fn test_rewritten_scripts_resolve_when_mirroring_another_site() {
    let temp_dir = tempdir().unwrap();
    let config = BackupConfig {
        mirror_root: temp_dir.path().join("www"),
        staging_dir: temp_dir.path().join("staging"),
        ..BackupConfig::default()
    };
    let site = Url::parse("https://mirror.example/").unwrap();
    let default_site = Url::parse(&site_backup::config::default_site()).unwrap();
    let canonical_script = default_site.join("/js/shared.js").unwrap();

    let html = format!(
        r#"<script src="https://mirror.example/js/app.js"></script><script src="{}"></script>"#,
        canonical_script
    );
    let browser = FakeBrowser::new(vec![(
        site.to_string(),
        ScriptedPage::document(site.as_str(), &html)
            .with_load("https://mirror.example/js/app.js", ResourceKind::Script, b"app()")
            .with_load(canonical_script.as_str(), ResourceKind::Script, b"shared()"),
    )]);

    let report = BackupOrchestrator::new(config.clone(), site.clone())
        .run(browser)
        .await
        .unwrap();
    assert!(report.is_complete());

    let canonical_host = default_site.host_str().unwrap();
    let saved = fs::read_to_string(config.mirror_root.join("index.html")).unwrap();
    assert_eq!(
        saved,
        format!(
            r#"<script src="/js/app.js"></script><script src="/{}/js/shared.js"></script>"#,
            canonical_host
        )
    );
    assert_eq!(fs::read(config.mirror_root.join("js/app.js")).unwrap(), b"app()");
    assert!(!config.mirror_root.join("mirror.example").exists());
    assert_eq!(
        fs::read(config.mirror_root.join(canonical_host).join("js/shared.js")).unwrap(),
        b"shared()"
    );
}

#[tokio::test]
async fn test_media_bucket_requests_are_aborted() {
    let server = MockServer::start().await;
    let temp_dir = tempdir().unwrap();
    let config = test_config(temp_dir.path());
    let site = Url::parse(&server.uri()).unwrap();

    let video = site.join("/data/media/huge.mp4").unwrap();
    let logo = site.join("/img/logo.png").unwrap();
    let browser = FakeBrowser::new(vec![(
        site.to_string(),
        ScriptedPage::document(site.as_str(), "<html></html>")
            .with_load(video.as_str(), ResourceKind::Media, b"video")
            .with_load(logo.as_str(), ResourceKind::Image, b"logo"),
    )]);

    let report = BackupOrchestrator::new(config.clone(), site.clone())
        .run(browser.clone())
        .await
        .unwrap();

    assert!(report.is_complete());
    assert_eq!(browser.aborted(), vec![video.to_string()]);
    assert_eq!(report.capture.aborted, 1);
    assert_eq!(mirror_files(&config.mirror_root), vec!["img/logo.png", "index.html"]);
}

#[tokio::test]
async fn test_custom_request_filter() {
    let server = MockServer::start().await;
    let temp_dir = tempdir().unwrap();
    let config = test_config(temp_dir.path());
    let site = Url::parse(&server.uri()).unwrap();

    let browser = FakeBrowser::new(vec![(
        site.to_string(),
        ScriptedPage::document(site.as_str(), "<html></html>")
            .with_load("https://ads.example/track.js", ResourceKind::Script, b"track()")
            .with_load(
                site.join("/data/media/ok.png").unwrap().as_str(),
                ResourceKind::Image,
                b"png",
            ),
    )]);

    let filter = |url: &Url| url.host_str() == Some("ads.example");
    let report = BackupOrchestrator::new(config.clone(), site.clone())
        .with_request_filter(Arc::new(filter))
        .run(browser.clone())
        .await
        .unwrap();

    assert!(report.is_complete());
    assert_eq!(browser.aborted(), vec!["https://ads.example/track.js".to_string()]);
    assert!(config.mirror_root.join("data/media/ok.png").exists());
}

#[tokio::test]
async fn test_captured_resources_are_not_downloaded_again() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"from network".to_vec()))
        .expect(0)
        .mount(&server)
        .await;

    let temp_dir = tempdir().unwrap();
    let config = test_config(temp_dir.path());
    let site = Url::parse(&server.uri()).unwrap();

    let image = site.join("/img/inline.png").unwrap();
    let browser = FakeBrowser::new(vec![(
        site.to_string(),
        ScriptedPage::document(site.as_str(), "<html></html>")
            .with_load(image.as_str(), ResourceKind::Image, b"from browser")
            .with_anchors("article a.download", &[image.as_str(), image.as_str()]),
    )]);

    let orchestrator = BackupOrchestrator::new(config.clone(), site.clone());
    let report = orchestrator.run(browser).await.unwrap();

    assert!(report.is_complete());
    assert_eq!(fs::read(config.mirror_root.join("img/inline.png")).unwrap(), b"from browser");
    assert_eq!(
        orchestrator.registry().outcome(image.as_str()),
        Some(FetchOutcome::CapturedViaBrowser)
    );
    server.verify().await;
}

#[tokio::test]
async fn test_navigation_timeout_is_local_to_the_page() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/img/after.jpg"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"after".to_vec()))
        .expect(1)
        .mount(&server)
        .await;

    let temp_dir = tempdir().unwrap();
    let config = test_config(temp_dir.path());
    let site = Url::parse(&server.uri()).unwrap();

    let listing = site.join("/index2.html").unwrap();
    let after = site.join("/img/after.jpg").unwrap();
    let mut stuck = ScriptedPage::document(site.as_str(), "<html>partial</html>");
    stuck.hang = true;
    let browser = FakeBrowser::new(vec![
        (site.to_string(), stuck),
        (
            listing.to_string(),
            ScriptedPage::document(listing.as_str(), "<html>listing</html>")
                .with_anchors("article a.download", &[after.as_str()]),
        ),
    ]);

    let report = BackupOrchestrator::new(config.clone(), site.clone())
        .run(browser)
        .await
        .unwrap();

    assert!(report.sessions[0].navigation_error.is_some());
    assert!(report.sessions[1].navigation_error.is_none());
    assert_eq!(report.total_failures(), 1);
    assert_eq!(
        report.summary_line(),
        "1 page failed to load. Run the backup again to retry it."
    );
    // What loaded before the timeout is kept, and later pages still run.
    assert!(config.mirror_root.join("index.html").exists());
    assert_eq!(fs::read(config.mirror_root.join("img/after.jpg")).unwrap(), b"after");
    server.verify().await;
}
