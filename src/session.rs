use regex::Regex;
use std::fmt;
use std::sync::OnceLock;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::browser::BrowserPage;
use crate::config::BackupConfig;
use crate::downloader::{ConcurrentDownloader, LinkSet};
use crate::error::MirrorError;

/// Which anchors an entry page contributes to the download batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkSelection {
    /// Download buttons inside article content.
    DownloadAnchors,
    /// Every anchor pointing at a file that does not look like a page.
    ProofLinks,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Navigating,
    Extracting,
    Downloading,
    Done,
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionPhase::Navigating => "navigating",
            SessionPhase::Extracting => "extracting",
            SessionPhase::Downloading => "downloading",
            SessionPhase::Done => "done",
        };
        f.write_str(name)
    }
}

#[derive(Debug)]
pub struct SessionReport {
    pub url: String,
    pub navigation_error: Option<MirrorError>,
    pub links: usize,
    pub failed_downloads: usize,
}

impl SessionReport {
    /// Failed downloads, plus one if the page itself did not load.
    pub fn failure_count(&self) -> usize {
        self.failed_downloads + usize::from(self.navigation_error.is_some())
    }
}

fn proof_extension() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\.([a-z0-9]{3,6})$").expect("valid proof extension pattern")
    })
}

/// Whether `href` ends in a 3-6 character extension that is not `htm*`.
pub fn is_proof_link(href: &str) -> bool {
    proof_extension()
        .captures(href)
        .and_then(|caps| caps.get(1))
        .map(|ext| !ext.as_str().starts_with("htm"))
        .unwrap_or(false)
}

/// Drives one entry page through navigation, link extraction and download.
///
/// Capturing happens alongside navigation on the page's event listener task;
/// the session only waits for the page to settle.
pub struct CrawlSession<'a, P: BrowserPage> {
    page: &'a P,
    downloader: &'a ConcurrentDownloader,
    config: &'a BackupConfig,
}

impl<'a, P: BrowserPage> CrawlSession<'a, P> {
    pub fn new(
        page: &'a P,
        downloader: &'a ConcurrentDownloader,
        config: &'a BackupConfig,
    ) -> Self {
        Self {
            page,
            downloader,
            config,
        }
    }

    pub async fn run(&self, url: &str, selection: LinkSelection) -> SessionReport {
        debug!(%url, phase = %SessionPhase::Navigating);
        let navigation_error = self.navigate(url).await.err();
        if let Some(err) = &navigation_error {
            warn!("{}", err);
        }

        debug!(%url, phase = %SessionPhase::Extracting);
        let links = self.extract_links(selection).await;
        info!("Found {} links on {}", links.len(), url);

        debug!(%url, phase = %SessionPhase::Downloading);
        let link_count = links.len();
        let failed_downloads = self.downloader.download_all(links).await;

        debug!(%url, phase = %SessionPhase::Done, failed_downloads);
        SessionReport {
            url: url.to_string(),
            navigation_error,
            links: link_count,
            failed_downloads,
        }
    }

    async fn navigate(&self, url: &str) -> Result<(), MirrorError> {
        match timeout(self.config.navigation_timeout, self.page.goto(url)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(MirrorError::Navigation {
                url: url.to_string(),
                reason: format!("{:#}", e),
            }),
            Err(_) => Err(MirrorError::NavigationTimeout {
                url: url.to_string(),
                timeout_ms: self.config.navigation_timeout.as_millis(),
            }),
        }
    }

    async fn extract_links(&self, selection: LinkSelection) -> LinkSet {
        let selector = match selection {
            LinkSelection::DownloadAnchors => self.config.download_selector.as_str(),
            LinkSelection::ProofLinks => "a",
        };

        let hrefs = match self.page.query_hrefs(selector).await {
            Ok(hrefs) => hrefs,
            Err(e) => {
                warn!("Failed to query '{}': {:#}", selector, e);
                return LinkSet::default();
            }
        };

        hrefs
            .into_iter()
            .filter(|href| !href.is_empty())
            .filter(|href| selection != LinkSelection::ProofLinks || is_proof_link(href))
            .collect()
    }
}
