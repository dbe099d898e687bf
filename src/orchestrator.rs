use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use url::Url;

use crate::browser::{BrowserEngine, BrowserPage};
use crate::capture::{CaptureStats, MediaPrefixFilter, RequestFilter, ResponseCapture};
use crate::config::BackupConfig;
use crate::downloader::ConcurrentDownloader;
use crate::file_manager::FileManager;
use crate::link_rewriter::LinkRewriter;
use crate::registry::{DedupRegistry, RegistrySummary};
use crate::session::{CrawlSession, LinkSelection, SessionReport};

/// How long to wait for the capture task to drain after the browser closes.
const CAPTURE_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryPage {
    pub url: Url,
    pub selection: LinkSelection,
}

#[derive(Debug)]
pub struct BackupReport {
    pub sessions: Vec<SessionReport>,
    pub capture: CaptureStats,
    pub registry: RegistrySummary,
}

impl BackupReport {
    pub fn total_failures(&self) -> usize {
        self.sessions.iter().map(SessionReport::failure_count).sum()
    }

    pub fn failed_downloads(&self) -> usize {
        self.sessions.iter().map(|s| s.failed_downloads).sum()
    }

    /// Entry pages that did not finish loading.
    pub fn failed_pages(&self) -> usize {
        self.sessions.iter().filter(|s| s.navigation_error.is_some()).count()
    }

    pub fn is_complete(&self) -> bool {
        self.total_failures() == 0
    }

    pub fn summary_line(&self) -> String {
        let mut parts = Vec::new();
        match self.failed_downloads() {
            0 => {}
            1 => parts.push("1 file failed to download".to_string()),
            n => parts.push(format!("{} files failed to download", n)),
        }
        match self.failed_pages() {
            0 => {}
            1 => parts.push("1 page failed to load".to_string()),
            n => parts.push(format!("{} pages failed to load", n)),
        }

        match self.total_failures() {
            0 => "BACKUP COMPLETE! Serve the mirror directory with any static file server."
                .to_string(),
            1 => format!("{}. Run the backup again to retry it.", parts.join(" and ")),
            _ => format!("{}. Run the backup again to retry them.", parts.join(" and ")),
        }
    }
}

/// Runs the crawl over the fixed entry pages, one after another on a single
/// browser page, sharing one dedup registry between browser capture and
/// direct downloads.
pub struct BackupOrchestrator {
    config: BackupConfig,
    site_url: Url,
    registry: Arc<DedupRegistry>,
    filter: Arc<dyn RequestFilter>,
}

impl BackupOrchestrator {
    pub fn new(config: BackupConfig, site_url: Url) -> Self {
        let filter = Arc::new(MediaPrefixFilter::new(config.blocked_path_prefix.clone()));
        Self {
            config,
            site_url,
            registry: Arc::new(DedupRegistry::new()),
            filter,
        }
    }

    /// Replaces the default media-prefix request filter.
    pub fn with_request_filter(mut self, filter: Arc<dyn RequestFilter>) -> Self {
        self.filter = filter;
        self
    }

    pub fn registry(&self) -> &Arc<DedupRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &BackupConfig {
        &self.config
    }

    /// Site root, the secondary listing, then the proofs listing.
    pub fn entry_pages(&self) -> Result<Vec<EntryPage>> {
        let secondary = self
            .site_url
            .join(&self.config.secondary_listing_path)
            .with_context(|| {
                format!("Invalid listing path: {}", self.config.secondary_listing_path)
            })?;
        let proofs = self
            .site_url
            .join(&self.config.proofs_listing_path)
            .with_context(|| format!("Invalid proofs path: {}", self.config.proofs_listing_path))?;

        Ok(vec![
            EntryPage {
                url: self.site_url.clone(),
                selection: LinkSelection::DownloadAnchors,
            },
            EntryPage {
                url: secondary,
                selection: LinkSelection::DownloadAnchors,
            },
            EntryPage {
                url: proofs,
                selection: LinkSelection::ProofLinks,
            },
        ])
    }

    pub async fn run<B: BrowserEngine>(&self, browser: B) -> Result<BackupReport> {
        let entry_pages = self.entry_pages()?;
        let file_manager = FileManager::new(&self.config.mirror_root, &self.config.staging_dir)?;
        let rewriter = LinkRewriter::new(self.site_url.clone())?;
        let downloader = ConcurrentDownloader::new(
            &self.config,
            file_manager.clone(),
            self.registry.clone(),
            self.site_url.clone(),
        )?;

        let page = browser.new_page().await.context("Failed to open browser page")?;
        page.set_request_interception(true)
            .await
            .context("Failed to enable request interception")?;
        let events = page.events().await.context("Failed to subscribe to page events")?;

        let listener = ResponseCapture::new(
            self.registry.clone(),
            file_manager,
            rewriter,
            self.site_url.clone(),
            self.filter.clone(),
        )
        .spawn(events);

        let mut sessions = Vec::with_capacity(entry_pages.len());
        for entry in &entry_pages {
            info!("Saving {}", entry.url);
            let session = CrawlSession::new(&page, &downloader, &self.config);
            sessions.push(session.run(entry.url.as_str(), entry.selection).await);
        }

        drop(page);
        if let Err(e) = browser.close().await {
            warn!("Failed to close browser cleanly: {:#}", e);
        }

        let capture = match tokio::time::timeout(CAPTURE_DRAIN_TIMEOUT, listener).await {
            Ok(Ok(stats)) => stats,
            Ok(Err(e)) => {
                warn!("Capture task ended abnormally: {}", e);
                CaptureStats::default()
            }
            Err(_) => {
                warn!("Capture task did not finish within {:?}", CAPTURE_DRAIN_TIMEOUT);
                CaptureStats::default()
            }
        };

        Ok(BackupReport {
            sessions,
            capture,
            registry: self.registry.summary(),
        })
    }
}
