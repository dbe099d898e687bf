use anyhow::Result;
use futures::stream::{self, StreamExt};
use indicatif::{ProgressBar, ProgressStyle};
use reqwest::{Client, ClientBuilder};
use std::collections::{BTreeSet, HashSet};
use std::future::Future;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::BackupConfig;
use crate::error::MirrorError;
use crate::file_manager::FileManager;
use crate::registry::{DedupRegistry, FetchOutcome};

/// Deduplicated links pulled from one page, handed to the downloader once.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkSet {
    urls: Vec<String>,
}

impl LinkSet {
    pub fn len(&self) -> usize {
        self.urls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.urls.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.urls.iter().map(String::as_str)
    }
}

impl FromIterator<String> for LinkSet {
    fn from_iter<I: IntoIterator<Item = String>>(iter: I) -> Self {
        let mut seen = HashSet::new();
        let urls = iter.into_iter().filter(|url| seen.insert(url.clone())).collect();
        Self { urls }
    }
}

impl IntoIterator for LinkSet {
    type Item = String;
    type IntoIter = std::vec::IntoIter<String>;

    fn into_iter(self) -> Self::IntoIter {
        self.urls.into_iter()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ItemOutcome {
    /// Downloaded, already on disk, or owned by someone else.
    Resolved,
    /// Failed this pass; try again next pass.
    Retry,
    /// Cannot succeed; counted as a failure without further passes.
    GaveUp,
}

/// Fetches batches of URLs straight to the mirror with bounded concurrency,
/// a fixed per-request throttle and a small number of retry passes.
pub struct ConcurrentDownloader {
    client: Client,
    file_manager: FileManager,
    registry: Arc<DedupRegistry>,
    site_url: Url,
    max_concurrent: usize,
    throttle: Duration,
    max_passes: usize,
    fetch_timeout: Duration,
}

impl ConcurrentDownloader {
    pub fn new(
        config: &BackupConfig,
        file_manager: FileManager,
        registry: Arc<DedupRegistry>,
        site_url: Url,
    ) -> Result<Self> {
        let client = Self::build_http_client(config)?;

        Ok(Self {
            client,
            file_manager,
            registry,
            site_url,
            max_concurrent: config.concurrency.max(1),
            throttle: config.throttle,
            max_passes: config.max_passes.max(1),
            fetch_timeout: config.fetch_timeout,
        })
    }

    fn build_http_client(config: &BackupConfig) -> Result<Client> {
        let client = ClientBuilder::new()
            .use_rustls_tls()
            .user_agent(config.user_agent.as_str())
            .connect_timeout(config.fetch_timeout)
            .build()?;

        Ok(client)
    }

    /// Downloads every link not yet claimed, returning how many are still
    /// unresolved after the last pass. Zero means everything is on disk.
    pub async fn download_all(&self, links: LinkSet) -> usize {
        let mut pending: BTreeSet<String> = links.into_iter().collect();
        let mut gave_up = 0;

        for pass in 1..=self.max_passes {
            if pending.is_empty() {
                break;
            }
            debug!(pass, pending = pending.len(), "starting download pass");

            let progress_bar = ProgressBar::new(pending.len() as u64);
            if let Ok(style) =
                ProgressStyle::default_bar().template("{spinner} [{bar:30}] {pos}/{len} {msg}")
            {
                progress_bar.set_style(style);
            }
            progress_bar.set_message(format!("pass {}/{}", pass, self.max_passes));

            let results: Vec<(String, ItemOutcome)> = stream::iter(pending.iter().cloned())
                .map(|link| {
                    let progress_bar = &progress_bar;
                    async move {
                        let outcome = self.process_link(&link).await;
                        progress_bar.inc(1);
                        (link, outcome)
                    }
                })
                .buffer_unordered(self.max_concurrent)
                .collect()
                .await;

            progress_bar.finish_and_clear();

            for (link, outcome) in results {
                match outcome {
                    ItemOutcome::Resolved => {
                        pending.remove(&link);
                    }
                    ItemOutcome::GaveUp => {
                        pending.remove(&link);
                        gave_up += 1;
                    }
                    ItemOutcome::Retry => {}
                }
            }
        }

        for link in &pending {
            warn!(url = %link, "giving up after {} attempts", self.max_passes);
            self.registry.complete(link, FetchOutcome::Failed);
        }

        pending.len() + gave_up
    }

    async fn process_link(&self, link: &str) -> ItemOutcome {
        if !self.registry.try_claim(link) {
            debug!(url = %link, "already claimed, skipping");
            return ItemOutcome::Resolved;
        }

        let url = match self.site_url.join(link) {
            Ok(url) => url,
            Err(source) => {
                let err = MirrorError::MalformedUrl { url: link.to_string(), source };
                warn!("[error] {}: {}", link, err);
                self.registry.complete(link, FetchOutcome::Failed);
                return ItemOutcome::GaveUp;
            }
        };

        let dest = self.file_manager.local_path(&url, &self.site_url);
        match self.file_manager.has_content(&dest).await {
            Ok(true) => {
                debug!(url = %link, path = %dest.display(), "already on disk");
                self.registry.complete(link, FetchOutcome::SkippedExisting);
                return ItemOutcome::Resolved;
            }
            Ok(false) => {}
            Err(err) => {
                warn!("[error] {}: {}", link, err);
                self.registry.release(link);
                return ItemOutcome::Retry;
            }
        }

        // The slot stays busy for at least the throttle delay.
        let (fetched, _) = tokio::join!(
            self.fetch_to_file(&url, &dest),
            tokio::time::sleep(self.throttle)
        );

        match fetched {
            Ok(()) => {
                info!("{}", link);
                self.registry.complete(link, FetchOutcome::Downloaded);
                ItemOutcome::Resolved
            }
            Err(err) => {
                warn!("[error] {}: {}", link, err);
                self.registry.release(link);
                if err.is_retryable() {
                    ItemOutcome::Retry
                } else {
                    self.registry.complete(link, FetchOutcome::Failed);
                    ItemOutcome::GaveUp
                }
            }
        }
    }

    /// Streams `url` into a staging file, then moves it to `dest`.
    ///
    /// The fetch timeout bounds each wait on the server, not the whole
    /// transfer: a body that keeps arriving is never cut off.
    async fn fetch_to_file(&self, url: &Url, dest: &Path) -> Result<(), MirrorError> {
        let mut staged = self.file_manager.stage()?;

        let request = self.client.get(url.as_str()).send();
        let mut response = self.within_timeout(url, request).await?;

        let status = response.status();
        if !status.is_success() {
            return Err(MirrorError::HttpStatus {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        while let Some(chunk) = self.within_timeout(url, response.chunk()).await? {
            staged
                .write_all(&chunk)
                .map_err(|e| MirrorError::io(staged.path(), e))?;
        }
        staged.flush().map_err(|e| MirrorError::io(staged.path(), e))?;

        self.file_manager.place(staged, dest)
    }

    async fn within_timeout<T, F>(&self, url: &Url, fut: F) -> Result<T, MirrorError>
    where
        F: Future<Output = reqwest::Result<T>>,
    {
        match tokio::time::timeout(self.fetch_timeout, fut).await {
            Ok(result) => result.map_err(|e| MirrorError::from_reqwest(url.as_str(), e)),
            Err(_) => Err(MirrorError::FetchTimeout { url: url.to_string() }),
        }
    }
}
