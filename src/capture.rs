use futures::StreamExt;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};
use url::Url;

use crate::browser::{
    CapturedResponse, InterceptedRequest, PageEvent, PageEventStream, ResourceKind,
};
use crate::error::MirrorError;
use crate::file_manager::FileManager;
use crate::link_rewriter::LinkRewriter;
use crate::registry::{DedupRegistry, FetchOutcome};

/// Decides which sub-resource requests the page is not allowed to make.
pub trait RequestFilter: Send + Sync {
    fn should_abort(&self, url: &Url) -> bool;
}

impl<F> RequestFilter for F
where
    F: Fn(&Url) -> bool + Send + Sync,
{
    fn should_abort(&self, url: &Url) -> bool {
        self(url)
    }
}

/// Blocks every request whose path starts with a fixed prefix.
#[derive(Debug, Clone)]
pub struct MediaPrefixFilter {
    prefix: String,
}

impl MediaPrefixFilter {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self { prefix: prefix.into() }
    }
}

impl RequestFilter for MediaPrefixFilter {
    fn should_abort(&self, url: &Url) -> bool {
        !self.prefix.is_empty() && url.path().starts_with(&self.prefix)
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CaptureStats {
    pub captured: usize,
    pub aborted: usize,
    pub failed: usize,
}

/// Persists everything the browser loads while pages are being navigated.
pub struct ResponseCapture {
    registry: Arc<DedupRegistry>,
    file_manager: FileManager,
    rewriter: LinkRewriter,
    site_url: Url,
    filter: Arc<dyn RequestFilter>,
}

impl ResponseCapture {
    pub fn new(
        registry: Arc<DedupRegistry>,
        file_manager: FileManager,
        rewriter: LinkRewriter,
        site_url: Url,
        filter: Arc<dyn RequestFilter>,
    ) -> Self {
        Self {
            registry,
            file_manager,
            rewriter,
            site_url,
            filter,
        }
    }

    /// Consumes the page's event stream on its own task until the stream ends.
    pub fn spawn(self, mut events: PageEventStream) -> JoinHandle<CaptureStats> {
        tokio::spawn(async move {
            let mut stats = CaptureStats::default();
            while let Some(event) = events.next().await {
                match event {
                    PageEvent::Request(request) => {
                        if !self.handle_request(request) {
                            stats.aborted += 1;
                        }
                    }
                    PageEvent::Response(intercepted) => {
                        let response = intercepted.response();
                        match self.handle_response(response) {
                            Ok(Some(_)) => stats.captured += 1,
                            Ok(None) => {}
                            Err(err) => {
                                error!("{}: {}", response.url, err);
                                stats.failed += 1;
                            }
                        }
                    }
                }
            }
            debug!(?stats, "page event stream closed");
            stats
        })
    }

    /// Lets the request through unless the filter blocks it. Returns whether
    /// the request was allowed.
    pub fn handle_request(&self, request: InterceptedRequest) -> bool {
        if request.url().starts_with("data:") || self.registry.is_claimed(request.url()) {
            request.proceed();
            return true;
        }

        match Url::parse(request.url()) {
            Ok(url) if self.filter.should_abort(&url) => {
                debug!(url = %url, "aborting filtered request");
                request.abort();
                false
            }
            _ => {
                request.proceed();
                true
            }
        }
    }

    /// Writes a successful, not yet recorded response into the mirror.
    ///
    /// Returns the path written, or `None` if the response was skipped. On
    /// error the claim is released so the downloader may still fetch it.
    pub fn handle_response(
        &self,
        response: &CapturedResponse,
    ) -> Result<Option<PathBuf>, MirrorError> {
        if !response.ok() || response.url.starts_with("data:") {
            return Ok(None);
        }
        if !self.registry.try_claim(&response.url) {
            return Ok(None);
        }

        match self.persist(response) {
            Ok(path) => {
                info!("{}", response.url);
                self.registry.complete(&response.url, FetchOutcome::CapturedViaBrowser);
                Ok(Some(path))
            }
            Err(err) => {
                self.registry.release(&response.url);
                Err(err)
            }
        }
    }

    fn persist(&self, response: &CapturedResponse) -> Result<PathBuf, MirrorError> {
        let url = Url::parse(&response.url).map_err(|source| MirrorError::MalformedUrl {
            url: response.url.clone(),
            source,
        })?;
        let path = self.file_manager.local_path(&url, &self.site_url);

        if response.kind == ResourceKind::Document {
            let html = self.rewriter.rewrite_document(&response.text());
            self.file_manager.write_file(&path, html.as_bytes())?;
        } else {
            self.file_manager.write_file(&path, response.bytes())?;
        }

        Ok(path)
    }
}
