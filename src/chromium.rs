//! Chrome DevTools implementation of the browser traits.

use anyhow::{anyhow, Context, Result};
use base64::Engine as _;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::fetch::{
    ContinueRequestParams, DisableParams, EnableParams, EventRequestPaused, FailRequestParams,
    GetResponseBodyParams, RequestPattern, RequestStage,
};
use chromiumoxide::cdp::browser_protocol::network::{ErrorReason, LoaderId, ResourceType};
use chromiumoxide::cdp::browser_protocol::page::{
    EventLifecycleEvent, FrameId, NavigateParams, SetLifecycleEventsEnabledParams,
};
use chromiumoxide::Page;
use futures::channel::mpsc::{self, UnboundedSender};
use futures::StreamExt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::browser::{
    BrowserEngine, BrowserPage, CapturedResponse, InterceptedRequest, InterceptedResponse,
    PageEvent, PageEventStream, RequestDecision, ResourceKind,
};
use crate::error::MirrorError;

#[derive(Debug, Clone)]
pub struct ChromiumOptions {
    pub executable: Option<PathBuf>,
    pub headless: bool,
}

impl Default for ChromiumOptions {
    fn default() -> Self {
        Self {
            executable: None,
            headless: true,
        }
    }
}

pub struct ChromiumBrowser {
    browser: Browser,
    handler: JoinHandle<()>,
}

impl ChromiumBrowser {
    pub async fn launch(options: &ChromiumOptions) -> Result<Self, MirrorError> {
        let mut builder = BrowserConfig::builder();
        if !options.headless {
            builder = builder.with_head();
        }
        if let Some(executable) = &options.executable {
            builder = builder.chrome_executable(executable);
        }
        let config = builder.build().map_err(MirrorError::BrowserLaunch)?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| MirrorError::BrowserLaunch(e.to_string()))?;

        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!("Browser handler error: {:?}", e);
                }
            }
            debug!("Browser event handler finished");
        });

        info!("Browser launched");
        Ok(Self { browser, handler })
    }
}

impl BrowserEngine for ChromiumBrowser {
    type Page = ChromiumPage;

    async fn new_page(&self) -> Result<ChromiumPage> {
        let page = self
            .browser
            .new_page("about:blank")
            .await
            .context("Failed to create page")?;
        page.execute(SetLifecycleEventsEnabledParams::new(true))
            .await
            .context("Failed to enable lifecycle events")?;

        Ok(ChromiumPage {
            page,
            forwarder: Mutex::new(None),
        })
    }

    async fn close(mut self) -> Result<()> {
        self.browser.close().await.context("Failed to close browser")?;
        if let Err(e) = self.browser.wait().await {
            debug!("Failed waiting for browser process: {}", e);
        }
        self.handler.abort();
        Ok(())
    }
}

pub struct ChromiumPage {
    page: Page,
    forwarder: Mutex<Option<JoinHandle<()>>>,
}

impl BrowserPage for ChromiumPage {
    async fn set_request_interception(&self, enabled: bool) -> Result<()> {
        if enabled {
            let params = EnableParams::builder()
                .pattern(
                    RequestPattern::builder()
                        .url_pattern("*")
                        .request_stage(RequestStage::Request)
                        .build(),
                )
                .pattern(
                    RequestPattern::builder()
                        .url_pattern("*")
                        .request_stage(RequestStage::Response)
                        .build(),
                )
                .build();
            self.page.execute(params).await.context("Failed to enable interception")?;
        } else {
            self.page
                .execute(DisableParams::default())
                .await
                .context("Failed to disable interception")?;
        }
        Ok(())
    }

    async fn events(&self) -> Result<PageEventStream> {
        let mut paused = self
            .page
            .event_listener::<EventRequestPaused>()
            .await
            .context("Failed to listen for paused requests")?;
        let (tx, rx) = mpsc::unbounded();
        let page = self.page.clone();

        let forwarder = tokio::spawn(async move {
            while let Some(event) = paused.next().await {
                match event.response_status_code {
                    None => forward_request(&page, &event, &tx),
                    Some(status) => {
                        tokio::spawn(forward_response(page.clone(), event, status, tx.clone()));
                    }
                }
            }
        });

        let mut slot = self.forwarder.lock().map_err(|_| anyhow!("forwarder lock poisoned"))?;
        if let Some(previous) = slot.replace(forwarder) {
            previous.abort();
        }
        Ok(rx.boxed())
    }

    async fn goto(&self, url: &str) -> Result<()> {
        let mut lifecycle = self
            .page
            .event_listener::<EventLifecycleEvent>()
            .await
            .context("Failed to listen for lifecycle events")?;

        let navigation = self
            .page
            .execute(NavigateParams::new(url))
            .await
            .with_context(|| format!("Failed to load {}", url))?;
        if let Some(error) = &navigation.result.error_text {
            return Err(anyhow!("Failed to load {}: {}", url, error));
        }

        // Same-document navigations have no loader and fire no lifecycle events.
        let Some(loader_id) = navigation.result.loader_id.clone() else {
            return Ok(());
        };
        let mut watch = NavigationWatch::new(navigation.result.frame_id.clone(), loader_id);

        while let Some(event) = lifecycle.next().await {
            if watch.observe(&event.frame_id, &event.loader_id, &event.name) {
                break;
            }
        }
        Ok(())
    }

    async fn query_hrefs(&self, selector: &str) -> Result<Vec<String>> {
        let elements = self
            .page
            .find_elements(selector)
            .await
            .with_context(|| format!("Failed to query {}", selector))?;

        let mut hrefs = Vec::with_capacity(elements.len());
        for element in elements {
            if let Some(serde_json::Value::String(href)) = element.property("href").await? {
                hrefs.push(href);
            }
        }
        Ok(hrefs)
    }
}

impl Drop for ChromiumPage {
    fn drop(&mut self) {
        if let Ok(mut slot) = self.forwarder.lock() {
            if let Some(forwarder) = slot.take() {
                forwarder.abort();
            }
        }
    }
}

/// Tracks lifecycle events of one top-level navigation. Subframes and
/// earlier loaders are ignored.
#[derive(Debug)]
struct NavigationWatch {
    frame_id: FrameId,
    loader_id: LoaderId,
    loaded: bool,
    idle: bool,
}

impl NavigationWatch {
    fn new(frame_id: FrameId, loader_id: LoaderId) -> Self {
        Self {
            frame_id,
            loader_id,
            loaded: false,
            idle: false,
        }
    }

    /// Records one lifecycle event; true once the page has loaded and its
    /// network has gone quiet.
    fn observe(&mut self, frame_id: &FrameId, loader_id: &LoaderId, name: &str) -> bool {
        if *frame_id != self.frame_id || *loader_id != self.loader_id {
            return false;
        }
        match name {
            "load" => self.loaded = true,
            "networkIdle" => self.idle = true,
            _ => {}
        }
        self.loaded && self.idle
    }
}

fn resource_kind(resource_type: &ResourceType) -> ResourceKind {
    match resource_type {
        ResourceType::Document => ResourceKind::Document,
        ResourceType::Stylesheet => ResourceKind::Stylesheet,
        ResourceType::Script => ResourceKind::Script,
        ResourceType::Image => ResourceKind::Image,
        ResourceType::Media => ResourceKind::Media,
        ResourceType::Font => ResourceKind::Font,
        ResourceType::Xhr | ResourceType::Fetch => ResourceKind::Xhr,
        _ => ResourceKind::Other,
    }
}

/// Hands a request-stage pause to the consumer and applies its decision.
fn forward_request(page: &Page, event: &EventRequestPaused, tx: &UnboundedSender<PageEvent>) {
    let (request, decision) =
        InterceptedRequest::new(event.request.url.clone(), resource_kind(&event.resource_type));
    // If the consumer is gone the request is dropped, which continues it.
    let _ = tx.unbounded_send(PageEvent::Request(request));

    let page = page.clone();
    let request_id = event.request_id.clone();
    tokio::spawn(async move {
        let result = match decision.await.unwrap_or(RequestDecision::Continue) {
            RequestDecision::Continue => page
                .execute(ContinueRequestParams::new(request_id))
                .await
                .map(|_| ()),
            RequestDecision::Abort => page
                .execute(FailRequestParams::new(request_id, ErrorReason::BlockedByClient))
                .await
                .map(|_| ()),
        };
        if let Err(e) = result {
            debug!("Failed to resolve intercepted request: {}", e);
        }
    });
}

/// Reads the body of a response-stage pause and hands it to the consumer.
/// The response is only released to the page once the consumer drops it.
async fn forward_response(
    page: Page,
    event: Arc<EventRequestPaused>,
    status: i64,
    tx: UnboundedSender<PageEvent>,
) {
    let status = u16::try_from(status).unwrap_or(0);

    if (200..300).contains(&status) {
        let body = match page.execute(GetResponseBodyParams::new(event.request_id.clone())).await {
            Ok(response) => decode_body(&response.result.body, response.result.base64_encoded),
            Err(e) => {
                debug!("No body for {}: {}", event.request.url, e);
                None
            }
        };

        if let Some(body) = body {
            let (response, released) = InterceptedResponse::new(CapturedResponse {
                url: event.request.url.clone(),
                status,
                kind: resource_kind(&event.resource_type),
                body,
            });
            if tx.unbounded_send(PageEvent::Response(response)).is_ok() {
                let _ = released.await;
            }
        }
    }

    if let Err(e) = page.execute(ContinueRequestParams::new(event.request_id.clone())).await {
        debug!("Failed to continue response for {}: {}", event.request.url, e);
    }
}

fn decode_body(body: &str, base64_encoded: bool) -> Option<Vec<u8>> {
    if !base64_encoded {
        return Some(body.as_bytes().to_vec());
    }
    match base64::engine::general_purpose::STANDARD.decode(body) {
        Ok(bytes) => Some(bytes),
        Err(e) => {
            error!("Failed to decode response body: {}", e);
            None
        }
    }
}
