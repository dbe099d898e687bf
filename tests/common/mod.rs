//! Scripted in-memory browser used by the integration tests.

#![allow(dead_code)]

use anyhow::Result;
use futures::channel::mpsc::{self, UnboundedSender};
use futures::StreamExt;
use site_backup::browser::{InterceptedResponse, PageEventStream, RequestDecision};
use site_backup::{
    BrowserEngine, BrowserPage, CapturedResponse, InterceptedRequest, PageEvent, ResourceKind,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// What the browser sees when it loads one URL.
#[derive(Clone, Default)]
pub struct ScriptedPage {
    /// Responses in load order; the first one is usually the document.
    pub loads: Vec<CapturedResponse>,
    /// Hrefs returned per selector.
    pub anchors: HashMap<String, Vec<String>>,
    /// Never finish loading.
    pub hang: bool,
}

impl ScriptedPage {
    pub fn document(url: &str, html: &str) -> Self {
        Self {
            loads: vec![response(url, ResourceKind::Document, html.as_bytes())],
            ..Self::default()
        }
    }

    pub fn with_load(mut self, url: &str, kind: ResourceKind, body: &[u8]) -> Self {
        self.loads.push(response(url, kind, body));
        self
    }

    pub fn with_anchors(mut self, selector: &str, hrefs: &[&str]) -> Self {
        self.anchors
            .insert(selector.to_string(), hrefs.iter().map(|h| h.to_string()).collect());
        self
    }
}

pub fn response(url: &str, kind: ResourceKind, body: &[u8]) -> CapturedResponse {
    CapturedResponse {
        url: url.to_string(),
        status: 200,
        kind,
        body: body.to_vec(),
    }
}

#[derive(Clone, Default)]
pub struct FakeBrowser {
    pages: Arc<HashMap<String, ScriptedPage>>,
    aborted: Arc<Mutex<Vec<String>>>,
    visited: Arc<Mutex<Vec<String>>>,
}

impl FakeBrowser {
    pub fn new(pages: Vec<(String, ScriptedPage)>) -> Self {
        Self {
            pages: Arc::new(pages.into_iter().collect()),
            ..Self::default()
        }
    }

    pub fn aborted(&self) -> Vec<String> {
        self.aborted.lock().unwrap().clone()
    }

    pub fn visited(&self) -> Vec<String> {
        self.visited.lock().unwrap().clone()
    }
}

pub struct FakePage {
    browser: FakeBrowser,
    events: Mutex<Option<UnboundedSender<PageEvent>>>,
    current: Mutex<Option<String>>,
}

impl BrowserEngine for FakeBrowser {
    type Page = FakePage;

    async fn new_page(&self) -> Result<FakePage> {
        Ok(FakePage {
            browser: self.clone(),
            events: Mutex::new(None),
            current: Mutex::new(None),
        })
    }

    async fn close(self) -> Result<()> {
        Ok(())
    }
}

impl BrowserPage for FakePage {
    async fn set_request_interception(&self, _enabled: bool) -> Result<()> {
        Ok(())
    }

    async fn events(&self) -> Result<PageEventStream> {
        let (tx, rx) = mpsc::unbounded();
        *self.events.lock().unwrap() = Some(tx);
        Ok(rx.boxed())
    }

    async fn goto(&self, url: &str) -> Result<()> {
        self.browser.visited.lock().unwrap().push(url.to_string());
        *self.current.lock().unwrap() = Some(url.to_string());

        let page = self.browser.pages.get(url).cloned().unwrap_or_else(|| ScriptedPage {
            loads: vec![CapturedResponse {
                url: url.to_string(),
                status: 404,
                kind: ResourceKind::Document,
                body: b"not found".to_vec(),
            }],
            ..ScriptedPage::default()
        });

        let tx = self.events.lock().unwrap().clone();
        if let Some(tx) = tx {
            for load in page.loads {
                let (request, decision) = InterceptedRequest::new(load.url.clone(), load.kind);
                if tx.unbounded_send(PageEvent::Request(request)).is_err() {
                    break;
                }
                match decision.await.unwrap_or(RequestDecision::Continue) {
                    RequestDecision::Continue => {
                        // Hold the load until the listener has dealt with the response.
                        let (response, released) = InterceptedResponse::new(load);
                        if tx.unbounded_send(PageEvent::Response(response)).is_ok() {
                            let _ = released.await;
                        }
                    }
                    RequestDecision::Abort => self.browser.aborted.lock().unwrap().push(load.url),
                }
            }
        }

        if page.hang {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        Ok(())
    }

    async fn query_hrefs(&self, selector: &str) -> Result<Vec<String>> {
        let current = self.current.lock().unwrap().clone();
        Ok(current
            .and_then(|url| self.browser.pages.get(&url).cloned())
            .and_then(|page| page.anchors.get(selector).cloned())
            .unwrap_or_default())
    }
}
