//! The slice of a browser the backup needs: a page that can navigate, report
//! its network traffic as a stream of events, and answer DOM queries.

use anyhow::Result;
use futures::channel::oneshot;
use futures::stream::BoxStream;

/// Coarse classification of what a request was issued for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Document,
    Stylesheet,
    Script,
    Image,
    Media,
    Font,
    Xhr,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestDecision {
    Continue,
    Abort,
}

/// An outbound request held by the browser until a decision is made.
///
/// Dropping it without calling [`proceed`](Self::proceed) or
/// [`abort`](Self::abort) lets the request continue.
#[derive(Debug)]
pub struct InterceptedRequest {
    url: String,
    kind: ResourceKind,
    responder: Option<oneshot::Sender<RequestDecision>>,
}

impl InterceptedRequest {
    pub fn new(
        url: impl Into<String>,
        kind: ResourceKind,
    ) -> (Self, oneshot::Receiver<RequestDecision>) {
        let (tx, rx) = oneshot::channel();
        let request = Self {
            url: url.into(),
            kind,
            responder: Some(tx),
        };
        (request, rx)
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    pub fn proceed(mut self) {
        self.decide(RequestDecision::Continue);
    }

    pub fn abort(mut self) {
        self.decide(RequestDecision::Abort);
    }

    fn decide(&mut self, decision: RequestDecision) {
        if let Some(responder) = self.responder.take() {
            let _ = responder.send(decision);
        }
    }
}

impl Drop for InterceptedRequest {
    fn drop(&mut self) {
        self.decide(RequestDecision::Continue);
    }
}

/// A response the page received, with its body already read.
#[derive(Debug, Clone)]
pub struct CapturedResponse {
    pub url: String,
    pub status: u16,
    pub kind: ResourceKind,
    pub body: Vec<u8>,
}

impl CapturedResponse {
    pub fn ok(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn bytes(&self) -> &[u8] {
        &self.body
    }
}

/// A response the browser holds back until the consumer is done with it.
///
/// Dropping it releases the response to the page, so navigation cannot report
/// the network as idle while a capture is still being written.
#[derive(Debug)]
pub struct InterceptedResponse {
    response: CapturedResponse,
    release: Option<oneshot::Sender<()>>,
}

impl InterceptedResponse {
    pub fn new(response: CapturedResponse) -> (Self, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        let intercepted = Self {
            response,
            release: Some(tx),
        };
        (intercepted, rx)
    }

    pub fn response(&self) -> &CapturedResponse {
        &self.response
    }
}

impl Drop for InterceptedResponse {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            let _ = release.send(());
        }
    }
}

#[derive(Debug)]
pub enum PageEvent {
    Request(InterceptedRequest),
    Response(InterceptedResponse),
}

pub type PageEventStream = BoxStream<'static, PageEvent>;

#[allow(async_fn_in_trait)]
pub trait BrowserPage {
    /// Holds every outbound request until it is continued or aborted.
    async fn set_request_interception(&self, enabled: bool) -> Result<()>;

    /// Request/response events for the lifetime of the page. The stream ends
    /// when the page goes away.
    async fn events(&self) -> Result<PageEventStream>;

    /// Loads `url` and resolves once the load event has fired and the network
    /// has gone quiet.
    async fn goto(&self, url: &str) -> Result<()>;

    /// Resolved `href` properties of every element matching `selector`.
    async fn query_hrefs(&self, selector: &str) -> Result<Vec<String>>;
}

#[allow(async_fn_in_trait)]
pub trait BrowserEngine {
    type Page: BrowserPage;

    async fn new_page(&self) -> Result<Self::Page>;

    async fn close(self) -> Result<()>;
}
