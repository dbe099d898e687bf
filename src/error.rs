use std::path::PathBuf;
use thiserror::Error;

/// Everything that can go wrong while backing up a site.
///
/// Only `InvalidCliArgument` and `BrowserLaunch` end a run; the rest are
/// local to one page or one URL and are folded into the failure count.
#[derive(Debug, Error)]
pub enum MirrorError {
    #[error("{0} is not a valid website. Must start with 'https://'")]
    InvalidCliArgument(String),

    #[error("failed to launch browser: {0}")]
    BrowserLaunch(String),

    #[error("browser error: {0}")]
    Browser(String),

    #[error("navigation to {url} timed out after {timeout_ms} ms")]
    NavigationTimeout { url: String, timeout_ms: u128 },

    #[error("navigation to {url} failed: {reason}")]
    Navigation { url: String, reason: String },

    #[error("request for {url} timed out")]
    FetchTimeout { url: String },

    #[error("request for {url} failed: {source}")]
    FetchNetwork {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("HTTP {status} for {url}")]
    HttpStatus { url: String, status: u16 },

    #[error("I/O error on {}: {source}", path.display())]
    FetchIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed URL {url}: {source}")]
    MalformedUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },
}

impl MirrorError {
    pub fn from_reqwest(url: &str, source: reqwest::Error) -> Self {
        if source.is_timeout() {
            MirrorError::FetchTimeout { url: url.to_string() }
        } else {
            MirrorError::FetchNetwork { url: url.to_string(), source }
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        MirrorError::FetchIo { path: path.into(), source }
    }

    /// Whether another download pass could plausibly fix this.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            MirrorError::FetchTimeout { .. }
                | MirrorError::FetchNetwork { .. }
                | MirrorError::HttpStatus { .. }
                | MirrorError::FetchIo { .. }
        )
    }
}
