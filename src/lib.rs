pub mod browser;
pub mod capture;
pub mod chromium;
pub mod cli;
pub mod config;
pub mod downloader;
pub mod error;
pub mod file_manager;
pub mod link_rewriter;
pub mod orchestrator;
pub mod path_mapper;
pub mod registry;
pub mod session;

// Re-export main types for convenience
pub use browser::{
    BrowserEngine, BrowserPage, CapturedResponse, InterceptedRequest, InterceptedResponse,
    PageEvent, ResourceKind,
};
pub use capture::{MediaPrefixFilter, RequestFilter, ResponseCapture};
pub use chromium::{ChromiumBrowser, ChromiumOptions};
pub use cli::BackupCommand;
pub use config::BackupConfig;
pub use downloader::{ConcurrentDownloader, LinkSet};
pub use error::MirrorError;
pub use file_manager::FileManager;
pub use link_rewriter::LinkRewriter;
pub use orchestrator::{BackupOrchestrator, BackupReport};
pub use path_mapper::map_path;
pub use registry::{DedupRegistry, FetchOutcome, FetchRecord};
pub use session::{CrawlSession, LinkSelection};
