use clap::Parser;
use regex::Regex;
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

use crate::config::{self, BackupConfig};
use crate::error::MirrorError;

#[derive(Parser, Debug)]
#[command(
    name = "site-backup",
    about = "Back up a website into a static mirror you can browse offline",
    version,
    long_about = "Loads the site's entry pages in a headless browser, saves every response \
                  the browser receives, rewrites links so the copy works offline, and \
                  downloads the files the pages link to."
)]
pub struct BackupCommand {
    /// The site to back up (must start with http:// or https://)
    pub url: Option<String>,

    /// Output directory for the mirror
    #[arg(short, long, default_value = config::BASE_DIR)]
    pub output_dir: PathBuf,

    /// Maximum simultaneous downloads
    #[arg(
        short = 'c',
        long,
        default_value_t = config::DL_CONCURRENCY,
        value_parser = parse_positive
    )]
    pub concurrency: usize,

    /// Minimum time each download slot stays busy, in milliseconds
    #[arg(long, default_value_t = config::DL_THROTTLE_MS)]
    pub throttle_ms: u64,

    /// Download passes before a file is reported as failed
    #[arg(long, default_value_t = config::MAX_RETRIES, value_parser = parse_positive)]
    pub retries: usize,

    /// Per-download timeout in milliseconds
    #[arg(long, default_value_t = config::FETCH_TIMEOUT_MS)]
    pub fetch_timeout_ms: u64,

    /// Page load timeout in milliseconds
    #[arg(long, default_value_t = config::NAVIGATION_TIMEOUT_MS)]
    pub navigation_timeout_ms: u64,

    /// Path to a Chrome/Chromium executable
    #[arg(long)]
    pub chrome: Option<PathBuf>,

    /// Show the browser window
    #[arg(long)]
    pub headful: bool,

    /// Increase logging verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Only log errors
    #[arg(short, long, conflicts_with = "verbose")]
    pub quiet: bool,
}

fn parse_positive(value: &str) -> Result<usize, String> {
    match value.parse::<usize>() {
        Ok(0) => Err("must be at least 1".to_string()),
        Ok(n) => Ok(n),
        Err(e) => Err(e.to_string()),
    }
}

impl BackupCommand {
    /// The site to back up: the positional argument, or the default site.
    pub fn site_url(&self) -> Result<Url, MirrorError> {
        let site = match &self.url {
            Some(arg) => {
                let scheme = Regex::new(r"^https?://").expect("valid scheme pattern");
                if !scheme.is_match(arg) {
                    return Err(MirrorError::InvalidCliArgument(arg.clone()));
                }
                arg.clone()
            }
            None => config::default_site(),
        };

        Url::parse(&site).map_err(|_| MirrorError::InvalidCliArgument(site))
    }

    pub fn to_config(&self) -> BackupConfig {
        BackupConfig {
            mirror_root: self.output_dir.clone(),
            concurrency: self.concurrency,
            throttle: Duration::from_millis(self.throttle_ms),
            max_passes: self.retries,
            fetch_timeout: Duration::from_millis(self.fetch_timeout_ms),
            navigation_timeout: Duration::from_millis(self.navigation_timeout_ms),
            ..BackupConfig::default()
        }
    }
}
