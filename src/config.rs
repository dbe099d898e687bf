use std::path::PathBuf;
use std::time::Duration;

/// Hostname of the default site, stored reversed.
pub const DEFAULT_SITE_CODED: &str = "bup.nonaq";

pub const DL_CONCURRENCY: usize = 6;
pub const DL_THROTTLE_MS: u64 = 1000;
pub const MAX_RETRIES: usize = 3;
pub const FETCH_TIMEOUT_MS: u64 = 15_000;
pub const NAVIGATION_TIMEOUT_MS: u64 = 30_000;
pub const BASE_DIR: &str = "./www";

pub fn default_site() -> String {
    let host: String = DEFAULT_SITE_CODED.chars().rev().collect();
    format!("https://{}", host)
}

#[derive(Debug, Clone)]
pub struct BackupConfig {
    /// Root of the local mirror tree.
    pub mirror_root: PathBuf,
    /// Directory where downloads are staged before being moved into place.
    pub staging_dir: PathBuf,
    pub concurrency: usize,
    pub throttle: Duration,
    pub max_passes: usize,
    pub fetch_timeout: Duration,
    pub navigation_timeout: Duration,
    /// Sub-resource requests whose path starts with this prefix are aborted.
    pub blocked_path_prefix: String,
    pub secondary_listing_path: String,
    pub proofs_listing_path: String,
    pub download_selector: String,
    pub user_agent: String,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            mirror_root: PathBuf::from(BASE_DIR),
            staging_dir: std::env::temp_dir(),
            concurrency: DL_CONCURRENCY,
            throttle: Duration::from_millis(DL_THROTTLE_MS),
            max_passes: MAX_RETRIES,
            fetch_timeout: Duration::from_millis(FETCH_TIMEOUT_MS),
            navigation_timeout: Duration::from_millis(NAVIGATION_TIMEOUT_MS),
            blocked_path_prefix: "/data/media/".to_string(),
            secondary_listing_path: "/index2.html".to_string(),
            proofs_listing_path: "/data/proofs/".to_string(),
            download_selector: "article a.download".to_string(),
            user_agent: "SiteBackup/1.0".to_string(),
        }
    }
}
