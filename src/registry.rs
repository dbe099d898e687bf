use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Where a URL ended up during a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    /// Claimed by a fetch path that has not finished yet.
    Claimed,
    CapturedViaBrowser,
    Downloaded,
    SkippedExisting,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRecord {
    pub url: String,
    pub outcome: FetchOutcome,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RegistrySummary {
    pub captured: usize,
    pub downloaded: usize,
    pub skipped: usize,
    pub failed: usize,
    pub in_flight: usize,
}

/// Set of URLs already fetched or being fetched, shared by the browser capture
/// path and the direct downloader for one backup run.
#[derive(Debug, Default)]
pub struct DedupRegistry {
    records: Mutex<HashMap<String, FetchOutcome>>,
}

impl DedupRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn records(&self) -> MutexGuard<'_, HashMap<String, FetchOutcome>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Claims `url` for the caller. Returns `false` if anyone claimed it first.
    pub fn try_claim(&self, url: &str) -> bool {
        let mut records = self.records();
        if records.contains_key(url) {
            return false;
        }
        records.insert(url.to_string(), FetchOutcome::Claimed);
        true
    }

    pub fn is_claimed(&self, url: &str) -> bool {
        self.records().contains_key(url)
    }

    /// Gives up a claim so a later attempt can take it again.
    pub fn release(&self, url: &str) {
        self.records().remove(url);
    }

    /// Records the terminal outcome for a URL.
    pub fn complete(&self, url: &str, outcome: FetchOutcome) {
        self.records().insert(url.to_string(), outcome);
    }

    pub fn outcome(&self, url: &str) -> Option<FetchOutcome> {
        self.records().get(url).copied()
    }

    pub fn len(&self) -> usize {
        self.records().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records().is_empty()
    }

    pub fn snapshot(&self) -> Vec<FetchRecord> {
        let mut records: Vec<FetchRecord> = self
            .records()
            .iter()
            .map(|(url, outcome)| FetchRecord {
                url: url.clone(),
                outcome: *outcome,
            })
            .collect();
        records.sort_by(|a, b| a.url.cmp(&b.url));
        records
    }

    pub fn summary(&self) -> RegistrySummary {
        let mut summary = RegistrySummary::default();
        for outcome in self.records().values() {
            match outcome {
                FetchOutcome::Claimed => summary.in_flight += 1,
                FetchOutcome::CapturedViaBrowser => summary.captured += 1,
                FetchOutcome::Downloaded => summary.downloaded += 1,
                FetchOutcome::SkippedExisting => summary.skipped += 1,
                FetchOutcome::Failed => summary.failed += 1,
            }
        }
        summary
    }
}
