//! Triage of steps no rule understands.
//!
//! Each unmatched step is fingerprinted by the SHA-256 of its exact text and
//! looked up in the issue tracker so the same gap is filed once, however
//! many scenarios or runs hit it. Triage never fails the caller: tracker
//! trouble is logged and reflected in the outcome, nothing more.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

use crate::error::{EngineError, EngineResult};
use crate::matcher::UnmatchedStep;
use crate::report::UnmatchedReport;

/// Stable fingerprint of a step's exact text
pub fn fingerprint(step_text: &str) -> String {
    hex::encode(Sha256::digest(step_text.as_bytes()))
}

/// Body text of a newly filed record
pub fn record_summary(scenario_key: &str, step_text: &str) -> String {
    format!(
        "From {} - Create a test step for: \n\n{}",
        scenario_key, step_text
    )
}

/// An open tracker record for a fingerprint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackingRecord {
    pub id: String,
    pub fingerprint: String,
}

#[async_trait]
pub trait IssueTracker: Send + Sync {
    /// Open record carrying this fingerprint, if any
    async fn find_by_fingerprint(&self, fingerprint: &str) -> EngineResult<Option<TrackingRecord>>;

    /// File a record; returns its id
    async fn create_record(&self, fingerprint: &str, summary: &str) -> EngineResult<String>;
}

/// What triage did with one unmatched step
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TriageOutcome {
    AlreadyTracked { fingerprint: String, record: String },
    Filed { fingerprint: String, record: String },
    CreationDisabled { fingerprint: String },
    TrackerUnavailable { fingerprint: String, reason: String },
}

impl TriageOutcome {
    pub fn fingerprint(&self) -> &str {
        match self {
            Self::AlreadyTracked { fingerprint, .. }
            | Self::Filed { fingerprint, .. }
            | Self::CreationDisabled { fingerprint }
            | Self::TrackerUnavailable { fingerprint, .. } => fingerprint,
        }
    }

    /// Second line of the report entry
    pub fn report_line(&self) -> String {
        match self {
            Self::AlreadyTracked { fingerprint, record } => {
                format!("Existing ticket: {} ({})", record, fingerprint)
            }
            Self::Filed { fingerprint, record } => {
                format!("New ticket created: {} ({})", record, fingerprint)
            }
            Self::CreationDisabled { .. } => "Ticket creation skipped by config".to_string(),
            Self::TrackerUnavailable { fingerprint, reason } => {
                format!("Tracker unavailable, no ticket for {}: {}", fingerprint, reason)
            }
        }
    }
}

pub struct Triage {
    tracker: Arc<dyn IssueTracker>,
    create_new: bool,
    report: UnmatchedReport,
    /// Fingerprints filed during this run and their record ids
    filed: HashMap<String, String>,
}

impl Triage {
    pub fn new(tracker: Arc<dyn IssueTracker>, create_new: bool, report: UnmatchedReport) -> Self {
        Self {
            tracker,
            create_new,
            report,
            filed: HashMap::new(),
        }
    }

    pub fn report(&self) -> &UnmatchedReport {
        &self.report
    }

    /// Triage one unmatched step and append it to the report
    pub async fn triage(&mut self, scenario_key: &str, step_text: &str) -> TriageOutcome {
        let fingerprint = fingerprint(step_text);
        let outcome = self.classify(scenario_key, step_text, fingerprint).await;
        self.report.append(step_text, &outcome);
        outcome
    }

    pub async fn triage_all(
        &mut self,
        scenario_key: &str,
        unmatched: &[UnmatchedStep],
    ) -> Vec<TriageOutcome> {
        let mut outcomes = Vec::with_capacity(unmatched.len());
        for step in unmatched {
            outcomes.push(self.triage(scenario_key, &step.text).await);
        }
        outcomes
    }

    async fn classify(
        &mut self,
        scenario_key: &str,
        step_text: &str,
        fingerprint: String,
    ) -> TriageOutcome {
        if let Some(record) = self.filed.get(&fingerprint) {
            return TriageOutcome::AlreadyTracked {
                record: record.clone(),
                fingerprint,
            };
        }

        match self.tracker.find_by_fingerprint(&fingerprint).await {
            Ok(Some(existing)) => {
                info!("Step already tracked as {}: {}", existing.id, fingerprint);
                TriageOutcome::AlreadyTracked {
                    fingerprint,
                    record: existing.id,
                }
            }
            Ok(None) if !self.create_new => {
                info!("No ticket for {}, creation disabled", fingerprint);
                TriageOutcome::CreationDisabled { fingerprint }
            }
            Ok(None) => {
                let summary = record_summary(scenario_key, step_text);
                match self.tracker.create_record(&fingerprint, &summary).await {
                    Ok(record) => {
                        info!("Filed {} for unmatched step {}", record, fingerprint);
                        self.filed.insert(fingerprint.clone(), record.clone());
                        TriageOutcome::Filed {
                            fingerprint,
                            record,
                        }
                    }
                    Err(e) => {
                        warn!("Could not file ticket for {}: {}", fingerprint, e);
                        TriageOutcome::TrackerUnavailable {
                            fingerprint,
                            reason: e.to_string(),
                        }
                    }
                }
            }
            Err(e) => {
                warn!("Tracker lookup for {} failed: {}", fingerprint, e);
                TriageOutcome::TrackerUnavailable {
                    fingerprint,
                    reason: e.to_string(),
                }
            }
        }
    }
}

/// A created record, as held by `InMemoryTracker`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredRecord {
    pub id: String,
    pub fingerprint: String,
    pub summary: String,
}

/// Tracker kept in process memory; used for offline runs and tests
#[derive(Default)]
pub struct InMemoryTracker {
    records: Mutex<Vec<StoredRecord>>,
    next_id: AtomicU32,
    unreachable: AtomicBool,
    /// When set, lookups never see records (a search index that lags)
    lagging: AtomicBool,
}

impl InMemoryTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    pub fn set_lagging(&self, lagging: bool) {
        self.lagging.store(lagging, Ordering::SeqCst);
    }

    pub fn records(&self) -> Vec<StoredRecord> {
        self.records.lock().clone()
    }

    fn check_reachable(&self) -> EngineResult<()> {
        if self.unreachable.load(Ordering::SeqCst) {
            Err(EngineError::Tracker("tracker is unreachable".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl IssueTracker for InMemoryTracker {
    async fn find_by_fingerprint(&self, fingerprint: &str) -> EngineResult<Option<TrackingRecord>> {
        self.check_reachable()?;
        if self.lagging.load(Ordering::SeqCst) {
            return Ok(None);
        }
        Ok(self
            .records
            .lock()
            .iter()
            .find(|r| r.fingerprint == fingerprint)
            .map(|r| TrackingRecord {
                id: r.id.clone(),
                fingerprint: r.fingerprint.clone(),
            }))
    }

    async fn create_record(&self, fingerprint: &str, summary: &str) -> EngineResult<String> {
        self.check_reachable()?;
        let id = format!("MEM-{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        self.records.lock().push(StoredRecord {
            id: id.clone(),
            fingerprint: fingerprint.to_string(),
            summary: summary.to_string(),
        });
        Ok(id)
    }
}
