//! Run bookkeeping and the final report.

use crate::phase::SyncPhase;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Why an item did not make it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCategory {
    /// Retries exhausted on a transient error.
    Transient,
    /// The API asked for a longer wait than allowed and the item could not
    /// be deferred.
    RateLimited,
    /// The collaborator rejected the item outright.
    Rejected,
    /// Bad or incomplete record data.
    InvalidRecord,
    /// Required destination setup is missing.
    Structural,
    /// Persisted state needed to resume is missing.
    ResumeIntegrity,
}

impl FailureCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureCategory::Transient => "transient",
            FailureCategory::RateLimited => "rate_limited",
            FailureCategory::Rejected => "rejected",
            FailureCategory::InvalidRecord => "invalid_record",
            FailureCategory::Structural => "structural",
            FailureCategory::ResumeIntegrity => "resume_integrity",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub phase: SyncPhase,
    pub item_id: String,
    pub category: FailureCategory,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseStatus {
    Completed,
    Skipped,
    Interrupted,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseOutcome {
    pub phase: SyncPhase,
    pub status: PhaseStatus,
    pub succeeded: u64,
    pub failed: u64,
    pub deferred: u64,
    pub duration_ms: u64,
}

impl PhaseOutcome {
    pub fn skipped(phase: SyncPhase) -> Self {
        Self {
            phase,
            status: PhaseStatus::Skipped,
            succeeded: 0,
            failed: 0,
            deferred: 0,
            duration_ms: 0,
        }
    }
}

/// Aggregate counters of one invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunCounters {
    pub extracted: u64,
    pub parents_discovered: u64,
    pub transformed: u64,
    pub matched: u64,
    pub orphans: u64,
    pub created: u64,
    pub updated: u64,
    pub media_attached: u64,
    pub hierarchy_links: u64,
    pub canonical_links: u64,
    pub deferred: u64,
}

/// Mutable state of a run in progress.
///
/// Consumed by [`RunState::finalize`], so a run is reported once.
#[derive(Debug)]
pub struct RunState {
    run_id: String,
    resumed: bool,
    started_at: DateTime<Utc>,
    pub counters: RunCounters,
    phases: Vec<PhaseOutcome>,
    failures: Vec<FailureRecord>,
}

impl RunState {
    pub fn new(run_id: impl Into<String>, resumed: bool, started_at: DateTime<Utc>) -> Self {
        Self {
            run_id: run_id.into(),
            resumed,
            started_at,
            counters: RunCounters::default(),
            phases: Vec::new(),
            failures: Vec::new(),
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn record_failure(
        &mut self,
        phase: SyncPhase,
        item_id: impl Into<String>,
        category: FailureCategory,
        message: impl Into<String>,
    ) {
        self.failures.push(FailureRecord {
            phase,
            item_id: item_id.into(),
            category,
            message: message.into(),
        });
    }

    pub fn failures_in(&self, phase: SyncPhase) -> u64 {
        self.failures.iter().filter(|f| f.phase == phase).count() as u64
    }

    pub fn record_phase(&mut self, outcome: PhaseOutcome) {
        self.phases.push(outcome);
    }

    pub fn finalize(
        self,
        final_phase: SyncPhase,
        finished_at: DateTime<Utc>,
        pending_deferred: usize,
        error: Option<String>,
    ) -> SyncReport {
        let mut failures: BTreeMap<FailureCategory, Vec<FailureRecord>> = BTreeMap::new();
        for failure in self.failures {
            failures.entry(failure.category).or_default().push(failure);
        }

        SyncReport {
            run_id: self.run_id,
            resumed: self.resumed,
            final_phase,
            started_at: self.started_at,
            finished_at,
            counters: self.counters,
            phases: self.phases,
            failures,
            pending_deferred,
            error,
        }
    }
}

/// Outcome of one orchestrator invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncReport {
    pub run_id: String,
    pub resumed: bool,
    /// `Complete` on success, `Failed` on error, otherwise the phase the
    /// checkpoint will resume from (stop-after or interrupt).
    pub final_phase: SyncPhase,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub counters: RunCounters,
    pub phases: Vec<PhaseOutcome>,
    pub failures: BTreeMap<FailureCategory, Vec<FailureRecord>>,
    /// Relationship writes still waiting in the retry queues.
    pub pending_deferred: usize,
    pub error: Option<String>,
}

impl SyncReport {
    pub fn is_complete(&self) -> bool {
        self.final_phase == SyncPhase::Complete
    }

    pub fn total_failures(&self) -> usize {
        self.failures.values().map(Vec::len).sum()
    }

    /// Item ids that failed with `category`, for a targeted re-run.
    pub fn failed_ids(&self, category: FailureCategory) -> BTreeSet<String> {
        self.failures
            .get(&category)
            .map(|items| items.iter().map(|f| f.item_id.clone()).collect())
            .unwrap_or_default()
    }

    pub fn phase(&self, phase: SyncPhase) -> Option<&PhaseOutcome> {
        self.phases.iter().rev().find(|outcome| outcome.phase == phase)
    }
}
