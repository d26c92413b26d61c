//! # Checkpoints
//!
//! Durable progress of one run, one JSON document per run id:
//!
//! ```text
//! {dir}/{run_id}.checkpoint.json       current state
//! {dir}/{run_id}.checkpoint.json.bak   previous state
//! {dir}/{run_id}.checkpoint.json.tmp   write in progress
//! ```
//!
//! A save writes the temp file, moves the current file to the backup, then
//! moves the temp file into place. Whatever point a crash interrupts, either
//! the current file or the backup holds a complete document, and
//! [`CheckpointManager::load`] falls back to the backup.
//!
//! Processed and pending sets belong to the current phase and are cleared
//! when the phase advances. Failures accumulate per phase for the whole run.

use crate::phase::SyncPhase;
use crate::{Result, SyncError};
use bridge_traits::{Clock, FileSystemAccess};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

const FORMAT_VERSION: u32 = 1;

// ============================================================================
// Persisted types
// ============================================================================

/// The two relationship writes that can be deferred.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryQueue {
    Hierarchy,
    Linking,
}

impl RetryQueue {
    pub fn as_str(&self) -> &'static str {
        match self {
            RetryQueue::Hierarchy => "hierarchy",
            RetryQueue::Linking => "linking",
        }
    }
}

/// A relationship write postponed by a long rate-limit wait.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeferredEntry {
    /// Destination id that owns the relationship.
    pub target_id: String,
    /// Destination id to attach to the target.
    pub dependent_id: String,
    /// Wait the API asked for when the write was deferred.
    pub retry_after_secs: f64,
}

impl DeferredEntry {
    pub fn new(target_id: impl Into<String>, dependent_id: impl Into<String>, retry_after_secs: f64) -> Self {
        Self {
            target_id: target_id.into(),
            dependent_id: dependent_id.into(),
            retry_after_secs,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointStats {
    pub records_extracted: u64,
    pub records_transformed: u64,
    pub matched: u64,
    pub orphans: u64,
    pub products_written: u64,
    pub media_attached: u64,
    pub hierarchy_links: u64,
    pub canonical_links: u64,
    pub saves: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointState {
    pub version: u32,
    pub run_id: String,
    pub phase: SyncPhase,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub processed: BTreeSet<String>,
    #[serde(default)]
    pub pending: Vec<String>,
    /// Failed item ids per phase name.
    #[serde(default)]
    pub failed: BTreeMap<String, BTreeSet<String>>,
    #[serde(default)]
    pub parent_ids: BTreeSet<String>,
    #[serde(default)]
    pub hierarchy_queue: Vec<DeferredEntry>,
    #[serde(default)]
    pub linking_queue: Vec<DeferredEntry>,
    /// The destination catalog snapshot for matching is persisted.
    #[serde(default)]
    pub derived_index_built: bool,
    #[serde(default)]
    pub stats: CheckpointStats,
    #[serde(default)]
    pub last_error: Option<String>,
}

impl CheckpointState {
    pub fn new(run_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            version: FORMAT_VERSION,
            run_id: run_id.into(),
            phase: SyncPhase::Init,
            created_at: now,
            updated_at: now,
            processed: BTreeSet::new(),
            pending: Vec::new(),
            failed: BTreeMap::new(),
            parent_ids: BTreeSet::new(),
            hierarchy_queue: Vec::new(),
            linking_queue: Vec::new(),
            derived_index_built: false,
            stats: CheckpointStats::default(),
            last_error: None,
        }
    }

    pub fn queue(&self, queue: RetryQueue) -> &Vec<DeferredEntry> {
        match queue {
            RetryQueue::Hierarchy => &self.hierarchy_queue,
            RetryQueue::Linking => &self.linking_queue,
        }
    }

    fn queue_mut(&mut self, queue: RetryQueue) -> &mut Vec<DeferredEntry> {
        match queue {
            RetryQueue::Hierarchy => &mut self.hierarchy_queue,
            RetryQueue::Linking => &mut self.linking_queue,
        }
    }

    pub fn deferred_len(&self) -> usize {
        self.hierarchy_queue.len() + self.linking_queue.len()
    }
}

/// File locations of one run's checkpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointPaths {
    pub primary: PathBuf,
    pub backup: PathBuf,
    pub temp: PathBuf,
}

impl CheckpointPaths {
    pub fn new(dir: &Path, run_id: &str) -> Self {
        let primary = dir.join(format!("{}.checkpoint.json", run_id));
        Self {
            backup: append_extension(&primary, "bak"),
            temp: append_extension(&primary, "tmp"),
            primary,
        }
    }
}

fn append_extension(path: &Path, extension: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".");
    name.push(extension);
    PathBuf::from(name)
}

// ============================================================================
// Manager
// ============================================================================

struct Inner {
    state: CheckpointState,
    /// Items recorded since the last save.
    unsaved: usize,
}

/// Owns the checkpoint of one run.
///
/// All mutation goes through one lock; workers of a phase record progress
/// concurrently without losing or duplicating identifiers.
pub struct CheckpointManager {
    fs: Arc<dyn FileSystemAccess>,
    clock: Arc<dyn Clock>,
    paths: CheckpointPaths,
    save_interval: usize,
    resumed: bool,
    inner: Mutex<Inner>,
    /// Serializes file writes.
    write_lock: Mutex<()>,
}

impl CheckpointManager {
    /// Load the checkpoint of `run_id` from `dir`, or start a fresh one.
    pub async fn open(
        fs: Arc<dyn FileSystemAccess>,
        clock: Arc<dyn Clock>,
        dir: &Path,
        run_id: &str,
        save_interval: usize,
    ) -> Result<Self> {
        fs.create_dir_all(dir).await?;
        let paths = CheckpointPaths::new(dir, run_id);

        let (state, resumed) = match Self::load(fs.as_ref(), &paths).await? {
            Some(state) if state.run_id == run_id => (state, true),
            Some(state) => {
                return Err(SyncError::Checkpoint(format!(
                    "{} belongs to run {}, not {}",
                    paths.primary.display(),
                    state.run_id,
                    run_id
                )));
            }
            None => (CheckpointState::new(run_id, clock.now()), false),
        };

        if resumed {
            info!(
                run_id,
                phase = %state.phase,
                processed = state.processed.len(),
                pending = state.pending.len(),
                deferred = state.deferred_len(),
                "Resuming from checkpoint"
            );
        }

        Ok(Self {
            fs,
            clock,
            paths,
            save_interval: save_interval.max(1),
            resumed,
            inner: Mutex::new(Inner { state, unsaved: 0 }),
            write_lock: Mutex::new(()),
        })
    }

    /// Read the primary file, falling back to the backup when the primary is
    /// missing or unreadable. `None` when neither exists.
    pub async fn load(fs: &dyn FileSystemAccess, paths: &CheckpointPaths) -> Result<Option<CheckpointState>> {
        let mut primary_error = None;

        if fs.exists(&paths.primary).await? {
            match read_state(fs, &paths.primary).await {
                Ok(state) => return Ok(Some(state)),
                Err(e) => {
                    warn!(path = %paths.primary.display(), error = %e, "Checkpoint unreadable, trying backup");
                    primary_error = Some(e);
                }
            }
        }

        if fs.exists(&paths.backup).await? {
            let state = read_state(fs, &paths.backup).await?;
            info!(path = %paths.backup.display(), "Recovered checkpoint from backup");
            return Ok(Some(state));
        }

        match primary_error {
            Some(e) => Err(e),
            None => Ok(None),
        }
    }

    pub fn paths(&self) -> &CheckpointPaths {
        &self.paths
    }

    /// Whether an existing checkpoint was loaded.
    pub fn is_resumed(&self) -> bool {
        self.resumed
    }

    pub async fn snapshot(&self) -> CheckpointState {
        self.inner.lock().await.state.clone()
    }

    pub async fn phase(&self) -> SyncPhase {
        self.inner.lock().await.state.phase
    }

    /// Write the current state.
    pub async fn save(&self) -> Result<()> {
        self.save_with(|| async { Ok(()) }).await
    }

    /// Write the current state, running `before_write` between taking the
    /// snapshot and writing it.
    ///
    /// Anything `before_write` persists is at least as new as the snapshot,
    /// so a companion file saved there never lags the checkpoint.
    pub async fn save_with<F, Fut>(&self, before_write: F) -> Result<()>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let _writing = self.write_lock.lock().await;

        let data = {
            let mut inner = self.inner.lock().await;
            inner.state.updated_at = self.clock.now();
            inner.state.stats.saves += 1;
            inner.unsaved = 0;
            serde_json::to_vec_pretty(&inner.state)?
        };

        before_write().await?;

        self.fs.write_file(&self.paths.temp, Bytes::from(data)).await?;
        if self.fs.exists(&self.paths.primary).await? {
            self.fs.rename(&self.paths.primary, &self.paths.backup).await?;
        }
        self.fs.rename(&self.paths.temp, &self.paths.primary).await?;

        debug!(path = %self.paths.primary.display(), "Checkpoint saved");
        Ok(())
    }

    /// Whether enough items were recorded since the last save.
    pub async fn is_save_due(&self) -> bool {
        self.inner.lock().await.unsaved >= self.save_interval
    }

    /// Claim a due save. Returns `true` to exactly one caller per interval;
    /// the caller is expected to save.
    pub async fn claim_save(&self) -> bool {
        let mut inner = self.inner.lock().await;
        if inner.unsaved >= self.save_interval {
            inner.unsaved = 0;
            true
        } else {
            false
        }
    }

    /// Save when the configured item interval has been reached.
    pub async fn save_if_due(&self) -> Result<bool> {
        if self.claim_save().await {
            self.save().await?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    // ------------------------------------------------------------------------
    // Phase transitions
    // ------------------------------------------------------------------------

    /// Move one step forward, clear the per-phase sets and save.
    pub async fn advance_to(&self, phase: SyncPhase) -> Result<()> {
        {
            let mut inner = self.inner.lock().await;
            inner.state.phase.validate_transition(phase, false)?;
            inner.state.phase = phase;
            inner.state.processed.clear();
            inner.state.pending.clear();
            inner.state.last_error = None;
        }
        self.save().await
    }

    /// Rewind to an earlier phase for a forced rerun and save.
    ///
    /// Failures recorded for the rewound phases are dropped so the rerun
    /// reports only its own.
    pub async fn rewind_to(&self, phase: SyncPhase) -> Result<()> {
        {
            let mut inner = self.inner.lock().await;
            let from = inner.state.phase;
            from.validate_transition(phase, true)?;

            info!(from = %from, to = %phase, "Rewinding checkpoint for forced rerun");
            inner.state.phase = phase;
            inner.state.processed.clear();
            inner.state.pending.clear();
            inner.state.last_error = None;
            inner.state.failed.retain(|name, _| {
                name.parse::<SyncPhase>()
                    .map(|p| p.is_before(phase))
                    .unwrap_or(true)
            });
            if !SyncPhase::Match.is_before(phase) {
                inner.state.derived_index_built = false;
            }
        }
        self.save().await
    }

    /// Record a run-level failure; the phase stays where it is so the next
    /// run resumes there.
    pub async fn record_error(&self, message: impl Into<String>) -> Result<()> {
        self.inner.lock().await.state.last_error = Some(message.into());
        self.save().await
    }

    // ------------------------------------------------------------------------
    // Item sets
    // ------------------------------------------------------------------------

    /// Replace the pending list, leaving out anything already processed.
    pub async fn set_pending(&self, ids: impl IntoIterator<Item = String>) {
        let mut inner = self.inner.lock().await;
        let state = &mut inner.state;
        let mut seen = BTreeSet::new();
        state.pending = ids
            .into_iter()
            .filter(|id| !state.processed.contains(id) && seen.insert(id.clone()))
            .collect();
    }

    pub async fn pending(&self) -> Vec<String> {
        self.inner.lock().await.state.pending.clone()
    }

    pub async fn processed(&self) -> BTreeSet<String> {
        self.inner.lock().await.state.processed.clone()
    }

    pub async fn is_processed(&self, id: &str) -> bool {
        self.inner.lock().await.state.processed.contains(id)
    }

    /// Move `id` from pending to processed. Returns `false` when it was
    /// already processed.
    pub async fn mark_processed(&self, id: &str) -> bool {
        let mut inner = self.inner.lock().await;
        let inserted = inner.state.processed.insert(id.to_string());
        if inserted {
            inner.state.pending.retain(|p| p != id);
            inner.unsaved += 1;
        }
        inserted
    }

    /// Record a failure of `id` in the current phase. The item leaves the
    /// pending list and counts as handled for this phase.
    pub async fn mark_failed(&self, id: &str) {
        let mut inner = self.inner.lock().await;
        let phase = inner.state.phase.as_str().to_string();
        inner.state.failed.entry(phase).or_default().insert(id.to_string());
        inner.state.pending.retain(|p| p != id);
        inner.state.processed.insert(id.to_string());
        inner.unsaved += 1;
    }

    /// Record a failure of `id` against `phase`. Unlike [`mark_failed`],
    /// the pending and processed sets are left alone, which suits writes that
    /// are not items of the current phase, such as replayed deferred links.
    ///
    /// [`mark_failed`]: Self::mark_failed
    pub async fn record_failed_in(&self, phase: SyncPhase, id: &str) {
        let mut inner = self.inner.lock().await;
        inner
            .state
            .failed
            .entry(phase.as_str().to_string())
            .or_default()
            .insert(id.to_string());
        inner.unsaved += 1;
    }

    pub async fn failed_in(&self, phase: SyncPhase) -> BTreeSet<String> {
        self.inner
            .lock()
            .await
            .state
            .failed
            .get(phase.as_str())
            .cloned()
            .unwrap_or_default()
    }

    // ------------------------------------------------------------------------
    // Parents, retry queues, flags, stats
    // ------------------------------------------------------------------------

    pub async fn set_parent_ids(&self, ids: impl IntoIterator<Item = String>) {
        self.inner.lock().await.state.parent_ids.extend(ids);
    }

    pub async fn parent_ids(&self) -> BTreeSet<String> {
        self.inner.lock().await.state.parent_ids.clone()
    }

    pub async fn defer(&self, queue: RetryQueue, entry: DeferredEntry) {
        let mut inner = self.inner.lock().await;
        let entries = inner.state.queue_mut(queue);
        if let Some(existing) = entries
            .iter_mut()
            .find(|e| e.target_id == entry.target_id && e.dependent_id == entry.dependent_id)
        {
            existing.retry_after_secs = entry.retry_after_secs;
        } else {
            entries.push(entry);
        }
        inner.unsaved += 1;
    }

    /// Remove and return every entry of `queue`.
    pub async fn take_queue(&self, queue: RetryQueue) -> Vec<DeferredEntry> {
        std::mem::take(self.inner.lock().await.state.queue_mut(queue))
    }

    pub async fn queue(&self, queue: RetryQueue) -> Vec<DeferredEntry> {
        self.inner.lock().await.state.queue(queue).clone()
    }

    pub async fn deferred_len(&self) -> usize {
        self.inner.lock().await.state.deferred_len()
    }

    pub async fn derived_index_built(&self) -> bool {
        self.inner.lock().await.state.derived_index_built
    }

    pub async fn set_derived_index_built(&self, built: bool) {
        self.inner.lock().await.state.derived_index_built = built;
    }

    pub async fn update_stats<F>(&self, update: F)
    where
        F: FnOnce(&mut CheckpointStats),
    {
        update(&mut self.inner.lock().await.state.stats);
    }
}

async fn read_state(fs: &dyn FileSystemAccess, path: &Path) -> Result<CheckpointState> {
    let data = fs.read_file(path).await?;
    let state: CheckpointState = serde_json::from_slice(&data)?;
    if state.version > FORMAT_VERSION {
        return Err(SyncError::Checkpoint(format!(
            "{} has unsupported version {}",
            path.display(),
            state.version
        )));
    }
    Ok(state)
}
