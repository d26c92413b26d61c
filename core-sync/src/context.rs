//! State shared by the phases of one orchestrator invocation.

use crate::artifacts::{Artifact, ArtifactStore};
use crate::checkpoint::CheckpointManager;
use crate::phase::SyncPhase;
use crate::report::{FailureCategory, RunState};
use crate::{Result, SyncError};
use bridge_traits::{BridgeError, CatalogEntry, DestinationCatalog, SearchFilter, SourceCatalog};
use core_catalog::{DestinationRecord, IdMapping, MatchResult, SourceRecord};
use core_runtime::events::{EventBus, SyncEvent};
use core_runtime::SyncConfig;
use core_throttle::{BatchProcessor, RetryExecutor, ThrottleError};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Counts a phase reports on completion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct PhaseTally {
    pub succeeded: u64,
    pub failed: u64,
    pub deferred: u64,
}

/// Outputs of earlier phases, filled lazily from the artifact store on
/// resume.
#[derive(Debug, Default)]
pub(crate) struct PipelineData {
    pub records: Option<Vec<SourceRecord>>,
    pub transformed: Option<Vec<DestinationRecord>>,
    pub matches: Option<Vec<MatchResult>>,
    pub mapping: Option<IdMapping>,
}

pub(crate) struct RunContext {
    pub run_id: String,
    pub config: SyncConfig,
    pub source: Arc<dyn SourceCatalog>,
    pub destination: Arc<dyn DestinationCatalog>,
    /// Source fetches, chunked.
    pub source_batch: BatchProcessor,
    /// Destination writes and searches.
    pub destination_exec: RetryExecutor,
    pub checkpoint: CheckpointManager,
    pub artifacts: ArtifactStore,
    pub state: Mutex<RunState>,
    pub events: EventBus,
    pub cancel: CancellationToken,
    pub rebuild_from_destination: bool,
}

impl RunContext {
    pub fn emit(&self, event: SyncEvent) {
        self.events.emit(event).ok();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn progress(&self, phase: SyncPhase, processed: u64, total: u64) {
        self.emit(SyncEvent::Progress {
            run_id: self.run_id.clone(),
            phase: phase.as_str().to_string(),
            processed,
            total,
        });
    }

    /// Record an item that will not be retried in this phase.
    pub async fn fail_item(
        &self,
        phase: SyncPhase,
        item_id: &str,
        category: FailureCategory,
        message: impl Into<String>,
    ) {
        let message = message.into();
        warn!(
            run_id = %self.run_id,
            phase = %phase,
            item_id,
            category = category.as_str(),
            error = %message,
            "Item failed"
        );
        self.checkpoint.mark_failed(item_id).await;
        self.state
            .lock()
            .await
            .record_failure(phase, item_id, category, message);
    }

    pub fn missing_artifact(&self, artifact: Artifact, phase: SyncPhase) -> SyncError {
        SyncError::ArtifactMissing {
            run_id: self.run_id.clone(),
            artifact: artifact.name().to_string(),
            phase: phase.as_str().to_string(),
        }
    }

    /// Page through every destination entry matching `filter`.
    pub async fn search_all(&self, filter: &SearchFilter) -> Result<Vec<CatalogEntry>> {
        let page_size = self.config.load.search_page_size;
        let mut entries = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let page = self
                .destination_exec
                .execute(|| self.destination.search(filter, cursor.as_deref(), page_size))
                .await?;
            entries.extend(page.entries);

            match page.next_cursor {
                Some(next) if cursor.as_deref() == Some(next.as_str()) => {
                    warn!(cursor = %next, "Search cursor did not advance, stopping");
                    break;
                }
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        debug!(entries = entries.len(), filter = ?filter, "Destination search finished");
        Ok(entries)
    }

    // ------------------------------------------------------------------------
    // Upstream outputs
    // ------------------------------------------------------------------------

    pub async fn records<'a>(&self, data: &'a mut PipelineData, phase: SyncPhase) -> Result<&'a [SourceRecord]> {
        if data.records.is_none() {
            let loaded = self
                .artifacts
                .load_raw_records()
                .await?
                .ok_or_else(|| self.missing_artifact(Artifact::RawRecords, phase))?;
            data.records = Some(loaded);
        }
        Ok(data.records.as_deref().unwrap_or_default())
    }

    pub async fn transformed<'a>(
        &self,
        data: &'a mut PipelineData,
        phase: SyncPhase,
    ) -> Result<&'a mut Vec<DestinationRecord>> {
        if data.transformed.is_none() {
            let loaded = self
                .artifacts
                .load_transformed()
                .await?
                .ok_or_else(|| self.missing_artifact(Artifact::TransformedRecords, phase))?;
            data.transformed = Some(loaded);
        }
        Ok(data.transformed.get_or_insert_with(Vec::new))
    }

    pub async fn matches<'a>(&self, data: &'a mut PipelineData, phase: SyncPhase) -> Result<&'a [MatchResult]> {
        if data.matches.is_none() {
            let loaded = self
                .artifacts
                .load_match_results()
                .await?
                .ok_or_else(|| self.missing_artifact(Artifact::MatchResults, phase))?;
            data.matches = Some(loaded);
        }
        Ok(data.matches.as_deref().unwrap_or_default())
    }

    /// Source id to destination id. Falls back to a destination search when
    /// the artifact is gone and rebuilding was requested.
    pub async fn mapping<'a>(&self, data: &'a mut PipelineData, phase: SyncPhase) -> Result<&'a IdMapping> {
        if data.mapping.is_none() {
            let loaded = match self.artifacts.load_id_mapping().await? {
                Some(mapping) => mapping,
                None if self.rebuild_from_destination => {
                    let mapping = self.rebuild_mapping().await?;
                    self.artifacts.save_id_mapping(&mapping).await?;
                    mapping
                }
                None => return Err(self.missing_artifact(Artifact::IdMapping, phase)),
            };
            data.mapping = Some(loaded);
        }
        Ok(data.mapping.get_or_insert_with(IdMapping::new))
    }

    async fn rebuild_mapping(&self) -> Result<IdMapping> {
        let prefix = &self.config.load.source_key_prefix;
        let key_field = &self.config.matching.catalog_fields.sku;
        let entries = self
            .search_all(&SearchFilter::KeyPrefix(prefix.clone()))
            .await?;

        let mapping: IdMapping = entries
            .iter()
            .filter_map(|entry| {
                let source_id = entry.field(key_field)?.strip_prefix(prefix.as_str())?;
                Some((source_id.to_string(), entry.id.clone()))
            })
            .collect();

        info!(run_id = %self.run_id, products = mapping.len(), "Rebuilt id mapping from destination");
        Ok(mapping)
    }
}

/// Failure bucket for an error that came out of a retry executor.
pub(crate) fn classify(error: &ThrottleError<BridgeError>) -> FailureCategory {
    match error {
        ThrottleError::Exhausted { .. } => FailureCategory::Transient,
        ThrottleError::RateLimitExceeded { .. } => FailureCategory::RateLimited,
        ThrottleError::Fatal(BridgeError::InvalidRequest(_)) => FailureCategory::InvalidRecord,
        ThrottleError::Fatal(_) => FailureCategory::Rejected,
    }
}
