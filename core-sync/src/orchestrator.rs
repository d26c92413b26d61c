//! # Sync Orchestrator
//!
//! Drives one run through the phase pipeline, resuming from the checkpoint
//! of its run id.
//!
//! ## Workflow
//!
//! 1. Open (or create) the checkpoint; rewind it when a phase is forced
//! 2. Verify the destination relationship types before anything is written
//! 3. For each pipeline phase: skip it when the checkpoint is past it,
//!    otherwise run it and advance the checkpoint. A skipped link phase
//!    still replays writes an earlier run left in its retry queue
//! 4. Stop early after `stop_after`, or when the cancellation token fires
//!
//! Phases run strictly one after another; a phase starts only after the
//! previous transition is saved.
//!
//! ## Usage
//!
//! ```rust,ignore
//! let orchestrator = SyncOrchestrator::new(config, source, destination, fs)?;
//! let report = orchestrator
//!     .run(RunRequest::new("nightly"), CancellationToken::new())
//!     .await?;
//! println!("{} created, {} failed", report.counters.created, report.total_failures());
//! ```

use crate::artifacts::ArtifactStore;
use crate::checkpoint::CheckpointManager;
use crate::context::{PhaseTally, PipelineData, RunContext};
use crate::phase::SyncPhase;
use crate::report::{FailureCategory, PhaseOutcome, PhaseStatus, RunState, SyncReport};
use crate::{extract, load, matching, transform, Result, SyncError};
use bridge_traits::{Clock, DestinationCatalog, FileSystemAccess, SourceCatalog, SystemClock};
use core_runtime::events::{EventBus, SyncEvent};
use core_runtime::SyncConfig;
use core_throttle::{BatchProcessor, RateLimiter, RetryExecutor, RetryPolicy, SharedCooldown};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

const CHECKPOINT_SUBDIR: &str = "checkpoints";

// ============================================================================
// Request
// ============================================================================

/// What to run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunRequest {
    pub run_id: String,
    /// Listings to sync. Empty means every listing from the source report.
    pub source_ids: Vec<String>,
    /// Phases to run again even though the checkpoint is past them.
    pub force_phases: Vec<SyncPhase>,
    /// End the run cleanly once this phase is checkpointed.
    pub stop_after: Option<SyncPhase>,
    /// Rebuild a missing id mapping by searching the destination instead of
    /// failing.
    pub rebuild_from_destination: bool,
}

impl RunRequest {
    pub fn new(run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            ..Self::default()
        }
    }

    /// A request with a fresh random run id.
    pub fn generated() -> Self {
        Self::new(format!("run-{}", Uuid::new_v4()))
    }

    pub fn with_source_ids(mut self, ids: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.source_ids = ids.into_iter().map(Into::into).collect();
        self
    }

    pub fn force(mut self, phase: SyncPhase) -> Self {
        self.force_phases.push(phase);
        self
    }

    pub fn stop_after(mut self, phase: SyncPhase) -> Self {
        self.stop_after = Some(phase);
        self
    }

    pub fn rebuild_from_destination(mut self, rebuild: bool) -> Self {
        self.rebuild_from_destination = rebuild;
        self
    }

    /// Earliest forced pipeline phase.
    fn earliest_forced(&self) -> Option<SyncPhase> {
        self.force_phases
            .iter()
            .copied()
            .filter(|p| SyncPhase::PIPELINE.contains(p))
            .min_by_key(|p| p.ordinal())
    }

    /// Whether the run can get as far as a write phase.
    fn reaches_writes(&self) -> bool {
        self.stop_after
            .map_or(true, |phase| !phase.is_before(SyncPhase::LoadPrimary))
    }
}

/// How the phase loop ended.
enum Flow {
    Completed,
    Stopped(SyncPhase),
    Interrupted(SyncPhase),
}

// ============================================================================
// Orchestrator
// ============================================================================

pub struct SyncOrchestrator {
    config: SyncConfig,
    source: Arc<dyn SourceCatalog>,
    destination: Arc<dyn DestinationCatalog>,
    fs: Arc<dyn FileSystemAccess>,
    clock: Arc<dyn Clock>,
    events: EventBus,
    source_limiter: Arc<RateLimiter>,
    destination_limiter: Arc<RateLimiter>,
    cooldown: Arc<SharedCooldown>,
}

impl SyncOrchestrator {
    pub fn new(
        config: SyncConfig,
        source: Arc<dyn SourceCatalog>,
        destination: Arc<dyn DestinationCatalog>,
        fs: Arc<dyn FileSystemAccess>,
    ) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            source_limiter: Arc::new(RateLimiter::from_settings("source", &config.source_rate)),
            destination_limiter: Arc::new(RateLimiter::from_settings(
                "destination",
                &config.destination_rate,
            )),
            cooldown: Arc::new(SharedCooldown::new()),
            config,
            source,
            destination,
            fs,
            clock: Arc::new(SystemClock),
            events: EventBus::default(),
        })
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_event_bus(mut self, events: EventBus) -> Self {
        self.events = events;
        self
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Directory holding checkpoints and run artifacts.
    pub async fn checkpoint_dir(&self) -> Result<PathBuf> {
        match &self.config.checkpoint_dir {
            Some(dir) => Ok(dir.clone()),
            None => Ok(self.fs.get_data_directory().await?.join(CHECKPOINT_SUBDIR)),
        }
    }

    /// Run (or resume) `request.run_id`.
    ///
    /// A phase that cannot make progress ends the run as `Failed`; the
    /// report carries the error and the checkpoint keeps the phase so the
    /// next invocation resumes there. `Err` is returned only when the run
    /// could not be set up at all.
    #[instrument(skip(self, request, cancel), fields(run_id = %request.run_id))]
    pub async fn run(&self, request: RunRequest, cancel: CancellationToken) -> Result<SyncReport> {
        if request.run_id.trim().is_empty() {
            return Err(SyncError::Checkpoint("run id must not be empty".to_string()));
        }

        let dir = self.checkpoint_dir().await?;
        let checkpoint = CheckpointManager::open(
            Arc::clone(&self.fs),
            Arc::clone(&self.clock),
            &dir,
            &request.run_id,
            self.config.batch.checkpoint_interval,
        )
        .await?;
        let resumed = checkpoint.is_resumed();

        let ctx = self.context(&request, &dir, checkpoint, cancel, resumed);
        let started = Instant::now();

        if let Some(forced) = request.earliest_forced() {
            if forced.is_before(ctx.checkpoint.phase().await) {
                ctx.checkpoint.rewind_to(forced).await?;
            }
        }
        if ctx.checkpoint.phase().await == SyncPhase::Init {
            ctx.checkpoint.advance_to(SyncPhase::Extract).await?;
        }

        let start_phase = ctx.checkpoint.phase().await;
        info!(resumed, phase = %start_phase, "Sync run started");
        ctx.emit(SyncEvent::RunStarted {
            run_id: ctx.run_id.clone(),
            resumed,
            phase: start_phase.as_str().to_string(),
        });

        let mut data = PipelineData::default();
        let flow = self.drive(&ctx, &mut data, &request).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        let (final_phase, error) = match flow {
            Ok(Flow::Completed) => {
                info!(duration_ms = elapsed_ms, "Sync run completed");
                ctx.emit(SyncEvent::RunCompleted {
                    run_id: ctx.run_id.clone(),
                    duration_ms: elapsed_ms,
                });
                (SyncPhase::Complete, None)
            }
            Ok(Flow::Stopped(next)) => {
                info!(next_phase = %next, "Sync run stopped as requested");
                (next, None)
            }
            Ok(Flow::Interrupted(phase)) => {
                ctx.checkpoint.save().await?;
                warn!(phase = %phase, "Sync run interrupted, checkpoint flushed");
                ctx.emit(SyncEvent::RunInterrupted {
                    run_id: ctx.run_id.clone(),
                    phase: phase.as_str().to_string(),
                });
                (phase, None)
            }
            Err(e) => {
                let phase = ctx.checkpoint.phase().await;
                error!(phase = %phase, error = %e, "Sync run failed");
                ctx.state.lock().await.record_failure(
                    phase,
                    phase.as_str(),
                    run_failure_category(&e),
                    e.to_string(),
                );
                if let Err(save_error) = ctx.checkpoint.record_error(e.to_string()).await {
                    warn!(error = %save_error, "Could not record failure in checkpoint");
                }
                ctx.emit(SyncEvent::RunFailed {
                    run_id: ctx.run_id.clone(),
                    phase: phase.as_str().to_string(),
                    message: e.to_string(),
                });
                (SyncPhase::Failed, Some(e.to_string()))
            }
        };

        let pending_deferred = ctx.checkpoint.deferred_len().await;
        let finished_at = self.clock.now();
        Ok(ctx
            .state
            .into_inner()
            .finalize(final_phase, finished_at, pending_deferred, error))
    }

    fn context(
        &self,
        request: &RunRequest,
        dir: &std::path::Path,
        checkpoint: CheckpointManager,
        cancel: CancellationToken,
        resumed: bool,
    ) -> RunContext {
        let policy = RetryPolicy::from_settings(&self.config.retry);
        let source_exec = RetryExecutor::new(
            "source",
            policy.clone(),
            Arc::clone(&self.source_limiter),
            Arc::clone(&self.cooldown),
        );
        let destination_exec = RetryExecutor::new(
            "destination",
            policy,
            Arc::clone(&self.destination_limiter),
            Arc::clone(&self.cooldown),
        );

        RunContext {
            run_id: request.run_id.clone(),
            config: self.config.clone(),
            source: Arc::clone(&self.source),
            destination: Arc::clone(&self.destination),
            source_batch: BatchProcessor::new(
                self.config.batch.chunk_size,
                self.config.batch.inter_chunk_delay(),
                source_exec,
            ),
            destination_exec,
            checkpoint,
            artifacts: ArtifactStore::new(Arc::clone(&self.fs), dir, &request.run_id),
            state: Mutex::new(RunState::new(&request.run_id, resumed, self.clock.now())),
            events: self.events.clone(),
            cancel,
            rebuild_from_destination: request.rebuild_from_destination,
        }
    }

    async fn drive(&self, ctx: &RunContext, data: &mut PipelineData, request: &RunRequest) -> Result<Flow> {
        let current = ctx.checkpoint.phase().await;
        if current != SyncPhase::Complete && request.reaches_writes() {
            self.verify_relationships(ctx).await?;
        }

        for phase in SyncPhase::PIPELINE {
            if phase.is_before(ctx.checkpoint.phase().await) {
                let started = Instant::now();
                match load::replay_deferred(ctx, phase).await? {
                    Some(_) if ctx.is_cancelled() => {
                        return Ok(Flow::Interrupted(ctx.checkpoint.phase().await));
                    }
                    Some(tally) => {
                        let duration_ms = self
                            .record_outcome(ctx, phase, PhaseStatus::Completed, tally, started)
                            .await;
                        info!(
                            phase = %phase,
                            succeeded = tally.succeeded,
                            failed = tally.failed,
                            deferred = tally.deferred,
                            "Deferred writes replayed"
                        );
                        ctx.emit(SyncEvent::PhaseCompleted {
                            run_id: ctx.run_id.clone(),
                            phase: phase.as_str().to_string(),
                            succeeded: tally.succeeded,
                            failed: tally.failed,
                            deferred: tally.deferred,
                            duration_ms,
                        });
                    }
                    None => {
                        info!(phase = %phase, "Phase already completed, skipping");
                        ctx.state.lock().await.record_phase(PhaseOutcome::skipped(phase));
                        ctx.emit(SyncEvent::PhaseSkipped {
                            run_id: ctx.run_id.clone(),
                            phase: phase.as_str().to_string(),
                        });
                    }
                }
                continue;
            }

            if ctx.is_cancelled() {
                return Ok(Flow::Interrupted(phase));
            }

            info!(phase = %phase, "Phase started");
            ctx.emit(SyncEvent::PhaseStarted {
                run_id: ctx.run_id.clone(),
                phase: phase.as_str().to_string(),
            });
            let started = Instant::now();

            let tally = match self.run_phase(ctx, data, request, phase).await {
                Ok(tally) => tally,
                Err(e) => {
                    self.record_outcome(ctx, phase, PhaseStatus::Failed, PhaseTally::default(), started)
                        .await;
                    return Err(e);
                }
            };

            if ctx.is_cancelled() {
                self.record_outcome(ctx, phase, PhaseStatus::Interrupted, tally, started)
                    .await;
                return Ok(Flow::Interrupted(phase));
            }

            let duration_ms = self
                .record_outcome(ctx, phase, PhaseStatus::Completed, tally, started)
                .await;
            info!(
                phase = %phase,
                succeeded = tally.succeeded,
                failed = tally.failed,
                deferred = tally.deferred,
                duration_ms,
                "Phase completed"
            );
            ctx.emit(SyncEvent::PhaseCompleted {
                run_id: ctx.run_id.clone(),
                phase: phase.as_str().to_string(),
                succeeded: tally.succeeded,
                failed: tally.failed,
                deferred: tally.deferred,
                duration_ms,
            });

            let next = phase.next().unwrap_or(SyncPhase::Complete);
            ctx.checkpoint.advance_to(next).await?;

            if request.stop_after == Some(phase) && next != SyncPhase::Complete {
                return Ok(Flow::Stopped(next));
            }
        }

        Ok(Flow::Completed)
    }

    async fn run_phase(
        &self,
        ctx: &RunContext,
        data: &mut PipelineData,
        request: &RunRequest,
        phase: SyncPhase,
    ) -> Result<PhaseTally> {
        match phase {
            SyncPhase::Extract => extract::run(ctx, data, &request.source_ids).await,
            SyncPhase::Transform => transform::run(ctx, data).await,
            SyncPhase::Match => matching::run(ctx, data).await,
            SyncPhase::LoadPrimary => load::primary(ctx, data).await,
            SyncPhase::LoadMedia => load::media(ctx, data).await,
            SyncPhase::LoadHierarchy => load::hierarchy(ctx, data).await,
            SyncPhase::LoadLinking => load::linking(ctx, data).await,
            SyncPhase::Init | SyncPhase::Complete | SyncPhase::Failed => {
                Err(SyncError::InvalidPhase(phase.as_str().to_string()))
            }
        }
    }

    async fn record_outcome(
        &self,
        ctx: &RunContext,
        phase: SyncPhase,
        status: PhaseStatus,
        tally: PhaseTally,
        started: Instant,
    ) -> u64 {
        let duration_ms = started.elapsed().as_millis() as u64;
        ctx.state.lock().await.record_phase(PhaseOutcome {
            phase,
            status,
            succeeded: tally.succeeded,
            failed: tally.failed,
            deferred: tally.deferred,
            duration_ms,
        });
        duration_ms
    }

    /// Fail before any write when the destination lacks a relationship type
    /// the load phases need.
    async fn verify_relationships(&self, ctx: &RunContext) -> Result<()> {
        let load = &self.config.load;
        if !load.fail_fast_on_missing_relationship {
            return Ok(());
        }

        let available = ctx
            .destination_exec
            .execute(|| ctx.destination.relationship_types())
            .await?;

        for required in [&load.hierarchy_relationship, &load.canonical_relationship] {
            if !available.iter().any(|name| name == required) {
                error!(relationship = %required, available = ?available, "Required relationship type missing");
                return Err(SyncError::MissingRelationship(required.clone()));
            }
        }
        Ok(())
    }
}

fn run_failure_category(error: &SyncError) -> FailureCategory {
    match error {
        SyncError::MissingRelationship(_) | SyncError::Config(_) => FailureCategory::Structural,
        SyncError::ArtifactMissing { .. } | SyncError::Checkpoint(_) => FailureCategory::ResumeIntegrity,
        SyncError::Throttle(e) if e.is_rate_limit_exceeded() => FailureCategory::RateLimited,
        SyncError::Throttle(_) | SyncError::Bridge(_) => FailureCategory::Transient,
        _ => FailureCategory::Rejected,
    }
}
