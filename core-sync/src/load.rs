//! # Load Phases
//!
//! Writes to the destination, one phase each for products, media, variation
//! hierarchy and canonical links. Items of a phase run on a small worker
//! pool; every call goes through the destination executor, so the token
//! bucket and shared cooldown bound the pool as a whole.
//!
//! Relationship writes the API wants to postpone beyond the maximum wait
//! are parked in the checkpoint's retry queues and retried once at the end
//! of their phase, after a cooldown. A resumed run replays whatever the
//! queues still hold, even when their phase is already behind it.

use crate::checkpoint::{DeferredEntry, RetryQueue};
use crate::context::{classify, PhaseTally, PipelineData, RunContext};
use crate::phase::SyncPhase;
use crate::Result;
use core_catalog::{DestinationRecord, IdMapping};
use core_runtime::events::SyncEvent;
use core_throttle::{run_bounded, ThrottleError};
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::sleep;
use tracing::{debug, info, instrument, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ItemResult {
    Done,
    Failed,
    Deferred,
}

fn tally(results: Vec<Result<ItemResult>>) -> Result<PhaseTally> {
    let mut tally = PhaseTally::default();
    for result in results {
        match result? {
            ItemResult::Done => tally.succeeded += 1,
            ItemResult::Failed => tally.failed += 1,
            ItemResult::Deferred => tally.deferred += 1,
        }
    }
    Ok(tally)
}

/// Counts finished items for progress events.
struct Progress<'a> {
    ctx: &'a RunContext,
    phase: SyncPhase,
    done: AtomicU64,
    total: u64,
}

impl<'a> Progress<'a> {
    fn new(ctx: &'a RunContext, phase: SyncPhase, total: usize) -> Self {
        Self {
            ctx,
            phase,
            done: AtomicU64::new(0),
            total: total as u64,
        }
    }

    fn tick(&self) {
        let done = self.done.fetch_add(1, Ordering::Relaxed) + 1;
        self.ctx.progress(self.phase, done, self.total);
    }
}

// ============================================================================
// Primary
// ============================================================================

/// Create or update one product per transformed record.
#[instrument(skip_all, fields(run_id = %ctx.run_id))]
pub(crate) async fn primary(ctx: &RunContext, data: &mut PipelineData) -> Result<PhaseTally> {
    const PHASE: SyncPhase = SyncPhase::LoadPrimary;

    let mapping = if ctx.checkpoint.processed().await.is_empty() {
        ctx.artifacts.load_id_mapping().await?.unwrap_or_default()
    } else {
        ctx.mapping(data, PHASE).await?.clone()
    };

    let records = ctx.transformed(data, PHASE).await?.clone();
    ctx.checkpoint
        .set_pending(records.iter().map(|r| r.source_id.clone()))
        .await;
    let pending: HashSet<String> = ctx.checkpoint.pending().await.into_iter().collect();
    let work: Vec<DestinationRecord> = records
        .into_iter()
        .filter(|r| pending.contains(&r.source_id))
        .collect();

    info!(products = work.len(), "Writing products");
    let mapping = Mutex::new(mapping);
    let progress = Progress::new(ctx, PHASE, work.len());

    let results = run_bounded(work, ctx.config.batch.workers, &ctx.cancel, |record| {
        write_product(ctx, &mapping, &progress, record)
    })
    .await;
    let tally = tally(results);

    // Persist the mapping even when a worker failed, so the next run knows
    // which products exist.
    let mapping = mapping.into_inner();
    ctx.artifacts.save_id_mapping(&mapping).await?;
    let tally = tally?;

    let written = mapping.len() as u64;
    ctx.checkpoint.update_stats(|s| s.products_written = written).await;
    data.mapping = Some(mapping);
    Ok(tally)
}

async fn write_product(
    ctx: &RunContext,
    mapping: &Mutex<IdMapping>,
    progress: &Progress<'_>,
    record: DestinationRecord,
) -> Result<ItemResult> {
    const PHASE: SyncPhase = SyncPhase::LoadPrimary;

    let payload = record.payload();
    let known_id = match record.id.clone() {
        Some(id) => Some(id),
        None => mapping.lock().await.get(&record.source_id).cloned(),
    };

    let written = match known_id {
        Some(id) => ctx
            .destination_exec
            .execute(|| ctx.destination.update_product(&id, &payload))
            .await
            .map(|_| (id.clone(), false)),
        None => ctx
            .destination_exec
            .execute(|| ctx.destination.create_product(&payload))
            .await
            .map(|id| (id, true)),
    };

    let result = match written {
        Ok((id, created)) => {
            debug!(source_id = %record.source_id, product_id = %id, created, "Product written");
            mapping.lock().await.insert(record.source_id.clone(), id);
            ctx.checkpoint.mark_processed(&record.source_id).await;
            let mut state = ctx.state.lock().await;
            if created {
                state.counters.created += 1;
            } else {
                state.counters.updated += 1;
            }
            ItemResult::Done
        }
        Err(e) => {
            ctx.fail_item(PHASE, &record.source_id, classify(&e), e.to_string())
                .await;
            ItemResult::Failed
        }
    };

    // The mapping is copied after the checkpoint snapshot is taken, so a
    // saved checkpoint never lists a product whose id is unknown.
    if ctx.checkpoint.claim_save().await {
        ctx.checkpoint
            .save_with(|| async {
                let snapshot = mapping.lock().await.clone();
                ctx.artifacts.save_id_mapping(&snapshot).await
            })
            .await?;
    }

    progress.tick();
    Ok(result)
}

// ============================================================================
// Media
// ============================================================================

/// Attach the listing images of every written product.
#[instrument(skip_all, fields(run_id = %ctx.run_id))]
pub(crate) async fn media(ctx: &RunContext, data: &mut PipelineData) -> Result<PhaseTally> {
    const PHASE: SyncPhase = SyncPhase::LoadMedia;

    let mapping = ctx.mapping(data, PHASE).await?.clone();
    let records = ctx.records(data, PHASE).await?;

    let work: Vec<(String, String, Vec<String>)> = records
        .iter()
        .filter(|r| !r.image_urls.is_empty())
        .filter_map(|r| {
            let product_id = mapping.get(&r.external_id)?;
            Some((r.external_id.clone(), product_id.clone(), r.image_urls.clone()))
        })
        .collect();

    ctx.checkpoint
        .set_pending(work.iter().map(|(source_id, _, _)| source_id.clone()))
        .await;
    let pending: HashSet<String> = ctx.checkpoint.pending().await.into_iter().collect();
    let work: Vec<_> = work
        .into_iter()
        .filter(|(source_id, _, _)| pending.contains(source_id))
        .collect();

    info!(products = work.len(), "Attaching media");
    let progress = Progress::new(ctx, PHASE, work.len());

    let results = run_bounded(work, ctx.config.batch.workers, &ctx.cancel, |(source_id, product_id, urls)| {
        attach_images(ctx, &progress, source_id, product_id, urls)
    })
    .await;
    tally(results)
}

async fn attach_images(
    ctx: &RunContext,
    progress: &Progress<'_>,
    source_id: String,
    product_id: String,
    urls: Vec<String>,
) -> Result<ItemResult> {
    const PHASE: SyncPhase = SyncPhase::LoadMedia;

    let mut attached = 0u64;
    let mut failure = None;
    for url in &urls {
        match ctx
            .destination_exec
            .execute(|| ctx.destination.attach_media(&product_id, url))
            .await
        {
            Ok(()) => attached += 1,
            Err(e) => {
                failure = Some(e);
                break;
            }
        }
    }

    ctx.state.lock().await.counters.media_attached += attached;
    ctx.checkpoint.update_stats(|s| s.media_attached += attached).await;
    let result = match failure {
        None => {
            ctx.checkpoint.mark_processed(&source_id).await;
            ItemResult::Done
        }
        Some(e) => {
            ctx.fail_item(PHASE, &source_id, classify(&e), e.to_string()).await;
            ItemResult::Failed
        }
    };

    ctx.checkpoint.save_if_due().await?;
    progress.tick();
    Ok(result)
}

// ============================================================================
// Relationships
// ============================================================================

/// One relationship write: `dependents` attached to `target`.
struct LinkGroup {
    /// Checkpoint key of the item.
    item_id: String,
    target: String,
    dependents: Vec<String>,
}

/// Attach variation children to their parents.
#[instrument(skip_all, fields(run_id = %ctx.run_id))]
pub(crate) async fn hierarchy(ctx: &RunContext, data: &mut PipelineData) -> Result<PhaseTally> {
    const PHASE: SyncPhase = SyncPhase::LoadHierarchy;

    let mapping = ctx.mapping(data, PHASE).await?.clone();
    let records = ctx.records(data, PHASE).await?;

    let groups: Vec<LinkGroup> = records
        .iter()
        .filter(|r| r.is_parent)
        .filter_map(|parent| {
            let target = mapping.get(&parent.external_id)?.clone();
            let dependents: Vec<String> = parent
                .child_ids
                .iter()
                .filter_map(|child| mapping.get(child).cloned())
                .collect();
            (!dependents.is_empty()).then(|| LinkGroup {
                item_id: parent.external_id.clone(),
                target,
                dependents,
            })
        })
        .collect();

    let relationship = ctx.config.load.hierarchy_relationship.clone();
    link_phase(ctx, PHASE, RetryQueue::Hierarchy, &relationship, groups).await
}

/// Attach every matched listing product to its canonical product.
#[instrument(skip_all, fields(run_id = %ctx.run_id))]
pub(crate) async fn linking(ctx: &RunContext, data: &mut PipelineData) -> Result<PhaseTally> {
    const PHASE: SyncPhase = SyncPhase::LoadLinking;

    let mapping = ctx.mapping(data, PHASE).await?.clone();
    let matches = ctx.matches(data, PHASE).await?;

    let mut by_canonical: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for result in matches {
        let (Some(canonical), Some(product)) = (result.canonical_id(), mapping.get(result.source_id()))
        else {
            continue;
        };
        by_canonical
            .entry(canonical.to_string())
            .or_default()
            .push(product.clone());
    }

    let groups = by_canonical
        .into_iter()
        .map(|(canonical, dependents)| LinkGroup {
            item_id: canonical.clone(),
            target: canonical,
            dependents,
        })
        .collect();

    let relationship = ctx.config.load.canonical_relationship.clone();
    link_phase(ctx, PHASE, RetryQueue::Linking, &relationship, groups).await
}

async fn link_phase(
    ctx: &RunContext,
    phase: SyncPhase,
    queue: RetryQueue,
    relationship: &str,
    groups: Vec<LinkGroup>,
) -> Result<PhaseTally> {
    ctx.checkpoint
        .set_pending(groups.iter().map(|g| g.item_id.clone()))
        .await;
    let pending: HashSet<String> = ctx.checkpoint.pending().await.into_iter().collect();
    let groups: Vec<LinkGroup> = groups
        .into_iter()
        .filter(|g| pending.contains(&g.item_id))
        .collect();

    info!(phase = %phase, relationship, groups = groups.len(), "Writing relationships");
    let progress = Progress::new(ctx, phase, groups.len());

    let results = run_bounded(groups, ctx.config.batch.workers, &ctx.cancel, |group| {
        attach_group(ctx, &progress, phase, queue, relationship, group)
    })
    .await;
    let mut tally = tally(results)?;

    if !ctx.is_cancelled() {
        let retried = retry_deferred(ctx, phase, queue, relationship).await?;
        tally.succeeded += retried.succeeded;
        tally.failed += retried.failed;
        tally.deferred = retried.deferred;
    }
    Ok(tally)
}

async fn attach_group(
    ctx: &RunContext,
    progress: &Progress<'_>,
    phase: SyncPhase,
    queue: RetryQueue,
    relationship: &str,
    group: LinkGroup,
) -> Result<ItemResult> {
    let attached = ctx
        .destination_exec
        .execute(|| ctx.destination.attach_related(&group.target, relationship, &group.dependents))
        .await;

    let result = match attached {
        Ok(()) => {
            record_links(ctx, queue, group.dependents.len() as u64).await;
            ctx.checkpoint.mark_processed(&group.item_id).await;
            ItemResult::Done
        }
        Err(ThrottleError::RateLimitExceeded { retry_after, .. }) => {
            defer_group(ctx, phase, queue, &group.target, &group.dependents, retry_after).await;
            ctx.checkpoint.mark_processed(&group.item_id).await;
            ItemResult::Deferred
        }
        Err(e) => {
            ctx.fail_item(phase, &group.item_id, classify(&e), e.to_string()).await;
            ItemResult::Failed
        }
    };

    ctx.checkpoint.save_if_due().await?;
    progress.tick();
    Ok(result)
}

async fn defer_group(
    ctx: &RunContext,
    phase: SyncPhase,
    queue: RetryQueue,
    target: &str,
    dependents: &[String],
    retry_after: Duration,
) {
    let secs = retry_after.as_secs_f64();
    warn!(
        phase = %phase,
        target_id = target,
        dependents = dependents.len(),
        retry_after_secs = secs,
        "Deferring relationship write"
    );
    for dependent in dependents {
        ctx.checkpoint
            .defer(queue, DeferredEntry::new(target, dependent.clone(), secs))
            .await;
    }
    ctx.emit(SyncEvent::RateLimited {
        run_id: ctx.run_id.clone(),
        phase: phase.as_str().to_string(),
        target_id: target.to_string(),
        retry_after_secs: secs,
    });
    ctx.state.lock().await.counters.deferred += dependents.len() as u64;
}

async fn record_links(ctx: &RunContext, queue: RetryQueue, links: u64) {
    {
        let mut state = ctx.state.lock().await;
        match queue {
            RetryQueue::Hierarchy => state.counters.hierarchy_links += links,
            RetryQueue::Linking => state.counters.canonical_links += links,
        }
    }
    ctx.checkpoint
        .update_stats(|s| match queue {
            RetryQueue::Hierarchy => s.hierarchy_links += links,
            RetryQueue::Linking => s.canonical_links += links,
        })
        .await;
}

/// Retry what a previous run left in the retry queue of `phase`, a link
/// phase the checkpoint has already moved past.
/// `None` when there is nothing to replay.
pub(crate) async fn replay_deferred(ctx: &RunContext, phase: SyncPhase) -> Result<Option<PhaseTally>> {
    let (queue, relationship) = match phase {
        SyncPhase::LoadHierarchy => (RetryQueue::Hierarchy, &ctx.config.load.hierarchy_relationship),
        SyncPhase::LoadLinking => (RetryQueue::Linking, &ctx.config.load.canonical_relationship),
        _ => return Ok(None),
    };
    if ctx.checkpoint.queue(queue).await.is_empty() {
        return Ok(None);
    }

    info!(phase = %phase, queue = queue.as_str(), "Replaying deferred writes from an earlier run");
    retry_deferred(ctx, phase, queue, relationship).await.map(Some)
}

/// Retry the deferred entries of `queue` once, after the longest recorded
/// wait (capped). Entries still rate limited go back into the queue.
async fn retry_deferred(
    ctx: &RunContext,
    phase: SyncPhase,
    queue: RetryQueue,
    relationship: &str,
) -> Result<PhaseTally> {
    let entries = ctx.checkpoint.take_queue(queue).await;
    let mut tally = PhaseTally::default();
    if entries.is_empty() {
        return Ok(tally);
    }

    let longest = entries
        .iter()
        .map(|e| e.retry_after_secs)
        .fold(0.0_f64, f64::max);
    let cooldown = Duration::from_secs_f64(longest.max(0.0)).min(ctx.config.load.deferred_cooldown_max());
    info!(
        queue = queue.as_str(),
        entries = entries.len(),
        cooldown_secs = cooldown.as_secs_f64(),
        "Cooling down before retrying deferred writes"
    );

    tokio::select! {
        _ = ctx.cancel.cancelled() => {
            for entry in entries {
                ctx.checkpoint.defer(queue, entry).await;
            }
            ctx.checkpoint.save().await?;
            return Ok(tally);
        }
        _ = sleep(cooldown) => {}
    }

    let mut by_target: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for entry in entries {
        by_target.entry(entry.target_id).or_default().push(entry.dependent_id);
    }

    for (target, dependents) in by_target {
        let attached = ctx
            .destination_exec
            .execute(|| ctx.destination.attach_related(&target, relationship, &dependents))
            .await;
        match attached {
            Ok(()) => {
                record_links(ctx, queue, dependents.len() as u64).await;
                tally.succeeded += 1;
            }
            Err(ThrottleError::RateLimitExceeded { retry_after, .. }) => {
                defer_group(ctx, phase, queue, &target, &dependents, retry_after).await;
                tally.deferred += 1;
            }
            Err(e) => {
                ctx.state
                    .lock()
                    .await
                    .record_failure(phase, target.clone(), classify(&e), e.to_string());
                ctx.checkpoint.record_failed_in(phase, &target).await;
                warn!(phase = %phase, target_id = %target, error = %e, "Deferred write failed");
                tally.failed += 1;
            }
        }
    }

    ctx.checkpoint.save().await?;
    Ok(tally)
}
