//! Extract phase: list identifiers, fetch listings, discover parents.

use crate::context::{classify, PhaseTally, PipelineData, RunContext};
use crate::phase::SyncPhase;
use crate::report::FailureCategory;
use crate::{Result, SyncError};
use bridge_traits::{ReportRequest, ReportStatus};
use core_catalog::parents::{attach_children, missing_parent_ids};
use core_catalog::SourceRecord;
use core_throttle::chunk;
use std::collections::HashSet;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, instrument, warn};

const PHASE: SyncPhase = SyncPhase::Extract;

/// What came back for one slice of identifiers.
#[derive(Default)]
struct Fetched {
    records: Vec<SourceRecord>,
    failures: Vec<(String, FailureCategory, String)>,
}

#[instrument(skip_all, fields(run_id = %ctx.run_id))]
pub(crate) async fn run(
    ctx: &RunContext,
    data: &mut PipelineData,
    requested: &[String],
) -> Result<PhaseTally> {
    let processed = ctx.checkpoint.processed().await;
    let resumed_pending = ctx.checkpoint.pending().await;

    let ids = if !requested.is_empty() {
        requested.to_vec()
    } else if !processed.is_empty() || !resumed_pending.is_empty() {
        resumed_pending
    } else {
        match list_all_ids(ctx).await? {
            Some(ids) => ids,
            None => return Ok(PhaseTally::default()),
        }
    };

    ctx.checkpoint.set_pending(ids).await;
    let pending = ctx.checkpoint.pending().await;

    let mut records = if processed.is_empty() {
        Vec::new()
    } else {
        ctx.artifacts.load_raw_records().await?.unwrap_or_default()
    };
    let total = (processed.len() + pending.len()) as u64;
    info!(
        pending = pending.len(),
        already_extracted = records.len(),
        "Extracting source listings"
    );

    let mut tally = PhaseTally::default();
    let window_size = ctx
        .config
        .batch
        .checkpoint_interval
        .max(ctx.source_batch.chunk_size());

    for window in chunk(&pending, window_size) {
        if ctx.is_cancelled() {
            return Ok(tally);
        }

        let fetched = fetch(ctx, &window).await;
        let returned: HashSet<String> = fetched.records.iter().map(|r| r.external_id.clone()).collect();

        for (id, category, message) in fetched.failures {
            ctx.fail_item(PHASE, &id, category, message).await;
            tally.failed += 1;
        }
        for id in &window {
            if returned.contains(id) {
                ctx.checkpoint.mark_processed(id).await;
            } else if !ctx.checkpoint.is_processed(id).await {
                ctx.fail_item(PHASE, id, FailureCategory::Rejected, "listing not returned by source")
                    .await;
                tally.failed += 1;
            }
        }

        tally.succeeded += fetched.records.len() as u64;
        records.extend(fetched.records);

        ctx.artifacts.save_raw_records(&records).await?;
        ctx.checkpoint.save().await?;
        ctx.progress(PHASE, ctx.checkpoint.processed().await.len() as u64, total);
    }

    if records.is_empty() && tally.failed > 0 {
        return Err(SyncError::PhaseFailed {
            phase: PHASE.as_str().to_string(),
            message: format!("none of {} listings could be extracted", total),
        });
    }

    discover_parents(ctx, &mut records).await?;

    let count = records.len() as u64;
    ctx.artifacts.save_raw_records(&records).await?;
    ctx.checkpoint.update_stats(|s| s.records_extracted = count).await;
    ctx.state.lock().await.counters.extracted = count;
    data.records = Some(records);
    Ok(tally)
}

/// One extra fetch round for parents referenced but not extracted, then
/// child enrichment.
async fn discover_parents(ctx: &RunContext, records: &mut Vec<SourceRecord>) -> Result<()> {
    let missing = missing_parent_ids(records);
    if !missing.is_empty() && !ctx.is_cancelled() {
        info!(parents = missing.len(), "Fetching variation parents");
        let fetched = fetch(ctx, &missing).await;
        for (id, _, message) in &fetched.failures {
            // Children still load; they just will not be grouped.
            warn!(parent_id = %id, error = %message, "Variation parent unavailable");
        }
        records.extend(fetched.records);
        ctx.checkpoint.set_parent_ids(missing.iter().cloned()).await;
    }

    let enriched = attach_children(records)?;
    if enriched > 0 {
        ctx.state.lock().await.counters.parents_discovered += enriched as u64;
        debug!(parents = enriched, "Variation parents enriched");
    }
    Ok(())
}

/// Fetch `ids` chunk by chunk. A chunk whose retries run out is recorded
/// as failed and the remaining chunks still run.
async fn fetch(ctx: &RunContext, ids: &[String]) -> Fetched {
    let mut fetched = Fetched::default();
    let chunk_size = ctx.source_batch.chunk_size();
    let mut remaining = ids;

    while !remaining.is_empty() {
        let result = ctx
            .source_batch
            .process_chunks(remaining, |chunk| async move { ctx.source.fetch_by_ids(&chunk).await })
            .await;

        let outcomes = match result {
            Ok(outcomes) => {
                remaining = &[];
                outcomes
            }
            Err(failure) => {
                let start = failure.failed_chunk * chunk_size;
                let end = (start + chunk_size).min(remaining.len());
                let category = classify(&failure.error);
                for id in &remaining[start..end] {
                    fetched
                        .failures
                        .push((id.clone(), category, failure.error.to_string()));
                }
                remaining = &remaining[end..];
                failure.completed
            }
        };

        for outcome in outcomes {
            for (id, message) in outcome.errors {
                fetched.failures.push((id, FailureCategory::Rejected, message));
            }
            fetched
                .records
                .extend(outcome.listings.into_iter().map(SourceRecord::from));
        }
    }

    fetched
}

/// Run the source's listing report and return every identifier in it.
///
/// `None` when interrupted while waiting for the report.
async fn list_all_ids(ctx: &RunContext) -> Result<Option<Vec<String>>> {
    let settings = &ctx.config.report;
    let executor = ctx.source_batch.executor();
    let request = ReportRequest::new(settings.report_type.clone());

    let handle = executor
        .execute(|| ctx.source.submit_report(request.clone()))
        .await?;
    info!(report_id = %handle.id, report_type = %settings.report_type, "Report submitted");

    let started = Instant::now();
    loop {
        let status = executor.execute(|| ctx.source.report_status(&handle)).await?;
        match status {
            ReportStatus::Done => break,
            ReportStatus::Failed(reason) => {
                return Err(SyncError::ReportFailed {
                    report_id: handle.id.clone(),
                    reason,
                });
            }
            ReportStatus::Cancelled => {
                return Err(SyncError::ReportFailed {
                    report_id: handle.id.clone(),
                    reason: "cancelled by source".to_string(),
                });
            }
            ReportStatus::Queued | ReportStatus::Running => {
                let waited = started.elapsed();
                if waited >= settings.timeout() {
                    return Err(SyncError::ReportTimeout {
                        report_id: handle.id.clone(),
                        waited_secs: waited.as_secs(),
                    });
                }
                debug!(report_id = %handle.id, status = ?status, "Report not ready");
                tokio::select! {
                    _ = ctx.cancel.cancelled() => return Ok(None),
                    _ = sleep(settings.poll_interval()) => {}
                }
            }
        }
    }

    let ids = executor.execute(|| ctx.source.download_report(&handle)).await?;
    info!(report_id = %handle.id, listings = ids.len(), "Report downloaded");
    Ok(Some(ids))
}
