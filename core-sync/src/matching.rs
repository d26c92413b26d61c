//! Match phase: resolve canonical products for every extracted record.

use crate::context::{PhaseTally, PipelineData, RunContext};
use crate::phase::SyncPhase;
use crate::Result;
use bridge_traits::{CatalogEntry, SearchFilter};
use core_matching::CanonicalMatcher;
use std::collections::HashMap;
use tracing::{info, instrument};

const PHASE: SyncPhase = SyncPhase::Match;

#[instrument(skip_all, fields(run_id = %ctx.run_id))]
pub(crate) async fn run(ctx: &RunContext, data: &mut PipelineData) -> Result<PhaseTally> {
    let catalog = catalog_snapshot(ctx).await?;
    let matcher = CanonicalMatcher::build(ctx.config.matching.clone(), &catalog)?;

    let records = ctx.records(data, PHASE).await?;
    let (results, summary) = matcher.match_all(records);
    ctx.artifacts.save_match_results(&results).await?;

    let canonical: HashMap<&str, &str> = results
        .iter()
        .filter_map(|r| Some((r.source_id(), r.canonical_id()?)))
        .collect();
    let transformed = ctx.transformed(data, PHASE).await?;
    for record in transformed.iter_mut() {
        record.canonical_id = canonical.get(record.source_id.as_str()).map(|id| id.to_string());
    }
    ctx.artifacts.save_transformed(transformed).await?;

    let (matched, orphans) = (summary.matched as u64, summary.orphans as u64);
    ctx.checkpoint
        .update_stats(|s| {
            s.matched = matched;
            s.orphans = orphans;
        })
        .await;
    {
        let mut state = ctx.state.lock().await;
        state.counters.matched = matched;
        state.counters.orphans = orphans;
    }
    info!(
        matched,
        orphans,
        by_strategy = ?summary.by_strategy,
        "Canonical matching finished"
    );

    data.matches = Some(results);
    Ok(PhaseTally {
        succeeded: matched,
        failed: 0,
        deferred: 0,
    })
}

/// The destination catalog to index, from the persisted snapshot when this
/// run already built it.
async fn catalog_snapshot(ctx: &RunContext) -> Result<Vec<CatalogEntry>> {
    if ctx.checkpoint.derived_index_built().await {
        if let Some(entries) = ctx.artifacts.load_catalog_snapshot().await? {
            info!(entries = entries.len(), "Reusing persisted catalog snapshot");
            return Ok(entries);
        }
    }

    info!("Reading destination catalog for matching");
    let entries = ctx.search_all(&SearchFilter::All).await?;
    ctx.artifacts.save_catalog_snapshot(&entries).await?;
    ctx.checkpoint.set_derived_index_built(true).await;
    ctx.checkpoint.save().await?;
    Ok(entries)
}
