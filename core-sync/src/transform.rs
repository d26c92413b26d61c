//! Transform phase: map extracted records to destination products.

use crate::context::{PhaseTally, PipelineData, RunContext};
use crate::phase::SyncPhase;
use crate::report::FailureCategory;
use crate::Result;
use bridge_traits::SearchFilter;
use core_catalog::Transformer;
use std::collections::HashMap;
use tracing::{info, instrument};

const PHASE: SyncPhase = SyncPhase::Transform;

#[instrument(skip_all, fields(run_id = %ctx.run_id))]
pub(crate) async fn run(ctx: &RunContext, data: &mut PipelineData) -> Result<PhaseTally> {
    let transformer = Transformer::new(ctx.config.load.source_key_prefix.clone());
    let records = ctx.records(data, PHASE).await?;

    let keys: Vec<String> = records
        .iter()
        .map(|record| transformer.generated_key(&record.external_id))
        .collect();
    let existing = existing_products(ctx, &keys).await?;
    info!(
        records = records.len(),
        existing = existing.len(),
        "Transforming records"
    );

    let mut tally = PhaseTally::default();
    let mut transformed = Vec::with_capacity(records.len());
    for record in records {
        match transformer.transform(record, &existing) {
            Ok(out) => {
                tally.succeeded += 1;
                transformed.push(out);
            }
            Err(e) => {
                ctx.fail_item(PHASE, &record.external_id, FailureCategory::InvalidRecord, e.to_string())
                    .await;
                tally.failed += 1;
            }
        }
    }

    ctx.artifacts.save_transformed(&transformed).await?;
    let count = transformed.len() as u64;
    ctx.checkpoint.update_stats(|s| s.records_transformed = count).await;
    ctx.state.lock().await.counters.transformed = count;
    data.transformed = Some(transformed);
    Ok(tally)
}

/// Destination ids of products already carrying one of `keys`.
async fn existing_products(ctx: &RunContext, keys: &[String]) -> Result<HashMap<String, String>> {
    let key_field = &ctx.config.matching.catalog_fields.sku;
    let mut existing = HashMap::new();

    for batch in keys.chunks(ctx.config.load.search_page_size.max(1)) {
        let entries = ctx.search_all(&SearchFilter::KeyIn(batch.to_vec())).await?;
        for entry in entries {
            if let Some(key) = entry.field(key_field) {
                existing.entry(key.to_string()).or_insert(entry.id);
            }
        }
    }

    Ok(existing)
}
