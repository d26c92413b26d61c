//! Variation parent discovery.
//!
//! Child listings name their parent, but the parent itself is often not part
//! of the requested identifiers. Extraction fetches the missing parents in one
//! extra round and then enriches every parent with its children.

use crate::error::Result;
use crate::models::SourceRecord;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use tracing::debug;

/// Parent identifiers referenced by `records` but not present among them.
///
/// Sorted and without duplicates.
pub fn missing_parent_ids(records: &[SourceRecord]) -> Vec<String> {
    let present: HashSet<&str> = records.iter().map(|r| r.external_id.as_str()).collect();

    records
        .iter()
        .filter_map(|record| record.parent_id.as_deref())
        .filter(|parent| !present.contains(parent))
        .map(str::to_string)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Enrich each parent in `records` with the children that reference it.
///
/// Records that are already enriched are left alone. Returns the number of
/// parents enriched by this call.
pub fn attach_children(records: &mut [SourceRecord]) -> Result<usize> {
    let mut children: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for record in records.iter() {
        if let Some(parent) = &record.parent_id {
            children
                .entry(parent.clone())
                .or_default()
                .push(record.external_id.clone());
        }
    }

    let mut enriched = 0;
    for record in records.iter_mut() {
        if record.is_enriched() {
            continue;
        }
        let Some(kids) = children.remove(&record.external_id) else {
            continue;
        };
        record.enrich_as_parent(kids)?;
        debug!(
            source_id = %record.external_id,
            children = record.child_ids.len(),
            "Enriched variation parent"
        );
        enriched += 1;
    }

    Ok(enriched)
}
