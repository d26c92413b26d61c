//! End-to-end runs of the sync pipeline against in-memory catalogs.
//!
//! These tests cover:
//! - A full run from report to canonical links
//! - Resuming after a stop without calling the source again
//! - Forced re-runs, interrupts and the relationship pre-flight check
//! - Deferred relationship writes under rate limiting, and their replay
//!   by a later run
//! - Concurrent product writers with interval checkpoints
//! - Missing artifacts on resume, with and without destination rebuild

mod common;

use bridge_desktop::TokioFileSystem;
use bridge_traits::{DestinationCatalog, FileSystemAccess, SourceCatalog};
use common::{bulk_listings, catalog, fast_config, FakeDestination, FakeSource, Harness};
use core_runtime::events::{EventBus, SyncEvent};
use core_runtime::SyncConfig;
use core_sync::{
    Artifact, ArtifactStore, CheckpointManager, CheckpointPaths, CheckpointState, FailureCategory,
    PhaseStatus, RunRequest, SyncOrchestrator, SyncPhase,
};
use std::path::Path;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

fn orchestrator(harness: &Harness, dir: &Path) -> SyncOrchestrator {
    orchestrator_with(harness, dir, fast_config(&dir.join("checkpoints")))
}

fn orchestrator_with(harness: &Harness, dir: &Path, config: SyncConfig) -> SyncOrchestrator {
    let source: Arc<dyn SourceCatalog> = harness.source.clone();
    let destination: Arc<dyn DestinationCatalog> = harness.destination.clone();

    SyncOrchestrator::new(config, source, destination, filesystem(dir))
        .unwrap()
        .with_event_bus(EventBus::new(1024))
}

fn filesystem(dir: &Path) -> Arc<dyn FileSystemAccess> {
    Arc::new(TokioFileSystem::with_data_directory(dir.to_path_buf()))
}

/// Harness over `count` stand-alone listings and an empty PIM.
fn bulk_harness(count: usize) -> Harness {
    let listings = bulk_listings(count);
    let ids: Vec<String> = listings.iter().map(|l| l.external_id.clone()).collect();
    Harness {
        source: Arc::new(FakeSource::new(listings, ids.iter().map(String::as_str).collect())),
        destination: Arc::new(FakeDestination::new(Vec::new())),
    }
}

async fn saved_checkpoint(dir: &Path, run_id: &str) -> CheckpointState {
    let paths = CheckpointPaths::new(&dir.join("checkpoints"), run_id);
    CheckpointManager::load(filesystem(dir).as_ref(), &paths)
        .await
        .unwrap()
        .expect("checkpoint should exist")
}

fn drain(receiver: &mut tokio::sync::broadcast::Receiver<SyncEvent>) -> Vec<SyncEvent> {
    let mut events = Vec::new();
    loop {
        match receiver.try_recv() {
            Ok(event) => events.push(event),
            Err(tokio::sync::broadcast::error::TryRecvError::Lagged(_)) => continue,
            Err(_) => break,
        }
    }
    events
}

// ============================================================================
// Full runs
// ============================================================================

#[tokio::test]
async fn test_full_run_syncs_products_media_and_links() {
    let dir = TempDir::new().unwrap();
    let harness = Harness::new(FakeDestination::new(catalog()));
    let orchestrator = orchestrator(&harness, dir.path());
    let mut events = orchestrator.events().subscribe();

    let report = orchestrator
        .run(RunRequest::new("full"), CancellationToken::new())
        .await
        .unwrap();

    assert!(report.is_complete(), "run failed: {:?}", report.error);
    assert!(!report.resumed);
    assert_eq!(report.counters.extracted, 4);
    assert_eq!(report.counters.parents_discovered, 1);
    assert_eq!(report.counters.transformed, 4);
    assert_eq!(report.counters.matched, 2);
    assert_eq!(report.counters.orphans, 2);
    assert_eq!(report.counters.created, 4);
    assert_eq!(report.counters.media_attached, 1);
    assert_eq!(report.counters.hierarchy_links, 2);
    assert_eq!(report.counters.canonical_links, 2);
    assert_eq!(report.total_failures(), 0);
    assert_eq!(report.pending_deferred, 0);

    // The report was polled until done.
    assert_eq!(harness.source.status_calls.load(Ordering::SeqCst), 3);

    let destination = &harness.destination;
    let b1 = destination.id_for_key("SRC-B0001").await.unwrap();
    let b2 = destination.id_for_key("SRC-B0002").await.unwrap();
    let b3 = destination.id_for_key("SRC-B0003").await.unwrap();
    let parent = destination.id_for_key("SRC-P0001").await.unwrap();

    let variations = destination.links("variations").await;
    assert_eq!(variations.len(), 1);
    assert_eq!(variations[0].owner, parent);
    let mut children = vec![b2.clone(), b3];
    children.sort();
    assert_eq!(variations[0].related, children);

    let mut canonical = destination.links("canonical_listings").await;
    canonical.sort_by(|a, b| a.owner.cmp(&b.owner));
    assert_eq!(canonical.len(), 2);
    assert_eq!((canonical[0].owner.as_str(), &canonical[0].related), ("pim-1001", &vec![b1.clone()]));
    assert_eq!((canonical[1].owner.as_str(), &canonical[1].related), ("pim-1002", &vec![b2]));

    assert_eq!(
        destination.media().await,
        vec![(b1, "https://img.example/b0001.jpg".to_string())]
    );

    let checkpoint = saved_checkpoint(dir.path(), "full").await;
    assert_eq!(checkpoint.stats.media_attached, 1);
    assert_eq!(checkpoint.stats.products_written, 4);
    assert_eq!(checkpoint.stats.hierarchy_links, 2);

    let events = drain(&mut events);
    assert!(matches!(events.first(), Some(SyncEvent::RunStarted { resumed: false, .. })));
    assert!(matches!(events.last(), Some(SyncEvent::RunCompleted { .. })));
    let completed = events
        .iter()
        .filter(|e| matches!(e, SyncEvent::PhaseCompleted { .. }))
        .count();
    assert_eq!(completed, SyncPhase::PIPELINE.len());
}

#[tokio::test]
async fn test_rerun_of_completed_run_skips_everything() {
    let dir = TempDir::new().unwrap();
    let harness = Harness::new(FakeDestination::new(catalog()));
    let orchestrator = orchestrator(&harness, dir.path());

    orchestrator
        .run(RunRequest::new("done"), CancellationToken::new())
        .await
        .unwrap();
    let calls = harness.source.calls();
    let creates = harness.destination.create_calls.load(Ordering::SeqCst);

    let report = orchestrator
        .run(RunRequest::new("done"), CancellationToken::new())
        .await
        .unwrap();

    assert!(report.is_complete());
    assert!(report.resumed);
    assert!(report
        .phases
        .iter()
        .all(|outcome| outcome.status == PhaseStatus::Skipped));
    assert_eq!(harness.source.calls(), calls);
    assert_eq!(harness.destination.create_calls.load(Ordering::SeqCst), creates);
}

#[tokio::test]
async fn test_unknown_listing_is_recorded_and_run_continues() {
    let dir = TempDir::new().unwrap();
    let harness = Harness::new(FakeDestination::new(catalog()));
    let orchestrator = orchestrator(&harness, dir.path());

    let report = orchestrator
        .run(
            RunRequest::new("partial").with_source_ids(["B0001", "B9999"]),
            CancellationToken::new(),
        )
        .await
        .unwrap();

    assert!(report.is_complete());
    // An explicit id list skips the report.
    assert_eq!(harness.source.submit_calls.load(Ordering::SeqCst), 0);
    assert_eq!(report.counters.created, 1);
    assert_eq!(
        report.failed_ids(FailureCategory::Rejected).into_iter().collect::<Vec<_>>(),
        vec!["B9999".to_string()]
    );
    assert_eq!(report.phase(SyncPhase::Extract).unwrap().failed, 1);
}

// ============================================================================
// Resume
// ============================================================================

#[tokio::test]
async fn test_resume_after_stop_uses_persisted_artifacts() {
    let dir = TempDir::new().unwrap();
    let harness = Harness::new(FakeDestination::new(catalog()));
    let orchestrator = orchestrator(&harness, dir.path());

    let first = orchestrator
        .run(
            RunRequest::new("nightly").stop_after(SyncPhase::LoadPrimary),
            CancellationToken::new(),
        )
        .await
        .unwrap();
    assert_eq!(first.final_phase, SyncPhase::LoadMedia);
    assert!(first.error.is_none());
    assert_eq!(first.counters.created, 4);
    assert!(harness.destination.links("canonical_listings").await.is_empty());

    // Nothing from the source or the live catalog may be needed from here on.
    let source_calls = harness.source.calls();
    harness.source.clear().await;
    harness.destination.remove_entry("pim-1002").await;

    let second = orchestrator
        .run(RunRequest::new("nightly"), CancellationToken::new())
        .await
        .unwrap();

    assert!(second.is_complete(), "resume failed: {:?}", second.error);
    assert!(second.resumed);
    assert_eq!(harness.source.calls(), source_calls);
    for phase in [
        SyncPhase::Extract,
        SyncPhase::Transform,
        SyncPhase::Match,
        SyncPhase::LoadPrimary,
    ] {
        assert_eq!(second.phase(phase).unwrap().status, PhaseStatus::Skipped);
    }
    assert_eq!(second.counters.created, 0);
    assert_eq!(harness.destination.create_calls.load(Ordering::SeqCst), 4);

    let owners: Vec<String> = harness
        .destination
        .links("canonical_listings")
        .await
        .into_iter()
        .map(|link| link.owner)
        .collect();
    assert!(owners.contains(&"pim-1002".to_string()));
    assert_eq!(second.counters.canonical_links, 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_large_run_with_concurrent_workers_completes() {
    let dir = TempDir::new().unwrap();
    let harness = bulk_harness(300);
    let mut config = fast_config(&dir.path().join("checkpoints"));
    let defaults = SyncConfig::default();
    config.batch.chunk_size = defaults.batch.chunk_size;
    config.batch.workers = defaults.batch.workers;
    config.batch.checkpoint_interval = defaults.batch.checkpoint_interval;
    let orchestrator = orchestrator_with(&harness, dir.path(), config);

    let report = orchestrator
        .run(RunRequest::new("bulk"), CancellationToken::new())
        .await
        .unwrap();

    assert!(report.is_complete(), "run failed: {:?}", report.error);
    assert_eq!(report.counters.created, 300);
    assert_eq!(report.total_failures(), 0);

    let artifacts = ArtifactStore::new(filesystem(dir.path()), &dir.path().join("checkpoints"), "bulk");
    let mapping = artifacts.load_id_mapping().await.unwrap().unwrap();
    assert_eq!(mapping.len(), 300);
    // Interval saves happened while the workers were writing, on top of one
    // save per phase transition.
    let checkpoint = saved_checkpoint(dir.path(), "bulk").await;
    assert!(checkpoint.stats.saves >= SyncPhase::PIPELINE.len() as u64 + 300 / 25);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_cancel_during_product_writes_resumes_without_duplicates() {
    let dir = TempDir::new().unwrap();
    let harness = bulk_harness(60);
    let mut config = fast_config(&dir.path().join("checkpoints"));
    config.batch.workers = 3;
    config.batch.checkpoint_interval = 5;
    let orchestrator = orchestrator_with(&harness, dir.path(), config);

    let cancel = CancellationToken::new();
    harness.destination.cancel_after_creates(20, cancel.clone()).await;
    let interrupted = orchestrator
        .run(RunRequest::new("midway"), cancel)
        .await
        .unwrap();

    assert_eq!(interrupted.final_phase, SyncPhase::LoadPrimary);
    assert!(interrupted.error.is_none());
    let created_before = harness.destination.create_calls.load(Ordering::SeqCst);
    assert!((20..60).contains(&created_before), "created {}", created_before);
    assert_eq!(
        interrupted.phase(SyncPhase::LoadPrimary).unwrap().status,
        PhaseStatus::Interrupted
    );

    // Every product created so far is in the saved mapping.
    let artifacts = ArtifactStore::new(filesystem(dir.path()), &dir.path().join("checkpoints"), "midway");
    let mapping = artifacts.load_id_mapping().await.unwrap().unwrap();
    assert_eq!(mapping.len(), created_before);
    let checkpoint = saved_checkpoint(dir.path(), "midway").await;
    assert_eq!(checkpoint.phase, SyncPhase::LoadPrimary);
    assert_eq!(checkpoint.processed.len(), created_before);

    let resumed = orchestrator
        .run(RunRequest::new("midway"), CancellationToken::new())
        .await
        .unwrap();

    assert!(resumed.is_complete(), "resume failed: {:?}", resumed.error);
    assert!(resumed.resumed);
    assert_eq!(resumed.counters.created as usize, 60 - created_before);
    assert_eq!(harness.destination.create_calls.load(Ordering::SeqCst), 60);
    assert_eq!(harness.destination.update_calls.load(Ordering::SeqCst), 0);
    assert_eq!(harness.destination.product_count("SRC-BULK").await, 60);
    assert_eq!(artifacts.load_id_mapping().await.unwrap().unwrap().len(), 60);
}

#[tokio::test]
async fn test_forced_phase_runs_again() {
    let dir = TempDir::new().unwrap();
    let harness = Harness::new(FakeDestination::new(catalog()));
    let orchestrator = orchestrator(&harness, dir.path());

    orchestrator
        .run(RunRequest::new("forced"), CancellationToken::new())
        .await
        .unwrap();
    let creates = harness.destination.create_calls.load(Ordering::SeqCst);

    let report = orchestrator
        .run(
            RunRequest::new("forced").force(SyncPhase::LoadLinking),
            CancellationToken::new(),
        )
        .await
        .unwrap();

    assert!(report.is_complete());
    assert_eq!(report.phase(SyncPhase::LoadHierarchy).unwrap().status, PhaseStatus::Skipped);
    assert_eq!(report.phase(SyncPhase::LoadLinking).unwrap().status, PhaseStatus::Completed);
    assert_eq!(report.counters.canonical_links, 2);
    assert_eq!(harness.destination.links("canonical_listings").await.len(), 4);
    assert_eq!(harness.destination.create_calls.load(Ordering::SeqCst), creates);
}

#[tokio::test]
async fn test_cancelled_run_is_interrupted_then_resumes() {
    let dir = TempDir::new().unwrap();
    let harness = Harness::new(FakeDestination::new(catalog()));
    let orchestrator = orchestrator(&harness, dir.path());
    let mut events = orchestrator.events().subscribe();

    let cancel = CancellationToken::new();
    cancel.cancel();
    let interrupted = orchestrator
        .run(RunRequest::new("ctrl-c"), cancel)
        .await
        .unwrap();

    assert_eq!(interrupted.final_phase, SyncPhase::Extract);
    assert!(interrupted.error.is_none());
    assert_eq!(harness.source.calls(), 0);
    assert!(drain(&mut events)
        .iter()
        .any(|e| matches!(e, SyncEvent::RunInterrupted { phase, .. } if phase == "extract")));

    let resumed = orchestrator
        .run(RunRequest::new("ctrl-c"), CancellationToken::new())
        .await
        .unwrap();
    assert!(resumed.is_complete());
    assert!(resumed.resumed);
}

// ============================================================================
// Failures
// ============================================================================

#[tokio::test]
async fn test_missing_relationship_fails_before_any_write() {
    let dir = TempDir::new().unwrap();
    let harness =
        Harness::new(FakeDestination::new(catalog()).with_relationship_types(&["variations"]));
    let orchestrator = orchestrator(&harness, dir.path());

    let report = orchestrator
        .run(RunRequest::new("no-links"), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.final_phase, SyncPhase::Failed);
    assert!(report.error.as_deref().unwrap().contains("canonical_listings"));
    assert_eq!(report.failed_ids(FailureCategory::Structural).len(), 1);
    assert_eq!(harness.source.calls(), 0);
    assert_eq!(harness.destination.create_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_missing_match_results_fail_linking_resume() {
    let dir = TempDir::new().unwrap();
    let harness = Harness::new(FakeDestination::new(catalog()));
    let orchestrator = orchestrator(&harness, dir.path());

    orchestrator
        .run(
            RunRequest::new("lost").stop_after(SyncPhase::LoadHierarchy),
            CancellationToken::new(),
        )
        .await
        .unwrap();

    let fs: Arc<dyn FileSystemAccess> =
        Arc::new(TokioFileSystem::with_data_directory(dir.path().to_path_buf()));
    let artifacts = ArtifactStore::new(fs, &dir.path().join("checkpoints"), "lost");
    std::fs::remove_file(artifacts.path(Artifact::MatchResults)).unwrap();

    let report = orchestrator
        .run(RunRequest::new("lost"), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.final_phase, SyncPhase::Failed);
    assert!(report.error.as_deref().unwrap().contains("match_results"));
    assert_eq!(report.failed_ids(FailureCategory::ResumeIntegrity).len(), 1);
    assert!(harness.destination.links("canonical_listings").await.is_empty());

    // The checkpoint still points at the failed phase.
    let again = orchestrator
        .run(RunRequest::new("lost").stop_after(SyncPhase::LoadLinking), CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(again.final_phase, SyncPhase::Failed);
    assert_eq!(again.phase(SyncPhase::LoadHierarchy).unwrap().status, PhaseStatus::Skipped);
}

#[tokio::test]
async fn test_missing_mapping_rebuilt_from_destination() {
    let dir = TempDir::new().unwrap();
    let harness = Harness::new(FakeDestination::new(catalog()));
    let orchestrator = orchestrator(&harness, dir.path());

    orchestrator
        .run(
            RunRequest::new("rebuild").stop_after(SyncPhase::LoadPrimary),
            CancellationToken::new(),
        )
        .await
        .unwrap();

    let fs: Arc<dyn FileSystemAccess> =
        Arc::new(TokioFileSystem::with_data_directory(dir.path().to_path_buf()));
    let artifacts = ArtifactStore::new(fs, &dir.path().join("checkpoints"), "rebuild");
    std::fs::remove_file(artifacts.path(Artifact::IdMapping)).unwrap();

    let strict = orchestrator
        .run(RunRequest::new("rebuild"), CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(strict.final_phase, SyncPhase::Failed);

    let rebuilt = orchestrator
        .run(
            RunRequest::new("rebuild").rebuild_from_destination(true),
            CancellationToken::new(),
        )
        .await
        .unwrap();
    assert!(rebuilt.is_complete(), "rebuild failed: {:?}", rebuilt.error);
    assert_eq!(rebuilt.counters.media_attached, 1);
    assert_eq!(rebuilt.counters.canonical_links, 2);
}

// ============================================================================
// Rate limiting
// ============================================================================

#[tokio::test]
async fn test_throttled_relationship_is_deferred_then_retried() {
    let dir = TempDir::new().unwrap();
    // The first relationship write is the variation family.
    let harness = Harness::new(FakeDestination::new(catalog()).throttle_links(1));
    let orchestrator = orchestrator(&harness, dir.path());
    let mut events = orchestrator.events().subscribe();

    let report = orchestrator
        .run(RunRequest::new("throttled"), CancellationToken::new())
        .await
        .unwrap();

    assert!(report.is_complete());
    assert_eq!(report.counters.deferred, 2);
    assert_eq!(report.counters.hierarchy_links, 2);
    assert_eq!(report.pending_deferred, 0);
    assert_eq!(harness.destination.links("variations").await.len(), 1);
    assert!(drain(&mut events).iter().any(|e| matches!(
        e,
        SyncEvent::RateLimited { phase, retry_after_secs, .. }
            if phase == "load_hierarchy" && *retry_after_secs >= 120.0
    )));
}

#[tokio::test]
async fn test_persistently_throttled_links_stay_queued() {
    let dir = TempDir::new().unwrap();
    let harness = Harness::new(FakeDestination::new(catalog()).throttle_links(usize::MAX));
    let orchestrator = orchestrator(&harness, dir.path());

    let report = orchestrator
        .run(RunRequest::new("quota"), CancellationToken::new())
        .await
        .unwrap();

    assert!(report.is_complete());
    assert_eq!(report.counters.hierarchy_links, 0);
    assert_eq!(report.counters.canonical_links, 0);
    // Two children of the family plus one listing per canonical product.
    assert_eq!(report.pending_deferred, 4);
    assert_eq!(report.total_failures(), 0);
}

#[tokio::test]
async fn test_resume_replays_links_left_deferred() {
    let dir = TempDir::new().unwrap();
    let harness = Harness::new(FakeDestination::new(catalog()).throttle_links(usize::MAX));
    let orchestrator = orchestrator(&harness, dir.path());

    let first = orchestrator
        .run(RunRequest::new("backlog"), CancellationToken::new())
        .await
        .unwrap();
    assert!(first.is_complete());
    assert_eq!(first.pending_deferred, 4);
    assert!(harness.destination.links("variations").await.is_empty());

    harness.destination.set_throttled_links(0);
    let link_calls = harness.destination.link_calls.load(Ordering::SeqCst);
    let creates = harness.destination.create_calls.load(Ordering::SeqCst);

    let second = orchestrator
        .run(RunRequest::new("backlog"), CancellationToken::new())
        .await
        .unwrap();

    assert!(second.is_complete(), "resume failed: {:?}", second.error);
    assert!(second.resumed);
    assert_eq!(second.pending_deferred, 0);
    assert_eq!(second.counters.hierarchy_links, 2);
    assert_eq!(second.counters.canonical_links, 2);
    assert_eq!(second.phase(SyncPhase::LoadHierarchy).unwrap().status, PhaseStatus::Completed);
    assert_eq!(second.phase(SyncPhase::LoadLinking).unwrap().status, PhaseStatus::Completed);
    assert_eq!(second.phase(SyncPhase::LoadPrimary).unwrap().status, PhaseStatus::Skipped);
    assert!(harness.destination.link_calls.load(Ordering::SeqCst) > link_calls);
    assert_eq!(harness.destination.create_calls.load(Ordering::SeqCst), creates);
    assert_eq!(harness.destination.links("variations").await.len(), 1);
    assert_eq!(harness.destination.links("canonical_listings").await.len(), 2);

    let checkpoint = saved_checkpoint(dir.path(), "backlog").await;
    assert_eq!(checkpoint.deferred_len(), 0);
    assert_eq!(checkpoint.stats.canonical_links, 2);
}

#[tokio::test]
async fn test_rejected_deferred_link_is_recorded_in_checkpoint() {
    let dir = TempDir::new().unwrap();
    let harness = Harness::new(FakeDestination::new(catalog()).throttle_links(usize::MAX));
    let orchestrator = orchestrator(&harness, dir.path());

    orchestrator
        .run(RunRequest::new("rejected"), CancellationToken::new())
        .await
        .unwrap();

    harness.destination.set_throttled_links(0);
    harness.destination.set_reject_links(true);
    let report = orchestrator
        .run(RunRequest::new("rejected"), CancellationToken::new())
        .await
        .unwrap();

    assert!(report.is_complete());
    assert_eq!(report.pending_deferred, 0);
    // One variation family plus two canonical products.
    assert_eq!(report.failed_ids(FailureCategory::InvalidRecord).len(), 3);

    let checkpoint = saved_checkpoint(dir.path(), "rejected").await;
    assert_eq!(checkpoint.failed["load_hierarchy"].len(), 1);
    let canonical: Vec<&str> = checkpoint.failed["load_linking"]
        .iter()
        .map(String::as_str)
        .collect();
    assert_eq!(canonical, vec!["pim-1001", "pim-1002"]);
}
