use async_trait::async_trait;
use bridge_desktop::TokioFileSystem;
use bridge_traits::error::{BridgeError, Result as BridgeResult};
use bridge_traits::{
    FetchOutcome, ProductPayload, ReportHandle, ReportRequest, ReportStatus, SearchFilter,
    SearchPage,
};
use core_service::{
    CoreDependencies, CoreError, CoreService, LogEntry, LogLevel, LoggerSink, RunRequest,
    SyncConfig, SyncPhase,
};
use mockall::mock;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::Mutex;

mock! {
    Source {}

    #[async_trait]
    impl bridge_traits::SourceCatalog for Source {
        async fn fetch_by_ids(&self, ids: &[String]) -> BridgeResult<FetchOutcome>;
        async fn submit_report(&self, request: ReportRequest) -> BridgeResult<ReportHandle>;
        async fn report_status(&self, handle: &ReportHandle) -> BridgeResult<ReportStatus>;
        async fn download_report(&self, handle: &ReportHandle) -> BridgeResult<Vec<String>>;
    }
}

/// Destination whose relationship catalog is fixed and which refuses writes.
struct StubDestination {
    relationship_types: BridgeResult<Vec<String>>,
}

impl StubDestination {
    fn with_types(types: &[&str]) -> Self {
        Self {
            relationship_types: Ok(types.iter().map(|t| t.to_string()).collect()),
        }
    }

    fn failing(message: &str) -> Self {
        Self {
            relationship_types: Err(BridgeError::InvalidRequest(message.to_string())),
        }
    }
}

#[async_trait]
impl bridge_traits::DestinationCatalog for StubDestination {
    async fn create_product(&self, _payload: &ProductPayload) -> BridgeResult<String> {
        panic!("create_product must not be called");
    }

    async fn update_product(&self, _id: &str, _payload: &ProductPayload) -> BridgeResult<()> {
        panic!("update_product must not be called");
    }

    async fn search(
        &self,
        _filter: &SearchFilter,
        _cursor: Option<&str>,
        _page_size: usize,
    ) -> BridgeResult<SearchPage> {
        Ok(SearchPage::default())
    }

    async fn attach_related(
        &self,
        _owner_id: &str,
        _relationship: &str,
        _related_ids: &[String],
    ) -> BridgeResult<()> {
        panic!("attach_related must not be called");
    }

    async fn attach_media(&self, _product_id: &str, _url: &str) -> BridgeResult<()> {
        panic!("attach_media must not be called");
    }

    async fn relationship_types(&self) -> BridgeResult<Vec<String>> {
        match &self.relationship_types {
            Ok(types) => Ok(types.clone()),
            Err(e) => Err(BridgeError::InvalidRequest(e.to_string())),
        }
    }
}

fn deps(dir: &TempDir, source: MockSource, destination: StubDestination) -> CoreDependencies {
    CoreDependencies::new(
        Arc::new(source),
        Arc::new(destination),
        Arc::new(TokioFileSystem::with_data_directory(dir.path().to_path_buf())),
    )
}

#[test]
fn test_invalid_config_rejected() {
    let dir = TempDir::new().unwrap();
    let mut config = SyncConfig::default();
    config.batch.chunk_size = 0;

    let result = CoreService::new(
        config,
        deps(&dir, MockSource::new(), StubDestination::with_types(&[])),
    );
    assert!(matches!(result, Err(CoreError::Config(_))));
}

#[tokio::test]
async fn test_stop_signal_interrupts_before_source_is_called() {
    let dir = TempDir::new().unwrap();
    let destination = StubDestination::with_types(&["variations", "canonical_listings"]);
    // The source mock has no expectations: any call would panic.
    let service =
        CoreService::new(SyncConfig::default(), deps(&dir, MockSource::new(), destination))
            .unwrap();
    let mut events = service.subscribe();

    let report = service
        .run_until(RunRequest::new("stopped"), async {})
        .await
        .unwrap();

    assert_eq!(report.final_phase, SyncPhase::Extract);
    assert!(report.error.is_none());
    assert!(std::iter::from_fn(|| events.try_recv().ok())
        .any(|e| matches!(e, core_runtime::events::SyncEvent::RunInterrupted { .. })));
    assert!(dir.path().join("checkpoints").join("stopped.checkpoint.json").exists());
}

#[tokio::test]
async fn test_destination_outage_fails_run_without_writes() {
    let dir = TempDir::new().unwrap();
    let destination = StubDestination::failing("unknown schema");

    let service =
        CoreService::new(SyncConfig::default(), deps(&dir, MockSource::new(), destination))
            .unwrap();
    let report = service
        .run(RunRequest::new("outage"), tokio_util::sync::CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.final_phase, SyncPhase::Failed);
    assert!(report.error.as_deref().unwrap().contains("unknown schema"));
}

#[derive(Default)]
struct RecordingSink {
    entries: Mutex<Vec<LogEntry>>,
}

#[async_trait]
impl LoggerSink for RecordingSink {
    async fn log(&self, entry: LogEntry) -> BridgeResult<()> {
        self.entries.lock().await.push(entry);
        Ok(())
    }

    fn min_level(&self) -> LogLevel {
        LogLevel::Debug
    }
}

// The only test in this binary that installs the global subscriber.
#[tokio::test]
async fn test_logging_mirrors_events_into_host_sink() {
    let dir = TempDir::new().unwrap();
    let service = CoreService::new(
        SyncConfig::default(),
        deps(&dir, MockSource::new(), StubDestination::with_types(&[])),
    )
    .unwrap();
    let sink = Arc::new(RecordingSink::default());

    let host_sink: Arc<dyn LoggerSink> = sink.clone();
    service.init_logging(Some(host_sink)).unwrap();
    tracing::info!(target: "core_sync", run_id = "log-check", phase = "extract", "mirrored");

    let mut mirrored = None;
    for _ in 0..50 {
        mirrored = sink
            .entries
            .lock()
            .await
            .iter()
            .find(|entry| entry.message == "mirrored")
            .cloned();
        if mirrored.is_some() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let entry = mirrored.expect("event should reach the sink");
    assert_eq!(entry.run_id(), Some("log-check"));
    assert_eq!(entry.fields.get("phase").map(String::as_str), Some("extract"));

    // A filtered-out target never reaches the sink.
    tracing::info!(target: "hyper", "noise");
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!sink.entries.lock().await.iter().any(|entry| entry.message == "noise"));

    assert!(matches!(
        service.init_logging(None),
        Err(CoreError::InitializationFailed(_))
    ));
}
