//! Core service façade and bootstrap helpers.
//!
//! This crate wires host-provided bridge implementations (source
//! marketplace, destination PIM, filesystem, clock) into the sync core and
//! owns process-level concerns: installing the `tracing` subscriber and
//! turning Ctrl-C into a clean, resumable stop. Desktop and server hosts
//! typically enable the `desktop-shims` feature, which supplies a
//! `tokio::fs` backed filesystem.

pub mod error;

pub use error::{CoreError, Result};

pub use bridge_traits::log::{LogEntry, LogLevel, LoggerSink};
pub use core_runtime::logging::{LogFormat, LogSettings};
pub use core_runtime::SyncConfig;
pub use core_sync::{RunRequest, SyncPhase, SyncReport};

use std::future::Future;
use std::path::Path;
use std::sync::Arc;

use bridge_traits::{Clock, DestinationCatalog, FileSystemAccess, SourceCatalog, SystemClock};
use core_runtime::events::{EventBus, SyncEvent};
use core_sync::SyncOrchestrator;
use tokio::sync::broadcast::Receiver;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Aggregated handle to all bridge dependencies the core requires.
pub struct CoreDependencies {
    pub source: Arc<dyn SourceCatalog>,
    pub destination: Arc<dyn DestinationCatalog>,
    pub filesystem: Arc<dyn FileSystemAccess>,
    pub clock: Arc<dyn Clock>,
}

impl CoreDependencies {
    /// Construct a dependency bundle from explicit bridge handles.
    pub fn new(
        source: Arc<dyn SourceCatalog>,
        destination: Arc<dyn DestinationCatalog>,
        filesystem: Arc<dyn FileSystemAccess>,
    ) -> Self {
        Self {
            source,
            destination,
            filesystem,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Bundle the host's catalog adapters with the platform filesystem.
    #[cfg(all(feature = "desktop-shims", not(target_arch = "wasm32")))]
    pub fn desktop(
        source: Arc<dyn SourceCatalog>,
        destination: Arc<dyn DestinationCatalog>,
    ) -> Self {
        Self::new(
            source,
            destination,
            Arc::new(bridge_desktop::TokioFileSystem::new()),
        )
    }
}

/// Primary façade exposed to host applications.
#[derive(Clone)]
pub struct CoreService {
    orchestrator: Arc<SyncOrchestrator>,
    events: EventBus,
}

impl CoreService {
    /// Validate `config` and wire the orchestrator.
    pub fn new(config: SyncConfig, deps: CoreDependencies) -> Result<Self> {
        config.validate()?;

        let events = EventBus::default();
        let orchestrator =
            SyncOrchestrator::new(config, deps.source, deps.destination, deps.filesystem)?
                .with_clock(deps.clock)
                .with_event_bus(events.clone());

        Ok(Self {
            orchestrator: Arc::new(orchestrator),
            events,
        })
    }

    /// Load the configuration from a JSON file, then wire the service.
    pub fn from_config_file(path: impl AsRef<Path>, deps: CoreDependencies) -> Result<Self> {
        let config = SyncConfig::from_json_file(path)?;
        Self::new(config, deps)
    }

    pub fn config(&self) -> &SyncConfig {
        self.orchestrator.config()
    }

    /// Install the process-wide subscriber described by the `logging`
    /// section, optionally mirroring every event into `sink`.
    ///
    /// Call once per process, before the first run.
    pub fn init_logging(&self, sink: Option<Arc<dyn LoggerSink>>) -> Result<()> {
        core_runtime::logging::init_logging(&self.config().logging, sink)
            .map_err(|e| CoreError::InitializationFailed(e.to_string()))?;
        info!(format = ?self.config().logging.format, "Logging initialized");
        Ok(())
    }

    /// Subscribe to run, phase and progress events.
    pub fn subscribe(&self) -> Receiver<SyncEvent> {
        self.events.subscribe()
    }

    /// Run or resume `request`. Cancelling `cancel` stops the run at the
    /// next item boundary with its checkpoint flushed.
    pub async fn run(&self, request: RunRequest, cancel: CancellationToken) -> Result<SyncReport> {
        Ok(self.orchestrator.run(request, cancel).await?)
    }

    /// Run until done or until `signal` resolves, whichever comes first.
    ///
    /// The signal only stops new work from being dispatched; the run still
    /// returns its report once in-flight calls finish.
    pub async fn run_until<S>(&self, request: RunRequest, signal: S) -> Result<SyncReport>
    where
        S: Future<Output = ()>,
    {
        let cancel = CancellationToken::new();
        let run = self.run(request, cancel.clone());
        tokio::pin!(run);

        tokio::select! {
            biased;
            _ = signal => {
                warn!("Stop requested, finishing in-flight work");
                cancel.cancel();
            }
            report = &mut run => return report,
        }

        run.await
    }

    /// Run until done or until the process receives Ctrl-C.
    pub async fn run_until_interrupted(&self, request: RunRequest) -> Result<SyncReport> {
        self.run_until(request, async {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("Interrupt received"),
                Err(e) => {
                    warn!(error = %e, "Cannot listen for Ctrl-C, running to completion");
                    std::future::pending::<()>().await;
                }
            }
        })
        .await
    }
}
