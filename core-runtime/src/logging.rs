//! # Logging
//!
//! Installs the process-wide `tracing` subscriber from the `logging` section
//! of [`SyncConfig`](crate::SyncConfig).
//!
//! Workspace crates log at the configured level and everything else at
//! `warn`, unless a custom filter replaces those directives. A host that
//! keeps its own log store passes a [`LoggerSink`]; every event the filter
//! lets through is forwarded to it as a [`LogEntry`] next to the formatted
//! output.
//!
//! Sync code logs with the structured fields `run_id`, `phase`, `source_id`
//! and `attempt`, which the sink receives in [`LogEntry::fields`].
//!
//! ```json
//! { "logging": { "format": "json", "level": "Debug" } }
//! ```

use crate::error::{Error, Result};

use bridge_traits::log::{LogEntry, LogLevel, LoggerSink};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::{
    filter::EnvFilter,
    layer::{Context, SubscriberExt},
    registry::LookupSpan,
    util::SubscriberInitExt,
    Layer, Registry,
};

const WORKSPACE_TARGETS: &[&str] = &[
    "catalog_sync_workspace",
    "core_runtime",
    "core_throttle",
    "core_catalog",
    "core_matching",
    "core_sync",
    "core_service",
    "bridge_desktop",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// Multi-line, colored; meant for a terminal.
    Pretty,
    /// One JSON object per event, for log shippers.
    Json,
    Compact,
}

impl Default for LogFormat {
    fn default() -> Self {
        if cfg!(debug_assertions) {
            Self::Pretty
        } else {
            Self::Json
        }
    }
}

/// The `logging` configuration section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    pub format: LogFormat,
    /// Level of the workspace crates.
    pub level: LogLevel,
    /// Full `EnvFilter` directive string, e.g. `"warn,core_sync=debug"`.
    /// Replaces the per-crate defaults when set.
    pub filter: Option<String>,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            format: LogFormat::default(),
            level: LogLevel::Info,
            filter: None,
        }
    }
}

impl LogSettings {
    pub(crate) fn validate(&self) -> Result<()> {
        self.env_filter()
            .map(|_| ())
            .map_err(|e| Error::Config(format!("logging.filter: {}", e)))
    }

    fn directives(&self) -> String {
        if let Some(custom) = &self.filter {
            return custom.clone();
        }
        let level = self.level.as_str().to_ascii_lowercase();
        std::iter::once("warn".to_string())
            .chain(WORKSPACE_TARGETS.iter().map(|target| format!("{}={}", target, level)))
            .collect::<Vec<_>>()
            .join(",")
    }

    fn env_filter(&self) -> Result<EnvFilter> {
        EnvFilter::try_new(self.directives()).map_err(|e| Error::Logging(e.to_string()))
    }
}

/// Install the global subscriber. Fails when one is already installed.
pub fn init_logging(settings: &LogSettings, sink: Option<Arc<dyn LoggerSink>>) -> Result<()> {
    let output = tracing_subscriber::fmt::layer().with_writer(std::io::stdout);
    let output: Box<dyn Layer<Registry> + Send + Sync> = match settings.format {
        LogFormat::Pretty => output.pretty().boxed(),
        LogFormat::Json => output.json().flatten_event(true).with_current_span(true).boxed(),
        LogFormat::Compact => output.compact().boxed(),
    };

    tracing_subscriber::registry()
        .with(output)
        .with(settings.env_filter()?)
        .with(sink.map(SinkLayer))
        .try_init()
        .map_err(|e| Error::Logging(e.to_string()))
}

/// Forwards events to a host [`LoggerSink`].
struct SinkLayer(Arc<dyn LoggerSink>);

impl<S> Layer<S> for SinkLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_event(&self, event: &Event<'_>, ctx: Context<'_, S>) {
        let metadata = event.metadata();
        let level = log_level(*metadata.level());
        if level < self.0.min_level() {
            return;
        }

        let mut fields = FieldCollector::default();
        event.record(&mut fields);

        let message = fields.message.unwrap_or_else(|| metadata.name().to_string());
        let mut entry = LogEntry::new(level, metadata.target(), message);
        for (key, value) in fields.fields {
            entry = entry.with_field(key, value);
        }
        if let Some(span) = ctx.lookup_current() {
            entry = entry.with_field("span", span.name());
        }

        let sink = Arc::clone(&self.0);
        let delivery = async move {
            if let Err(err) = sink.log(entry).await {
                eprintln!("log sink rejected entry: {}", err);
            }
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(delivery);
            }
            Err(_) => futures::executor::block_on(delivery),
        }
    }
}

#[derive(Default)]
struct FieldCollector {
    message: Option<String>,
    fields: Vec<(String, String)>,
}

impl FieldCollector {
    fn push(&mut self, field: &Field, value: String) {
        match field.name() {
            "message" => self.message = Some(value),
            name => self.fields.push((name.to_string(), value)),
        }
    }
}

impl Visit for FieldCollector {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.push(field, value.to_string());
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.push(field, format!("{:?}", value));
    }
}

fn log_level(level: tracing::Level) -> LogLevel {
    match level {
        tracing::Level::TRACE => LogLevel::Trace,
        tracing::Level::DEBUG => LogLevel::Debug,
        tracing::Level::INFO => LogLevel::Info,
        tracing::Level::WARN => LogLevel::Warn,
        tracing::Level::ERROR => LogLevel::Error,
    }
}
