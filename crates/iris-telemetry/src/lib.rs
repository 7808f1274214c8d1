mod logging;

pub use logging::{JournalLayer, WarnJournal};

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Configuration for the telemetry subsystem.
#[derive(Clone, Debug)]
pub struct TelemetryConfig {
    /// Default filter directive (e.g. `info` or `info,iris_server=debug`).
    /// Overridden by the `RUST_LOG` env var.
    pub log_level: String,
    /// JSON lines on stdout instead of compact text.
    pub json: bool,
    /// Whether to journal warn+ events to SQLite.
    pub log_to_sqlite: bool,
    /// Path to the journal database.
    pub log_db_path: PathBuf,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json: false,
            log_to_sqlite: false,
            log_db_path: dirs_fallback().join("logs.db"),
        }
    }
}

/// What [`init_telemetry`] ended up installing.
pub struct TelemetryGuard {
    journal_path: Option<PathBuf>,
}

impl TelemetryGuard {
    /// Where warnings are journaled, if the SQLite journal opened.
    pub fn journal_path(&self) -> Option<&Path> {
        self.journal_path.as_deref()
    }
}

fn build_filter(directive: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(directive))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Initialize the telemetry subsystem. Call once at startup.
pub fn init_telemetry(config: TelemetryConfig) -> TelemetryGuard {
    let json_layer = config.json.then(|| {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_span_list(true)
            .with_filter(build_filter(&config.log_level))
    });
    let text_layer = (!config.json).then(|| {
        tracing_subscriber::fmt::layer()
            .compact()
            .with_target(true)
            .with_filter(build_filter(&config.log_level))
    });

    let journal_layer = if config.log_to_sqlite {
        match WarnJournal::open(&config.log_db_path) {
            Ok(journal) => Some(JournalLayer::new(Arc::new(journal))),
            Err(e) => {
                eprintln!("iris-telemetry: failed to open journal {}: {e}", config.log_db_path.display());
                None
            }
        }
    } else {
        None
    };
    let journal_path = journal_layer.as_ref().map(|_| config.log_db_path.clone());

    if let Err(e) = tracing_subscriber::registry()
        .with(json_layer)
        .with(text_layer)
        .with(journal_layer)
        .try_init()
    {
        eprintln!("iris-telemetry: subscriber already installed: {e}");
    }

    TelemetryGuard { journal_path }
}

fn dirs_fallback() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
        .join(".iris")
}
