//! # Structured Logging Module
//!
//! Environment-aware structured logging for every pipeline process. Console
//! output is always on; when `PIPELINE_LOG_DIR` is set, a JSON file layer is
//! added next to it.
//!
//! - `PIPELINE_ENV` selects the environment (`development` when unset)
//! - `LOG_LEVEL` takes precedence over `RUST_LOG`, which takes precedence over
//!   the environment default

use std::fs;
use std::path::PathBuf;
use std::process;
use std::sync::OnceLock;

use chrono::Utc;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Initialize structured logging once per process; later calls are no-ops
pub fn init_structured_logging(service_name: &str) {
    LOGGER_INITIALIZED.get_or_init(|| {
        let lookup = |key: &str| std::env::var(key).ok();
        let environment = get_environment(lookup);
        let filter = get_filter_directive(&environment, lookup);
        let pid = process::id();

        let console = fmt::layer()
            .with_target(true)
            .with_thread_ids(true)
            .with_level(true)
            .with_filter(EnvFilter::new(filter.clone()));

        let mut log_file = None;
        let file_layer = lookup("PIPELINE_LOG_DIR").and_then(|dir| {
            let log_dir = PathBuf::from(dir);
            if let Err(e) = fs::create_dir_all(&log_dir) {
                eprintln!("log directory {} unavailable: {e}", log_dir.display());
                return None;
            }
            let timestamp = Utc::now().format("%Y%m%d_%H%M%S");
            let file_name = format!("{service_name}.{environment}.{pid}.{timestamp}.log");
            log_file = Some(log_dir.join(&file_name));

            let appender = tracing_appender::rolling::never(&log_dir, file_name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            // The writer must outlive every log call in the process
            std::mem::forget(guard);

            Some(
                fmt::layer()
                    .with_writer(writer)
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_ansi(false)
                    .json()
                    .with_filter(EnvFilter::new(filter.clone())),
            )
        });

        if tracing_subscriber::registry()
            .with(console)
            .with(file_layer)
            .try_init()
            .is_err()
        {
            tracing::debug!("Global tracing subscriber already initialized");
        }

        tracing::info!(
            service = %service_name,
            pid,
            environment = %environment,
            filter = %filter,
            log_file = ?log_file,
            "🔧 STRUCTURED LOGGING: initialized"
        );
    });
}

fn get_environment(lookup: impl Fn(&str) -> Option<String>) -> String {
    lookup("PIPELINE_ENV")
        .or_else(|| lookup("APP_ENV"))
        .unwrap_or_else(|| "development".to_string())
}

fn default_level(environment: &str) -> &'static str {
    match environment {
        "production" => "info",
        _ => "debug",
    }
}

fn get_filter_directive(environment: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
    lookup("LOG_LEVEL")
        .map(|level| normalize_level(&level))
        .or_else(|| lookup("RUST_LOG"))
        .unwrap_or_else(|| default_level(environment).to_string())
}

/// Accept the level names other services use (`WARNING`, `CRITICAL`)
fn normalize_level(level: &str) -> String {
    match level.to_lowercase().as_str() {
        "warning" => "warn".to_string(),
        "critical" | "fatal" => "error".to_string(),
        other => other.to_string(),
    }
}

/// Log an event taken off a queue
pub fn log_event_received(queue: &str, event_type: &str, task_id: &str, message_id: &str) {
    tracing::info!(
        queue = %queue,
        event_type = %event_type,
        description = %crate::constants::describe_event(event_type),
        task_id = %task_id,
        message_id = %message_id,
        "📥 EVENT_RECEIVED"
    );
}

/// Log an event whose handler completed
pub fn log_event_processed(queue: &str, event_type: &str, task_id: &str, duration_ms: u64) {
    tracing::info!(
        queue = %queue,
        event_type = %event_type,
        task_id = %task_id,
        duration_ms,
        "✅ EVENT_PROCESSED"
    );
}

/// Log an event whose handler failed
pub fn log_event_failed(queue: &str, event_type: &str, task_id: &str, error: &str) {
    tracing::error!(
        queue = %queue,
        event_type = %event_type,
        task_id = %task_id,
        error = %error,
        "❌ EVENT_FAILED"
    );
}

/// Log an event put on the bus
pub fn log_event_published(exchange: &str, event_type: &str, task_id: &str, message_id: &str) {
    tracing::info!(
        exchange = %exchange,
        event_type = %event_type,
        description = %crate::constants::describe_event(event_type),
        task_id = %task_id,
        message_id = %message_id,
        "📤 EVENT_PUBLISHED"
    );
}
