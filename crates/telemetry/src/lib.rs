//! Structured logging (and optional OpenTelemetry export) shared by the
//! sync client and server binaries. Every crate that touches the network,
//! the change-log, or the filesystem emits spans/events through `tracing`
//! rather than ad-hoc `println!`.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter, Registry};

/// Errors from telemetry setup.
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// The OpenTelemetry pipeline failed to initialize.
    #[error("otel setup failed: {0}")]
    Otel(String),
}

/// Initialize structured JSON logging with an env filter. Set `RUST_LOG`,
/// e.g. `"info,sync_server=debug"`. Safe to call once per process; a
/// second call is a no-op (the global subscriber can only be set once).
pub fn init_json_logging() {
    let fmt_layer = fmt::layer().json().with_current_span(true).with_span_list(true);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = Registry::default().with(filter).with(fmt_layer);
    let _ = tracing::subscriber::set_global_default(subscriber);
}

/// Initialize OpenTelemetry tracing export (behind the `otel` feature).
/// No-op unless the caller has also wired exporter environment variables
/// (`OTEL_EXPORTER_*`); this only builds the pipeline.
#[cfg(feature = "otel")]
pub fn init_otel(service_name: &str) -> Result<(), TelemetryError> {
    use opentelemetry::KeyValue;
    use opentelemetry_sdk::trace as sdktrace;
    use opentelemetry_sdk::{runtime, Resource};

    let resource = Resource::new(vec![KeyValue::new("service.name", service_name.to_owned())]);
    let _tracer_provider = opentelemetry_otlp::new_pipeline()
        .tracing()
        .with_exporter(opentelemetry_otlp::new_exporter().http())
        .with_trace_config(sdktrace::config().with_resource(resource))
        .install_batch(runtime::Tokio)
        .map_err(|e| TelemetryError::Otel(e.to_string()))?;
    Ok(())
}

/// In-process counters for sync activity, surfaced by the server's
/// `GET /api/stats` endpoint and usable as OTel instruments when the
/// `otel` feature is enabled. Cheap to clone; all fields are `Arc`s over
/// atomics.
#[derive(Clone, Default)]
pub struct SyncMetrics {
    files_uploaded: Arc<AtomicU64>,
    files_downloaded: Arc<AtomicU64>,
    files_deleted: Arc<AtomicU64>,
    bytes_uploaded: Arc<AtomicU64>,
    bytes_downloaded: Arc<AtomicU64>,
    download_failures: Arc<AtomicU64>,
}

/// Point-in-time snapshot of [`SyncMetrics`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SyncMetricsSnapshot {
    /// Number of successful `FILE_UPLOAD` completions observed.
    pub files_uploaded: u64,
    /// Number of successful downloads observed.
    pub files_downloaded: u64,
    /// Number of tombstones recorded.
    pub files_deleted: u64,
    /// Total plaintext bytes uploaded.
    pub bytes_uploaded: u64,
    /// Total plaintext bytes downloaded.
    pub bytes_downloaded: u64,
    /// Number of downloads that failed (decrypt failure, missing blob, timeout).
    pub download_failures: u64,
}

impl SyncMetrics {
    /// Construct a fresh, zeroed metrics registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a completed upload of `bytes` plaintext bytes.
    pub fn record_upload(&self, bytes: u64) {
        self.files_uploaded.fetch_add(1, Ordering::Relaxed);
        self.bytes_uploaded.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Record a completed download of `bytes` plaintext bytes.
    pub fn record_download(&self, bytes: u64) {
        self.files_downloaded.fetch_add(1, Ordering::Relaxed);
        self.bytes_downloaded.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Record a tombstone (delete).
    pub fn record_delete(&self) {
        self.files_deleted.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a failed download (decrypt failure, missing blob, or timeout).
    pub fn record_download_failure(&self) {
        self.download_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Take a point-in-time snapshot of all counters.
    #[must_use]
    pub fn snapshot(&self) -> SyncMetricsSnapshot {
        SyncMetricsSnapshot {
            files_uploaded: self.files_uploaded.load(Ordering::Relaxed),
            files_downloaded: self.files_downloaded.load(Ordering::Relaxed),
            files_deleted: self.files_deleted.load(Ordering::Relaxed),
            bytes_uploaded: self.bytes_uploaded.load(Ordering::Relaxed),
            bytes_downloaded: self.bytes_downloaded.load(Ordering::Relaxed),
            download_failures: self.download_failures.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let m = SyncMetrics::new();
        m.record_upload(100);
        m.record_upload(50);
        m.record_download(200);
        m.record_delete();
        m.record_download_failure();
        let s = m.snapshot();
        assert_eq!(s.files_uploaded, 2);
        assert_eq!(s.bytes_uploaded, 150);
        assert_eq!(s.files_downloaded, 1);
        assert_eq!(s.bytes_downloaded, 200);
        assert_eq!(s.files_deleted, 1);
        assert_eq!(s.download_failures, 1);
    }
}
