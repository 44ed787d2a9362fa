//! Fire-and-forget usage events.
//!
//! The pipeline reports what it is doing (a window opened, an upload failed,
//! how long a read-out took) through a [`UsageSink`]. Hosts that ship usage
//! counters to an analytics service implement the trait; the default
//! [`LogUsage`] writes the events to the tracing log.

use std::time::Duration;

/// Where the client id came from at bootstrap
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapSource {
    /// Found in storage
    Storage,
    /// Freshly registered with the collection endpoint
    Register,
}

/// One usage event.
#[derive(Debug, Clone, PartialEq)]
pub enum UsageEvent {
    Bootstrap(BootstrapSource),
    Enabled,
    Disabled {
        /// Queued profiles thrown away by the disable
        discarded: usize,
    },
    SampleStarted,
    SampleCollected {
        /// Wall time the capture window was open
        sampling: Duration,
    },
    /// Pause/read-out/resume finished
    Retrieved {
        elapsed: Duration,
        /// First-to-last sample span reported by the profile itself
        capture_span_ms: Option<f64>,
    },
    RetrievalFailed,
    RetrievalTimeout,
    UploadSucceeded {
        elapsed: Duration,
        bytes: usize,
    },
    UploadFailed,
}

impl UsageEvent {
    /// `(category, action)` pair for analytics backends
    pub fn category_action(&self) -> (&'static str, &'static str) {
        match self {
            UsageEvent::Bootstrap(BootstrapSource::Storage) => ("bootstrap", "storage"),
            UsageEvent::Bootstrap(BootstrapSource::Register) => ("bootstrap", "register"),
            UsageEvent::Enabled => ("status", "enable"),
            UsageEvent::Disabled { .. } => ("status", "disable"),
            UsageEvent::SampleStarted => ("profile", "start"),
            UsageEvent::SampleCollected { .. } => ("profile", "collect"),
            UsageEvent::Retrieved { .. } => ("profile", "get-data"),
            UsageEvent::RetrievalFailed => ("profile", "get-data-failed"),
            UsageEvent::RetrievalTimeout => ("profile", "get-data-timeout"),
            UsageEvent::UploadSucceeded { .. } => ("profile", "upload"),
            UsageEvent::UploadFailed => ("profile", "upload-failed"),
        }
    }
}

/// Receiver of usage events. Must not block.
pub trait UsageSink: Send + Sync {
    fn record(&self, event: UsageEvent);
}

/// Writes usage events to the tracing log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogUsage;

impl UsageSink for LogUsage {
    fn record(&self, event: UsageEvent) {
        let (category, action) = event.category_action();
        match &event {
            UsageEvent::SampleCollected { sampling } => tracing::info!(
                category,
                action,
                sampling_ms = sampling.as_millis() as u64,
                "usage"
            ),
            UsageEvent::Retrieved {
                elapsed,
                capture_span_ms,
            } => tracing::info!(
                category,
                action,
                elapsed_ms = elapsed.as_millis() as u64,
                capture_span_ms = ?capture_span_ms,
                "usage"
            ),
            UsageEvent::UploadSucceeded { elapsed, bytes } => tracing::info!(
                category,
                action,
                elapsed_ms = elapsed.as_millis() as u64,
                bytes,
                "usage"
            ),
            UsageEvent::Disabled { discarded } => {
                tracing::info!(category, action, discarded, "usage")
            }
            UsageEvent::RetrievalFailed
            | UsageEvent::RetrievalTimeout
            | UsageEvent::UploadFailed => tracing::warn!(category, action, "usage"),
            _ => tracing::info!(category, action, "usage"),
        }
    }
}
