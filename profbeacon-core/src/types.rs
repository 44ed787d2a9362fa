//! Core domain types for profbeacon
//!
//! ## Terminology
//!
//! | Term | Definition |
//! |------|------------|
//! | **Capture window** | The span between opening a sample and collecting it |
//! | **Artifact** | One captured profile, before or after purge/compress |
//! | **Record-gate** | The flag that keeps capture windows from overlapping |
//! | **Drain cycle** | One attempt of the upload loop to deliver the queue head |
//! | **Flush generation** | Counter bumped on every disable; stale async results are dropped |

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

// ============================================
// Sampling session
// ============================================

/// Scheduler state for the single sampling session of a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SamplingState {
    /// No capture window open
    #[default]
    Idle,
    /// Capture window open, expiry timer armed
    Sampling,
    /// Window closed, profile being retrieved
    Collecting,
}

impl SamplingState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SamplingState::Idle => "idle",
            SamplingState::Sampling => "sampling",
            SamplingState::Collecting => "collecting",
        }
    }
}

impl std::fmt::Display for SamplingState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SamplingState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "idle" => Ok(SamplingState::Idle),
            "sampling" => Ok(SamplingState::Sampling),
            "collecting" => Ok(SamplingState::Collecting),
            _ => Err(format!("unknown sampling state: {}", s)),
        }
    }
}

/// The one sampling session owned by the controller.
///
/// Interval arithmetic uses the monotonic clock; the wall-clock copies exist
/// for status reporting only.
#[derive(Debug, Clone, Default)]
pub struct SamplingSession {
    pub state: SamplingState,
    /// Number of the current (or last) capture window
    pub window: u64,
    /// When the current window opened
    pub started_at: Option<Instant>,
    /// When the last window was collected
    pub last_completed_at: Option<Instant>,
    pub started_at_wall: Option<DateTime<Utc>>,
    pub last_completed_at_wall: Option<DateTime<Utc>>,
}

// ============================================
// Capture artifacts
// ============================================

/// Raw profile returned by the profiler for one capture window.
///
/// Transient: owned by the pipeline between retrieval and compression.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureArtifact(pub serde_json::Value);

impl CaptureArtifact {
    pub fn into_value(self) -> serde_json::Value {
        self.0
    }

    /// Milliseconds between the first and last sample of the first thread.
    ///
    /// Understands the three sample-table layouts profilers emit: a
    /// `schema`/`data` table, a columnar `time` array, and a plain list of
    /// sample objects. Returns `None` when the shape is not recognised.
    pub fn sample_span_ms(&self) -> Option<f64> {
        let samples = self.0.get("threads")?.as_array()?.first()?.get("samples")?;

        let times: Vec<f64> = if let Some(rows) = samples.get("data").and_then(|d| d.as_array()) {
            let column = samples.get("schema")?.get("time")?.as_u64()? as usize;
            rows.iter()
                .filter_map(|row| row.as_array()?.get(column)?.as_f64())
                .collect()
        } else if let Some(column) = samples.get("time").and_then(|t| t.as_array()) {
            column.iter().filter_map(|t| t.as_f64()).collect()
        } else if let Some(list) = samples.as_array() {
            list.iter()
                .filter_map(|s| s.get("time")?.as_f64())
                .collect()
        } else {
            return None;
        };

        let first = times.first()?;
        let last = times.last()?;
        Some(last - first)
    }
}

/// A purged, compressed artifact ready for the upload queue.
#[derive(Debug, Clone)]
pub struct CompressedBeacon {
    pub bytes: Vec<u8>,
    pub encoding: ContentEncoding,
    /// Size of the serialized JSON before compression
    pub raw_len: usize,
}

/// HTTP content encoding of an uploaded body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ContentEncoding {
    /// zlib-wrapped deflate stream (`Content-Encoding: deflate`)
    #[default]
    Deflate,
    /// gzip member (`Content-Encoding: gzip`)
    Gzip,
}

impl ContentEncoding {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentEncoding::Deflate => "deflate",
            ContentEncoding::Gzip => "gzip",
        }
    }
}

impl std::fmt::Display for ContentEncoding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================
// External triggers
// ============================================

/// Load phase reported with a navigation trigger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadStatus {
    Loading,
    Complete,
}

/// What the host knows about the tab that fired a trigger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TabContext {
    pub url: String,
    /// Tab is the selected tab of its window
    pub highlighted: bool,
    /// Private browsing context
    pub private: bool,
    /// Event belongs to the top-level frame
    pub top_frame: bool,
    pub status: Option<LoadStatus>,
    /// The URL changed with this event
    pub url_changed: bool,
}

impl TabContext {
    /// A foreground, non-private, top-frame http(s) tab that started loading.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            highlighted: true,
            private: false,
            top_frame: true,
            status: Some(LoadStatus::Loading),
            url_changed: false,
        }
    }

    /// Whether a navigation in this tab should count as user activity.
    pub fn is_user_facing_navigation(&self) -> bool {
        let web = self.url.starts_with("http://") || self.url.starts_with("https://");
        let started = self.status == Some(LoadStatus::Loading) || self.url_changed;
        self.highlighted && self.top_frame && !self.private && web && started
    }

    /// Whether activating this tab should count as user activity.
    pub fn is_user_facing_activation(&self) -> bool {
        !self.private
    }
}

// ============================================
// Status
// ============================================

/// Snapshot of the controller for UI reflection.
#[derive(Debug, Clone, Serialize)]
pub struct Status {
    pub enabled: bool,
    pub state: SamplingState,
    pub client_id: String,
    pub queued: usize,
    pub uploading: bool,
    /// Profiles still being compressed on the blocking pool
    pub compressing: usize,
    pub last_completed_at: Option<DateTime<Utc>>,
}

impl Status {
    pub fn is_sampling(&self) -> bool {
        self.state == SamplingState::Sampling
    }
}
