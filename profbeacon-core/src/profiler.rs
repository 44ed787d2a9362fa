//! Seam to the host's profiler service.
//!
//! The profiler is an external, stateful capability: the scheduler starts it,
//! pauses it to read a profile out, then resumes or stops it. Every call is
//! asynchronous and may fail on its own; callers log failures and carry on.

use async_trait::async_trait;

use crate::config::ProfilerSettings;
use crate::error::Result;
use crate::types::CaptureArtifact;

/// Host profiler capability.
#[async_trait]
pub trait Profiler: Send + Sync {
    /// Start sampling with `settings`.
    async fn start(&self, settings: &ProfilerSettings) -> Result<()>;

    /// Suspend sampling without discarding the buffer.
    async fn pause(&self) -> Result<()>;

    /// Continue after [`Profiler::pause`].
    async fn resume(&self) -> Result<()>;

    /// Stop sampling and drop the buffer.
    async fn stop(&self) -> Result<()>;

    /// Read out the current buffer as a structured profile.
    async fn get_profile(&self) -> Result<CaptureArtifact>;

    /// Whether the profiler is currently running.
    async fn is_active(&self) -> Result<bool>;
}
