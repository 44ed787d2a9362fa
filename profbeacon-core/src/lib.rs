//! # profbeacon-core
//!
//! Core library for profbeacon - a background profile sampler that captures
//! short profiler windows during user activity, scrubs URLs out of them and
//! uploads the result to a collection endpoint.
//!
//! This library provides:
//! - Sampling scheduler with a minimum interval between capture windows
//! - URL purge engine with a host whitelist and stable pseudonyms
//! - Background compression and an at-least-once upload queue
//! - Session controller that ties the pipeline to host triggers
//! - Configuration, key-value state storage and logging
//!
//! ## Architecture
//!
//! The host supplies the external capabilities as trait objects
//! ([`Profiler`], [`Collector`], [`Storage`], [`UsageSink`]) and drives the
//! pipeline through a [`ControllerHandle`]:
//!
//! ```text
//! host triggers ─▶ ControllerHandle ─▶ control task
//!                                        ├─ Scheduler ─▶ Profiler
//!                                        ├─ PackWorker (purge, compress)
//!                                        └─ UploadQueue ─▶ Collector
//! ```
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use profbeacon_core::{Collaborators, CollectorClient, Config, Controller, LogUsage, SqliteStorage};
//! # use profbeacon_core::Profiler;
//! # async fn run(profiler: Arc<dyn Profiler>) -> profbeacon_core::Result<()> {
//! let config = Config::load()?;
//! let deps = Collaborators {
//!     profiler,
//!     collector: Arc::new(CollectorClient::new(&config.upload)?),
//!     storage: Arc::new(SqliteStorage::open(&Config::state_db_path())?),
//!     usage: Arc::new(LogUsage),
//! };
//! let handle = Controller::start(config, deps).await?;
//! handle.on_toggle()?;
//! # Ok(())
//! # }
//! ```

// Re-export commonly used items at the crate root
pub use collector::{Collector, CollectorClient, UploadSlot};
pub use config::Config;
pub use controller::{Collaborators, Controller, ControllerHandle};
pub use error::{Error, Result};
pub use profiler::Profiler;
pub use purge::{Purger, Whitelist};
pub use queue::{UploadQueue, UploadStats};
pub use storage::{MemoryStorage, SqliteStorage, Storage};
pub use types::*;
pub use usage::{LogUsage, UsageEvent, UsageSink};

// Public modules
pub mod collector;
pub mod compress;
pub mod config;
pub mod controller;
pub mod error;
pub mod logging;
pub mod profiler;
pub mod purge;
pub mod queue;
pub mod scheduler;
pub mod storage;
pub mod types;
pub mod usage;

mod timer;
mod worker;
