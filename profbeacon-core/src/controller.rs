//! Session controller
//!
//! Wires the scheduler, pack worker and upload queue together behind a
//! single control task. Everything that mutates pipeline state happens on
//! that task in response to a [`ControlEvent`]; profiler calls, purging,
//! compression, network calls and timers run elsewhere and report back
//! through the same channel. Hosts talk to it through a cloneable [`ControllerHandle`].
//!
//! ## Flow
//!
//! ```text
//! trigger ─▶ Scheduler ─▶ (window) ─▶ read-out ─▶ PackWorker ─▶ UploadQueue
//!                                                  (purge, compress)  │
//!                                               drain tick ─▶ upload ◀┘
//! ```
//!
//! Disabling flushes everything in flight. A flush generation, bumped on
//! every disable, tags read-outs and compressions so results that straddle
//! a disable are dropped instead of being enqueued.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::collector::Collector;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::profiler::Profiler;
use crate::purge::{Purger, Whitelist};
use crate::queue::UploadQueue;
use crate::scheduler::Scheduler;
use crate::storage::{Storage, KEY_CLIENT_ID, KEY_ENABLED};
use crate::timer::Timer;
use crate::types::{CaptureArtifact, CompressedBeacon, SamplingState, Status, TabContext};
use crate::usage::{BootstrapSource, UsageEvent, UsageSink};
use crate::worker::PackWorker;

/// Messages processed by the control task.
#[derive(Debug)]
pub enum ControlEvent {
    /// Toolbar button: collect the open window, or flip enabled
    Toggle,
    Navigate(TabContext),
    Activate(TabContext),
    Enable,
    Disable,
    Status(oneshot::Sender<Status>),
    Shutdown(oneshot::Sender<()>),

    /// Expiry timer of a capture window fired
    CaptureExpired { window: u64 },
    /// Read-out of a window took too long
    RetrievalWatchdog { window: u64 },
    /// Read-out of a window finished
    Retrieved {
        window: u64,
        generation: u64,
        elapsed: Duration,
        result: Result<CaptureArtifact>,
    },
    /// Pack worker finished purging and compressing a profile
    Compressed {
        generation: u64,
        result: Result<CompressedBeacon>,
    },
    /// Upload delay elapsed
    DrainTick { tick: u64 },
    /// Upload of a queue entry finished
    UploadFinished {
        entry_id: u64,
        bytes: usize,
        elapsed: Duration,
        result: Result<()>,
    },
}

/// External capabilities the controller drives.
#[derive(Clone)]
pub struct Collaborators {
    pub profiler: Arc<dyn Profiler>,
    pub collector: Arc<dyn Collector>,
    pub storage: Arc<dyn Storage>,
    pub usage: Arc<dyn UsageSink>,
}

/// Cloneable handle to a running controller.
#[derive(Clone)]
pub struct ControllerHandle {
    events: UnboundedSender<ControlEvent>,
}

impl ControllerHandle {
    fn send(&self, event: ControlEvent) -> Result<()> {
        self.events.send(event).map_err(|_| Error::ControllerStopped)
    }

    /// Toolbar toggle: collect now while sampling, otherwise flip enabled.
    pub fn on_toggle(&self) -> Result<()> {
        self.send(ControlEvent::Toggle)
    }

    /// A tab navigated. Non user-facing navigations are ignored.
    pub fn on_navigate(&self, tab: TabContext) -> Result<()> {
        self.send(ControlEvent::Navigate(tab))
    }

    /// A tab was activated. Private tabs are ignored.
    pub fn on_activate(&self, tab: TabContext) -> Result<()> {
        self.send(ControlEvent::Activate(tab))
    }

    pub fn enable(&self) -> Result<()> {
        self.send(ControlEvent::Enable)
    }

    pub fn disable(&self) -> Result<()> {
        self.send(ControlEvent::Disable)
    }

    pub async fn status(&self) -> Result<Status> {
        let (reply, rx) = oneshot::channel();
        self.send(ControlEvent::Status(reply))?;
        rx.await.map_err(|_| Error::ControllerStopped)
    }

    pub async fn is_enabled(&self) -> Result<bool> {
        Ok(self.status().await?.enabled)
    }

    pub async fn is_sampling(&self) -> Result<bool> {
        Ok(self.status().await?.is_sampling())
    }

    /// Stop the control task after pending persistence has been written.
    pub async fn shutdown(&self) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(ControlEvent::Shutdown(reply))?;
        rx.await.map_err(|_| Error::ControllerStopped)
    }
}

pub struct Controller {
    config: Config,
    client_id: String,
    enabled: bool,
    generation: u64,
    scheduler: Scheduler,
    packer: PackWorker,
    queue: UploadQueue,
    compressing: usize,
    drain: Option<Timer>,
    drain_tick: u64,
    collector: Arc<dyn Collector>,
    usage: Arc<dyn UsageSink>,
    persist: Option<UnboundedSender<bool>>,
    persister: Option<JoinHandle<()>>,
    events: UnboundedSender<ControlEvent>,
    inbox: UnboundedReceiver<ControlEvent>,
}

impl Controller {
    /// Bootstrap identity and enabled state, then spawn the control task.
    ///
    /// The record-gate stays closed until this succeeds; a storage or
    /// registration failure is returned and nothing is spawned.
    pub async fn start(config: Config, deps: Collaborators) -> Result<ControllerHandle> {
        let client_id =
            bootstrap_client_id(&*deps.storage, &*deps.collector, &*deps.usage).await?;

        let enabled = match deps.storage.get(KEY_ENABLED).await? {
            Some(value) => value == "true",
            None => config.sampling.enabled,
        };
        tracing::info!(client_id = %client_id, enabled, "Controller bootstrapped");

        let (events, inbox) = mpsc::unbounded_channel();
        let (persist, persist_rx) = mpsc::unbounded_channel();
        let persister = tokio::spawn(persist_enabled(Arc::clone(&deps.storage), persist_rx));

        let mut scheduler = Scheduler::new(
            config.sampling.clone(),
            enabled,
            Arc::clone(&deps.profiler),
            Arc::clone(&deps.usage),
            events.clone(),
        );
        scheduler.open_gate();

        let purger = Purger::new(Whitelist::with_extra(
            config.privacy.extra_whitelist.iter().cloned(),
        ));
        let packer = PackWorker::spawn(purger, config.upload.encoding, events.clone())?;

        let mut controller = Controller {
            config,
            client_id,
            enabled,
            generation: 0,
            scheduler,
            packer,
            queue: UploadQueue::new(),
            compressing: 0,
            drain: None,
            drain_tick: 0,
            collector: deps.collector,
            usage: deps.usage,
            persist: Some(persist),
            persister: Some(persister),
            events: events.clone(),
            inbox,
        };
        if enabled {
            controller.arm_drain();
        }

        tokio::spawn(controller.run());
        Ok(ControllerHandle { events })
    }

    async fn run(mut self) {
        while let Some(event) = self.inbox.recv().await {
            if let ControlEvent::Shutdown(done) = event {
                self.teardown().await;
                let _ = done.send(());
                break;
            }
            self.handle(event);
        }
        tracing::debug!("Control task finished");
    }

    fn handle(&mut self, event: ControlEvent) {
        let now = Instant::now();
        match event {
            ControlEvent::Toggle => {
                if self.scheduler.state() == SamplingState::Sampling {
                    self.scheduler.collect(now, self.generation);
                } else {
                    self.set_enabled(!self.enabled, now);
                }
            }
            ControlEvent::Navigate(tab) => {
                if tab.is_user_facing_navigation() {
                    self.scheduler.request_sample(now);
                }
            }
            ControlEvent::Activate(tab) => {
                if tab.is_user_facing_activation() {
                    self.scheduler.request_sample(now);
                }
            }
            ControlEvent::Enable => self.set_enabled(true, now),
            ControlEvent::Disable => self.set_enabled(false, now),
            ControlEvent::Status(reply) => {
                let _ = reply.send(self.status());
            }
            // consumed by `run`
            ControlEvent::Shutdown(_) => {}
            ControlEvent::CaptureExpired { window } => {
                self.scheduler.capture_expired(window, now, self.generation);
            }
            ControlEvent::RetrievalWatchdog { window } => {
                self.scheduler.watchdog_fired(window);
            }
            ControlEvent::Retrieved {
                window,
                generation,
                elapsed,
                result,
            } => self.on_retrieved(window, generation, elapsed, result),
            ControlEvent::Compressed { generation, result } => {
                self.on_compressed(generation, result)
            }
            ControlEvent::DrainTick { tick } => self.on_drain_tick(tick),
            ControlEvent::UploadFinished {
                entry_id,
                bytes,
                elapsed,
                result,
            } => self.on_upload_finished(entry_id, bytes, elapsed, result),
        }
    }

    fn set_enabled(&mut self, enabled: bool, now: Instant) {
        if enabled {
            if self.enabled {
                return;
            }
            self.enabled = true;
            self.persist(true);
            self.arm_drain();
            self.usage.record(UsageEvent::Enabled);
            self.scheduler.set_enabled(true, now);
            tracing::info!("Sampling enabled");
            return;
        }

        self.enabled = false;
        self.scheduler.set_enabled(false, now);
        self.drain = None;
        let discarded = self.queue.clear();
        self.generation += 1;
        self.persist(false);
        self.usage.record(UsageEvent::Disabled { discarded });
        tracing::info!(discarded, generation = self.generation, "Sampling disabled");
    }

    fn persist(&self, enabled: bool) {
        if let Some(persist) = &self.persist {
            let _ = persist.send(enabled);
        }
    }

    fn on_retrieved(
        &mut self,
        window: u64,
        generation: u64,
        elapsed: Duration,
        result: Result<CaptureArtifact>,
    ) {
        self.scheduler.finish_retrieval(window);

        let artifact = match result {
            Ok(artifact) => artifact,
            Err(e) => {
                tracing::warn!(window, error = %e, "Failed to retrieve profile");
                self.usage.record(UsageEvent::RetrievalFailed);
                return;
            }
        };

        let capture_span_ms = artifact.sample_span_ms();
        if capture_span_ms.is_none() {
            tracing::warn!(window, "Could not read sample span from profile");
        }
        self.usage.record(UsageEvent::Retrieved {
            elapsed,
            capture_span_ms,
        });

        if generation != self.generation {
            tracing::debug!(window, "Dropping profile captured before a disable");
            return;
        }

        match self.packer.submit(generation, artifact.into_value()) {
            Ok(()) => self.compressing += 1,
            Err(e) => tracing::warn!(window, error = %e, "Failed to hand profile to pack worker"),
        }
    }

    fn on_compressed(&mut self, generation: u64, result: Result<CompressedBeacon>) {
        self.compressing = self.compressing.saturating_sub(1);
        if generation != self.generation {
            tracing::debug!("Dropping profile compressed before a disable");
            return;
        }
        match result {
            Ok(beacon) => {
                self.queue.push(beacon);
            }
            Err(e) => tracing::warn!(error = %e, "Failed to compress profile"),
        }
    }

    fn arm_drain(&mut self) {
        self.drain_tick += 1;
        self.drain = Some(Timer::after(
            self.config.upload.delay(),
            &self.events,
            ControlEvent::DrainTick {
                tick: self.drain_tick,
            },
        ));
    }

    fn on_drain_tick(&mut self, tick: u64) {
        if tick != self.drain_tick || !self.enabled {
            return;
        }
        self.drain = None;

        let Some(attempt) = self.queue.begin_attempt() else {
            self.arm_drain();
            return;
        };

        let collector = Arc::clone(&self.collector);
        let client_id = self.client_id.clone();
        let events = self.events.clone();
        tokio::spawn(async move {
            let started = Instant::now();
            let result = attempt.run(&*collector, &client_id).await;
            let _ = events.send(ControlEvent::UploadFinished {
                entry_id: attempt.entry_id,
                bytes: attempt.len(),
                elapsed: started.elapsed(),
                result,
            });
        });
    }

    fn on_upload_finished(
        &mut self,
        entry_id: u64,
        bytes: usize,
        elapsed: Duration,
        result: Result<()>,
    ) {
        match &result {
            Ok(()) => self.usage.record(UsageEvent::UploadSucceeded { elapsed, bytes }),
            Err(e) => {
                tracing::warn!(entry_id, error = %e, "Upload failed, will retry");
                self.usage.record(UsageEvent::UploadFailed);
            }
        }
        self.queue.finish_attempt(entry_id, result.is_ok());

        if self.enabled {
            self.arm_drain();
        }
    }

    fn status(&self) -> Status {
        Status {
            enabled: self.enabled,
            state: self.scheduler.state(),
            client_id: self.client_id.clone(),
            queued: self.queue.len(),
            uploading: self.queue.is_in_flight(),
            compressing: self.compressing,
            last_completed_at: self.scheduler.session().last_completed_at_wall,
        }
    }

    async fn teardown(&mut self) {
        self.scheduler.shutdown();
        self.drain = None;
        self.persist = None;
        if let Some(persister) = self.persister.take() {
            let _ = persister.await;
        }
        let stats = self.queue.stats();
        tracing::info!(
            queued = self.queue.len(),
            delivered = stats.delivered,
            failures = stats.failures,
            "Controller shut down"
        );
    }
}

/// Reuse the stored client id or register a new one.
async fn bootstrap_client_id(
    storage: &dyn Storage,
    collector: &dyn Collector,
    usage: &dyn UsageSink,
) -> Result<String> {
    if let Some(id) = storage.get(KEY_CLIENT_ID).await? {
        if !id.is_empty() {
            usage.record(UsageEvent::Bootstrap(BootstrapSource::Storage));
            return Ok(id);
        }
    }

    let id = collector.register().await?;
    storage.set(KEY_CLIENT_ID, &id).await?;
    usage.record(UsageEvent::Bootstrap(BootstrapSource::Register));
    tracing::info!(client_id = %id, "Registered new client");
    Ok(id)
}

/// Write enabled-flag changes in the order they happened.
async fn persist_enabled(storage: Arc<dyn Storage>, mut changes: UnboundedReceiver<bool>) {
    while let Some(enabled) = changes.recv().await {
        let value = if enabled { "true" } else { "false" };
        if let Err(e) = storage.set(KEY_ENABLED, value).await {
            tracing::warn!(error = %e, "Failed to persist enabled flag");
        }
    }
}
