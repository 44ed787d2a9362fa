//! Sampling scheduler.
//!
//! Owns the single [`SamplingSession`] and decides when a capture window may
//! open. A window opens on a user-facing trigger if sampling is enabled, the
//! record-gate is open, and at least `min_interval` has passed since the last
//! window was collected. It closes on the expiry timer or an explicit
//! collect, after which the profile is read out in the background and the
//! gate reopens once the read-out reports back (or the watchdog gives up on
//! it).
//!
//! ```text
//!            request_sample            collect / expiry
//!   Idle ───────────────────▶ Sampling ─────────────────▶ Collecting
//!    ▲                                                        │
//!    └──────── finish_retrieval / watchdog_fired ─────────────┘
//! ```
//!
//! The scheduler is driven from the controller's task; profiler calls and
//! timers run as spawned tasks that post [`ControlEvent`]s back. Profiler
//! tasks are chained: each one waits for the previous call to finish, so a
//! read-out that outlives a disable releases the profiler before the next
//! window starts it again.

use std::future::Future;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::config::{AfterCapture, SamplingConfig};
use crate::controller::ControlEvent;
use crate::profiler::Profiler;
use crate::timer::Timer;
use crate::types::{SamplingSession, SamplingState};
use crate::usage::{UsageEvent, UsageSink};

pub struct Scheduler {
    session: SamplingSession,
    enabled: bool,
    can_record: bool,
    config: SamplingConfig,
    profiler: Arc<dyn Profiler>,
    usage: Arc<dyn UsageSink>,
    events: UnboundedSender<ControlEvent>,
    expiry: Option<Timer>,
    watchdog: Option<Timer>,
    /// Most recent profiler task; the next one waits for it.
    last_call: Option<JoinHandle<()>>,
}

impl Scheduler {
    /// The record-gate starts closed; see [`Scheduler::open_gate`].
    pub fn new(
        config: SamplingConfig,
        enabled: bool,
        profiler: Arc<dyn Profiler>,
        usage: Arc<dyn UsageSink>,
        events: UnboundedSender<ControlEvent>,
    ) -> Self {
        Self {
            session: SamplingSession::default(),
            enabled,
            can_record: false,
            config,
            profiler,
            usage,
            events,
            expiry: None,
            watchdog: None,
            last_call: None,
        }
    }

    /// Allow the first window once bootstrap has finished.
    pub fn open_gate(&mut self) {
        self.can_record = true;
    }

    pub fn session(&self) -> &SamplingSession {
        &self.session
    }

    pub fn state(&self) -> SamplingState {
        self.session.state
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn can_record(&self) -> bool {
        self.can_record
    }

    /// Whether an expiry or watchdog timer is armed
    pub fn has_pending_timer(&self) -> bool {
        self.expiry.is_some() || self.watchdog.is_some()
    }

    /// Open a capture window if the schedule allows it.
    ///
    /// Returns whether a window was opened. Never fails; an unmet
    /// precondition is a silent no-op.
    pub fn request_sample(&mut self, now: Instant) -> bool {
        if !self.enabled || !self.can_record {
            return false;
        }
        if let Some(last) = self.session.last_completed_at {
            if now.saturating_duration_since(last) < self.config.min_interval() {
                tracing::trace!("Sample requested inside the minimum interval");
                return false;
            }
        }
        debug_assert_eq!(self.session.state, SamplingState::Idle);

        self.can_record = false;
        self.session.window += 1;
        self.session.state = SamplingState::Sampling;
        self.session.started_at = Some(now);
        self.session.started_at_wall = Some(Utc::now());

        let window = self.session.window;
        self.expiry = Some(Timer::after(
            self.config.max_capture(),
            &self.events,
            ControlEvent::CaptureExpired { window },
        ));

        let profiler = Arc::clone(&self.profiler);
        let settings = self.config.profiler.clone();
        self.chain(async move {
            match profiler.is_active().await {
                Ok(true) => tracing::debug!(window, "Profiler already running"),
                Ok(false) | Err(_) => {
                    if let Err(e) = profiler.start(&settings).await {
                        tracing::warn!(window, error = %e, "Failed to start profiler");
                    }
                }
            }
        });

        tracing::info!(window, "Opened capture window");
        self.usage.record(UsageEvent::SampleStarted);
        true
    }

    /// Close the open window and start reading the profile out.
    ///
    /// `generation` is handed back with the result so the owner can drop
    /// read-outs that straddle a disable. Returns `false` when no window is
    /// open.
    pub fn collect(&mut self, now: Instant, generation: u64) -> bool {
        if self.session.state != SamplingState::Sampling {
            return false;
        }

        self.expiry = None;
        self.session.state = SamplingState::Collecting;
        self.session.last_completed_at = Some(now);
        self.session.last_completed_at_wall = Some(Utc::now());

        let sampling = self
            .session
            .started_at
            .map(|started| now.saturating_duration_since(started))
            .unwrap_or_default();
        self.usage.record(UsageEvent::SampleCollected { sampling });

        let window = self.session.window;
        self.watchdog = Some(Timer::after(
            self.config.retrieval_timeout(),
            &self.events,
            ControlEvent::RetrievalWatchdog { window },
        ));

        let profiler = Arc::clone(&self.profiler);
        let policy = self.config.after_capture;
        let events = self.events.clone();
        self.chain(async move {
            let started = Instant::now();

            if let Err(e) = profiler.pause().await {
                tracing::warn!(window, error = %e, "Failed to pause profiler");
            }
            let result = profiler.get_profile().await;
            let after = match policy {
                AfterCapture::Resume => profiler.resume().await,
                AfterCapture::Stop => profiler.stop().await,
            };
            if let Err(e) = after {
                tracing::warn!(window, ?policy, error = %e, "Failed to release profiler");
            }

            let _ = events.send(ControlEvent::Retrieved {
                window,
                generation,
                elapsed: started.elapsed(),
                result,
            });
        });

        tracing::info!(window, sampling_ms = sampling.as_millis() as u64, "Collected capture window");
        true
    }

    /// Expiry timer for `window` fired.
    pub fn capture_expired(&mut self, window: u64, now: Instant, generation: u64) -> bool {
        if window != self.session.window {
            return false;
        }
        self.collect(now, generation)
    }

    /// Read-out for `window` reported back, successfully or not.
    ///
    /// Returns whether this closed the current collection.
    pub fn finish_retrieval(&mut self, window: u64) -> bool {
        if window != self.session.window || self.session.state != SamplingState::Collecting {
            return false;
        }
        self.watchdog = None;
        self.session.state = SamplingState::Idle;
        self.can_record = true;
        true
    }

    /// Watchdog for `window` fired before the read-out reported back.
    pub fn watchdog_fired(&mut self, window: u64) -> bool {
        if window != self.session.window || self.session.state != SamplingState::Collecting {
            return false;
        }
        tracing::warn!(
            window,
            timeout_secs = self.config.retrieval_timeout_secs,
            "Profile read-out timed out, reopening record-gate"
        );
        self.watchdog = None;
        self.session.state = SamplingState::Idle;
        self.can_record = true;
        self.usage.record(UsageEvent::RetrievalTimeout);
        true
    }

    /// Flip sampling on or off.
    ///
    /// Enabling attempts a sample right away. Disabling cancels every timer,
    /// forgets the last completion and returns to `Idle` with the gate open.
    pub fn set_enabled(&mut self, enabled: bool, now: Instant) {
        if enabled {
            self.enabled = true;
            self.request_sample(now);
            return;
        }

        self.enabled = false;
        self.expiry = None;
        self.watchdog = None;

        if self.session.state == SamplingState::Sampling
            && self.config.after_capture == AfterCapture::Stop
        {
            let profiler = Arc::clone(&self.profiler);
            self.chain(async move {
                if let Err(e) = profiler.stop().await {
                    tracing::warn!(error = %e, "Failed to stop profiler");
                }
            });
        }

        self.session.state = SamplingState::Idle;
        self.session.started_at = None;
        self.session.last_completed_at = None;
        self.session.started_at_wall = None;
        self.session.last_completed_at_wall = None;
        self.can_record = true;
    }

    /// Cancel timers on shutdown.
    pub fn shutdown(&mut self) {
        self.expiry = None;
        self.watchdog = None;
        self.last_call = None;
    }

    /// Spawn a profiler task behind the previous one.
    ///
    /// A previous call that is still pending after the retrieval timeout is
    /// no longer waited for, so a wedged read-out cannot block every later
    /// window.
    fn chain<F>(&mut self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let previous = self.last_call.take();
        let limit = self.config.retrieval_timeout();
        self.last_call = Some(tokio::spawn(async move {
            if let Some(previous) = previous {
                if tokio::time::timeout(limit, previous).await.is_err() {
                    tracing::warn!(
                        timeout_secs = limit.as_secs(),
                        "Previous profiler call still pending, not waiting longer"
                    );
                }
            }
            task.await;
        }));
    }
}
