//! Test doubles for the controller's collaborators

#![allow(dead_code)]

use std::io::Read;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use profbeacon_core::collector::{Collector, UploadSlot};
use profbeacon_core::config::ProfilerSettings;
use profbeacon_core::{
    CaptureArtifact, Collaborators, Config, ContentEncoding, ControllerHandle, Error,
    MemoryStorage, Profiler, Result, SamplingState, Status, TabContext, UsageEvent, UsageSink,
};
use serde_json::{json, Value};
use tokio::sync::Notify;

/// A profile with one private and one whitelisted URL in its string table
pub fn sample_profile() -> Value {
    json!({
        "meta": { "product": "Firefox", "interval": 2.0 },
        "threads": [{
            "name": "GeckoMain",
            "samples": {
                "schema": { "stack": 0, "time": 1 },
                "data": [[0, 10.0], [1, 510.0], [2, 1010.0]]
            },
            "stringTable": [
                "https://private.example.net/account/settings",
                "load https://github.com/rust-lang",
                "js::RunScript"
            ]
        }]
    })
}

#[derive(Default)]
pub struct MockProfiler {
    pub starts: AtomicUsize,
    pub stops: AtomicUsize,
    pub reads: AtomicUsize,
    pub fail_reads: AtomicBool,
}

#[async_trait]
impl Profiler for MockProfiler {
    async fn start(&self, _: &ProfilerSettings) -> Result<()> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn pause(&self) -> Result<()> {
        Ok(())
    }

    async fn resume(&self) -> Result<()> {
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn get_profile(&self) -> Result<CaptureArtifact> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(Error::Profiler("profiler not running".to_string()));
        }
        Ok(CaptureArtifact(sample_profile()))
    }

    async fn is_active(&self) -> Result<bool> {
        Ok(false)
    }
}

/// Collection endpoint that can fail, hold or record uploads.
#[derive(Default)]
pub struct MockCollector {
    pub registrations: AtomicUsize,
    pub fail_register: AtomicBool,
    /// Remaining uploads to reject
    pub fail_uploads: AtomicUsize,
    pub upload_calls: AtomicUsize,
    pub hold: AtomicBool,
    release: Notify,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
    pub received: Mutex<Vec<(Vec<u8>, ContentEncoding)>>,
}

impl MockCollector {
    /// Let held uploads through.
    pub fn release(&self) {
        self.hold.store(false, Ordering::SeqCst);
        self.release.notify_one();
    }

    pub fn received(&self) -> Vec<(Vec<u8>, ContentEncoding)> {
        self.received.lock().unwrap().clone()
    }
}

#[async_trait]
impl Collector for MockCollector {
    async fn register(&self) -> Result<String> {
        if self.fail_register.load(Ordering::SeqCst) {
            return Err(Error::Collector("API error (500): down".to_string()));
        }
        let n = self.registrations.fetch_add(1, Ordering::SeqCst);
        Ok(format!("client-{n}"))
    }

    async fn request_upload_slot(&self, client_id: &str) -> Result<UploadSlot> {
        Ok(UploadSlot {
            url: format!("https://uploads.example/{client_id}"),
            key: format!("{client_id}/profile"),
        })
    }

    async fn upload(&self, _: &UploadSlot, body: &[u8], encoding: ContentEncoding) -> Result<()> {
        self.upload_calls.fetch_add(1, Ordering::SeqCst);
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);

        if self.hold.load(Ordering::SeqCst) {
            self.release.notified().await;
        }

        let outcome = if self
            .fail_uploads
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            Err(Error::Collector("upload error (503): busy".to_string()))
        } else {
            self.received.lock().unwrap().push((body.to_vec(), encoding));
            Ok(())
        };

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        outcome
    }
}

#[derive(Default)]
pub struct RecordingUsage {
    pub events: Mutex<Vec<UsageEvent>>,
}

impl RecordingUsage {
    pub fn actions(&self) -> Vec<&'static str> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .map(|e| e.category_action().1)
            .collect()
    }
}

impl UsageSink for RecordingUsage {
    fn record(&self, event: UsageEvent) {
        self.events.lock().unwrap().push(event);
    }
}

pub struct Harness {
    pub profiler: Arc<MockProfiler>,
    pub collector: Arc<MockCollector>,
    pub storage: MemoryStorage,
    pub usage: Arc<RecordingUsage>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_storage(MemoryStorage::new())
    }

    pub fn with_storage(storage: MemoryStorage) -> Self {
        profbeacon_core::logging::init_test();
        Self {
            profiler: Arc::new(MockProfiler::default()),
            collector: Arc::new(MockCollector::default()),
            storage,
            usage: Arc::new(RecordingUsage::default()),
        }
    }

    pub fn deps(&self) -> Collaborators {
        Collaborators {
            profiler: self.profiler.clone(),
            collector: self.collector.clone(),
            storage: Arc::new(self.storage.clone()),
            usage: self.usage.clone(),
        }
    }
}

/// Defaults with no minimum interval so tests can capture back to back
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.sampling.min_interval_secs = 0;
    config
}

/// Poll the controller until `pred` holds.
///
/// The pack worker is a plain thread that the paused clock does not wait
/// for, so each round also yields a little real time.
pub async fn wait_for<F>(handle: &ControllerHandle, what: &str, pred: F) -> Status
where
    F: Fn(&Status) -> bool,
{
    for _ in 0..5000 {
        let status = handle.status().await.unwrap();
        if pred(&status) {
            return status;
        }
        std::thread::sleep(Duration::from_millis(1));
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}

/// Open a window, collect it and wait until the profile has been read out
/// and compressed.
pub async fn capture(handle: &ControllerHandle) {
    handle
        .on_navigate(TabContext::new("https://example.org/"))
        .unwrap();
    assert!(handle.is_sampling().await.unwrap(), "window did not open");
    handle.on_toggle().unwrap();
    wait_for(handle, "profile to be processed", |s| {
        s.state == SamplingState::Idle && s.compressing == 0
    })
    .await;
}

pub fn inflate(body: &[u8]) -> Value {
    let mut json = String::new();
    flate2::read::ZlibDecoder::new(body)
        .read_to_string(&mut json)
        .unwrap();
    serde_json::from_str(&json).unwrap()
}
