//! Purge-and-compress worker.
//!
//! A single named thread owns the [`Purger`] and its token cache. The
//! control task hands it raw profiles by value; the worker scrubs,
//! serializes and compresses each one in arrival order and posts the result
//! back as [`ControlEvent::Compressed`]. Only one profile is processed at a
//! time and the control task never runs the URL scan itself.

use std::sync::mpsc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use serde_json::Value;
use tokio::sync::mpsc::UnboundedSender;

use crate::compress::compress;
use crate::controller::ControlEvent;
use crate::error::{Error, Result};
use crate::purge::Purger;
use crate::types::ContentEncoding;

enum PackCommand {
    Pack { generation: u64, profile: Value },
    Shutdown,
}

/// Handle to the worker thread. Dropping it stops and joins the thread.
pub struct PackWorker {
    sender: mpsc::Sender<PackCommand>,
    worker: Option<JoinHandle<()>>,
}

impl PackWorker {
    pub fn spawn(
        mut purger: Purger,
        encoding: ContentEncoding,
        events: UnboundedSender<ControlEvent>,
    ) -> Result<Self> {
        let (sender, commands) = mpsc::channel::<PackCommand>();

        let worker = thread::Builder::new()
            .name("profbeacon-pack".into())
            .spawn(move || {
                while let Ok(command) = commands.recv() {
                    let (generation, profile) = match command {
                        PackCommand::Pack {
                            generation,
                            profile,
                        } => (generation, profile),
                        PackCommand::Shutdown => break,
                    };

                    let started = Instant::now();
                    let purged = purger.purge(profile);
                    let purge_ms = started.elapsed().as_millis() as u64;
                    let result = compress(&purged, encoding);
                    if let Ok(beacon) = &result {
                        tracing::debug!(
                            generation,
                            purge_ms,
                            total_ms = started.elapsed().as_millis() as u64,
                            cached_slices = purger.cache_len(),
                            raw_bytes = beacon.raw_len,
                            compressed_bytes = beacon.bytes.len(),
                            "Packed profile"
                        );
                    }

                    if events
                        .send(ControlEvent::Compressed { generation, result })
                        .is_err()
                    {
                        // control task is gone
                        break;
                    }
                }
                tracing::debug!("Pack worker stopped");
            })?;

        Ok(Self {
            sender,
            worker: Some(worker),
        })
    }

    /// Queue `profile` for purge and compression.
    pub fn submit(&self, generation: u64, profile: Value) -> Result<()> {
        self.sender
            .send(PackCommand::Pack {
                generation,
                profile,
            })
            .map_err(|_| Error::Compression("pack worker is not running".to_string()))
    }
}

impl Drop for PackWorker {
    fn drop(&mut self) {
        if let Some(handle) = self.worker.take() {
            let _ = self.sender.send(PackCommand::Shutdown);
            if handle.join().is_err() {
                tracing::error!("Pack worker panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::purge::Whitelist;
    use flate2::read::ZlibDecoder;
    use serde_json::json;
    use std::io::Read;
    use tokio::sync::mpsc as async_mpsc;

    fn unpack(event: ControlEvent) -> (u64, Value) {
        match event {
            ControlEvent::Compressed { generation, result } => {
                let beacon = result.unwrap();
                let mut json = String::new();
                ZlibDecoder::new(beacon.bytes.as_slice())
                    .read_to_string(&mut json)
                    .unwrap();
                (generation, serde_json::from_str(&json).unwrap())
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_worker_purges_and_compresses_in_order() {
        let (tx, mut rx) = async_mpsc::unbounded_channel();
        let worker =
            PackWorker::spawn(Purger::default(), ContentEncoding::Deflate, tx).unwrap();

        worker
            .submit(1, json!({ "url": "https://private.example.net/a" }))
            .unwrap();
        worker
            .submit(2, json!({ "url": "https://private.example.net/a" }))
            .unwrap();

        let (first_gen, first) = unpack(rx.recv().await.unwrap());
        let (second_gen, second) = unpack(rx.recv().await.unwrap());
        assert_eq!((first_gen, second_gen), (1, 2));

        let url = first["url"].as_str().unwrap();
        assert!(url.starts_with("//"));
        assert!(!url.contains("example"));
        // the worker keeps one token cache across profiles
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_worker_uses_configured_whitelist() {
        let (tx, mut rx) = async_mpsc::unbounded_channel();
        let purger = Purger::new(Whitelist::with_extra(["example.net"]));
        let worker = PackWorker::spawn(purger, ContentEncoding::Deflate, tx).unwrap();

        worker
            .submit(0, json!(["see https://private.example.net/"]))
            .unwrap();
        let (_, value) = unpack(rx.recv().await.unwrap());
        assert_eq!(value, json!(["see //private.example.net"]));
    }

    #[test]
    fn test_drop_joins_worker() {
        let (tx, _rx) = async_mpsc::unbounded_channel();
        let worker = PackWorker::spawn(Purger::default(), ContentEncoding::Gzip, tx).unwrap();
        drop(worker);
    }
}
