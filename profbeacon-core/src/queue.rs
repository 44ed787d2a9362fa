//! FIFO of compressed profiles awaiting delivery.
//!
//! The queue never removes an entry on its own initiative: the head stays
//! put until an upload of exactly that entry is confirmed. A failed attempt
//! leaves it at the head for the next drain cycle, so delivery is
//! at-least-once for as long as the entry survives (only an explicit
//! [`UploadQueue::clear`] drops entries). At most one attempt is in flight.
//!
//! The queue itself is passive; whoever owns it drives the drain cycle:
//!
//! ```text
//! begin_attempt() -> Some(attempt) -> attempt.run(..).await -> finish_attempt(id, ok)
//!                 -> None (empty or busy): try again after the upload delay
//! ```

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

use crate::collector::Collector;
use crate::error::{Error, Result};
use crate::types::{CompressedBeacon, ContentEncoding};

/// One compressed profile waiting for upload
#[derive(Debug, Clone)]
pub struct UploadQueueEntry {
    pub id: u64,
    pub payload: Arc<[u8]>,
    pub encoding: ContentEncoding,
    /// Serialized size before compression
    pub raw_len: usize,
    /// Hex SHA-256 of `payload` taken at enqueue time
    pub digest: String,
    pub enqueued_at: DateTime<Utc>,
}

/// Delivery counters
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct UploadStats {
    /// Upload attempts started
    pub attempts: usize,
    /// Entries confirmed delivered
    pub delivered: usize,
    /// Attempts that failed and left their entry queued
    pub failures: usize,
    /// Entries dropped by `clear`
    pub discarded: usize,
}

/// Ordered buffer of [`UploadQueueEntry`]
#[derive(Debug, Default)]
pub struct UploadQueue {
    entries: VecDeque<UploadQueueEntry>,
    next_id: u64,
    in_flight: Option<u64>,
    stats: UploadStats,
}

/// Everything needed to deliver the head entry, detached from the queue.
#[derive(Debug, Clone)]
pub struct UploadAttempt {
    pub entry_id: u64,
    payload: Arc<[u8]>,
    encoding: ContentEncoding,
    digest: String,
}

impl UploadQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a compressed profile; returns its entry id.
    pub fn push(&mut self, beacon: CompressedBeacon) -> u64 {
        self.next_id += 1;
        let id = self.next_id;
        let digest = digest_hex(&beacon.bytes);
        let entry = UploadQueueEntry {
            id,
            payload: Arc::from(beacon.bytes),
            encoding: beacon.encoding,
            raw_len: beacon.raw_len,
            digest,
            enqueued_at: Utc::now(),
        };
        tracing::debug!(
            entry_id = id,
            bytes = entry.payload.len(),
            digest = %entry.digest,
            queued = self.entries.len() + 1,
            "Queued profile for upload"
        );
        self.entries.push_back(entry);
        id
    }

    /// Start delivering the head entry without removing it.
    ///
    /// Returns `None` when the queue is empty or an attempt is outstanding.
    pub fn begin_attempt(&mut self) -> Option<UploadAttempt> {
        if self.in_flight.is_some() {
            return None;
        }
        let head = self.entries.front()?;
        self.in_flight = Some(head.id);
        self.stats.attempts += 1;
        Some(UploadAttempt {
            entry_id: head.id,
            payload: Arc::clone(&head.payload),
            encoding: head.encoding,
            digest: head.digest.clone(),
        })
    }

    /// Record the outcome of the attempt for `entry_id`.
    ///
    /// On success the entry is removed if it is still the head; returns
    /// whether anything was removed.
    pub fn finish_attempt(&mut self, entry_id: u64, delivered: bool) -> bool {
        if self.in_flight == Some(entry_id) {
            self.in_flight = None;
        }
        if !delivered {
            self.stats.failures += 1;
            return false;
        }
        match self.entries.front() {
            Some(head) if head.id == entry_id => {
                self.entries.pop_front();
                self.stats.delivered += 1;
                true
            }
            // cleared while the upload was in flight
            _ => false,
        }
    }

    /// Drop every queued entry. An outstanding attempt keeps running but its
    /// result no longer removes anything.
    pub fn clear(&mut self) -> usize {
        let dropped = self.entries.len();
        self.entries.clear();
        self.stats.discarded += dropped;
        dropped
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight.is_some()
    }

    pub fn head(&self) -> Option<&UploadQueueEntry> {
        self.entries.front()
    }

    pub fn stats(&self) -> &UploadStats {
        &self.stats
    }
}

impl UploadAttempt {
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Verify the payload, obtain a signed slot and transmit.
    pub async fn run(&self, collector: &dyn Collector, client_id: &str) -> Result<()> {
        let actual = digest_hex(&self.payload);
        if actual != self.digest {
            return Err(Error::Integrity {
                id: self.entry_id,
                expected: self.digest.clone(),
                actual,
            });
        }

        let slot = collector.request_upload_slot(client_id).await?;
        tracing::debug!(entry_id = self.entry_id, key = %slot.key, "Uploading profile");
        collector.upload(&slot, &self.payload, self.encoding).await?;
        tracing::info!(
            entry_id = self.entry_id,
            key = %slot.key,
            bytes = self.payload.len(),
            "Uploaded profile"
        );
        Ok(())
    }
}

/// Hex SHA-256 of `bytes`
pub fn digest_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}
