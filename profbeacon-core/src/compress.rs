//! Serialize and compress purged profiles off the control task.
//!
//! Profiles are tens of megabytes of JSON, so encoding never runs on an
//! async task. The controller calls [`compress`] from its pack worker
//! thread; one-off callers use [`spawn`], which moves the value onto tokio's
//! blocking pool and returns the bytes through the join handle.

use std::io::Write;
use std::time::Instant;

use flate2::write::{GzEncoder, ZlibEncoder};
use flate2::Compression;
use serde_json::Value;
use tokio::task::JoinHandle;

use crate::error::{Error, Result};
use crate::types::{CompressedBeacon, ContentEncoding};

/// Serializes `value` to JSON and compresses it with `encoding`.
///
/// Blocking; call through [`spawn`] from async code.
pub fn compress(value: &Value, encoding: ContentEncoding) -> Result<CompressedBeacon> {
    let raw = serde_json::to_vec(value)?;
    let bytes = match encoding {
        ContentEncoding::Deflate => {
            let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(&raw)?;
            encoder.finish()?
        }
        ContentEncoding::Gzip => {
            let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(&raw)?;
            encoder.finish()?
        }
    };
    Ok(CompressedBeacon {
        bytes,
        encoding,
        raw_len: raw.len(),
    })
}

/// Runs [`compress`] on the blocking pool.
pub fn spawn(value: Value, encoding: ContentEncoding) -> JoinHandle<Result<CompressedBeacon>> {
    tokio::task::spawn_blocking(move || {
        let started = Instant::now();
        let beacon = compress(&value, encoding)?;
        tracing::debug!(
            encoding = %encoding,
            raw_bytes = beacon.raw_len,
            compressed_bytes = beacon.bytes.len(),
            ratio = beacon.raw_len as f64 / beacon.bytes.len().max(1) as f64,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Compressed profile"
        );
        Ok(beacon)
    })
}

/// Awaits a compression job, folding a panicked or cancelled worker into [`Error`].
pub async fn join(handle: JoinHandle<Result<CompressedBeacon>>) -> Result<CompressedBeacon> {
    handle
        .await
        .map_err(|e| Error::Compression(format!("compression worker failed: {}", e)))?
}
