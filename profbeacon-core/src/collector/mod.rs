//! Collection endpoint client
//!
//! The collection server hands out client ids and signed upload slots, and
//! accepts compressed profiles at those slots:
//!
//! ```text
//! POST {server}/beacons/         -> { "id": "..." }
//! POST {server}/beacons/{id}     -> { "url": "...", "key": "..." }
//! PUT  {url}  (compressed body)  -> 2xx
//! ```
//!
//! [`Collector`] is the seam the upload queue and controller talk to;
//! [`CollectorClient`] is the HTTP implementation.
//!
//! ## Usage
//!
//! Point the client at a server in `~/.config/profbeacon/config.toml`:
//!
//! ```toml
//! [upload]
//! server_url = "https://beacons.example.com"
//! encoding = "deflate"
//! ```

mod client;

pub use client::CollectorClient;

use async_trait::async_trait;
use serde::Deserialize;

use crate::error::Result;
use crate::types::ContentEncoding;

/// Signed destination for one upload
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct UploadSlot {
    /// Pre-signed URL to PUT the body to
    pub url: String,
    /// Object key the server will store the body under
    pub key: String,
}

/// Network side of the pipeline.
#[async_trait]
pub trait Collector: Send + Sync {
    /// Register a new client and return its id.
    async fn register(&self) -> Result<String>;

    /// Ask for a signed destination for the next upload.
    async fn request_upload_slot(&self, client_id: &str) -> Result<UploadSlot>;

    /// Transmit a compressed body to `slot`. Only a 2xx response is success.
    async fn upload(&self, slot: &UploadSlot, body: &[u8], encoding: ContentEncoding)
        -> Result<()>;
}
