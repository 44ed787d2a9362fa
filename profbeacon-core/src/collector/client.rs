//! HTTP client for the beacon collection API

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderValue, CONTENT_ENCODING, CONTENT_TYPE};
use serde::Deserialize;

use crate::config::UploadConfig;
use crate::error::{Error, Result};
use crate::types::ContentEncoding;

use super::{Collector, UploadSlot};

/// Response from POST /beacons/
#[derive(Debug, Deserialize)]
struct RegisterResponse {
    /// Older servers call the field `uid`
    #[serde(alias = "uid")]
    id: String,
}

/// HTTP client for the collection API
pub struct CollectorClient {
    http_client: reqwest::Client,
    base_url: String,
}

impl CollectorClient {
    /// Create a new collector client from configuration
    ///
    /// Returns an error if the configuration is invalid.
    pub fn new(config: &UploadConfig) -> Result<Self> {
        config.validate()?;

        let base_url = config.server_url.trim_end_matches('/').to_string();

        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| Error::Config(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            base_url,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn register_url(&self) -> String {
        format!("{}/beacons/", self.base_url)
    }

    fn slot_url(&self, client_id: &str) -> String {
        format!(
            "{}/beacons/{}",
            self.base_url,
            urlencoding::encode(client_id)
        )
    }

    /// POST with an empty body and decode the JSON answer
    async fn post_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T> {
        let response = self
            .http_client
            .post(url)
            .send()
            .await
            .map_err(|e| Error::Collector(format!("HTTP request failed: {}", e)))?;

        let status = response.status();

        if status.is_success() {
            response
                .json()
                .await
                .map_err(|e| Error::Collector(format!("failed to parse response: {}", e)))
        } else {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown".to_string());
            Err(Error::Collector(format!(
                "API error ({}): {}",
                status, error_text
            )))
        }
    }
}

#[async_trait]
impl Collector for CollectorClient {
    async fn register(&self) -> Result<String> {
        let response: RegisterResponse = self.post_json(&self.register_url()).await?;
        Ok(response.id)
    }

    async fn request_upload_slot(&self, client_id: &str) -> Result<UploadSlot> {
        self.post_json(&self.slot_url(client_id)).await
    }

    async fn upload(
        &self,
        slot: &UploadSlot,
        body: &[u8],
        encoding: ContentEncoding,
    ) -> Result<()> {
        let response = self
            .http_client
            .put(&slot.url)
            .header(CONTENT_TYPE, HeaderValue::from_static("application/json"))
            .header(CONTENT_ENCODING, HeaderValue::from_static(encoding.as_str()))
            .body(body.to_vec())
            .send()
            .await
            .map_err(|e| Error::Collector(format!("HTTP request failed: {}", e)))?;

        let status = response.status();

        if status.is_success() {
            tracing::debug!(key = %slot.key, bytes = body.len(), "Uploaded profile");
            Ok(())
        } else {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown".to_string());
            Err(Error::Collector(format!(
                "upload error ({}): {}",
                status, error_text
            )))
        }
    }
}
