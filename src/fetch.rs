//! Manifest fetcher.
//!
//! Retrieves the manifest pointer from the Bungie platform and downloads the
//! locale's world-content bundle it points to. Both requests carry the
//! `X-API-Key` header and share one client with the configured timeout.
//!
//! There is no retry: the pipeline is a one-shot job and any transport
//! failure, non-200 status, or malformed pointer ends the run with a
//! [`ManifestError`]. Dropping the returned futures cancels the request.

use std::time::Duration;
use tracing::{debug, info};

use crate::config::ManifestConfig;
use crate::error::ManifestError;
use crate::models::{ManifestPointer, PointerEnvelope, PLATFORM_SUCCESS};
use crate::progress::{PipelineProgressEvent, PipelineProgressReporter};

pub const API_KEY_HEADER: &str = "X-API-Key";

/// A downloaded content bundle together with the pointer that named it.
#[derive(Debug, Clone)]
pub struct FetchedBundle {
    pub pointer: ManifestPointer,
    pub content_url: String,
    pub bytes: Vec<u8>,
}

pub struct ManifestFetcher {
    client: reqwest::Client,
    base_url: String,
    pointer_path: String,
    api_key: String,
}

impl ManifestFetcher {
    /// Builds a fetcher from the `[manifest]` config section.
    ///
    /// # Errors
    ///
    /// Returns [`ManifestError::Config`] if no API key is configured (neither
    /// `manifest.api_key` nor `BUNGIE_API_KEY`), or if the HTTP client cannot
    /// be built.
    pub fn new(config: &ManifestConfig) -> Result<Self, ManifestError> {
        let api_key = config.resolve_api_key().ok_or_else(|| {
            ManifestError::Config(format!(
                "no API key: set manifest.api_key or {}",
                crate::config::API_KEY_ENV
            ))
        })?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ManifestError::Config(format!("unable to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.base_url.clone(),
            pointer_path: config.pointer_path.clone(),
            api_key,
        })
    }

    pub fn pointer_url(&self) -> String {
        format!("{}{}", self.base_url, self.pointer_path)
    }

    /// Absolute URL for a content path from the pointer.
    ///
    /// Plain concatenation of host and path: the path is used exactly as
    /// published, slashes included.
    pub fn content_url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub async fn fetch_pointer(&self) -> Result<ManifestPointer, ManifestError> {
        let url = self.pointer_url();
        let body = self.get(&url).await?;
        let pointer = parse_pointer(&body)?;
        info!(
            version = pointer.version.as_deref().unwrap_or("unknown"),
            locales = pointer.world_content_paths.len(),
            "manifest pointer fetched"
        );
        Ok(pointer)
    }

    pub async fn download_bundle(&self, url: &str) -> Result<Vec<u8>, ManifestError> {
        let bytes = self.get(url).await?;
        info!(url, bytes = bytes.len(), "content bundle downloaded");
        Ok(bytes)
    }

    /// Pointer fetch followed by the bundle download for `locale`.
    pub async fn fetch_manifest(
        &self,
        locale: &str,
        progress: &dyn PipelineProgressReporter,
    ) -> Result<FetchedBundle, ManifestError> {
        progress.report(PipelineProgressEvent::FetchingPointer {
            url: self.pointer_url(),
        });
        let pointer = self.fetch_pointer().await?;
        let path = pointer
            .content_path(locale)
            .ok_or_else(|| ManifestError::MissingLocale(locale.to_string()))?;
        let content_url = self.content_url(path);

        progress.report(PipelineProgressEvent::Downloading {
            url: content_url.clone(),
        });
        let bytes = self.download_bundle(&content_url).await?;

        Ok(FetchedBundle {
            pointer,
            content_url,
            bytes,
        })
    }

    async fn get(&self, url: &str) -> Result<Vec<u8>, ManifestError> {
        debug!(url, "GET");
        let transport = |source| ManifestError::Transport {
            url: url.to_string(),
            source,
        };

        let response = self
            .client
            .get(url)
            .header(API_KEY_HEADER, &self.api_key)
            .send()
            .await
            .map_err(transport)?;

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            return Err(ManifestError::UpstreamStatus {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let body = response.bytes().await.map_err(transport)?;
        Ok(body.to_vec())
    }
}

/// Decodes the platform envelope and the pointer inside it.
pub fn parse_pointer(body: &[u8]) -> Result<ManifestPointer, ManifestError> {
    let envelope: PointerEnvelope = serde_json::from_slice(body)?;

    if let Some(code) = envelope.error_code {
        if code != PLATFORM_SUCCESS {
            return Err(ManifestError::UpstreamApi {
                code,
                status: envelope.error_status.unwrap_or_default(),
                message: envelope.message.unwrap_or_default(),
            });
        }
    }

    let response = envelope.response.unwrap_or(serde_json::Value::Null);
    Ok(serde_json::from_value(response)?)
}
