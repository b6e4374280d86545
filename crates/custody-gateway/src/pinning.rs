//! Pinning-service HTTP client.
//!
//! ```text
//! put    POST   {api_url}/pinning/pinFileToIPFS      multipart "file"
//! get    GET    {gateway_url}/{address}
//! unpin  DELETE {api_url}/pinning/unpin/{address}
//! ```

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::{debug, instrument};

use crate::{ContentStore, ContentStoreError, Result};

const API_KEY_HEADER: &str = "pinata_api_key";
const SECRET_KEY_HEADER: &str = "pinata_secret_api_key";

/// API key pair for the pinning service
#[derive(Clone)]
pub struct PinningCredentials {
    pub api_key: String,
    pub secret_key: String,
}

impl fmt::Debug for PinningCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PinningCredentials")
            .field("api_key", &"<redacted>")
            .field("secret_key", &"<redacted>")
            .finish()
    }
}

/// Connection settings for [`PinningGateway`]
#[derive(Debug, Clone)]
pub struct GatewayOptions {
    /// Base URL of the pinning API
    pub api_url: String,
    /// Base URL of the read gateway
    pub gateway_url: String,
    /// `None` means uploads are rejected locally with `AuthError`
    pub credentials: Option<PinningCredentials>,
    /// Per-request timeout enforced by the HTTP client
    pub request_timeout: Duration,
}

impl Default for GatewayOptions {
    fn default() -> Self {
        Self {
            api_url: "https://api.pinata.cloud".to_string(),
            gateway_url: "https://gateway.pinata.cloud/ipfs".to_string(),
            credentials: None,
            request_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Deserialize)]
struct PinResponse {
    #[serde(rename = "IpfsHash")]
    ipfs_hash: String,
    #[serde(rename = "PinSize", default)]
    pin_size: Option<u64>,
}

/// [`ContentStore`] backed by a pinning service.
#[derive(Debug, Clone)]
pub struct PinningGateway {
    client: reqwest::Client,
    options: GatewayOptions,
}

impl PinningGateway {
    pub fn new(options: GatewayOptions) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(options.request_timeout)
            .build()
            .map_err(|e| ContentStoreError::Transport(e.to_string()))?;
        Ok(Self { client, options })
    }

    fn credentials(&self) -> Result<&PinningCredentials> {
        self.options
            .credentials
            .as_ref()
            .ok_or_else(|| ContentStoreError::AuthError("credentials not configured".to_string()))
    }

    pub fn pin_url(&self) -> String {
        format!("{}/pinning/pinFileToIPFS", trim(&self.options.api_url))
    }

    pub fn unpin_url(&self, address: &str) -> String {
        format!("{}/pinning/unpin/{}", trim(&self.options.api_url), address)
    }

    pub fn fetch_url(&self, address: &str) -> String {
        format!("{}/{}", trim(&self.options.gateway_url), address)
    }
}

fn trim(url: &str) -> &str {
    url.trim_end_matches('/')
}

fn map_reqwest(e: reqwest::Error) -> ContentStoreError {
    if e.is_timeout() {
        ContentStoreError::Timeout
    } else {
        ContentStoreError::Transport(e.to_string())
    }
}

/// Map a non-success HTTP status to the content store taxonomy.
pub(crate) fn classify_status(status: StatusCode, address: &str) -> Option<ContentStoreError> {
    if status.is_success() {
        return None;
    }
    Some(match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            ContentStoreError::AuthError(format!("HTTP {}", status))
        }
        StatusCode::NOT_FOUND => ContentStoreError::NotFound {
            address: address.to_string(),
        },
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => ContentStoreError::Timeout,
        _ => ContentStoreError::Transport(format!("HTTP {}", status)),
    })
}

#[async_trait]
impl ContentStore for PinningGateway {
    #[instrument(skip(self, data), fields(bytes = data.len()), level = "debug")]
    async fn put(&self, data: &[u8]) -> Result<String> {
        let credentials = self.credentials()?;

        let part = Part::bytes(data.to_vec())
            .file_name("custody-blob.bin")
            .mime_str("application/octet-stream")
            .map_err(map_reqwest)?;
        let metadata = serde_json::json!({
            "name": "custody-blob",
            "keyvalues": { "encrypted": "true" }
        });
        let form = Form::new()
            .part("file", part)
            .text("pinataOptions", r#"{"cidVersion":1}"#)
            .text("pinataMetadata", metadata.to_string());

        let response = self
            .client
            .post(self.pin_url())
            .header(API_KEY_HEADER, &credentials.api_key)
            .header(SECRET_KEY_HEADER, &credentials.secret_key)
            .multipart(form)
            .send()
            .await
            .map_err(map_reqwest)?;

        if let Some(err) = classify_status(response.status(), "") {
            return Err(err);
        }

        let pinned: PinResponse = response.json().await.map_err(map_reqwest)?;
        debug!(address = %pinned.ipfs_hash, pin_size = ?pinned.pin_size, "Pinned blob");
        Ok(pinned.ipfs_hash)
    }

    #[instrument(skip(self), level = "debug")]
    async fn get(&self, address: &str) -> Result<Vec<u8>> {
        let response = self
            .client
            .get(self.fetch_url(address))
            .send()
            .await
            .map_err(map_reqwest)?;

        if let Some(err) = classify_status(response.status(), address) {
            return Err(err);
        }

        let body = response.bytes().await.map_err(map_reqwest)?;
        Ok(body.to_vec())
    }

    #[instrument(skip(self), level = "debug")]
    async fn unpin(&self, address: &str) -> Result<()> {
        let credentials = self.credentials()?;

        let response = self
            .client
            .delete(self.unpin_url(address))
            .header(API_KEY_HEADER, &credentials.api_key)
            .header(SECRET_KEY_HEADER, &credentials.secret_key)
            .send()
            .await
            .map_err(map_reqwest)?;

        match classify_status(response.status(), address) {
            None | Some(ContentStoreError::NotFound { .. }) => Ok(()),
            Some(err) => Err(err),
        }
    }
}
