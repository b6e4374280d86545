//! JSON-RPC 2.0 over HTTP.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::trace;

use crate::{AnchorError, Result};

#[derive(Debug, Deserialize)]
struct RpcEnvelope<T> {
    result: Option<T>,
    error: Option<RpcErrorObject>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorObject {
    code: i64,
    message: String,
}

/// Map a node error to the anchor taxonomy.
fn classify_rpc_error(code: i64, message: &str) -> AnchorError {
    let lower = message.to_ascii_lowercase();
    if lower.contains("insufficient funds") {
        AnchorError::InsufficientFunds
    } else if lower.contains("execution reverted") {
        AnchorError::ContractUnavailable(message.to_string())
    } else {
        AnchorError::Rpc(format!("{}: {}", code, message))
    }
}

fn map_reqwest(e: reqwest::Error) -> AnchorError {
    if e.is_timeout() {
        AnchorError::Timeout
    } else {
        AnchorError::Transport(e.to_string())
    }
}

/// JSON-RPC client bound to one node URL
#[derive(Debug)]
pub struct RpcClient {
    client: reqwest::Client,
    url: String,
    next_id: AtomicU64,
}

impl RpcClient {
    pub fn new(url: impl Into<String>, request_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| AnchorError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            url: url.into(),
            next_id: AtomicU64::new(1),
        })
    }

    /// Call `method`; a `null` result is returned as `None`.
    pub async fn call_optional<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Value,
    ) -> Result<Option<T>> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });
        trace!(method, id, "JSON-RPC request");

        let response = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(map_reqwest)?;

        let status = response.status();
        if !status.is_success() {
            return Err(AnchorError::Transport(format!("{}: HTTP {}", method, status)));
        }

        let envelope: RpcEnvelope<T> = response.json().await.map_err(map_reqwest)?;
        if let Some(err) = envelope.error {
            return Err(classify_rpc_error(err.code, &err.message));
        }
        Ok(envelope.result)
    }

    /// Call `method`; a `null` result is an error.
    pub async fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T> {
        self.call_optional(method, params)
            .await?
            .ok_or_else(|| AnchorError::Rpc(format!("{}: empty result", method)))
    }
}

/// Parse a `0x`-prefixed hex quantity.
pub(crate) fn parse_quantity(value: &str) -> Option<u64> {
    let digits = value.strip_prefix("0x").unwrap_or(value);
    if digits.is_empty() {
        return Some(0);
    }
    u64::from_str_radix(digits, 16).ok()
}

/// Format a hex quantity.
pub(crate) fn quantity(value: u64) -> String {
    format!("{:#x}", value)
}
