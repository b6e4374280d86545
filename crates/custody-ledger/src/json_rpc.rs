//! [`AnchorLedger`] over an Ethereum-style JSON-RPC node.
//!
//! Transactions are submitted with `eth_sendTransaction` from an account the
//! node manages, then the receipt is polled a bounded number of times.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, instrument, warn};

use crate::abi;
use crate::rpc::{parse_quantity, quantity, RpcClient};
use crate::{owner_address, AnchorError, AnchorLedger, AnchorMode, AnchorReceipt, AnchorRequest, Result};

/// Gas limit for a simple-mode self-transfer with a short data payload
const SIMPLE_GAS_LIMIT: u64 = 25_000;

/// Number of content hash characters carried in a simple-mode payload
const SIMPLE_HASH_PREFIX: usize = 32;

/// Connection and transaction settings for [`JsonRpcLedger`]
#[derive(Debug, Clone)]
pub struct LedgerOptions {
    pub rpc_url: String,
    /// Sender account, `0x`-prefixed, unlocked on the node
    pub from_address: String,
    pub mode: AnchorMode,
    /// Registry contract, required in contract mode
    pub contract_address: Option<String>,
    /// Gas price in wei; `None` lets the node choose
    pub gas_price_wei: Option<u64>,
    pub request_timeout: Duration,
    pub receipt_poll_interval: Duration,
    pub receipt_poll_attempts: u32,
}

impl Default for LedgerOptions {
    fn default() -> Self {
        Self {
            rpc_url: "http://127.0.0.1:8545".to_string(),
            from_address: String::new(),
            mode: AnchorMode::Simple,
            contract_address: None,
            gas_price_wei: None,
            request_timeout: Duration::from_secs(10),
            receipt_poll_interval: Duration::from_secs(2),
            receipt_poll_attempts: 10,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TransactionReceipt {
    transaction_hash: String,
    block_number: Option<String>,
    status: Option<String>,
    #[serde(default)]
    logs: Vec<LogEntry>,
}

#[derive(Debug, Deserialize)]
struct LogEntry {
    #[serde(default)]
    topics: Vec<String>,
}

/// Ledger client speaking JSON-RPC
#[derive(Debug)]
pub struct JsonRpcLedger {
    rpc: RpcClient,
    options: LedgerOptions,
}

impl JsonRpcLedger {
    pub fn new(options: LedgerOptions) -> Result<Self> {
        let rpc = RpcClient::new(options.rpc_url.clone(), options.request_timeout)?;
        Ok(Self { rpc, options })
    }

    fn base_transaction(&self, to: &str, data: &[u8]) -> Value {
        let mut tx = json!({
            "from": self.options.from_address,
            "to": to,
            "value": "0x0",
            "data": format!("0x{}", hex::encode(data)),
        });
        if let Some(price) = self.options.gas_price_wei {
            tx["gasPrice"] = Value::String(quantity(price));
        }
        tx
    }

    async fn send(&self, tx: Value) -> Result<String> {
        self.rpc.call("eth_sendTransaction", json!([tx])).await
    }

    /// Poll for a receipt. `Ok(None)` means the transaction is still pending
    /// after the configured number of attempts.
    async fn wait_for_receipt(&self, tx_hash: &str) -> Result<Option<TransactionReceipt>> {
        for attempt in 0..self.options.receipt_poll_attempts {
            let receipt: Option<TransactionReceipt> = self
                .rpc
                .call_optional("eth_getTransactionReceipt", json!([tx_hash]))
                .await?;
            if let Some(receipt) = receipt {
                return Ok(Some(receipt));
            }
            debug!(tx_hash, attempt, "Receipt pending");
            tokio::time::sleep(self.options.receipt_poll_interval).await;
        }
        Ok(None)
    }

    fn block_ref(receipt: &TransactionReceipt) -> Option<String> {
        receipt
            .block_number
            .as_deref()
            .and_then(parse_quantity)
            .map(|n| n.to_string())
    }

    fn check_status(receipt: &TransactionReceipt) -> Result<()> {
        if receipt.status.as_deref().and_then(parse_quantity) == Some(0) {
            return Err(AnchorError::ContractUnavailable(format!(
                "transaction {} reverted",
                receipt.transaction_hash
            )));
        }
        Ok(())
    }

    #[instrument(skip(self, request), fields(content_hash = %request.content_hash), level = "debug")]
    async fn anchor_simple(&self, request: &AnchorRequest) -> Result<AnchorReceipt> {
        let to = self.options.from_address.clone();
        let mut tx = self.base_transaction(&to, &simple_payload(&request.content_hash));
        tx["gas"] = Value::String(quantity(SIMPLE_GAS_LIMIT));

        let tx_hash = self.send(tx).await?;
        let receipt = self.wait_for_receipt(&tx_hash).await?;
        let block_ref = match &receipt {
            Some(r) => {
                Self::check_status(r)?;
                Self::block_ref(r)
            }
            None => {
                warn!(tx_hash = %tx_hash, "Anchor transaction not mined while polling");
                None
            }
        };

        Ok(AnchorReceipt {
            tx_ref: tx_hash,
            block_ref,
            document_id: None,
            mode: AnchorMode::Simple,
        })
    }

    #[instrument(skip(self, request), fields(content_hash = %request.content_hash), level = "debug")]
    async fn anchor_contract(&self, request: &AnchorRequest) -> Result<AnchorReceipt> {
        let contract = self
            .options
            .contract_address
            .as_deref()
            .ok_or_else(|| AnchorError::ContractUnavailable("no contract address configured".into()))?;

        let code: String = self
            .rpc
            .call("eth_getCode", json!([contract, "latest"]))
            .await?;
        if code.trim_start_matches("0x").trim_start_matches('0').is_empty() {
            return Err(AnchorError::ContractUnavailable(format!(
                "no code at {}",
                contract
            )));
        }

        let data = abi::store_document_call(
            &request.content_hash,
            &request.storage_address,
            &request.key_material_ref,
            owner_address(&request.owner_identity),
        );
        let mut tx = self.base_transaction(contract, &data);

        let estimate: String = self.rpc.call("eth_estimateGas", json!([tx.clone()])).await?;
        let estimate = parse_quantity(&estimate)
            .ok_or_else(|| AnchorError::Rpc(format!("bad gas estimate: {}", estimate)))?;
        // 20% headroom over the estimate
        tx["gas"] = Value::String(quantity(estimate.saturating_mul(120) / 100));

        let tx_hash = self.send(tx).await?;
        let receipt = self.wait_for_receipt(&tx_hash).await?;
        let (block_ref, document_id) = match &receipt {
            Some(r) => {
                Self::check_status(r)?;
                (Self::block_ref(r), document_id_from_logs(&r.logs))
            }
            None => {
                warn!(tx_hash = %tx_hash, "Registry transaction not mined while polling");
                (None, None)
            }
        };

        Ok(AnchorReceipt {
            tx_ref: tx_hash,
            block_ref,
            document_id,
            mode: AnchorMode::Contract,
        })
    }
}

#[async_trait]
impl AnchorLedger for JsonRpcLedger {
    async fn anchor(&self, request: &AnchorRequest) -> Result<AnchorReceipt> {
        match self.options.mode {
            AnchorMode::Simple => self.anchor_simple(request).await,
            AnchorMode::Contract => self.anchor_contract(request).await,
        }
    }

    fn mode(&self) -> AnchorMode {
        self.options.mode
    }
}

/// `DOC:<first 32 hash chars>` as raw bytes.
fn simple_payload(content_hash: &str) -> Vec<u8> {
    let prefix: String = content_hash.chars().take(SIMPLE_HASH_PREFIX).collect();
    format!("DOC:{}", prefix).into_bytes()
}

/// Read the registry document id from the first `DocumentStored` log.
fn document_id_from_logs(logs: &[LogEntry]) -> Option<String> {
    let topic0 = abi::event_topic(abi::DOCUMENT_STORED_EVENT);
    let log = logs
        .iter()
        .find(|log| log.topics.first().is_some_and(|t| t.eq_ignore_ascii_case(&topic0)))?;
    let raw = log.topics.get(1)?;
    Some(word_to_decimal(raw))
}

/// Render a 32-byte topic word as a decimal id when it fits in `u128`.
fn word_to_decimal(word: &str) -> String {
    let digits = word.strip_prefix("0x").unwrap_or(word);
    let significant = digits.trim_start_matches('0');
    if significant.is_empty() {
        return "0".to_string();
    }
    match u128::from_str_radix(significant, 16) {
        Ok(n) if significant.len() <= 32 => n.to_string(),
        _ => format!("0x{}", significant),
    }
}
