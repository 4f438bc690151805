//! # Chain Client Module
//!
//! This module provides a client for EVM JSON-RPC endpoints.
//! It wraps raw JSON-RPC calls and provides high-level methods for
//! vault and token reads, transaction submission, and receipts.
//!
//! ## Responsibilities
//!
//! - Read allowances, balances and vault totals (`eth_call`)
//! - Submit wallet-signed transactions (`eth_sendTransaction`)
//! - Fetch receipts for confirmation tracking
//! - Classify JSON-RPC errors for the wallet flows
//!
//! ## Endpoint Roles
//!
//! | Endpoint | Use Case |
//! |----------|----------|
//! | `RPC_URL` | Reads, receipts, health |
//! | `WALLET_RPC_URL` | Signing and submission |
//!
//! ## Read Flow
//!
//! ```text
//! 1. Cache asks for allowance(owner, vault)
//!              ↓
//! 2. IERC20::allowanceCall is ABI-encoded
//!              ↓
//! 3. eth_call against the token (retried on transport errors)
//!              ↓
//! 4. Return data decoded into U256
//! ```

pub mod abi;
pub mod networks;

use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::{Address, Bytes, B256, U256};
use alloy_sol_types::SolCall;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use abi::{IERC20, IVault};

/// EIP-1193 "user rejected request".
pub const USER_REJECTED_CODE: i64 = 4001;

/// Errors returned by JSON-RPC calls.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ChainError {
    /// The endpoint could not be reached or timed out.
    #[error("RPC transport error: {0}")]
    Transport(String),

    /// The endpoint answered with a JSON-RPC error object.
    #[error("RPC error {code}: {message}")]
    Rpc {
        code: i64,
        message: String,
        data: Option<Value>,
    },

    /// The endpoint answered with something we could not decode.
    #[error("Invalid RPC response: {0}")]
    InvalidResponse(String),
}

impl ChainError {
    /// Transport failures are worth retrying; JSON-RPC errors are not.
    pub fn is_transient(&self) -> bool {
        matches!(self, ChainError::Transport(_))
    }
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcErrorBody>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
    #[serde(default)]
    data: Option<Value>,
}

/// Receipt fields the watcher needs.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionReceipt {
    pub transaction_hash: B256,
    #[serde(default)]
    pub block_number: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

impl TransactionReceipt {
    /// `Some(true)` for status `0x1`, `Some(false)` for `0x0`.
    ///
    /// Pre-Byzantium receipts carry no status and yield `None`.
    pub fn succeeded(&self) -> Option<bool> {
        self.status
            .as_deref()
            .and_then(|s| parse_quantity(s).ok())
            .map(|v| v == 1)
    }
}

/// Read access to the token and vault contracts.
///
/// Implemented by [`EvmClient`]; tests substitute an in-memory reader.
#[async_trait]
pub trait ChainReader: Send + Sync {
    /// `IERC20(token).allowance(owner, spender)`
    async fn allowance(
        &self,
        token: Address,
        owner: Address,
        spender: Address,
    ) -> Result<U256, ChainError>;

    /// `IERC20(token).balanceOf(account)`; vault shares use the vault as token.
    async fn balance_of(&self, token: Address, account: Address) -> Result<U256, ChainError>;

    /// `IVault(vault).totalAssets()`
    async fn total_assets(&self, vault: Address) -> Result<U256, ChainError>;

    /// `IVault(vault).totalSupply()`
    async fn total_supply(&self, vault: Address) -> Result<U256, ChainError>;
}

/// EVM JSON-RPC client.
///
/// Cheap to clone; clones share the HTTP connection pool and the
/// request id counter.
///
/// ## Usage
///
/// ```rust,ignore
/// let client = EvmClient::new(&config.rpc_url)?;
/// let chain_id = client.chain_id().await?;
/// let healthy = client.get_health().await;
/// ```
#[derive(Clone)]
pub struct EvmClient {
    http: reqwest::Client,
    url: String,
    next_id: Arc<AtomicU64>,
}

impl EvmClient {
    /// Create a new client for `url` with a 30 second request timeout.
    pub fn new(url: &str) -> Result<Self, ChainError> {
        Self::build(url, Some(Duration::from_secs(30)))
    }

    /// Create a client for a signing endpoint.
    ///
    /// No request timeout: `eth_sendTransaction` stays open for as long
    /// as the wallet prompt does, and the transaction may be broadcast
    /// whenever the user answers it.
    pub fn wallet(url: &str) -> Result<Self, ChainError> {
        Self::build(url, None)
    }

    fn build(url: &str, request_timeout: Option<Duration>) -> Result<Self, ChainError> {
        let mut builder = reqwest::Client::builder();
        if let Some(limit) = request_timeout {
            builder = builder.timeout(limit);
        }
        let http = builder
            .build()
            .map_err(|e| ChainError::Transport(e.to_string()))?;

        info!("JSON-RPC client initialized: {}", url);

        Ok(Self {
            http,
            url: url.to_string(),
            next_id: Arc::new(AtomicU64::new(1)),
        })
    }

    /// Issue one JSON-RPC request.
    ///
    /// `null` results decode into `Option` targets as `None`.
    pub async fn request<T>(&self, method: &str, params: Value) -> Result<T, ChainError>
    where
        T: serde::de::DeserializeOwned,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });

        debug!("RPC -> {} (id {})", method, id);

        let response = self
            .http
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| ChainError::Transport(format!("{}: {}", method, e)))?;

        let status = response.status();
        let parsed: RpcResponse = response.json().await.map_err(|e| {
            if status.is_success() {
                ChainError::InvalidResponse(format!("{}: {}", method, e))
            } else {
                ChainError::Transport(format!("{}: HTTP {}", method, status))
            }
        })?;

        if let Some(error) = parsed.error {
            debug!("RPC <- {} error {}: {}", method, error.code, error.message);
            return Err(ChainError::Rpc {
                code: error.code,
                message: error.message,
                data: error.data,
            });
        }

        serde_json::from_value(parsed.result.unwrap_or(Value::Null))
            .map_err(|e| ChainError::InvalidResponse(format!("{}: {}", method, e)))
    }

    /// Execute a read operation with retry logic.
    ///
    /// Retries up to 4 attempts (initial attempt + 3 retries) with
    /// exponential backoff on transport errors, with a 10-second timeout
    /// per attempt. JSON-RPC errors are returned immediately.
    ///
    /// Never use this for writes: a timed-out `eth_sendTransaction` may
    /// still have been broadcast.
    async fn retry_rpc_operation<F, Fut, T>(&self, mut operation: F) -> Result<T, ChainError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, ChainError>>,
    {
        const MAX_RETRIES: u32 = 3;
        const INITIAL_DELAY_MS: u64 = 200;
        const TIMEOUT_SECS: u64 = 10;

        let mut last_error = ChainError::Transport("no attempt made".to_string());

        for attempt in 0..=MAX_RETRIES {
            match timeout(Duration::from_secs(TIMEOUT_SECS), operation()).await {
                Ok(Ok(result)) => {
                    if attempt > 0 {
                        info!("RPC operation succeeded after {} retries", attempt);
                    }
                    return Ok(result);
                }
                Ok(Err(e)) if !e.is_transient() => return Err(e),
                Ok(Err(e)) => {
                    debug!("RPC operation failed (attempt {}): {}", attempt + 1, e);
                    last_error = e;
                }
                Err(_) => {
                    debug!("RPC operation timed out (attempt {})", attempt + 1);
                    last_error = ChainError::Transport(format!(
                        "timed out after {}s",
                        TIMEOUT_SECS
                    ));
                }
            }

            if attempt < MAX_RETRIES {
                let delay_ms = INITIAL_DELAY_MS * (1 << attempt); // 200ms, 400ms, 800ms
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            }
        }

        warn!("RPC operation failed after {} attempts: {}", MAX_RETRIES + 1, last_error);
        Err(last_error)
    }

    /// Check if the endpoint is responding.
    pub async fn get_health(&self) -> bool {
        match self.block_number().await {
            Ok(_) => true,
            Err(e) => {
                warn!("RPC health check failed: {}", e);
                false
            }
        }
    }

    /// Latest block number.
    pub async fn block_number(&self) -> Result<u64, ChainError> {
        let raw: String = self
            .retry_rpc_operation(|| self.request("eth_blockNumber", json!([])))
            .await?;
        parse_quantity(&raw)
    }

    /// Chain id the endpoint is connected to.
    pub async fn chain_id(&self) -> Result<u64, ChainError> {
        let raw: String = self
            .retry_rpc_operation(|| self.request("eth_chainId", json!([])))
            .await?;
        parse_quantity(&raw)
    }

    /// `eth_call` against the latest block.
    pub async fn call(&self, to: Address, data: Bytes) -> Result<Bytes, ChainError> {
        let params = json!([{ "to": to, "data": data }, "latest"]);
        let raw: String = self
            .retry_rpc_operation(|| self.request("eth_call", params.clone()))
            .await?;
        Bytes::from_str(&raw).map_err(|e| ChainError::InvalidResponse(e.to_string()))
    }

    /// ABI-encode `call`, execute it with `eth_call`, decode the return.
    pub async fn read<C>(&self, to: Address, call: C) -> Result<C::Return, ChainError>
    where
        C: SolCall + Send,
    {
        let data = Bytes::from(call.abi_encode());
        let output = self.call(to, data).await?;
        C::abi_decode_returns(&output, true)
            .map_err(|e| ChainError::InvalidResponse(format!("decode {}: {}", C::SIGNATURE, e)))
    }

    /// Ask the wallet endpoint to sign and broadcast a transaction.
    ///
    /// Not retried. The wallet may prompt the user; a rejection comes
    /// back as an `Rpc` error with code 4001.
    pub async fn send_transaction(
        &self,
        from: Address,
        to: Address,
        data: Bytes,
    ) -> Result<B256, ChainError> {
        let params = json!([{ "from": from, "to": to, "data": data }]);
        let raw: String = self.request("eth_sendTransaction", params).await?;
        B256::from_str(&raw).map_err(|e| ChainError::InvalidResponse(e.to_string()))
    }

    /// Receipt for `hash`, or `None` while the transaction is pending.
    pub async fn transaction_receipt(
        &self,
        hash: B256,
    ) -> Result<Option<TransactionReceipt>, ChainError> {
        self.retry_rpc_operation(|| self.request("eth_getTransactionReceipt", json!([hash])))
            .await
    }
}

#[async_trait]
impl ChainReader for EvmClient {
    async fn allowance(
        &self,
        token: Address,
        owner: Address,
        spender: Address,
    ) -> Result<U256, ChainError> {
        Ok(self.read(token, IERC20::allowanceCall { owner, spender }).await?._0)
    }

    async fn balance_of(&self, token: Address, account: Address) -> Result<U256, ChainError> {
        Ok(self.read(token, IERC20::balanceOfCall { account }).await?._0)
    }

    async fn total_assets(&self, vault: Address) -> Result<U256, ChainError> {
        Ok(self.read(vault, IVault::totalAssetsCall {}).await?._0)
    }

    async fn total_supply(&self, vault: Address) -> Result<U256, ChainError> {
        Ok(self.read(vault, IVault::totalSupplyCall {}).await?._0)
    }
}

/// Parse a hex quantity (`0x1a`) into a u64.
pub fn parse_quantity(raw: &str) -> Result<u64, ChainError> {
    let digits = raw.trim().trim_start_matches("0x");
    if digits.is_empty() {
        return Err(ChainError::InvalidResponse(format!("empty quantity: {:?}", raw)));
    }
    u64::from_str_radix(digits, 16)
        .map_err(|e| ChainError::InvalidResponse(format!("bad quantity {:?}: {}", raw, e)))
}
