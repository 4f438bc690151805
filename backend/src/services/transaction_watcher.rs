//! # Transaction Watcher
//!
//! Follows a submitted transaction until it is mined.
//!
//! ## Lifecycle
//!
//! ```text
//!   Submitted ──receipt status 0x1──► Confirmed
//!       │
//!       └──────receipt status 0x0──► Reverted
//! ```
//!
//! `wait` never times out. A stalled transaction keeps the caller
//! suspended until the receipt appears or the caller drops the future.
//! RPC failures while polling (transport errors, rate limits, provider
//! hiccups) are logged and polling continues. Only a receipt without a
//! status field ends the wait with an error.

use std::time::Duration;

use alloy_primitives::B256;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::chain::EvmClient;
use crate::utils::truncate_string;

/// Which vault operation a transaction performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TxKind {
    Approval,
    Deposit,
    AttestedDeposit,
    Withdrawal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TxLifecycle {
    Submitted,
    Confirmed,
    Reverted,
}

/// A transaction the wallet has broadcast.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionHandle {
    pub chain_id: u64,
    pub hash: B256,
    pub kind: TxKind,
    pub state: TxLifecycle,
    pub submitted_at: DateTime<Utc>,
}

impl TransactionHandle {
    pub fn submitted(chain_id: u64, hash: B256, kind: TxKind) -> Self {
        Self {
            chain_id,
            hash,
            kind,
            state: TxLifecycle::Submitted,
            submitted_at: Utc::now(),
        }
    }

    /// Copy of this handle in a terminal state.
    pub fn settle(&self, state: TxLifecycle) -> Self {
        Self {
            state,
            ..self.clone()
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum WatchError {
    /// The receipt was found but carries no status field.
    #[error("Receipt for {hash} has no status")]
    MissingStatus { hash: B256 },
}

impl WatchError {
    pub fn hash(&self) -> B256 {
        match self {
            WatchError::MissingStatus { hash } => *hash,
        }
    }
}

/// Waits for transactions to settle.
#[async_trait]
pub trait TransactionWatcher: Send + Sync {
    /// Resolve once `handle` is confirmed or reverted.
    ///
    /// Returns the settled handle; a revert is `Ok` with state `Reverted`.
    async fn wait(&self, handle: &TransactionHandle) -> Result<TransactionHandle, WatchError>;
}

/// Polls `eth_getTransactionReceipt` at a fixed interval.
#[derive(Clone)]
pub struct ReceiptWatcher {
    client: EvmClient,
    poll_interval: Duration,
}

impl ReceiptWatcher {
    pub fn new(client: EvmClient, poll_interval_ms: u64) -> Self {
        Self {
            client,
            poll_interval: Duration::from_millis(poll_interval_ms),
        }
    }
}

#[async_trait]
impl TransactionWatcher for ReceiptWatcher {
    async fn wait(&self, handle: &TransactionHandle) -> Result<TransactionHandle, WatchError> {
        let hash = handle.hash;
        info!("👀 Watching {:?} transaction {}", handle.kind, hash);

        loop {
            match self.client.transaction_receipt(hash).await {
                Ok(Some(receipt)) => {
                    return match receipt.succeeded() {
                        Some(true) => {
                            info!("✅ Transaction confirmed: {}", hash);
                            Ok(handle.settle(TxLifecycle::Confirmed))
                        }
                        Some(false) => {
                            warn!("Transaction reverted: {}", hash);
                            Ok(handle.settle(TxLifecycle::Reverted))
                        }
                        None => Err(WatchError::MissingStatus { hash }),
                    };
                }
                Ok(None) => debug!(
                    "Transaction {} still pending",
                    truncate_string(&hash.to_string(), 20)
                ),
                Err(e) => warn!("Receipt poll for {} failed, will retry: {}", hash, e),
            }

            tokio::time::sleep(self.poll_interval).await;
        }
    }
}
