//! # Attestation Client
//!
//! Requests signed cross-chain balance snapshots from the attestation
//! service (the "oracle").
//!
//! ## Protocol
//!
//! ```text
//! POST {ATTESTATION_URL}/balance-snapshot
//! Authorization: Bearer <token>
//! { "assets": "100000000", "receiver": "0x…", "chainId": 11155111 }
//!
//! 200 { "balance": "500", "nonce": "7", "deadline": "1760000000",
//!       "assets": "100000000", "receiver": "0x…",
//!       "signature": "0x…", "signerAddress": "0x…" }
//! ```
//!
//! The signature covers exactly `(assets, receiver, nonce, deadline,
//! balance)`. A snapshot is requested per deposit attempt and handed to
//! the vault once; it is never cached or edited.
//!
//! The client does not retry. Whether and when to ask again is the
//! orchestrator's decision.

use std::str::FromStr;
use std::time::Duration;

use alloy_primitives::{Address, Bytes, U256};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::chain::abi::AttestedBalance;

/// Errors returned by the attestation service client.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AttestationError {
    /// No bearer token is configured.
    #[error("Attestation service credentials are not configured")]
    MissingCredentials,

    /// The service refused the bearer token.
    #[error("Attestation service rejected the configured credentials (HTTP {0})")]
    Unauthorized(u16),

    /// The service could not be reached or timed out.
    #[error("Attestation service unreachable: {0}")]
    Network(String),

    /// The service answered with an error; `message` is its body, verbatim.
    #[error("{message}")]
    Service { status: u16, message: String },

    /// The 200 body did not decode into a snapshot.
    #[error("Malformed attestation response: {0}")]
    Malformed(String),

    /// The snapshot's deadline has passed.
    #[error("Balance attestation expired at {deadline}")]
    Expired { deadline: U256 },

    /// The snapshot was issued for a different request.
    #[error("Balance attestation does not match the request: {0}")]
    Mismatch(String),
}

/// A signed statement of the receiver's balance on another chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceSnapshot {
    pub balance: U256,
    pub nonce: U256,
    pub deadline: U256,
    pub assets: U256,
    pub receiver: Address,
    pub signature: Bytes,
    pub signer_address: Address,
}

impl BalanceSnapshot {
    /// Selects the plain deposit path when true.
    pub fn has_zero_balance(&self) -> bool {
        self.balance.is_zero()
    }

    /// A deadline equal to `now` counts as expired.
    pub fn is_expired_at(&self, now_unix: u64) -> bool {
        self.deadline <= U256::from(now_unix)
    }

    /// Check the snapshot can be used for `(assets, receiver)` at `now_unix`.
    pub fn verify_for(
        &self,
        assets: U256,
        receiver: Address,
        now_unix: u64,
    ) -> Result<(), AttestationError> {
        if self.assets != assets {
            return Err(AttestationError::Mismatch(format!(
                "assets {} != requested {}",
                self.assets, assets
            )));
        }
        if self.receiver != receiver {
            return Err(AttestationError::Mismatch(format!(
                "receiver {} != requested {}",
                self.receiver, receiver
            )));
        }
        if self.is_expired_at(now_unix) {
            return Err(AttestationError::Expired {
                deadline: self.deadline,
            });
        }
        Ok(())
    }

    /// The tuple the vault verifies the signature against.
    pub fn to_abi(&self) -> AttestedBalance {
        AttestedBalance {
            assets: self.assets,
            receiver: self.receiver,
            nonce: self.nonce,
            deadline: self.deadline,
            balance: self.balance,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SnapshotRequest {
    assets: String,
    receiver: Address,
    chain_id: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SnapshotResponse {
    balance: String,
    nonce: String,
    deadline: String,
    assets: String,
    receiver: String,
    signature: String,
    signer_address: String,
}

impl TryFrom<SnapshotResponse> for BalanceSnapshot {
    type Error = AttestationError;

    fn try_from(raw: SnapshotResponse) -> Result<Self, Self::Error> {
        fn uint(field: &str, value: &str) -> Result<U256, AttestationError> {
            U256::from_str(value.trim())
                .map_err(|e| AttestationError::Malformed(format!("{}: {}", field, e)))
        }
        fn address(field: &str, value: &str) -> Result<Address, AttestationError> {
            Address::from_str(value.trim())
                .map_err(|e| AttestationError::Malformed(format!("{}: {}", field, e)))
        }

        let signature = Bytes::from_str(raw.signature.trim())
            .map_err(|e| AttestationError::Malformed(format!("signature: {}", e)))?;
        if signature.is_empty() {
            return Err(AttestationError::Malformed("signature: empty".to_string()));
        }

        Ok(Self {
            balance: uint("balance", &raw.balance)?,
            nonce: uint("nonce", &raw.nonce)?,
            deadline: uint("deadline", &raw.deadline)?,
            assets: uint("assets", &raw.assets)?,
            receiver: address("receiver", &raw.receiver)?,
            signature,
            signer_address: address("signerAddress", &raw.signer_address)?,
        })
    }
}

/// Source of balance snapshots.
#[async_trait]
pub trait AttestationClient: Send + Sync {
    /// Request a fresh snapshot for `assets` base units deposited to `receiver`.
    async fn request_snapshot(
        &self,
        assets: U256,
        receiver: Address,
        chain_id: u64,
    ) -> Result<BalanceSnapshot, AttestationError>;

    /// Liveness probe.
    async fn health(&self) -> bool;
}

/// HTTP client for the attestation service.
///
/// ## Usage
///
/// ```rust,ignore
/// let client = HttpAttestationClient::new(&config.attestation_url, config.attestation_api_key.clone(), 15)?;
/// let snapshot = client.request_snapshot(assets, receiver, 11155111).await?;
/// ```
#[derive(Clone)]
pub struct HttpAttestationClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpAttestationClient {
    pub fn new(
        base_url: &str,
        api_key: Option<String>,
        timeout_secs: u64,
    ) -> Result<Self, AttestationError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| AttestationError::Network(e.to_string()))?;

        if api_key.is_none() {
            warn!("No attestation API key configured; deposits will fail until one is set");
        }

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }
}

#[async_trait]
impl AttestationClient for HttpAttestationClient {
    async fn request_snapshot(
        &self,
        assets: U256,
        receiver: Address,
        chain_id: u64,
    ) -> Result<BalanceSnapshot, AttestationError> {
        let token = self
            .api_key
            .as_deref()
            .ok_or(AttestationError::MissingCredentials)?;

        let url = format!("{}/balance-snapshot", self.base_url);
        let body = SnapshotRequest {
            assets: assets.to_string(),
            receiver,
            chain_id,
        };

        debug!("Requesting balance snapshot: {:?}", body);

        let response = self
            .http
            .post(&url)
            .bearer_auth(token)
            .json(&body)
            .send()
            .await
            .map_err(|e| AttestationError::Network(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(AttestationError::Unauthorized(status.as_u16()));
        }
        if status != StatusCode::OK {
            let text = response.text().await.unwrap_or_default();
            let message = if text.trim().is_empty() {
                status.to_string()
            } else {
                text.trim().to_string()
            };
            warn!("Attestation service returned {}: {}", status, message);
            return Err(AttestationError::Service {
                status: status.as_u16(),
                message,
            });
        }

        let raw: SnapshotResponse = response
            .json()
            .await
            .map_err(|e| AttestationError::Malformed(e.to_string()))?;
        let snapshot = BalanceSnapshot::try_from(raw)?;

        info!(
            "Received balance snapshot: balance={} nonce={} deadline={}",
            snapshot.balance, snapshot.nonce, snapshot.deadline
        );

        Ok(snapshot)
    }

    async fn health(&self) -> bool {
        let url = format!("{}/health", self.base_url);
        match self.http.get(&url).send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                debug!("Attestation health check failed: {}", e);
                false
            }
        }
    }
}
