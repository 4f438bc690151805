//! # Failure Classification
//!
//! Every component reports failures with its own error enum. Before a
//! failure reaches a state machine it is classified into one of six
//! kinds, which decide what the user can do next.
//!
//! | Kind | Recoverable by | Chain touched |
//! |------|----------------|---------------|
//! | `UserRejected` | retry immediately | no |
//! | `InsufficientFunds` | top-up, then retry | no |
//! | `AttestationFailure` | retry | no |
//! | `ChainRejected` | refresh, then retry | maybe |
//! | `ConfigurationError` | environment change | no |
//! | `ValidationError` | corrected input | no |
//!
//! `ValidationError` is only produced before a flow leaves `Input`.
//! Failures found later, such as malformed gateway arguments or an
//! unreachable wallet endpoint, are `ConfigurationError`.

use alloy_primitives::B256;
use serde::Serialize;
use thiserror::Error;

use crate::config::ConfigError;
use crate::services::amount::AmountError;
use crate::services::attestation::AttestationError;
use crate::services::transaction_watcher::WatchError;
use crate::services::vault_gateway::GatewayError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureKind {
    UserRejected,
    InsufficientFunds,
    AttestationFailure,
    ChainRejected,
    ConfigurationError,
    ValidationError,
}

impl FailureKind {
    /// Stable code for API consumers.
    pub fn code(&self) -> &'static str {
        match self {
            FailureKind::UserRejected => "USER_REJECTED",
            FailureKind::InsufficientFunds => "INSUFFICIENT_FUNDS",
            FailureKind::AttestationFailure => "ATTESTATION_FAILURE",
            FailureKind::ChainRejected => "CHAIN_REJECTED",
            FailureKind::ConfigurationError => "CONFIGURATION_ERROR",
            FailureKind::ValidationError => "VALIDATION_ERROR",
        }
    }

    /// Whether retrying without changing the environment can succeed.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, FailureKind::ConfigurationError)
    }

    /// On-chain state may have changed; caches must be refreshed first.
    pub fn requires_refresh(&self) -> bool {
        matches!(self, FailureKind::ChainRejected)
    }
}

/// A classified failure as seen by the orchestrators and the status feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Error)]
#[serde(rename_all = "camelCase")]
#[error("{message}")]
pub struct FlowError {
    pub kind: FailureKind,
    pub message: String,
    pub tx_hash: Option<B256>,
    /// Whether a plain `retry` can succeed without an environment change.
    pub retryable: bool,
}

impl FlowError {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            tx_hash: None,
            retryable: kind.is_retryable(),
        }
    }

    /// Attach the hash of the transaction the failure relates to.
    pub fn with_tx(mut self, hash: B256) -> Self {
        self.tx_hash = Some(hash);
        self
    }

    /// A transaction that was mined with a failed status.
    pub fn reverted(hash: B256) -> Self {
        Self::new(FailureKind::ChainRejected, "Transaction reverted on-chain").with_tx(hash)
    }
}

impl From<GatewayError> for FlowError {
    fn from(err: GatewayError) -> Self {
        let kind = match &err {
            GatewayError::UserRejected(_) => FailureKind::UserRejected,
            GatewayError::InsufficientFunds(_) => FailureKind::InsufficientFunds,
            GatewayError::Reverted(_) | GatewayError::Rpc(_) => FailureKind::ChainRejected,
            GatewayError::ChainMismatch { .. }
            | GatewayError::WalletUnavailable(_)
            | GatewayError::InvalidArguments(_) => FailureKind::ConfigurationError,
        };
        FlowError::new(kind, err.to_string())
    }
}

impl From<AttestationError> for FlowError {
    fn from(err: AttestationError) -> Self {
        let kind = match &err {
            AttestationError::MissingCredentials => FailureKind::ConfigurationError,
            _ => FailureKind::AttestationFailure,
        };
        FlowError::new(kind, err.to_string())
    }
}

impl From<WatchError> for FlowError {
    fn from(err: WatchError) -> Self {
        let hash = err.hash();
        FlowError::new(FailureKind::ChainRejected, err.to_string()).with_tx(hash)
    }
}

impl From<AmountError> for FlowError {
    fn from(err: AmountError) -> Self {
        FlowError::new(FailureKind::ValidationError, err.to_string())
    }
}

impl From<ConfigError> for FlowError {
    fn from(err: ConfigError) -> Self {
        FlowError::new(FailureKind::ConfigurationError, err.to_string())
    }
}
