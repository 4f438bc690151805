//! # API Response Models
//!
//! Structures for outgoing API response bodies.
//! All responses are wrapped in a standard format.

use alloy_primitives::U256;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::chain::networks::Network;
use crate::orchestrator::{DepositState, WithdrawState};
use crate::services::balance_cache::{CacheEntry, VaultPosition};
use crate::services::status_bus::StatusMessage;

/// Standard API response wrapper.
///
/// All API responses follow this format:
///
/// ## Success Response
///
/// ```json
/// {
///     "success": true,
///     "data": { ... },
///     "error": null
/// }
/// ```
///
/// ## Error Response
///
/// ```json
/// {
///     "success": false,
///     "data": null,
///     "error": {
///         "code": "FLOW_BUSY",
///         "message": "A deposit is already in progress (Approving)"
///     }
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiResponse<T> {
    /// Whether the request was successful.
    pub success: bool,

    /// Response data (null on error).
    pub data: Option<T>,

    /// Error information (null on success).
    pub error: Option<ApiError>,
}

impl<T> ApiResponse<T> {
    /// Create a successful response with data.
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    /// Create an error response.
    pub fn error(code: &str, message: &str) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(ApiError {
                code: code.to_string(),
                message: message.to_string(),
            }),
        }
    }
}

/// API error information.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiError {
    /// Error code (e.g., "VALIDATION_ERROR").
    pub code: String,

    /// Human-readable error message.
    pub message: String,
}

/// Health check response.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    /// Service status: "healthy" or "unhealthy".
    pub status: String,

    /// Read RPC endpoint status.
    pub chain_rpc: bool,

    /// Attestation service status.
    pub attestation_service: bool,

    pub chain_id: u64,

    /// Service version.
    pub version: String,

    /// Current timestamp.
    pub timestamp: DateTime<Utc>,
}

/// Full session view.
///
/// Returned by `GET /session`
///
/// ## Example Response
///
/// ```json
/// {
///     "success": true,
///     "data": {
///         "account": "0x42…",
///         "network": { "chainId": 11155111, "name": "Sepolia", "explorerUrl": "…" },
///         "deposit": { "phase": "approving", "attempt": 1, "amount": { … }, "approval": null },
///         "withdraw": { "phase": "input" },
///         "allowance": { "value": "0x0", "version": 3, "fetchedAt": "…", "stale": false },
///         "position": { … },
///         "formattedRedeemable": "200.00 USDC"
///     }
/// }
/// ```
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionResponse {
    pub account: String,
    pub network: Network,
    pub deposit: DepositState,
    pub withdraw: WithdrawState,
    pub allowance: Option<CacheEntry<U256>>,
    pub position: Option<CacheEntry<VaultPosition>>,
    pub formatted_wallet_balance: Option<String>,
    pub formatted_redeemable: Option<String>,
}

/// A status message with its explorer link.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusView {
    #[serde(flatten)]
    pub message: StatusMessage,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub explorer_url: Option<String>,
}

impl StatusView {
    pub fn new(message: StatusMessage) -> Self {
        let explorer_url = match (message.chain_id, message.tx_hash) {
            (Some(chain_id), Some(hash)) => crate::chain::networks::network(chain_id)
                .ok()
                .map(|network| network.tx_url(&hash)),
            _ => None,
        };
        Self {
            message,
            explorer_url,
        }
    }
}

/// Current status feed.
///
/// Returned by `GET /status`
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusFeedResponse {
    pub messages: Vec<StatusView>,
}

impl StatusFeedResponse {
    pub fn new(messages: Vec<StatusMessage>) -> Self {
        Self {
            messages: messages.into_iter().map(StatusView::new).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::B256;

    #[test]
    fn test_status_view_links_supported_chains_only() {
        let hash = B256::repeat_byte(0xab);

        let linked = StatusView::new(StatusMessage::success("a", "done").with_tx(8453, hash));
        assert_eq!(
            linked.explorer_url.as_deref(),
            Some(format!("https://basescan.org/tx/0x{}", "ab".repeat(32)).as_str())
        );

        let unknown = StatusView::new(StatusMessage::success("b", "done").with_tx(56, hash));
        assert!(unknown.explorer_url.is_none());

        let plain = StatusView::new(StatusMessage::info("c", "hello"));
        assert!(plain.explorer_url.is_none());
    }

    #[test]
    fn test_api_response_shape() {
        let body = serde_json::to_value(ApiResponse::<()>::error("FLOW_BUSY", "busy")).unwrap();
        assert_eq!(body["success"], false);
        assert_eq!(body["error"]["code"], "FLOW_BUSY");
        assert!(body["data"].is_null());
    }
}
