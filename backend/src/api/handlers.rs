//! # API Request Handlers
//!
//! This module contains the handler functions for each API endpoint.
//! Each handler:
//! 1. Extracts request data
//! 2. Sends one command to the relevant orchestrator
//! 3. Returns the resulting state, or the refusal, as JSON
//!
//! Handlers never change flow state themselves; the orchestrator task is
//! the only writer.
//!
//! ## Error Handling
//!
//! Refused commands map onto HTTP statuses:
//!
//! | Refusal | Status | Code |
//! |---------|--------|------|
//! | `Validation` | 400 | `VALIDATION_ERROR` |
//! | `Busy` | 409 | `FLOW_BUSY` |
//! | `InvalidState` | 409 | `INVALID_STATE` |
//! | `Unavailable` | 503 | `BALANCE_UNAVAILABLE` |
//! | `Closed` | 500 | `ORCHESTRATOR_CLOSED` |
//!
//! Failures *during* a flow are not HTTP errors: the command was accepted
//! and the failure shows up in the flow state and the status feed.

use std::sync::Arc;

use actix_web::{http::StatusCode, web, HttpResponse};
use chrono::Utc;
use serde::Serialize;
use tracing::{info, warn};

use crate::models::{
    AmountBody, ApiResponse, HealthResponse, SessionResponse, StatusFeedResponse,
};
use crate::orchestrator::CommandError;
use crate::utils::format_units;
use crate::AppState;

/// Map a command result onto a response.
fn command_response<S: Serialize>(result: Result<S, CommandError>) -> HttpResponse {
    match result {
        Ok(state) => HttpResponse::Ok().json(ApiResponse::success(state)),
        Err(err) => {
            let (status, code) = match &err {
                CommandError::Validation(e) => (StatusCode::BAD_REQUEST, e.kind.code()),
                CommandError::Busy(..) => (StatusCode::CONFLICT, "FLOW_BUSY"),
                CommandError::InvalidState { .. } => (StatusCode::CONFLICT, "INVALID_STATE"),
                CommandError::Unavailable(_) => {
                    (StatusCode::SERVICE_UNAVAILABLE, "BALANCE_UNAVAILABLE")
                }
                CommandError::Closed => (StatusCode::INTERNAL_SERVER_ERROR, "ORCHESTRATOR_CLOSED"),
            };
            warn!("Command refused [{}]: {}", code, err);
            HttpResponse::build(status).json(ApiResponse::<()>::error(code, &err.to_string()))
        }
    }
}

/// Health check endpoint.
///
/// ## Endpoint
///
/// `GET /health`
///
/// ## Example
///
/// ```bash
/// curl http://127.0.0.1:8080/health
/// ```
///
/// ## Response
///
/// ```json
/// {
///     "success": true,
///     "data": {
///         "status": "healthy",
///         "chainRpc": true,
///         "attestationService": true,
///         "chainId": 11155111,
///         "version": "0.1.0",
///         "timestamp": "2025-12-08T12:00:00Z"
///     }
/// }
/// ```
pub async fn health_check(state: web::Data<Arc<AppState>>) -> HttpResponse {
    let (chain_rpc, attestation_service) =
        tokio::join!(state.chain.get_health(), state.attestation.health());

    let healthy = chain_rpc && attestation_service;
    let response = HealthResponse {
        status: if healthy { "healthy" } else { "unhealthy" }.to_string(),
        chain_rpc,
        attestation_service,
        chain_id: state.network.chain_id,
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: Utc::now(),
    };

    let status_code = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    HttpResponse::build(status_code).json(ApiResponse::success(response))
}

/// Session overview.
///
/// ## Endpoint
///
/// `GET /session`
///
/// Returns both orchestrator states and the cached balances, whether
/// stale or not. Reading never triggers a refresh.
pub async fn get_session(state: web::Data<Arc<AppState>>) -> HttpResponse {
    let session = &state.session;
    let position = session.cache.position();

    let response = SessionResponse {
        account: session.account.to_string(),
        network: *state.network,
        deposit: session.deposit.state(),
        withdraw: session.withdraw.state(),
        allowance: session.cache.allowance(),
        formatted_wallet_balance: position
            .as_ref()
            .map(|p| format_units(p.value.wallet_balance, state.decimals, &state.symbol)),
        formatted_redeemable: position
            .as_ref()
            .map(|p| format_units(p.value.redeemable(), state.decimals, &state.symbol)),
        position,
    };

    HttpResponse::Ok().json(ApiResponse::success(response))
}

/// Start a deposit.
///
/// ## Endpoint
///
/// `POST /deposit`
///
/// ## Example
///
/// ```bash
/// curl -X POST http://127.0.0.1:8080/deposit \
///   -H "Content-Type: application/json" \
///   -d '{ "amount": "100" }'
/// ```
///
/// The response carries the state right after the command was accepted,
/// usually `approving` or `depositing`. Follow progress on `/ws` or by
/// polling `/session`.
pub async fn deposit(
    state: web::Data<Arc<AppState>>,
    body: web::Json<AmountBody>,
) -> HttpResponse {
    info!("📥 Deposit requested: {}", body.amount);
    command_response(state.session.deposit.request_deposit(body.into_inner().amount).await)
}

/// `POST /deposit/acknowledge`
pub async fn acknowledge_deposit(state: web::Data<Arc<AppState>>) -> HttpResponse {
    command_response(state.session.deposit.acknowledge().await)
}

/// `POST /deposit/retry`
pub async fn retry_deposit(state: web::Data<Arc<AppState>>) -> HttpResponse {
    command_response(state.session.deposit.retry().await)
}

/// `POST /deposit/cancel`
///
/// A transaction already handed to the wallet cannot be recalled. It is
/// tracked in the background and balances are refreshed when it settles.
pub async fn cancel_deposit(state: web::Data<Arc<AppState>>) -> HttpResponse {
    command_response(state.session.deposit.cancel().await)
}

/// Start a withdrawal.
///
/// ## Endpoint
///
/// `POST /withdraw`
///
/// ## Example
///
/// ```bash
/// curl -X POST http://127.0.0.1:8080/withdraw \
///   -H "Content-Type: application/json" \
///   -d '{ "amount": "25.5" }'
/// ```
pub async fn withdraw(
    state: web::Data<Arc<AppState>>,
    body: web::Json<AmountBody>,
) -> HttpResponse {
    info!("📤 Withdraw requested: {}", body.amount);
    command_response(state.session.withdraw.request_withdraw(body.into_inner().amount).await)
}

/// `POST /withdraw/acknowledge`
pub async fn acknowledge_withdraw(state: web::Data<Arc<AppState>>) -> HttpResponse {
    command_response(state.session.withdraw.acknowledge().await)
}

/// `POST /withdraw/retry`
pub async fn retry_withdraw(state: web::Data<Arc<AppState>>) -> HttpResponse {
    command_response(state.session.withdraw.retry().await)
}

/// `POST /withdraw/cancel`
pub async fn cancel_withdraw(state: web::Data<Arc<AppState>>) -> HttpResponse {
    command_response(state.session.withdraw.cancel().await)
}

/// `GET /status`
pub async fn get_status(state: web::Data<Arc<AppState>>) -> HttpResponse {
    let messages = state.session.status.messages();
    HttpResponse::Ok().json(ApiResponse::success(StatusFeedResponse::new(messages)))
}

/// `DELETE /status/{id}`
pub async fn dismiss_status(
    state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
) -> HttpResponse {
    let id = path.into_inner();
    if state.session.status.remove(&id) {
        get_status(state).await
    } else {
        HttpResponse::NotFound().json(ApiResponse::<()>::error(
            "MESSAGE_NOT_FOUND",
            &format!("No status message with id {}", id),
        ))
    }
}

/// `DELETE /status`
pub async fn clear_status(state: web::Data<Arc<AppState>>) -> HttpResponse {
    state.session.status.clear();
    get_status(state).await
}
