//! # Vault Orchestrator Service
//!
//! Drives deposits into and withdrawals from a cross-chain-aware ERC-4626
//! style vault for one account. It provides:
//!
//! - REST API for starting, acknowledging, retrying and cancelling flows
//! - WebSocket connections for status feed and phase updates
//! - Background refresh of allowance and vault position
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        BACKEND SERVICE                           │
//! │                                                                  │
//! │  ┌─────────────┐  ┌─────────────┐  ┌─────────────────────────┐  │
//! │  │  REST API   │  │  WebSocket  │  │   Background Tasks      │  │
//! │  │  (Actix)    │  │  /ws        │  │  • Balance refresh      │  │
//! │  │  /deposit   │  │             │  │  • Status expiry        │  │
//! │  │  /withdraw  │  │             │  │                         │  │
//! │  │  /status    │  │             │  │                         │  │
//! │  └─────────────┘  └─────────────┘  └─────────────────────────┘  │
//! │         │                │                     │                 │
//! │         └────────────────┴─────────────────────┘                 │
//! │                          │                                       │
//! │  ┌───────────────────────┴───────────────────────────────────┐  │
//! │  │                      SESSION                               │  │
//! │  │  ┌─────────────────────┐   ┌─────────────────────┐        │  │
//! │  │  │ DepositOrchestrator │   │ WithdrawOrchestrator│        │  │
//! │  │  └─────────────────────┘   └─────────────────────┘        │  │
//! │  └───────────────────────────────────────────────────────────┘  │
//! │                          │                                       │
//! │         ┌────────────────┴────────────────┐                     │
//! │  ┌──────┴──────┐                   ┌──────┴──────┐              │
//! │  │ Attestation │                   │  EVM RPC    │              │
//! │  │  Service    │                   │ (read+wallet)│             │
//! │  └─────────────┘                   └─────────────┘              │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! 1. Copy `.env.example` to `.env` and configure
//! 2. Point `WALLET_RPC_URL` at a signer that supports `eth_sendTransaction`
//! 3. Start the server: `cargo run`
//!
//! ## Environment Variables
//!
//! See `config/mod.rs` for the full list.

use std::sync::Arc;
use std::time::Duration;

use actix_web::{middleware, web, App, HttpServer};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod api;
mod chain;
mod config;
mod models;
mod orchestrator;
mod services;
mod utils;
mod websocket;

#[cfg(test)]
mod testing;

use chain::networks::{network, Deployments, Network};
use chain::EvmClient;
use config::AppConfig;
use orchestrator::{FlowContext, Session};
use services::{
    AttestationClient, BalanceCache, HttpAttestationClient, ReceiptWatcher, RpcVaultGateway,
    StatusBus,
};

/// Application state shared across all handlers.
///
/// ## Why Arc?
/// `Arc` (Atomic Reference Counting) allows us to share ownership
/// of these resources across multiple threads safely.
pub struct AppState {
    /// Deposit and withdraw orchestrators plus the shared feed and cache
    pub session: Session,

    /// Read RPC client, used for health checks
    pub chain: EvmClient,

    /// Attestation service client, used for health checks
    pub attestation: Arc<dyn AttestationClient>,

    /// Network the session is bound to
    pub network: &'static Network,

    pub decimals: u8,
    pub symbol: String,
}

/// Install the global tracing subscriber.
///
/// `LOG_FORMAT=json` switches to JSON lines; `RUST_LOG` overrides the
/// default `info` filter.
fn init_logging(format: &str) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    if format.eq_ignore_ascii_case("json") {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().json().with_target(true))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_file(true)
                    .with_line_number(true),
            )
            .init();
    }
}

fn startup_error(e: impl std::fmt::Display) -> std::io::Error {
    error!("Startup failed: {}", e);
    std::io::Error::new(std::io::ErrorKind::Other, e.to_string())
}

/// Main entry point for the service.
///
/// This function:
/// 1. Loads configuration from environment
/// 2. Resolves the network and vault deployment
/// 3. Builds the chain, wallet and attestation clients
/// 4. Spawns the session orchestrators and background tasks
/// 5. Launches the HTTP server
#[actix_web::main]
async fn main() -> std::io::Result<()> {
    // =========================================
    // STEP 1: Load Configuration and Logging
    // =========================================
    dotenvy::dotenv().ok(); // It's okay if .env doesn't exist

    let config = AppConfig::from_env();
    init_logging(
        config
            .as_ref()
            .map(|c| c.log_format.as_str())
            .unwrap_or("pretty"),
    );

    info!("🚀 Starting Vault Orchestrator Service");

    let config = config.map_err(startup_error)?;

    // =========================================
    // STEP 2: Resolve Network
    // =========================================
    let network = network(config.chain_id).map_err(startup_error)?;
    let deployment = Deployments::from_config(&config)
        .lookup(config.chain_id)
        .map_err(startup_error)?;

    info!("📋 Configuration loaded");
    info!("   Network: {} ({})", network.name, network.chain_id);
    info!("   Vault: {}", deployment.vault);
    info!("   Asset: {} ({} decimals)", deployment.asset, config.asset_decimals);
    info!("   Account: {}", config.account);

    // =========================================
    // STEP 3: Initialize Clients
    // =========================================
    let chain = EvmClient::new(&config.rpc_url).map_err(startup_error)?;
    let wallet = EvmClient::wallet(&config.wallet_rpc_url).map_err(startup_error)?;

    match chain.chain_id().await {
        Ok(id) if id != config.chain_id => warn!(
            "RPC_URL reports chain {}, configured for {}",
            id, config.chain_id
        ),
        Ok(_) => info!("⛓️  Chain RPC connected"),
        Err(e) => warn!("Chain RPC not reachable yet: {}", e),
    }

    let attestation: Arc<dyn AttestationClient> = Arc::new(
        HttpAttestationClient::new(
            &config.attestation_url,
            config.attestation_api_key.clone(),
            config.attestation_timeout_secs,
        )
        .map_err(startup_error)?,
    );

    let cache = Arc::new(BalanceCache::new(
        Arc::new(chain.clone()),
        deployment.asset,
        deployment.vault,
        config.account,
    ));
    let status = StatusBus::new();

    info!("🔧 Clients initialized");

    // =========================================
    // STEP 4: Start Session
    // =========================================
    let ctx = FlowContext {
        gateway: Arc::new(RpcVaultGateway::new(wallet, deployment, config.account)),
        attestation: attestation.clone(),
        watcher: Arc::new(ReceiptWatcher::new(
            chain.clone(),
            config.receipt_poll_interval_ms,
        )),
        cache: cache.clone(),
        status: status.clone(),
        account: config.account,
        decimals: config.asset_decimals,
        symbol: config.asset_symbol.clone(),
        confirmation_notice: Duration::from_secs(config.confirmation_notice_secs),
    };
    let session = Session::spawn(ctx);

    // =========================================
    // STEP 5: Start Background Tasks
    // =========================================
    let refresh_cache = cache.clone();
    let refresh_interval = config.cache_refresh_interval;
    tokio::spawn(async move {
        refresh_cache.start_refresh_loop(refresh_interval).await;
    });

    info!("📊 Balance refresh started");

    let expiry_bus = status.clone();
    tokio::spawn(async move {
        expiry_bus.start_expiry_loop().await;
    });

    let app_state = Arc::new(AppState {
        session,
        chain,
        attestation,
        network,
        decimals: config.asset_decimals,
        symbol: config.asset_symbol.clone(),
    });

    // =========================================
    // STEP 6: Start HTTP Server
    // =========================================
    let server_host = config.server_host.clone();
    let server_port = config.server_port;

    info!("🌐 Starting HTTP server on {}:{}", server_host, server_port);

    HttpServer::new(move || {
        App::new()
            // Attach shared application state
            .app_data(web::Data::new(app_state.clone()))
            // Add logging middleware
            .wrap(middleware::Logger::default())
            // Configure API routes
            .configure(api::configure_routes)
            // Configure WebSocket routes
            .configure(websocket::configure_routes)
    })
    .bind(format!("{}:{}", server_host, server_port))?
    .run()
    .await
}
