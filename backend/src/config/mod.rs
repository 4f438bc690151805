//! # Configuration Module
//!
//! This module handles loading and validating configuration from
//! environment variables. All settings are centralized here.
//!
//! ## Usage
//!
//! ```rust,ignore
//! dotenvy::dotenv().ok();
//! let config = AppConfig::from_env()?;
//! println!("Vault: {}", config.vault_address);
//! ```
//!
//! ## Environment Variables
//!
//! | Variable | Description | Example |
//! |----------|-------------|---------|
//! | `CHAIN_ID` | Active network (must be supported) | `11155111` |
//! | `RPC_URL` | Read-only JSON-RPC endpoint | `https://rpc.sepolia.org` |
//! | `WALLET_RPC_URL` | Signing endpoint (`eth_sendTransaction`) | `http://127.0.0.1:1248` |
//! | `ACCOUNT_ADDRESS` | Session account (owner and receiver) | `0x7a3f...` |
//! | `VAULT_ADDRESS` | Vault contract for `CHAIN_ID` | `0x52c1...` |
//! | `ASSET_ADDRESS` | Stable asset token for `CHAIN_ID` | `0x1c7d...` |
//! | `ASSET_DECIMALS` | Asset precision, at most 77 | `6` |
//! | `CACHE_REFRESH_INTERVAL` | Balance refresh period in seconds | `30` |
//! | `ATTESTATION_URL` | Balance attestation service | `https://oracle.example.org` |
//! | `ATTESTATION_API_KEY` | Bearer token for the attestation service | `sk_live_...` |
//! | `ATTESTATION_API_KEY_FILE` | File containing the bearer token | `~/.config/vault/oracle.key` |
//! | `SERVER_HOST` | HTTP server host | `127.0.0.1` |
//! | `SERVER_PORT` | HTTP server port | `8080` |

use std::env;
use std::fs;
use std::str::FromStr;

use alloy_primitives::Address;
use thiserror::Error;

/// Errors that can occur when loading configuration.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A required environment variable is missing
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),

    /// An environment variable has an invalid value
    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),

    /// Failed to parse a value
    #[error("Failed to parse {0}: {1}")]
    ParseError(String, String),

    /// The chain id is not on the supported network allow-list
    #[error("Unsupported chain id: {0}")]
    UnsupportedChain(u64),

    /// The chain is supported but no contract addresses were configured for it
    #[error("No vault deployment configured for chain {0}")]
    MissingDeployment(u64),
}

/// Application configuration loaded from environment variables.
///
/// Values are loaded once at startup. Addresses are parsed eagerly so
/// a typo fails the process before any wallet prompt is shown.
#[derive(Debug, Clone)]
pub struct AppConfig {
    // ==========================================
    // CHAIN SETTINGS
    // ==========================================

    /// Network the session operates on.
    ///
    /// Must be one of the ids in `chain::networks::SUPPORTED_NETWORKS`.
    pub chain_id: u64,

    /// JSON-RPC endpoint used for reads and receipt polling.
    pub rpc_url: String,

    /// JSON-RPC endpoint that owns the signing key.
    ///
    /// Write calls go through `eth_sendTransaction` on this endpoint so
    /// the private key never enters this process. Defaults to `rpc_url`.
    pub wallet_rpc_url: String,

    /// The user account driving the session.
    ///
    /// Used as `owner` for allowance checks and as `receiver`/`owner`
    /// for vault calls.
    pub account: Address,

    /// Vault contract address for `chain_id`.
    pub vault_address: Address,

    /// Stable asset token address for `chain_id`.
    pub asset_address: Address,

    /// Asset precision. The stable asset uses 6.
    pub asset_decimals: u8,

    /// Ticker used in log and status text.
    pub asset_symbol: String,

    // ==========================================
    // ATTESTATION SETTINGS
    // ==========================================

    /// Base URL of the balance attestation service.
    pub attestation_url: String,

    /// Bearer token for the attestation service.
    ///
    /// Absence is not fatal at startup; the first snapshot request
    /// fails with a configuration error instead.
    pub attestation_api_key: Option<String>,

    /// Per-request HTTP timeout for the attestation service (seconds).
    pub attestation_timeout_secs: u64,

    // ==========================================
    // TRANSACTION SETTINGS
    // ==========================================

    /// How often the receipt watcher polls (milliseconds).
    pub receipt_poll_interval_ms: u64,

    /// After this many seconds without a receipt, the pending status
    /// message is updated to say the transaction is still pending.
    pub confirmation_notice_secs: u64,

    /// How often balance and allowance caches are refreshed (seconds).
    pub cache_refresh_interval: u64,

    // ==========================================
    // SERVER SETTINGS
    // ==========================================

    /// HTTP server host address.
    pub server_host: String,

    /// HTTP server port number.
    pub server_port: u16,

    /// `pretty` or `json`.
    pub log_format: String,
}

impl AppConfig {
    /// Load configuration from environment variables.
    ///
    /// ## Returns
    ///
    /// - `Ok(AppConfig)` - Configuration loaded successfully
    /// - `Err(ConfigError)` - A required variable is missing or invalid
    pub fn from_env() -> Result<Self, ConfigError> {
        let rpc_url = get_env("RPC_URL")?;

        Ok(Self {
            // Chain
            chain_id: parse_env("CHAIN_ID", "11155111")?,
            wallet_rpc_url: get_env_or_default("WALLET_RPC_URL", &rpc_url),
            rpc_url,
            account: parse_address("ACCOUNT_ADDRESS", &get_env("ACCOUNT_ADDRESS")?)?,
            vault_address: parse_address("VAULT_ADDRESS", &get_env("VAULT_ADDRESS")?)?,
            asset_address: parse_address("ASSET_ADDRESS", &get_env("ASSET_ADDRESS")?)?,
            asset_decimals: parse_decimals("ASSET_DECIMALS", "6")?,
            asset_symbol: get_env_or_default("ASSET_SYMBOL", "USDC"),

            // Attestation
            attestation_url: get_env("ATTESTATION_URL")?
                .trim_end_matches('/')
                .to_string(),
            attestation_api_key: load_api_key(
                env::var("ATTESTATION_API_KEY").ok(),
                env::var("ATTESTATION_API_KEY_FILE").ok(),
            )?,
            attestation_timeout_secs: parse_env("ATTESTATION_TIMEOUT_SECS", "15")?,

            // Transactions
            receipt_poll_interval_ms: parse_env("RECEIPT_POLL_INTERVAL_MS", "2000")?,
            confirmation_notice_secs: parse_env("CONFIRMATION_NOTICE_SECS", "120")?,
            cache_refresh_interval: parse_env("CACHE_REFRESH_INTERVAL", "30")?,

            // Server
            server_host: get_env_or_default("SERVER_HOST", "127.0.0.1"),
            server_port: parse_env("SERVER_PORT", "8080")?,
            log_format: get_env_or_default("LOG_FORMAT", "pretty"),
        })
    }
}

/// Get a required environment variable.
///
/// Returns an error if the variable is not set.
fn get_env(key: &str) -> Result<String, ConfigError> {
    env::var(key).map_err(|_| ConfigError::MissingEnvVar(key.to_string()))
}

/// Get an environment variable with a default value.
///
/// Returns the default if the variable is not set.
fn get_env_or_default(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Get an environment variable (or its default) and parse it.
fn parse_env<T>(key: &str, default: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    get_env_or_default(key, default)
        .trim()
        .parse()
        .map_err(|e: T::Err| ConfigError::ParseError(key.to_string(), e.to_string()))
}

/// Largest precision whose scale factor `10^decimals` fits in a `U256`.
pub const MAX_ASSET_DECIMALS: u8 = 77;

/// Parse an asset precision and bound it by [`MAX_ASSET_DECIMALS`].
fn parse_decimals(key: &str, default: &str) -> Result<u8, ConfigError> {
    let decimals: u8 = parse_env(key, default)?;
    if decimals > MAX_ASSET_DECIMALS {
        return Err(ConfigError::InvalidValue(
            key.to_string(),
            format!("{} exceeds the maximum of {}", decimals, MAX_ASSET_DECIMALS),
        ));
    }
    Ok(decimals)
}

/// Parse a hex address, naming the variable on failure.
fn parse_address(key: &str, value: &str) -> Result<Address, ConfigError> {
    Address::from_str(value.trim())
        .map_err(|e| ConfigError::InvalidValue(key.to_string(), e.to_string()))
}

/// Resolve the attestation bearer token.
///
/// An inline key wins over a key file. Key file paths go through
/// `shellexpand` so `~/...` works. Blank values count as absent.
fn load_api_key(
    inline: Option<String>,
    file: Option<String>,
) -> Result<Option<String>, ConfigError> {
    if let Some(key) = inline.map(|k| k.trim().to_string()).filter(|k| !k.is_empty()) {
        return Ok(Some(key));
    }

    let Some(path) = file.filter(|p| !p.trim().is_empty()) else {
        return Ok(None);
    };

    let expanded = shellexpand::full(&path).map_err(|e| {
        ConfigError::InvalidValue("ATTESTATION_API_KEY_FILE".to_string(), e.to_string())
    })?;

    let contents = fs::read_to_string(expanded.as_ref()).map_err(|e| {
        ConfigError::InvalidValue(
            "ATTESTATION_API_KEY_FILE".to_string(),
            format!("{}: {}", expanded, e),
        )
    })?;

    let key = contents.trim().to_string();
    Ok(if key.is_empty() { None } else { Some(key) })
}
