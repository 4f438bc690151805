//! Supported networks and per-chain contract addresses.
//!
//! The allow-list is fixed. Looking up an address for any other chain id
//! is a configuration error, never a fallback to a default network.

use alloy_primitives::{hex, Address, B256};
use serde::Serialize;

use crate::config::{AppConfig, ConfigError};

/// A network the vault is deployed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Network {
    pub chain_id: u64,
    pub name: &'static str,
    pub explorer_url: &'static str,
}

impl Network {
    /// Block explorer link for a transaction hash.
    pub fn tx_url(&self, hash: &B256) -> String {
        format!("{}/tx/{}", self.explorer_url, hex::encode_prefixed(hash))
    }
}

pub const SUPPORTED_NETWORKS: &[Network] = &[
    Network { chain_id: 1, name: "Ethereum", explorer_url: "https://etherscan.io" },
    Network { chain_id: 42161, name: "Arbitrum One", explorer_url: "https://arbiscan.io" },
    Network { chain_id: 8453, name: "Base", explorer_url: "https://basescan.org" },
    Network { chain_id: 11155111, name: "Sepolia", explorer_url: "https://sepolia.etherscan.io" },
    Network {
        chain_id: 421614,
        name: "Arbitrum Sepolia",
        explorer_url: "https://sepolia.arbiscan.io",
    },
    Network { chain_id: 84532, name: "Base Sepolia", explorer_url: "https://sepolia.basescan.org" },
];

/// Look up a network on the allow-list.
pub fn network(chain_id: u64) -> Result<&'static Network, ConfigError> {
    SUPPORTED_NETWORKS
        .iter()
        .find(|n| n.chain_id == chain_id)
        .ok_or(ConfigError::UnsupportedChain(chain_id))
}

/// Contract addresses for one chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Deployment {
    pub chain_id: u64,
    pub vault: Address,
    pub asset: Address,
}

/// The set of deployments this process knows about.
#[derive(Debug, Clone, Default)]
pub struct Deployments {
    entries: Vec<Deployment>,
}

impl Deployments {
    pub fn new(entries: Vec<Deployment>) -> Self {
        Self { entries }
    }

    /// Deployments declared in the environment.
    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(vec![Deployment {
            chain_id: config.chain_id,
            vault: config.vault_address,
            asset: config.asset_address,
        }])
    }

    /// Resolve the addresses for `chain_id`.
    ///
    /// ## Errors
    ///
    /// * `UnsupportedChain` - the id is not on the allow-list
    /// * `MissingDeployment` - supported, but nothing configured for it
    pub fn lookup(&self, chain_id: u64) -> Result<Deployment, ConfigError> {
        network(chain_id)?;

        self.entries
            .iter()
            .copied()
            .find(|d| d.chain_id == chain_id)
            .ok_or(ConfigError::MissingDeployment(chain_id))
    }
}
