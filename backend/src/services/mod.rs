//! # Services Module
//!
//! The collaborators the deposit and withdraw orchestrators sequence.
//! Each service handles one concern and knows nothing about the flows
//! that call it.
//!
//! ## Services Overview
//!
//! | Service | Responsibility |
//! |---------|---------------|
//! | `AllowanceGate` | Is the current allowance enough for this amount? |
//! | `AttestationClient` | Signed cross-chain balance snapshots |
//! | `VaultGateway` | Approve, deposit (plain or attested), withdraw |
//! | `TransactionWatcher` | Waits for receipts |
//! | `StatusBus` | Capped user-facing message feed |
//! | `BalanceCache` | Versioned allowance and position cache |
//!
//! ## Service Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        SERVICES LAYER                            │
//! │                                                                  │
//! │  ┌──────────────────────────────────────────────────────────┐   │
//! │  │          DepositOrchestrator / WithdrawOrchestrator       │   │
//! │  └──────────────────────────────────────────────────────────┘   │
//! │        │            │             │            │          │      │
//! │        ▼            ▼             ▼            ▼          ▼      │
//! │  ┌──────────┐ ┌───────────┐ ┌──────────┐ ┌──────────┐ ┌──────┐  │
//! │  │Allowance │ │Attestation│ │  Vault   │ │   Tx     │ │Status│  │
//! │  │  Gate    │ │  Client   │ │ Gateway  │ │ Watcher  │ │ Bus  │  │
//! │  └──────────┘ └───────────┘ └──────────┘ └──────────┘ └──────┘  │
//! │        │                          │            │                 │
//! │        ▼                          └─────┬──────┘                 │
//! │  ┌──────────┐                           ▼                        │
//! │  │ Balance  │◄──────────────────── EVM JSON-RPC                  │
//! │  │  Cache   │                                                    │
//! │  └──────────┘                                                    │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

pub mod allowance_gate;
pub mod amount;
pub mod attestation;
pub mod balance_cache;
pub mod errors;
pub mod status_bus;
pub mod transaction_watcher;
pub mod vault_gateway;

pub use attestation::{AttestationClient, HttpAttestationClient};
pub use balance_cache::BalanceCache;
pub use status_bus::StatusBus;
pub use transaction_watcher::ReceiptWatcher;
pub use vault_gateway::RpcVaultGateway;
