//! # Vault Gateway
//!
//! Issues the write calls against the token and vault contracts through
//! the wallet endpoint.
//!
//! ## Operations
//!
//! | Operation | Contract call | Used when |
//! |-----------|---------------|-----------|
//! | `approve` | `IERC20.approve(vault, amount)` | allowance is short |
//! | `deposit_plain` | `IVault.deposit(assets, receiver)` | attested balance is zero |
//! | `deposit_with_attestation` | `IVault.depositWithSnapshot(...)` | attested balance is non-zero |
//! | `withdraw` | `IVault.withdraw(assets, receiver, owner)` | always |
//!
//! Every call returns a [`TransactionHandle`] in the `Submitted` state as
//! soon as the wallet has broadcast it. Confirmation is the watcher's job.
//!
//! ## Failure Sources
//!
//! - Synchronous: malformed arguments are rejected before any RPC traffic
//! - Wallet: the user declines, or gas/asset funds are short
//! - Chain: the node refuses the transaction (e.g. gas estimation reverts)
//! - Environment: the wallet is connected to another chain, or its
//!   endpoint cannot be reached

use alloy_primitives::{Address, Bytes, U256};
use alloy_sol_types::SolCall;
use async_trait::async_trait;
use thiserror::Error;
use tracing::{info, warn};

use crate::chain::abi::{IERC20, IVault};
use crate::chain::networks::Deployment;
use crate::chain::{ChainError, EvmClient, USER_REJECTED_CODE};
use crate::services::attestation::BalanceSnapshot;
use crate::services::transaction_watcher::{TransactionHandle, TxKind};

/// JSON-RPC code nodes use for execution reverts.
const EXECUTION_REVERTED_CODE: i64 = 3;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    #[error("Transaction rejected in wallet: {0}")]
    UserRejected(String),

    #[error("Insufficient funds: {0}")]
    InsufficientFunds(String),

    #[error("Transaction would revert: {0}")]
    Reverted(String),

    #[error("Wallet RPC error: {0}")]
    Rpc(String),

    /// The wallet endpoint could not be reached or dropped the request.
    /// Nothing is known to have reached the chain.
    #[error("Wallet endpoint unavailable, check the wallet for a pending request: {0}")]
    WalletUnavailable(String),

    #[error("Wallet is connected to chain {actual}, expected {expected}")]
    ChainMismatch { expected: u64, actual: u64 },

    #[error("Invalid transaction arguments: {0}")]
    InvalidArguments(String),
}

/// Map a wallet RPC failure onto the gateway taxonomy.
///
/// Wallets disagree on codes, so the message text is consulted as well.
pub fn classify_wallet_error(err: ChainError) -> GatewayError {
    match err {
        ChainError::Rpc { code, message, .. } => {
            let lower = message.to_lowercase();
            if code == USER_REJECTED_CODE
                || lower.contains("user rejected")
                || lower.contains("user denied")
            {
                GatewayError::UserRejected(message)
            } else if lower.contains("insufficient funds") || lower.contains("exceeds balance") {
                GatewayError::InsufficientFunds(message)
            } else if code == EXECUTION_REVERTED_CODE || lower.contains("revert") {
                GatewayError::Reverted(message)
            } else {
                GatewayError::Rpc(format!("{} ({})", message, code))
            }
        }
        ChainError::Transport(message) => GatewayError::WalletUnavailable(message),
        other => GatewayError::Rpc(other.to_string()),
    }
}

/// Write access to the vault for one account on one chain.
#[async_trait]
pub trait VaultGateway: Send + Sync {
    /// Chain the gateway submits to.
    fn chain_id(&self) -> u64;

    /// Spender that deposits must be approved for.
    fn vault_address(&self) -> Address;

    async fn approve(
        &self,
        spender: Address,
        amount: U256,
    ) -> Result<TransactionHandle, GatewayError>;

    async fn deposit_plain(
        &self,
        assets: U256,
        receiver: Address,
    ) -> Result<TransactionHandle, GatewayError>;

    /// Forward `snapshot` exactly as the attestation service signed it.
    async fn deposit_with_attestation(
        &self,
        assets: U256,
        receiver: Address,
        snapshot: &BalanceSnapshot,
    ) -> Result<TransactionHandle, GatewayError>;

    async fn withdraw(
        &self,
        assets: U256,
        receiver: Address,
        owner: Address,
    ) -> Result<TransactionHandle, GatewayError>;
}

/// Gateway that submits through an `eth_sendTransaction` capable endpoint.
pub struct RpcVaultGateway {
    wallet: EvmClient,
    deployment: Deployment,
    from: Address,
}

impl RpcVaultGateway {
    pub fn new(wallet: EvmClient, deployment: Deployment, from: Address) -> Self {
        Self {
            wallet,
            deployment,
            from,
        }
    }

    async fn ensure_chain(&self) -> Result<(), GatewayError> {
        let actual = self.wallet.chain_id().await.map_err(classify_wallet_error)?;
        if actual != self.deployment.chain_id {
            warn!(
                "Wallet chain mismatch: expected {}, got {}",
                self.deployment.chain_id, actual
            );
            return Err(GatewayError::ChainMismatch {
                expected: self.deployment.chain_id,
                actual,
            });
        }
        Ok(())
    }

    async fn submit<C: SolCall>(
        &self,
        to: Address,
        call: C,
        kind: TxKind,
    ) -> Result<TransactionHandle, GatewayError> {
        self.ensure_chain().await?;

        let data = Bytes::from(call.abi_encode());
        let hash = self
            .wallet
            .send_transaction(self.from, to, data)
            .await
            .map_err(classify_wallet_error)?;

        info!("📤 Submitted {:?} transaction: {}", kind, hash);
        Ok(TransactionHandle::submitted(self.deployment.chain_id, hash, kind))
    }
}

fn require_amount(assets: U256) -> Result<(), GatewayError> {
    if assets.is_zero() {
        return Err(GatewayError::InvalidArguments("amount is zero".to_string()));
    }
    Ok(())
}

fn require_address(role: &str, address: Address) -> Result<(), GatewayError> {
    if address == Address::ZERO {
        return Err(GatewayError::InvalidArguments(format!("{} is the zero address", role)));
    }
    Ok(())
}

#[async_trait]
impl VaultGateway for RpcVaultGateway {
    fn chain_id(&self) -> u64 {
        self.deployment.chain_id
    }

    fn vault_address(&self) -> Address {
        self.deployment.vault
    }

    async fn approve(
        &self,
        spender: Address,
        amount: U256,
    ) -> Result<TransactionHandle, GatewayError> {
        require_address("spender", spender)?;
        require_amount(amount)?;

        self.submit(
            self.deployment.asset,
            IERC20::approveCall { spender, amount },
            TxKind::Approval,
        )
        .await
    }

    async fn deposit_plain(
        &self,
        assets: U256,
        receiver: Address,
    ) -> Result<TransactionHandle, GatewayError> {
        require_amount(assets)?;
        require_address("receiver", receiver)?;

        self.submit(
            self.deployment.vault,
            IVault::depositCall { assets, receiver },
            TxKind::Deposit,
        )
        .await
    }

    async fn deposit_with_attestation(
        &self,
        assets: U256,
        receiver: Address,
        snapshot: &BalanceSnapshot,
    ) -> Result<TransactionHandle, GatewayError> {
        require_amount(assets)?;
        require_address("receiver", receiver)?;
        if snapshot.assets != assets || snapshot.receiver != receiver {
            return Err(GatewayError::InvalidArguments(
                "snapshot was issued for a different deposit".to_string(),
            ));
        }
        if snapshot.has_zero_balance() {
            return Err(GatewayError::InvalidArguments(
                "snapshot balance is zero; use the plain deposit".to_string(),
            ));
        }

        self.submit(
            self.deployment.vault,
            IVault::depositWithSnapshotCall {
                assets,
                receiver,
                snapshot: snapshot.to_abi(),
                signature: snapshot.signature.clone(),
            },
            TxKind::AttestedDeposit,
        )
        .await
    }

    async fn withdraw(
        &self,
        assets: U256,
        receiver: Address,
        owner: Address,
    ) -> Result<TransactionHandle, GatewayError> {
        require_amount(assets)?;
        require_address("receiver", receiver)?;
        require_address("owner", owner)?;

        self.submit(
            self.deployment.vault,
            IVault::withdrawCall {
                assets,
                receiver,
                owner,
            },
            TxKind::Withdrawal,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::{dev::ServerHandle, web, App, HttpResponse, HttpServer};
    use alloy_primitives::B256;
    use parking_lot::Mutex;
    use serde_json::{json, Value};
    use std::str::FromStr;

    struct MockWallet {
        chain_id: u64,
        send_error: Option<Value>,
        sent: Mutex<Vec<Value>>,
    }

    async fn rpc_handler(body: web::Json<Value>, state: web::Data<MockWallet>) -> HttpResponse {
        let id = body["id"].clone();
        match body["method"].as_str() {
            Some("eth_chainId") => HttpResponse::Ok().json(json!({
                "jsonrpc": "2.0", "id": id, "result": format!("0x{:x}", state.chain_id)
            })),
            Some("eth_sendTransaction") => {
                state.sent.lock().push(body["params"][0].clone());
                match &state.send_error {
                    Some(error) => HttpResponse::Ok().json(json!({
                        "jsonrpc": "2.0", "id": id, "error": error
                    })),
                    None => HttpResponse::Ok().json(json!({
                        "jsonrpc": "2.0", "id": id, "result": format!("0x{}", "cd".repeat(32))
                    })),
                }
            }
            _ => HttpResponse::Ok().json(json!({
                "jsonrpc": "2.0", "id": id, "error": { "code": -32601, "message": "method not found" }
            })),
        }
    }

    async fn spawn_wallet(
        chain_id: u64,
        send_error: Option<Value>,
    ) -> (RpcVaultGateway, ServerHandle, web::Data<MockWallet>) {
        let state = web::Data::new(MockWallet {
            chain_id,
            send_error,
            sent: Mutex::new(Vec::new()),
        });
        let app_state = state.clone();

        let server = HttpServer::new(move || {
            App::new()
                .app_data(app_state.clone())
                .route("/", web::post().to(rpc_handler))
        })
        .workers(1)
        .bind(("127.0.0.1", 0))
        .unwrap();
        let addr = server.addrs()[0];
        let server = server.run();
        let handle = server.handle();
        actix_rt::spawn(server);

        let wallet = EvmClient::new(&format!("http://{}/", addr)).unwrap();
        let gateway = RpcVaultGateway::new(wallet, deployment(), account());
        (gateway, handle, state)
    }

    fn deployment() -> Deployment {
        Deployment {
            chain_id: 11155111,
            vault: Address::repeat_byte(0xaa),
            asset: Address::repeat_byte(0xbb),
        }
    }

    fn account() -> Address {
        Address::repeat_byte(0x42)
    }

    #[actix_rt::test]
    async fn test_approve_targets_asset_with_max_amount() {
        let (gateway, handle, state) = spawn_wallet(11155111, None).await;

        let tx = gateway
            .approve(gateway.vault_address(), U256::MAX)
            .await
            .unwrap();
        assert_eq!(tx.kind, TxKind::Approval);
        assert_eq!(tx.chain_id, 11155111);
        assert_eq!(tx.hash, B256::repeat_byte(0xcd));

        let sent = state.sent.lock().clone();
        assert_eq!(sent.len(), 1);
        let to = Address::from_str(sent[0]["to"].as_str().unwrap()).unwrap();
        assert_eq!(to, deployment().asset);

        let data = Bytes::from_str(sent[0]["data"].as_str().unwrap()).unwrap();
        let decoded = IERC20::approveCall::abi_decode(&data, true).unwrap();
        assert_eq!(decoded.spender, deployment().vault);
        assert_eq!(decoded.amount, U256::MAX);

        handle.stop(true).await;
    }

    #[actix_rt::test]
    async fn test_chain_mismatch_blocks_submission() {
        let (gateway, handle, state) = spawn_wallet(1, None).await;

        let err = gateway
            .deposit_plain(U256::from(5u64), account())
            .await
            .unwrap_err();
        assert_eq!(
            err,
            GatewayError::ChainMismatch {
                expected: 11155111,
                actual: 1
            }
        );
        assert!(state.sent.lock().is_empty());

        handle.stop(true).await;
    }

    #[actix_rt::test]
    async fn test_wallet_rejection_is_classified() {
        let rejection = json!({ "code": 4001, "message": "User rejected the request." });
        let (gateway, handle, _) = spawn_wallet(11155111, Some(rejection)).await;

        let err = gateway
            .withdraw(U256::from(5u64), account(), account())
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::UserRejected(_)));

        handle.stop(true).await;
    }

    #[tokio::test]
    async fn test_invalid_arguments_fail_before_rpc() {
        // Nothing listens here; argument checks must fail first
        let wallet = EvmClient::new("http://127.0.0.1:9").unwrap();
        let gateway = RpcVaultGateway::new(wallet, deployment(), account());

        let err = gateway.deposit_plain(U256::ZERO, account()).await.unwrap_err();
        assert!(matches!(err, GatewayError::InvalidArguments(_)));

        let err = gateway
            .withdraw(U256::from(1u64), Address::ZERO, account())
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::InvalidArguments(_)));
    }

    #[test]
    fn test_classify_wallet_errors() {
        let rpc = |code: i64, message: &str| ChainError::Rpc {
            code,
            message: message.to_string(),
            data: None,
        };

        assert!(matches!(
            classify_wallet_error(rpc(-32000, "MetaMask Tx Signature: User denied transaction signature.")),
            GatewayError::UserRejected(_)
        ));
        assert!(matches!(
            classify_wallet_error(rpc(-32000, "insufficient funds for gas * price + value")),
            GatewayError::InsufficientFunds(_)
        ));
        assert!(matches!(
            classify_wallet_error(rpc(3, "execution reverted: ERC20: transfer amount exceeds allowance")),
            GatewayError::Reverted(_)
        ));
        assert!(matches!(
            classify_wallet_error(rpc(-32603, "internal error")),
            GatewayError::Rpc(_)
        ));
        assert!(matches!(
            classify_wallet_error(ChainError::Transport("connection refused".into())),
            GatewayError::WalletUnavailable(_)
        ));
    }

    #[tokio::test]
    async fn test_unreachable_wallet_is_not_a_chain_rejection() {
        let wallet = EvmClient::wallet("http://127.0.0.1:9").unwrap();
        let gateway = RpcVaultGateway::new(wallet, deployment(), account());

        let err = gateway
            .deposit_plain(U256::from(5u64), account())
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::WalletUnavailable(_)));

        let classified = crate::services::errors::FlowError::from(err);
        assert_ne!(classified.kind, crate::services::errors::FailureKind::ChainRejected);
    }
}
