//! In-memory collaborators for unit tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::{Address, Bytes, B256, U256};
use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{broadcast, Semaphore};

use crate::chain::{ChainError, ChainReader};
use crate::orchestrator::{FlowContext, Phase, Transition};
use crate::services::attestation::{AttestationClient, AttestationError, BalanceSnapshot};
use crate::services::balance_cache::BalanceCache;
use crate::services::status_bus::StatusBus;
use crate::services::transaction_watcher::{
    TransactionHandle, TransactionWatcher, TxKind, TxLifecycle, WatchError,
};
use crate::services::vault_gateway::{GatewayError, VaultGateway};

pub const CHAIN_ID: u64 = 11155111;

pub fn account() -> Address {
    Address::repeat_byte(0x42)
}

pub fn vault() -> Address {
    Address::repeat_byte(0xaa)
}

pub fn asset() -> Address {
    Address::repeat_byte(0xbb)
}

// =============================================================================
// Chain reads
// =============================================================================

#[derive(Default)]
struct ChainValues {
    allowance: U256,
    wallet_balance: U256,
    shares: U256,
    total_assets: U256,
    total_supply: U256,
}

#[derive(Default)]
pub struct FakeReader {
    values: Mutex<ChainValues>,
    reads: AtomicUsize,
    failing: AtomicBool,
}

impl FakeReader {
    pub fn set_allowance(&self, allowance: U256) {
        self.values.lock().allowance = allowance;
    }

    pub fn set_position(
        &self,
        wallet_balance: U256,
        shares: U256,
        total_assets: U256,
        total_supply: U256,
    ) {
        let mut values = self.values.lock();
        values.wallet_balance = wallet_balance;
        values.shares = shares;
        values.total_assets = total_assets;
        values.total_supply = total_supply;
    }

    pub fn fail_reads(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    fn read(&self, pick: impl FnOnce(&ChainValues) -> U256) -> Result<U256, ChainError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(ChainError::Transport("connection refused".into()));
        }
        Ok(pick(&self.values.lock()))
    }
}

#[async_trait]
impl ChainReader for FakeReader {
    async fn allowance(&self, _: Address, _: Address, _: Address) -> Result<U256, ChainError> {
        self.read(|v| v.allowance)
    }

    async fn balance_of(&self, token: Address, _: Address) -> Result<U256, ChainError> {
        let shares = token == vault();
        self.read(|v| if shares { v.shares } else { v.wallet_balance })
    }

    async fn total_assets(&self, _: Address) -> Result<U256, ChainError> {
        self.read(|v| v.total_assets)
    }

    async fn total_supply(&self, _: Address) -> Result<U256, ChainError> {
        self.read(|v| v.total_supply)
    }
}

// =============================================================================
// Vault writes
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayCall {
    Approve {
        spender: Address,
        amount: U256,
    },
    DepositPlain {
        assets: U256,
        receiver: Address,
    },
    DepositWithAttestation {
        assets: U256,
        receiver: Address,
        snapshot: BalanceSnapshot,
    },
    Withdraw {
        assets: U256,
        receiver: Address,
        owner: Address,
    },
}

impl GatewayCall {
    pub fn kind(&self) -> TxKind {
        match self {
            GatewayCall::Approve { .. } => TxKind::Approval,
            GatewayCall::DepositPlain { .. } => TxKind::Deposit,
            GatewayCall::DepositWithAttestation { .. } => TxKind::AttestedDeposit,
            GatewayCall::Withdraw { .. } => TxKind::Withdrawal,
        }
    }
}

/// Records every call; fails the next call of a kind when told to.
#[derive(Default)]
pub struct RecordingGateway {
    calls: Mutex<Vec<GatewayCall>>,
    failures: Mutex<Vec<(TxKind, GatewayError)>>,
    counter: AtomicU8,
}

impl RecordingGateway {
    pub fn fail_next(&self, kind: TxKind, error: GatewayError) {
        self.failures.lock().push((kind, error));
    }

    pub fn calls(&self) -> Vec<GatewayCall> {
        self.calls.lock().clone()
    }

    pub fn count(&self, kind: TxKind) -> usize {
        self.calls.lock().iter().filter(|c| c.kind() == kind).count()
    }

    fn record(&self, call: GatewayCall) -> Result<TransactionHandle, GatewayError> {
        let kind = call.kind();
        self.calls.lock().push(call);

        let mut failures = self.failures.lock();
        if let Some(index) = failures.iter().position(|(k, _)| *k == kind) {
            return Err(failures.remove(index).1);
        }

        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(TransactionHandle::submitted(CHAIN_ID, B256::with_last_byte(n), kind))
    }
}

#[async_trait]
impl VaultGateway for RecordingGateway {
    fn chain_id(&self) -> u64 {
        CHAIN_ID
    }

    fn vault_address(&self) -> Address {
        vault()
    }

    async fn approve(&self, spender: Address, amount: U256) -> Result<TransactionHandle, GatewayError> {
        self.record(GatewayCall::Approve { spender, amount })
    }

    async fn deposit_plain(
        &self,
        assets: U256,
        receiver: Address,
    ) -> Result<TransactionHandle, GatewayError> {
        self.record(GatewayCall::DepositPlain { assets, receiver })
    }

    async fn deposit_with_attestation(
        &self,
        assets: U256,
        receiver: Address,
        snapshot: &BalanceSnapshot,
    ) -> Result<TransactionHandle, GatewayError> {
        self.record(GatewayCall::DepositWithAttestation {
            assets,
            receiver,
            snapshot: snapshot.clone(),
        })
    }

    async fn withdraw(
        &self,
        assets: U256,
        receiver: Address,
        owner: Address,
    ) -> Result<TransactionHandle, GatewayError> {
        self.record(GatewayCall::Withdraw {
            assets,
            receiver,
            owner,
        })
    }
}

// =============================================================================
// Attestation
// =============================================================================

/// A snapshot for `(assets, account())` that expires in 2100.
pub fn snapshot(assets: U256, balance: U256) -> BalanceSnapshot {
    BalanceSnapshot {
        balance,
        nonce: U256::from(7u64),
        deadline: U256::from(4_102_444_800u64),
        assets,
        receiver: account(),
        signature: Bytes::from(vec![0xab; 65]),
        signer_address: Address::repeat_byte(0x51),
    }
}

/// Returns queued responses, then zero-balance snapshots.
#[derive(Default)]
pub struct ScriptedAttestation {
    responses: Mutex<VecDeque<Result<BalanceSnapshot, AttestationError>>>,
    requests: Mutex<Vec<(U256, Address, u64)>>,
}

impl ScriptedAttestation {
    pub fn push(&self, response: Result<BalanceSnapshot, AttestationError>) {
        self.responses.lock().push_back(response);
    }

    pub fn requests(&self) -> Vec<(U256, Address, u64)> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl AttestationClient for ScriptedAttestation {
    async fn request_snapshot(
        &self,
        assets: U256,
        receiver: Address,
        chain_id: u64,
    ) -> Result<BalanceSnapshot, AttestationError> {
        self.requests.lock().push((assets, receiver, chain_id));
        self.responses
            .lock()
            .pop_front()
            .unwrap_or_else(|| Ok(snapshot(assets, U256::ZERO)))
    }

    async fn health(&self) -> bool {
        true
    }
}

// =============================================================================
// Confirmation
// =============================================================================

/// Settles transactions as told, optionally holding each wait until released.
pub struct GatedWatcher {
    gate: Semaphore,
    outcomes: Mutex<Vec<(B256, TxLifecycle)>>,
    waits: AtomicUsize,
}

impl GatedWatcher {
    /// Every transaction confirms immediately.
    pub fn instant() -> Self {
        Self::with_permits(Semaphore::MAX_PERMITS)
    }

    /// Every wait blocks until `release` is called.
    pub fn held() -> Self {
        Self::with_permits(0)
    }

    fn with_permits(permits: usize) -> Self {
        Self {
            gate: Semaphore::new(permits),
            outcomes: Mutex::new(Vec::new()),
            waits: AtomicUsize::new(0),
        }
    }

    pub fn release(&self) {
        self.gate.add_permits(1);
    }

    pub fn revert(&self, hash: B256) {
        self.outcomes.lock().push((hash, TxLifecycle::Reverted));
    }

    pub fn waits(&self) -> usize {
        self.waits.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TransactionWatcher for GatedWatcher {
    async fn wait(&self, handle: &TransactionHandle) -> Result<TransactionHandle, WatchError> {
        self.waits.fetch_add(1, Ordering::SeqCst);
        if let Ok(permit) = self.gate.acquire().await {
            permit.forget();
        }
        let state = self
            .outcomes
            .lock()
            .iter()
            .find(|(hash, _)| *hash == handle.hash)
            .map(|(_, state)| *state)
            .unwrap_or(TxLifecycle::Confirmed);
        Ok(handle.settle(state))
    }
}

// =============================================================================
// Harness
// =============================================================================

pub struct Harness {
    pub reader: Arc<FakeReader>,
    pub gateway: Arc<RecordingGateway>,
    pub attestation: Arc<ScriptedAttestation>,
    pub watcher: Arc<GatedWatcher>,
    pub cache: Arc<BalanceCache>,
    pub status: StatusBus,
    pub ctx: FlowContext,
}

impl Harness {
    pub fn new(watcher: GatedWatcher) -> Self {
        let reader = Arc::new(FakeReader::default());
        let gateway = Arc::new(RecordingGateway::default());
        let attestation = Arc::new(ScriptedAttestation::default());
        let watcher = Arc::new(watcher);
        let cache = Arc::new(BalanceCache::new(reader.clone(), asset(), vault(), account()));
        let status = StatusBus::new();

        let ctx = FlowContext {
            gateway: gateway.clone(),
            attestation: attestation.clone(),
            watcher: watcher.clone(),
            cache: cache.clone(),
            status: status.clone(),
            account: account(),
            decimals: 6,
            symbol: "USDC".to_string(),
            confirmation_notice: Duration::from_secs(120),
        };

        Self {
            reader,
            gateway,
            attestation,
            watcher,
            cache,
            status,
            ctx,
        }
    }
}

/// Collect transitions until one lands in `target`.
pub async fn transitions_until(
    rx: &mut broadcast::Receiver<Transition>,
    target: Phase,
) -> Vec<(Phase, Phase)> {
    let mut seen = Vec::new();
    let collect = async {
        while let Ok(transition) = rx.recv().await {
            seen.push((transition.from, transition.to));
            if transition.to == target {
                break;
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(5), collect)
        .await
        .expect("timed out waiting for transition");
    seen
}
