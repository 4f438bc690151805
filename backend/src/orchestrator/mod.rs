//! # Orchestrator Module
//!
//! State machines that sequence approvals, attestations, vault calls
//! and confirmations for one user session.
//!
//! ## Actors
//!
//! Each flow runs as a single task that owns its state. Callers talk to
//! it through a command channel and read its state from a watch channel:
//!
//! ```text
//!   API handler ──DepositCommand──► mpsc ──► DepositOrchestrator task
//!        ▲                                         │
//!        └─────────── oneshot reply ◄──────────────┤
//!                                                   ├──► watch<DepositState>
//!                                                   └──► broadcast<Transition>
//! ```
//!
//! The task handles one command or one step outcome at a time, so no two
//! transitions of the same flow can interleave. Network calls and
//! confirmation waits run as the task's single in-flight step; commands
//! are still answered while a step is pending.
//!
//! ## Flows
//!
//! | Flow | Phases |
//! |------|--------|
//! | Deposit | `Input → [Approving] → Depositing → Confirming → Done` |
//! | Withdraw | `Input → Withdrawing → Confirming → Done` |
//!
//! Both flows can reach `Error`, and both return to `Input` on `retry`
//! or `cancel`.

pub mod deposit;
pub mod withdraw;

use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::{Address, U256};
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{broadcast, oneshot};
use tracing::{info, warn};

use crate::services::attestation::AttestationClient;
use crate::services::balance_cache::BalanceCache;
use crate::services::errors::FlowError;
use crate::services::status_bus::{StatusBus, StatusMessage};
use crate::services::transaction_watcher::{TransactionHandle, TransactionWatcher, WatchError};
use crate::services::vault_gateway::VaultGateway;
use crate::utils::format_units;

pub use deposit::{DepositHandle, DepositState};
pub use withdraw::{WithdrawHandle, WithdrawState};

/// Where a flow is, without its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Input,
    Approving,
    Depositing,
    Withdrawing,
    Confirming,
    Done,
    Error,
}

impl Phase {
    /// Phases from which a new attempt may start.
    pub fn accepts_new_attempt(&self) -> bool {
        matches!(self, Phase::Input | Phase::Done | Phase::Error)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Flow {
    Deposit,
    Withdraw,
}

impl Flow {
    pub fn label(&self) -> &'static str {
        match self {
            Flow::Deposit => "deposit",
            Flow::Withdraw => "withdraw",
        }
    }
}

/// A phase change, published to every subscriber.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Transition {
    pub flow: Flow,
    pub attempt: u64,
    pub from: Phase,
    pub to: Phase,
    pub at: DateTime<Utc>,
}

/// Why a command was refused.
///
/// A refused command never changes state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("A {flow} is already in progress ({phase:?})", flow = .0.label(), phase = .1)]
    Busy(Flow, Phase),

    #[error("{0}")]
    Validation(FlowError),

    #[error("Cannot {command} while {phase:?}")]
    InvalidState { command: &'static str, phase: Phase },

    #[error("Balance data unavailable: {0}")]
    Unavailable(String),

    #[error("Orchestrator has shut down")]
    Closed,
}

pub(crate) type Reply<S> = oneshot::Sender<Result<S, CommandError>>;

/// Everything a flow needs from the outside world.
#[derive(Clone)]
pub struct FlowContext {
    pub gateway: Arc<dyn VaultGateway>,
    pub attestation: Arc<dyn AttestationClient>,
    pub watcher: Arc<dyn TransactionWatcher>,
    pub cache: Arc<BalanceCache>,
    pub status: StatusBus,
    /// Owner and receiver for every call.
    pub account: Address,
    pub decimals: u8,
    pub symbol: String,
    /// How long a confirmation wait runs before the "still pending" notice.
    pub confirmation_notice: Duration,
}

impl FlowContext {
    pub fn format(&self, amount: U256) -> String {
        format_units(amount, self.decimals, &self.symbol)
    }

    pub fn chain_id(&self) -> u64 {
        self.gateway.chain_id()
    }
}

/// A running step; resolves to the flow-specific outcome.
pub(crate) type Step<T> = BoxFuture<'static, T>;

/// Status message ids for one attempt.
pub(crate) struct MessageIds {
    pub pending: String,
    pub error: String,
    pub success: String,
    pub info: String,
}

impl MessageIds {
    pub fn new(flow: Flow, attempt: u64) -> Self {
        let base = format!("{}-{}", flow.label(), attempt);
        Self {
            error: format!("{}-error", base),
            success: format!("{}-success", base),
            info: format!("{}-info", base),
            pending: base,
        }
    }
}

/// Wait for `handle` to settle, upserting a "still pending" notice into
/// the pending message once `ctx.confirmation_notice` has elapsed.
///
/// There is no upper bound; the wait ends on confirmation, revert, or
/// when the caller drops the future.
pub(crate) async fn await_settlement(
    ctx: &FlowContext,
    handle: &TransactionHandle,
    pending_id: &str,
    label: &str,
) -> Result<TransactionHandle, WatchError> {
    let wait = ctx.watcher.wait(handle);
    tokio::pin!(wait);
    let notice = tokio::time::sleep(ctx.confirmation_notice);
    tokio::pin!(notice);
    let mut noticed = false;

    loop {
        tokio::select! {
            settled = &mut wait => return settled,
            _ = &mut notice, if !noticed => {
                noticed = true;
                warn!("{} {} unconfirmed after {:?}", label, handle.hash, ctx.confirmation_notice);
                ctx.status.upsert(
                    StatusMessage::pending(
                        pending_id,
                        format!(
                            "{} is still pending. Tracking continues until it confirms or you cancel.",
                            label
                        ),
                    )
                    .with_tx(handle.chain_id, handle.hash),
                );
            }
        }
    }
}

/// Keep following a transaction the user walked away from, then refresh
/// balances so the cache reflects whatever landed.
pub(crate) fn spawn_passive_watch(ctx: &FlowContext, handle: TransactionHandle) {
    let watcher = ctx.watcher.clone();
    let cache = ctx.cache.clone();
    tokio::spawn(async move {
        match watcher.wait(&handle).await {
            Ok(settled) => info!(
                "Abandoned {:?} transaction {} settled as {:?}",
                settled.kind, settled.hash, settled.state
            ),
            Err(e) => warn!("Stopped tracking abandoned transaction: {}", e),
        }
        refresh_quietly(&cache).await;
    });
}

/// Invalidate every cache and refresh in the background.
pub(crate) fn reset_caches(ctx: &FlowContext) {
    ctx.cache.invalidate();
    let cache = ctx.cache.clone();
    tokio::spawn(async move { refresh_quietly(&cache).await });
}

pub(crate) async fn refresh_quietly(cache: &BalanceCache) {
    if let Err(e) = cache.refresh_all().await {
        warn!("Balance refresh failed: {}", e);
    }
}

pub(crate) async fn refresh_allowance_quietly(cache: &BalanceCache) {
    if let Err(e) = cache.refresh_allowance().await {
        warn!("Allowance refresh failed: {}", e);
    }
}

/// Both flows for one account, plus the shared feed.
///
/// ## Usage
///
/// ```rust,ignore
/// let session = Session::spawn(ctx);
/// session.deposit.request_deposit("100").await?;
/// let mut transitions = session.subscribe_transitions();
/// ```
#[derive(Clone)]
pub struct Session {
    pub deposit: DepositHandle,
    pub withdraw: WithdrawHandle,
    pub status: StatusBus,
    pub cache: Arc<BalanceCache>,
    pub account: Address,
    pub chain_id: u64,
    transitions: broadcast::Sender<Transition>,
}

impl Session {
    pub fn spawn(ctx: FlowContext) -> Self {
        let (transitions, _) = broadcast::channel(64);
        let deposit = deposit::spawn(ctx.clone(), transitions.clone());
        let withdraw = withdraw::spawn(ctx.clone(), transitions.clone());

        info!("🧭 Session started for {}", ctx.account);

        Self {
            deposit,
            withdraw,
            status: ctx.status.clone(),
            cache: ctx.cache.clone(),
            account: ctx.account,
            chain_id: ctx.chain_id(),
            transitions,
        }
    }

    pub fn subscribe_transitions(&self) -> broadcast::Receiver<Transition> {
        self.transitions.subscribe()
    }
}
