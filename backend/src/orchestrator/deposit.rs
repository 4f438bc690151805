//! # Deposit Orchestrator
//!
//! Sequences one deposit attempt at a time.
//!
//! ## Flow
//!
//! ```text
//! 1. DepositRequested("100")
//!              ↓
//! 2. AllowanceGate: enough allowance?
//!        no  → Approving: approve(vault, MAX) → wait for receipt
//!        yes → skip
//!              ↓
//! 3. Depositing: request balance snapshot
//!        balance == 0 → deposit(assets, receiver)
//!        balance != 0 → depositWithSnapshot(assets, receiver, snapshot, sig)
//!              ↓ wait for receipt
//! 4. Confirming: confirmed, waiting for acknowledge
//!              ↓
//! 5. Done
//! ```
//!
//! Any failure after step 1 lands in `Error`. From there `retry` resets to
//! `Input` and `cancel` resets to `Input` after invalidating the caches.
//!
//! The snapshot lives only inside the step that requests and spends it;
//! no state variant ever holds one.

use alloy_primitives::U256;
use chrono::Utc;
use futures::FutureExt;
use serde::Serialize;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tracing::{info, warn};

use super::{
    await_settlement, refresh_allowance_quietly, refresh_quietly, reset_caches,
    spawn_passive_watch, CommandError, Flow, FlowContext, MessageIds, Phase, Reply, Step,
    Transition,
};
use crate::services::allowance_gate::AllowanceGate;
use crate::services::amount::AmountRequest;
use crate::services::errors::FlowError;
use crate::services::status_bus::StatusMessage;
use crate::services::transaction_watcher::{TransactionHandle, TxLifecycle};

/// Feed id for "allowance could not be read"; one at a time.
const ALLOWANCE_UNAVAILABLE_ID: &str = "deposit-allowance-unavailable";

/// Which vault call a deposit used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DepositPath {
    /// `deposit(assets, receiver)`; attested balance was zero.
    Plain,
    /// `depositWithSnapshot(...)`; attested balance was non-zero.
    Attested,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "phase", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum DepositState {
    Input,
    Approving {
        attempt: u64,
        amount: AmountRequest,
        approval: Option<TransactionHandle>,
    },
    Depositing {
        attempt: u64,
        amount: AmountRequest,
        attested_balance: Option<U256>,
        path: Option<DepositPath>,
        tx: Option<TransactionHandle>,
    },
    /// Confirmed on-chain, waiting for the caller to acknowledge.
    Confirming {
        attempt: u64,
        amount: AmountRequest,
        path: DepositPath,
        tx: TransactionHandle,
    },
    Done {
        attempt: u64,
        amount: AmountRequest,
        path: DepositPath,
        tx: TransactionHandle,
    },
    Error {
        attempt: u64,
        amount: AmountRequest,
        error: FlowError,
    },
}

impl DepositState {
    pub fn phase(&self) -> Phase {
        match self {
            DepositState::Input => Phase::Input,
            DepositState::Approving { .. } => Phase::Approving,
            DepositState::Depositing { .. } => Phase::Depositing,
            DepositState::Confirming { .. } => Phase::Confirming,
            DepositState::Done { .. } => Phase::Done,
            DepositState::Error { .. } => Phase::Error,
        }
    }

    pub fn attempt(&self) -> u64 {
        match self {
            DepositState::Input => 0,
            DepositState::Approving { attempt, .. }
            | DepositState::Depositing { attempt, .. }
            | DepositState::Confirming { attempt, .. }
            | DepositState::Done { attempt, .. }
            | DepositState::Error { attempt, .. } => *attempt,
        }
    }

    fn amount(&self) -> Option<&AmountRequest> {
        match self {
            DepositState::Input => None,
            DepositState::Approving { amount, .. }
            | DepositState::Depositing { amount, .. }
            | DepositState::Confirming { amount, .. }
            | DepositState::Done { amount, .. }
            | DepositState::Error { amount, .. } => Some(amount),
        }
    }

    /// A broadcast transaction whose outcome is not yet known.
    fn unsettled_tx(&self) -> Option<&TransactionHandle> {
        match self {
            DepositState::Approving { approval, .. } => approval.as_ref(),
            DepositState::Depositing { tx, .. } => tx.as_ref(),
            _ => None,
        }
    }
}

pub(crate) enum DepositCommand {
    /// `DepositRequested(amount)`
    Start {
        amount: String,
        reply: Reply<DepositState>,
    },
    Acknowledge {
        reply: Reply<DepositState>,
    },
    Retry {
        reply: Reply<DepositState>,
    },
    Cancel {
        reply: Reply<DepositState>,
    },
}

struct Submitted {
    tx: TransactionHandle,
    path: DepositPath,
    attested_balance: U256,
}

enum DepositStep {
    ApprovalSubmitted(Result<TransactionHandle, FlowError>),
    ApprovalSettled(Result<TransactionHandle, FlowError>),
    DepositSubmitted(Result<Submitted, FlowError>),
    DepositSettled(Result<TransactionHandle, FlowError>),
}

enum Event {
    Step(DepositStep),
    Command(Option<DepositCommand>),
}

/// Caller side of a running deposit orchestrator.
#[derive(Clone)]
pub struct DepositHandle {
    commands: mpsc::Sender<DepositCommand>,
    state: watch::Receiver<DepositState>,
}

impl DepositHandle {
    /// Start a deposit of `amount` (decimal string in asset units).
    pub async fn request_deposit(
        &self,
        amount: impl Into<String>,
    ) -> Result<DepositState, CommandError> {
        let amount = amount.into();
        self.send(|reply| DepositCommand::Start { amount, reply }).await
    }

    pub async fn acknowledge(&self) -> Result<DepositState, CommandError> {
        self.send(|reply| DepositCommand::Acknowledge { reply }).await
    }

    pub async fn retry(&self) -> Result<DepositState, CommandError> {
        self.send(|reply| DepositCommand::Retry { reply }).await
    }

    pub async fn cancel(&self) -> Result<DepositState, CommandError> {
        self.send(|reply| DepositCommand::Cancel { reply }).await
    }

    pub fn state(&self) -> DepositState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<DepositState> {
        self.state.clone()
    }

    async fn send(
        &self,
        command: impl FnOnce(Reply<DepositState>) -> DepositCommand,
    ) -> Result<DepositState, CommandError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(command(reply))
            .await
            .map_err(|_| CommandError::Closed)?;
        response.await.map_err(|_| CommandError::Closed)?
    }
}

/// Spawn the orchestrator task and return its handle.
pub fn spawn(ctx: FlowContext, transitions: broadcast::Sender<Transition>) -> DepositHandle {
    let (commands, receiver) = mpsc::channel(16);
    let (state_tx, state) = watch::channel(DepositState::Input);

    let orchestrator = DepositOrchestrator {
        ctx,
        state: DepositState::Input,
        attempts: 0,
        in_flight: None,
        state_tx,
        transitions,
    };
    tokio::spawn(orchestrator.run(receiver));

    DepositHandle { commands, state }
}

struct DepositOrchestrator {
    ctx: FlowContext,
    state: DepositState,
    attempts: u64,
    in_flight: Option<Step<DepositStep>>,
    state_tx: watch::Sender<DepositState>,
    transitions: broadcast::Sender<Transition>,
}

impl DepositOrchestrator {
    async fn run(mut self, mut commands: mpsc::Receiver<DepositCommand>) {
        loop {
            let event = match self.in_flight.as_mut() {
                Some(step) => tokio::select! {
                    outcome = step => Event::Step(outcome),
                    command = commands.recv() => Event::Command(command),
                },
                None => Event::Command(commands.recv().await),
            };

            match event {
                Event::Step(outcome) => {
                    self.in_flight = None;
                    self.on_step(outcome);
                }
                Event::Command(Some(command)) => self.on_command(command).await,
                Event::Command(None) => break,
            }
        }
        info!("Deposit orchestrator stopped");
    }

    async fn on_command(&mut self, command: DepositCommand) {
        let (result, reply) = match command {
            DepositCommand::Start { amount, reply } => (self.start(&amount).await, reply),
            DepositCommand::Acknowledge { reply } => (self.acknowledge(), reply),
            DepositCommand::Retry { reply } => (self.retry(), reply),
            DepositCommand::Cancel { reply } => (Ok(self.cancel()), reply),
        };
        // The caller may have gone away; the transition stands either way
        let _ = reply.send(result);
    }

    // =========================================================================
    // Commands
    // =========================================================================

    async fn start(&mut self, raw: &str) -> Result<DepositState, CommandError> {
        let phase = self.state.phase();
        if !phase.accepts_new_attempt() {
            return Err(CommandError::Busy(Flow::Deposit, phase));
        }

        let amount = AmountRequest::parse_positive(raw, self.ctx.decimals)
            .map_err(|e| CommandError::Validation(e.into()))?;

        let approved = match AllowanceGate::new(&self.ctx.cache).check(&amount).await {
            Ok(approved) => approved,
            Err(e) => {
                warn!("Deposit refused, allowance unavailable: {}", e);
                self.ctx.status.add(StatusMessage::error(
                    ALLOWANCE_UNAVAILABLE_ID,
                    format!("Could not read your {} allowance, try again", self.ctx.symbol),
                ));
                return Err(CommandError::Unavailable(e.to_string()));
            }
        };

        if phase != Phase::Input {
            self.set_state(DepositState::Input);
        }

        self.attempts += 1;
        let attempt = self.attempts;
        let ids = MessageIds::new(Flow::Deposit, attempt);
        let formatted = self.ctx.format(amount.base_units());

        info!("💰 Deposit #{} requested: {}", attempt, formatted);

        if approved {
            self.ctx.status.add(StatusMessage::pending(
                ids.pending,
                format!("Requesting balance attestation for {}", formatted),
            ));
            self.begin_deposit(attempt, amount);
        } else {
            self.ctx.status.add(StatusMessage::pending(
                ids.pending,
                format!("Approve {} for the vault in your wallet", self.ctx.symbol),
            ));
            self.set_state(DepositState::Approving {
                attempt,
                amount,
                approval: None,
            });
            self.in_flight = Some(approve_step(self.ctx.clone()));
        }

        Ok(self.state.clone())
    }

    fn acknowledge(&mut self) -> Result<DepositState, CommandError> {
        match &self.state {
            DepositState::Confirming {
                attempt,
                amount,
                path,
                tx,
            } => {
                let done = DepositState::Done {
                    attempt: *attempt,
                    amount: amount.clone(),
                    path: *path,
                    tx: tx.clone(),
                };
                self.set_state(done);
                Ok(self.state.clone())
            }
            other => Err(CommandError::InvalidState {
                command: "acknowledge",
                phase: other.phase(),
            }),
        }
    }

    fn retry(&mut self) -> Result<DepositState, CommandError> {
        match &self.state {
            DepositState::Error { error, .. } => {
                if error.kind.requires_refresh() {
                    self.ctx.cache.invalidate();
                }
                self.set_state(DepositState::Input);
                Ok(self.state.clone())
            }
            other => Err(CommandError::InvalidState {
                command: "retry",
                phase: other.phase(),
            }),
        }
    }

    fn cancel(&mut self) -> DepositState {
        if self.state.phase() == Phase::Input {
            return self.state.clone();
        }

        self.in_flight = None;
        if let Some(tx) = self.state.unsettled_tx() {
            info!("Deposit cancelled with {} unconfirmed; tracking it passively", tx.hash);
            spawn_passive_watch(&self.ctx, tx.clone());
        }

        let ids = MessageIds::new(Flow::Deposit, self.state.attempt());
        if self.ctx.status.remove(&ids.pending) {
            self.ctx
                .status
                .add(StatusMessage::info(ids.info, "Deposit cancelled"));
        }

        reset_caches(&self.ctx);
        self.set_state(DepositState::Input);
        self.state.clone()
    }

    // =========================================================================
    // Step outcomes
    // =========================================================================

    fn on_step(&mut self, outcome: DepositStep) {
        let attempt = self.state.attempt();
        let ids = MessageIds::new(Flow::Deposit, attempt);
        let amount = match self.state.amount() {
            Some(amount) => amount.clone(),
            None => return,
        };

        match outcome {
            DepositStep::ApprovalSubmitted(Ok(tx)) => {
                self.ctx.status.upsert(
                    StatusMessage::pending(
                        &ids.pending,
                        format!("Waiting for {} approval to confirm", self.ctx.symbol),
                    )
                    .with_tx(tx.chain_id, tx.hash),
                );
                self.set_state(DepositState::Approving {
                    attempt,
                    amount,
                    approval: Some(tx.clone()),
                });
                self.in_flight = Some(wait_approval_step(self.ctx.clone(), tx, ids.pending));
            }
            DepositStep::ApprovalSettled(Ok(_)) => {
                self.ctx.status.upsert(StatusMessage::pending(
                    &ids.pending,
                    format!(
                        "Requesting balance attestation for {}",
                        self.ctx.format(amount.base_units())
                    ),
                ));
                self.begin_deposit(attempt, amount);
            }
            DepositStep::DepositSubmitted(Ok(submitted)) => {
                self.ctx.status.upsert(
                    StatusMessage::pending(
                        &ids.pending,
                        format!("Depositing {}", self.ctx.format(amount.base_units())),
                    )
                    .with_tx(submitted.tx.chain_id, submitted.tx.hash),
                );
                self.set_state(DepositState::Depositing {
                    attempt,
                    amount,
                    attested_balance: Some(submitted.attested_balance),
                    path: Some(submitted.path),
                    tx: Some(submitted.tx.clone()),
                });
                self.in_flight = Some(wait_deposit_step(
                    self.ctx.clone(),
                    submitted.tx,
                    submitted.path,
                    ids.pending,
                ));
            }
            DepositStep::DepositSettled(Ok(tx)) => {
                let path = match &self.state {
                    DepositState::Depositing { path: Some(path), .. } => *path,
                    _ => DepositPath::Plain,
                };
                info!("✅ Deposit #{} confirmed: {}", attempt, tx.hash);
                self.ctx.status.remove(&ids.pending);
                self.ctx.status.add(
                    StatusMessage::success(
                        ids.success,
                        format!("Deposited {}", self.ctx.format(amount.base_units())),
                    )
                    .with_tx(tx.chain_id, tx.hash),
                );
                self.set_state(DepositState::Confirming {
                    attempt,
                    amount,
                    path,
                    tx,
                });
            }
            DepositStep::ApprovalSubmitted(Err(error))
            | DepositStep::ApprovalSettled(Err(error))
            | DepositStep::DepositSubmitted(Err(error))
            | DepositStep::DepositSettled(Err(error)) => self.fail(attempt, amount, error),
        }
    }

    fn begin_deposit(&mut self, attempt: u64, amount: AmountRequest) {
        self.set_state(DepositState::Depositing {
            attempt,
            amount: amount.clone(),
            attested_balance: None,
            path: None,
            tx: None,
        });
        self.in_flight = Some(deposit_step(self.ctx.clone(), amount));
    }

    fn fail(&mut self, attempt: u64, amount: AmountRequest, error: FlowError) {
        warn!(
            "Deposit #{} failed [{}]: {}",
            attempt,
            error.kind.code(),
            error.message
        );

        let ids = MessageIds::new(Flow::Deposit, attempt);
        self.ctx.status.remove(&ids.pending);
        let mut message = StatusMessage::error(ids.error, error.message.clone());
        if let Some(hash) = error.tx_hash {
            message = message.with_tx(self.ctx.chain_id(), hash);
        }
        self.ctx.status.add(message);

        self.set_state(DepositState::Error {
            attempt,
            amount,
            error,
        });
    }

    fn set_state(&mut self, next: DepositState) {
        let from = self.state.phase();
        let to = next.phase();
        let attempt = next.attempt().max(self.state.attempt());
        self.state = next;
        self.state_tx.send_replace(self.state.clone());

        if from != to {
            info!("Deposit #{}: {:?} → {:?}", attempt, from, to);
            let _ = self.transitions.send(Transition {
                flow: Flow::Deposit,
                attempt,
                from,
                to,
                at: Utc::now(),
            });
        }
    }
}

// =============================================================================
// Steps
// =============================================================================

fn approve_step(ctx: FlowContext) -> Step<DepositStep> {
    async move {
        let spender = ctx.gateway.vault_address();
        let result = ctx
            .gateway
            .approve(spender, U256::MAX)
            .await
            .map_err(FlowError::from);
        if result.is_err() {
            refresh_allowance_quietly(&ctx.cache).await;
        }
        DepositStep::ApprovalSubmitted(result)
    }
    .boxed()
}

fn wait_approval_step(ctx: FlowContext, tx: TransactionHandle, pending_id: String) -> Step<DepositStep> {
    async move {
        let result = settled(await_settlement(&ctx, &tx, &pending_id, "Approval").await);
        refresh_allowance_quietly(&ctx.cache).await;
        DepositStep::ApprovalSettled(result)
    }
    .boxed()
}

fn deposit_step(ctx: FlowContext, amount: AmountRequest) -> Step<DepositStep> {
    async move {
        let result = attest_and_deposit(&ctx, &amount).await;
        if let Err(error) = &result {
            if error.kind.requires_refresh() {
                refresh_quietly(&ctx.cache).await;
            }
        }
        DepositStep::DepositSubmitted(result)
    }
    .boxed()
}

fn wait_deposit_step(
    ctx: FlowContext,
    tx: TransactionHandle,
    path: DepositPath,
    pending_id: String,
) -> Step<DepositStep> {
    async move {
        let label = match path {
            DepositPath::Plain => "Deposit",
            DepositPath::Attested => "Attested deposit",
        };
        let result = settled(await_settlement(&ctx, &tx, &pending_id, label).await);
        refresh_quietly(&ctx.cache).await;
        DepositStep::DepositSettled(result)
    }
    .boxed()
}

/// Request a snapshot, pick the vault call from its balance, submit.
async fn attest_and_deposit(
    ctx: &FlowContext,
    amount: &AmountRequest,
) -> Result<Submitted, FlowError> {
    let assets = amount.base_units();
    let receiver = ctx.account;

    let snapshot = ctx
        .attestation
        .request_snapshot(assets, receiver, ctx.chain_id())
        .await?;
    snapshot.verify_for(assets, receiver, Utc::now().timestamp().max(0) as u64)?;

    let (path, submitted) = if snapshot.has_zero_balance() {
        (
            DepositPath::Plain,
            ctx.gateway.deposit_plain(assets, receiver).await,
        )
    } else {
        (
            DepositPath::Attested,
            ctx.gateway
                .deposit_with_attestation(assets, receiver, &snapshot)
                .await,
        )
    };

    Ok(Submitted {
        tx: submitted?,
        path,
        attested_balance: snapshot.balance,
    })
}

fn settled(
    result: Result<TransactionHandle, crate::services::transaction_watcher::WatchError>,
) -> Result<TransactionHandle, FlowError> {
    match result {
        Ok(tx) if tx.state == TxLifecycle::Reverted => Err(FlowError::reverted(tx.hash)),
        Ok(tx) => Ok(tx),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::attestation::AttestationError;
    use crate::services::errors::FailureKind;
    use crate::services::status_bus::StatusCategory;
    use crate::services::transaction_watcher::TxKind;
    use crate::services::vault_gateway::GatewayError;
    use crate::testing::{
        account, snapshot, transitions_until, vault, GatedWatcher, GatewayCall, Harness,
    };
    use alloy_primitives::B256;

    fn spawn_with(harness: &Harness) -> (DepositHandle, broadcast::Receiver<Transition>) {
        let (transitions, rx) = broadcast::channel(64);
        (spawn(harness.ctx.clone(), transitions), rx)
    }

    fn units(whole: u64) -> U256 {
        U256::from(whole * 1_000_000)
    }

    #[tokio::test]
    async fn test_insufficient_allowance_approves_once_then_deposits() {
        let harness = Harness::new(GatedWatcher::instant());
        let (deposit, mut rx) = spawn_with(&harness);

        deposit.request_deposit("100").await.unwrap();
        let seen = transitions_until(&mut rx, Phase::Confirming).await;

        assert_eq!(
            seen,
            vec![
                (Phase::Input, Phase::Approving),
                (Phase::Approving, Phase::Depositing),
                (Phase::Depositing, Phase::Confirming),
            ]
        );

        let calls = harness.gateway.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(
            calls[0],
            GatewayCall::Approve {
                spender: vault(),
                amount: U256::MAX
            }
        );
        assert_eq!(
            calls[1],
            GatewayCall::DepositPlain {
                assets: units(100),
                receiver: account()
            }
        );
    }

    #[tokio::test]
    async fn test_sufficient_allowance_skips_approval() {
        let harness = Harness::new(GatedWatcher::instant());
        harness.reader.set_allowance(units(1000));
        let (deposit, mut rx) = spawn_with(&harness);

        deposit.request_deposit("50").await.unwrap();
        let seen = transitions_until(&mut rx, Phase::Confirming).await;

        assert_eq!(
            seen,
            vec![
                (Phase::Input, Phase::Depositing),
                (Phase::Depositing, Phase::Confirming),
            ]
        );
        assert_eq!(harness.gateway.count(TxKind::Approval), 0);
        assert_eq!(harness.gateway.count(TxKind::Deposit), 1);
    }

    #[tokio::test]
    async fn test_zero_attested_balance_uses_plain_deposit() {
        let harness = Harness::new(GatedWatcher::instant());
        harness.reader.set_allowance(U256::MAX);
        harness.attestation.push(Ok(snapshot(units(100), U256::ZERO)));
        let (deposit, mut rx) = spawn_with(&harness);

        deposit.request_deposit("100").await.unwrap();
        transitions_until(&mut rx, Phase::Confirming).await;

        assert_eq!(
            harness.gateway.calls(),
            vec![GatewayCall::DepositPlain {
                assets: units(100),
                receiver: account()
            }]
        );
        assert_eq!(
            harness.attestation.requests(),
            vec![(units(100), account(), crate::testing::CHAIN_ID)]
        );

        match deposit.state() {
            DepositState::Confirming { path, .. } => assert_eq!(path, DepositPath::Plain),
            other => panic!("unexpected state {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_nonzero_attested_balance_forwards_snapshot_unchanged() {
        let harness = Harness::new(GatedWatcher::instant());
        harness.reader.set_allowance(U256::MAX);
        let issued = snapshot(units(100), U256::from(500u64));
        harness.attestation.push(Ok(issued.clone()));
        let (deposit, mut rx) = spawn_with(&harness);

        deposit.request_deposit("100").await.unwrap();
        transitions_until(&mut rx, Phase::Confirming).await;

        assert_eq!(
            harness.gateway.calls(),
            vec![GatewayCall::DepositWithAttestation {
                assets: units(100),
                receiver: account(),
                snapshot: issued,
            }]
        );
        assert_eq!(harness.gateway.count(TxKind::Deposit), 0);
    }

    #[tokio::test]
    async fn test_wallet_rejects_approval() {
        let harness = Harness::new(GatedWatcher::instant());
        harness
            .gateway
            .fail_next(TxKind::Approval, GatewayError::UserRejected("User rejected the request.".into()));
        let (deposit, mut rx) = spawn_with(&harness);

        deposit.request_deposit("100").await.unwrap();
        transitions_until(&mut rx, Phase::Error).await;

        match deposit.state() {
            DepositState::Error { error, .. } => {
                assert_eq!(error.kind, FailureKind::UserRejected);
                assert!(error.tx_hash.is_none());
            }
            other => panic!("unexpected state {:?}", other),
        }
        assert_eq!(harness.gateway.count(TxKind::Deposit), 0);
        assert_eq!(harness.gateway.count(TxKind::AttestedDeposit), 0);
        // One read to start, one refresh after the rejection
        assert_eq!(harness.reader.reads(), 2);
        assert!(!harness.cache.allowance().unwrap().stale);

        let feed = harness.status.messages();
        assert_eq!(feed.len(), 1);
        assert_eq!(feed[0].category, StatusCategory::Error);
        assert_eq!(feed[0].id, "deposit-1-error");

        assert_eq!(deposit.retry().await.unwrap(), DepositState::Input);
    }

    #[tokio::test]
    async fn test_attestation_failure_never_reaches_chain() {
        let harness = Harness::new(GatedWatcher::instant());
        harness.reader.set_allowance(U256::MAX);
        harness.attestation.push(Err(AttestationError::Service {
            status: 422,
            message: "no bridged balance record".into(),
        }));
        let (deposit, mut rx) = spawn_with(&harness);

        deposit.request_deposit("10").await.unwrap();
        transitions_until(&mut rx, Phase::Error).await;

        assert!(harness.gateway.calls().is_empty());
        match deposit.state() {
            DepositState::Error { error, .. } => {
                assert_eq!(error.kind, FailureKind::AttestationFailure);
                assert_eq!(error.message, "no bridged balance record");
            }
            other => panic!("unexpected state {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_expired_snapshot_is_not_used() {
        let harness = Harness::new(GatedWatcher::instant());
        harness.reader.set_allowance(U256::MAX);
        let mut stale = snapshot(units(10), U256::from(1u64));
        stale.deadline = U256::from(1u64);
        harness.attestation.push(Ok(stale));
        let (deposit, mut rx) = spawn_with(&harness);

        deposit.request_deposit("10").await.unwrap();
        transitions_until(&mut rx, Phase::Error).await;

        assert!(harness.gateway.calls().is_empty());
    }

    #[tokio::test]
    async fn test_reverted_deposit_reports_hash() {
        let harness = Harness::new(GatedWatcher::instant());
        harness.reader.set_allowance(U256::MAX);
        // First submission from the recording gateway gets hash ...01
        harness.watcher.revert(B256::with_last_byte(1));
        let (deposit, mut rx) = spawn_with(&harness);

        deposit.request_deposit("10").await.unwrap();
        transitions_until(&mut rx, Phase::Error).await;

        match deposit.state() {
            DepositState::Error { error, .. } => {
                assert_eq!(error.kind, FailureKind::ChainRejected);
                assert_eq!(error.tx_hash, Some(B256::with_last_byte(1)));
            }
            other => panic!("unexpected state {:?}", other),
        }
        let feed = harness.status.messages();
        assert_eq!(feed.len(), 1);
        assert_eq!(feed[0].tx_hash, Some(B256::with_last_byte(1)));
    }

    #[tokio::test]
    async fn test_second_deposit_rejected_while_in_flight() {
        let harness = Harness::new(GatedWatcher::held());
        let (deposit, mut rx) = spawn_with(&harness);

        deposit.request_deposit("100").await.unwrap();
        transitions_until(&mut rx, Phase::Approving).await;
        while harness.watcher.waits() == 0 {
            tokio::task::yield_now().await;
        }
        let calls_before = harness.gateway.calls();
        let feed_before = harness.status.messages();

        let err = deposit.request_deposit("5").await.unwrap_err();
        assert_eq!(err, CommandError::Busy(Flow::Deposit, Phase::Approving));
        assert_eq!(harness.gateway.calls(), calls_before);
        assert_eq!(harness.status.messages(), feed_before);
        assert_eq!(deposit.state().phase(), Phase::Approving);
    }

    #[tokio::test]
    async fn test_validation_errors_stay_in_input() {
        let harness = Harness::new(GatedWatcher::instant());
        let (deposit, _rx) = spawn_with(&harness);

        for raw in ["", "abc", "-1", "0", "1.0000001"] {
            match deposit.request_deposit(raw).await {
                Err(CommandError::Validation(error)) => {
                    assert_eq!(error.kind, FailureKind::ValidationError)
                }
                other => panic!("{:?} gave {:?}", raw, other),
            }
        }
        assert_eq!(deposit.state(), DepositState::Input);
        assert_eq!(harness.reader.reads(), 0);
        assert!(harness.status.messages().is_empty());
    }

    #[tokio::test]
    async fn test_unreadable_allowance_rejects_start() {
        let harness = Harness::new(GatedWatcher::instant());
        harness.reader.fail_reads(true);
        let (deposit, _rx) = spawn_with(&harness);

        let err = deposit.request_deposit("10").await.unwrap_err();
        assert!(matches!(err, CommandError::Unavailable(_)));
        assert_eq!(deposit.state(), DepositState::Input);
        assert!(harness.gateway.calls().is_empty());

        let feed = harness.status.messages();
        assert_eq!(feed.len(), 1);
        assert_eq!(feed[0].category, StatusCategory::Error);

        // A second refusal replaces the message instead of stacking
        deposit.request_deposit("10").await.unwrap_err();
        assert_eq!(harness.status.messages().len(), 1);
    }

    #[tokio::test]
    async fn test_reverted_approval_refreshes_allowance() {
        let harness = Harness::new(GatedWatcher::instant());
        // The approval is the first submission and gets hash ...01
        harness.watcher.revert(B256::with_last_byte(1));
        let (deposit, mut rx) = spawn_with(&harness);

        deposit.request_deposit("100").await.unwrap();
        transitions_until(&mut rx, Phase::Error).await;

        match deposit.state() {
            DepositState::Error { error, .. } => {
                assert_eq!(error.kind, FailureKind::ChainRejected);
                assert_eq!(error.tx_hash, Some(B256::with_last_byte(1)));
            }
            other => panic!("unexpected state {:?}", other),
        }
        assert_eq!(harness.gateway.count(TxKind::Deposit), 0);

        // One read to start, one refresh after the revert
        assert_eq!(harness.reader.reads(), 2);
        assert!(!harness.cache.allowance().unwrap().stale);
    }

    #[tokio::test]
    async fn test_cancel_from_error_refreshes_every_cache() {
        let harness = Harness::new(GatedWatcher::instant());
        harness.reader.set_allowance(U256::MAX);
        harness
            .gateway
            .fail_next(TxKind::Deposit, GatewayError::UserRejected("denied".into()));
        let (deposit, mut rx) = spawn_with(&harness);

        deposit.request_deposit("10").await.unwrap();
        transitions_until(&mut rx, Phase::Error).await;
        let reads_before = harness.reader.reads();

        assert_eq!(deposit.cancel().await.unwrap(), DepositState::Input);

        // Allowance plus the four position reads
        tokio::time::timeout(std::time::Duration::from_secs(5), async {
            while harness.reader.reads() < reads_before + 5 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("cancel did not refresh the caches");
    }

    #[tokio::test]
    async fn test_cancel_and_retry_from_error_return_to_input() {
        let harness = Harness::new(GatedWatcher::instant());
        harness.reader.set_allowance(U256::MAX);
        harness
            .gateway
            .fail_next(TxKind::Deposit, GatewayError::Reverted("execution reverted".into()));
        harness
            .gateway
            .fail_next(TxKind::Deposit, GatewayError::Reverted("execution reverted".into()));
        let (deposit, mut rx) = spawn_with(&harness);

        deposit.request_deposit("10").await.unwrap();
        transitions_until(&mut rx, Phase::Error).await;
        assert_eq!(deposit.cancel().await.unwrap(), DepositState::Input);
        assert_eq!(deposit.cancel().await.unwrap(), DepositState::Input);

        deposit.request_deposit("10").await.unwrap();
        transitions_until(&mut rx, Phase::Error).await;
        assert_eq!(deposit.retry().await.unwrap(), DepositState::Input);
        assert!(matches!(
            deposit.retry().await,
            Err(CommandError::InvalidState { command: "retry", .. })
        ));
    }

    #[tokio::test]
    async fn test_cancel_while_depositing_watches_passively() {
        let harness = Harness::new(GatedWatcher::held());
        harness.reader.set_allowance(U256::MAX);
        let (deposit, mut rx) = spawn_with(&harness);

        deposit.request_deposit("10").await.unwrap();
        transitions_until(&mut rx, Phase::Depositing).await;
        while harness.watcher.waits() == 0 {
            tokio::task::yield_now().await;
        }

        let state = deposit.cancel().await.unwrap();
        assert_eq!(state, DepositState::Input);
        // The orchestrator's own wait plus the passive watcher
        while harness.watcher.waits() < 2 {
            tokio::task::yield_now().await;
        }

        let feed = harness.status.messages();
        assert_eq!(feed.len(), 1);
        assert_eq!(feed[0].category, StatusCategory::Info);

        let reads_before = harness.reader.reads();
        harness.watcher.release();
        harness.watcher.release();
        tokio::time::timeout(std::time::Duration::from_secs(5), async {
            while harness.reader.reads() < reads_before + 5 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("passive watcher never refreshed balances");
    }

    #[tokio::test]
    async fn test_acknowledge_moves_to_done_and_allows_new_attempt() {
        let harness = Harness::new(GatedWatcher::instant());
        harness.reader.set_allowance(U256::MAX);
        let (deposit, mut rx) = spawn_with(&harness);

        assert!(matches!(
            deposit.acknowledge().await,
            Err(CommandError::InvalidState { .. })
        ));

        deposit.request_deposit("1").await.unwrap();
        transitions_until(&mut rx, Phase::Confirming).await;
        assert_eq!(deposit.acknowledge().await.unwrap().phase(), Phase::Done);

        deposit.request_deposit("2").await.unwrap();
        let seen = transitions_until(&mut rx, Phase::Confirming).await;
        assert_eq!(seen[0], (Phase::Confirming, Phase::Done));
        assert_eq!(seen[1], (Phase::Done, Phase::Input));
        assert_eq!(deposit.state().attempt(), 2);
    }
}
