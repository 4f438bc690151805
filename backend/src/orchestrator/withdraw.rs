//! # Withdraw Orchestrator
//!
//! `Input → Withdrawing → Confirming → Done`, with `Error` reachable
//! from `Withdrawing`.
//!
//! No approval and no attestation: the vault burns the account's own
//! shares. The redeemable-balance check at `Input` uses whatever position
//! is cached and makes no network call. It only catches obvious
//! mistakes; the contract has the final word, and a revert is reported
//! as such even when the local check passed.

use alloy_primitives::U256;
use chrono::Utc;
use futures::FutureExt;
use serde::Serialize;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tracing::{info, warn};

use super::{
    await_settlement, refresh_quietly, reset_caches, spawn_passive_watch, CommandError, Flow,
    FlowContext, MessageIds, Phase, Reply, Step, Transition,
};
use crate::services::amount::AmountRequest;
use crate::services::errors::{FailureKind, FlowError};
use crate::services::status_bus::StatusMessage;
use crate::services::transaction_watcher::{TransactionHandle, TxLifecycle};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "phase", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum WithdrawState {
    Input,
    Withdrawing {
        attempt: u64,
        amount: AmountRequest,
        tx: Option<TransactionHandle>,
    },
    Confirming {
        attempt: u64,
        amount: AmountRequest,
        tx: TransactionHandle,
    },
    Done {
        attempt: u64,
        amount: AmountRequest,
        tx: TransactionHandle,
    },
    Error {
        attempt: u64,
        amount: AmountRequest,
        error: FlowError,
    },
}

impl WithdrawState {
    pub fn phase(&self) -> Phase {
        match self {
            WithdrawState::Input => Phase::Input,
            WithdrawState::Withdrawing { .. } => Phase::Withdrawing,
            WithdrawState::Confirming { .. } => Phase::Confirming,
            WithdrawState::Done { .. } => Phase::Done,
            WithdrawState::Error { .. } => Phase::Error,
        }
    }

    pub fn attempt(&self) -> u64 {
        match self {
            WithdrawState::Input => 0,
            WithdrawState::Withdrawing { attempt, .. }
            | WithdrawState::Confirming { attempt, .. }
            | WithdrawState::Done { attempt, .. }
            | WithdrawState::Error { attempt, .. } => *attempt,
        }
    }
}

pub(crate) enum WithdrawCommand {
    Start {
        amount: String,
        reply: Reply<WithdrawState>,
    },
    Acknowledge {
        reply: Reply<WithdrawState>,
    },
    Retry {
        reply: Reply<WithdrawState>,
    },
    Cancel {
        reply: Reply<WithdrawState>,
    },
}

enum WithdrawStep {
    Submitted(Result<TransactionHandle, FlowError>),
    Settled(Result<TransactionHandle, FlowError>),
}

enum Event {
    Step(WithdrawStep),
    Command(Option<WithdrawCommand>),
}

/// Caller side of a running withdraw orchestrator.
#[derive(Clone)]
pub struct WithdrawHandle {
    commands: mpsc::Sender<WithdrawCommand>,
    state: watch::Receiver<WithdrawState>,
}

impl WithdrawHandle {
    pub async fn request_withdraw(
        &self,
        amount: impl Into<String>,
    ) -> Result<WithdrawState, CommandError> {
        let amount = amount.into();
        self.send(|reply| WithdrawCommand::Start { amount, reply }).await
    }

    pub async fn acknowledge(&self) -> Result<WithdrawState, CommandError> {
        self.send(|reply| WithdrawCommand::Acknowledge { reply }).await
    }

    pub async fn retry(&self) -> Result<WithdrawState, CommandError> {
        self.send(|reply| WithdrawCommand::Retry { reply }).await
    }

    pub async fn cancel(&self) -> Result<WithdrawState, CommandError> {
        self.send(|reply| WithdrawCommand::Cancel { reply }).await
    }

    pub fn state(&self) -> WithdrawState {
        self.state.borrow().clone()
    }

    async fn send(
        &self,
        command: impl FnOnce(Reply<WithdrawState>) -> WithdrawCommand,
    ) -> Result<WithdrawState, CommandError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(command(reply))
            .await
            .map_err(|_| CommandError::Closed)?;
        response.await.map_err(|_| CommandError::Closed)?
    }
}

pub fn spawn(ctx: FlowContext, transitions: broadcast::Sender<Transition>) -> WithdrawHandle {
    let (commands, receiver) = mpsc::channel(16);
    let (state_tx, state) = watch::channel(WithdrawState::Input);

    let orchestrator = WithdrawOrchestrator {
        ctx,
        state: WithdrawState::Input,
        attempts: 0,
        in_flight: None,
        state_tx,
        transitions,
    };
    tokio::spawn(orchestrator.run(receiver));

    WithdrawHandle { commands, state }
}

struct WithdrawOrchestrator {
    ctx: FlowContext,
    state: WithdrawState,
    attempts: u64,
    in_flight: Option<Step<WithdrawStep>>,
    state_tx: watch::Sender<WithdrawState>,
    transitions: broadcast::Sender<Transition>,
}

impl WithdrawOrchestrator {
    async fn run(mut self, mut commands: mpsc::Receiver<WithdrawCommand>) {
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
                Event::Command(Some(command)) => self.on_command(command),
                Event::Command(None) => break,
            }
        }
        info!("Withdraw orchestrator stopped");
    }

    fn on_command(&mut self, command: WithdrawCommand) {
        let (result, reply) = match command {
            WithdrawCommand::Start { amount, reply } => (self.start(&amount), reply),
            WithdrawCommand::Acknowledge { reply } => (self.acknowledge(), reply),
            WithdrawCommand::Retry { reply } => (self.retry(), reply),
            WithdrawCommand::Cancel { reply } => (Ok(self.cancel()), reply),
        };
        let _ = reply.send(result);
    }

    fn start(&mut self, raw: &str) -> Result<WithdrawState, CommandError> {
        let phase = self.state.phase();
        if !phase.accepts_new_attempt() {
            return Err(CommandError::Busy(Flow::Withdraw, phase));
        }

        let amount = AmountRequest::parse_positive(raw, self.ctx.decimals)
            .map_err(|e| CommandError::Validation(e.into()))?;

        // Unknown balance skips the check; the contract still enforces it
        if let Some(redeemable) = self.ctx.cache.redeemable() {
            if amount.base_units() > redeemable {
                return Err(CommandError::Validation(FlowError::new(
                    FailureKind::ValidationError,
                    format!(
                        "Amount exceeds redeemable balance of {}",
                        self.ctx.format(redeemable)
                    ),
                )));
            }
        }

        if phase != Phase::Input {
            self.set_state(WithdrawState::Input);
        }

        self.attempts += 1;
        let attempt = self.attempts;
        let ids = MessageIds::new(Flow::Withdraw, attempt);
        let formatted = self.ctx.format(amount.base_units());

        info!("💸 Withdraw #{} requested: {}", attempt, formatted);

        self.ctx.status.add(StatusMessage::pending(
            ids.pending,
            format!("Confirm the withdrawal of {} in your wallet", formatted),
        ));
        self.set_state(WithdrawState::Withdrawing {
            attempt,
            amount: amount.clone(),
            tx: None,
        });
        self.in_flight = Some(submit_step(self.ctx.clone(), amount.base_units()));

        Ok(self.state.clone())
    }

    fn acknowledge(&mut self) -> Result<WithdrawState, CommandError> {
        match &self.state {
            WithdrawState::Confirming {
                attempt,
                amount,
                tx,
            } => {
                let done = WithdrawState::Done {
                    attempt: *attempt,
                    amount: amount.clone(),
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

    fn retry(&mut self) -> Result<WithdrawState, CommandError> {
        match &self.state {
            WithdrawState::Error { error, .. } => {
                if error.kind.requires_refresh() {
                    self.ctx.cache.invalidate();
                }
                self.set_state(WithdrawState::Input);
                Ok(self.state.clone())
            }
            other => Err(CommandError::InvalidState {
                command: "retry",
                phase: other.phase(),
            }),
        }
    }

    fn cancel(&mut self) -> WithdrawState {
        if self.state.phase() == Phase::Input {
            return self.state.clone();
        }

        self.in_flight = None;
        if let WithdrawState::Withdrawing { tx: Some(tx), .. } = &self.state {
            info!("Withdraw cancelled with {} unconfirmed; tracking it passively", tx.hash);
            spawn_passive_watch(&self.ctx, tx.clone());
        }

        let ids = MessageIds::new(Flow::Withdraw, self.state.attempt());
        if self.ctx.status.remove(&ids.pending) {
            self.ctx
                .status
                .add(StatusMessage::info(ids.info, "Withdrawal cancelled"));
        }

        reset_caches(&self.ctx);
        self.set_state(WithdrawState::Input);
        self.state.clone()
    }

    fn on_step(&mut self, outcome: WithdrawStep) {
        let (attempt, amount) = match &self.state {
            WithdrawState::Withdrawing { attempt, amount, .. } => (*attempt, amount.clone()),
            _ => return,
        };
        let ids = MessageIds::new(Flow::Withdraw, attempt);
        let formatted = self.ctx.format(amount.base_units());

        match outcome {
            WithdrawStep::Submitted(Ok(tx)) => {
                self.ctx.status.upsert(
                    StatusMessage::pending(&ids.pending, format!("Withdrawing {}", formatted))
                        .with_tx(tx.chain_id, tx.hash),
                );
                self.set_state(WithdrawState::Withdrawing {
                    attempt,
                    amount,
                    tx: Some(tx.clone()),
                });
                self.in_flight = Some(wait_step(self.ctx.clone(), tx, ids.pending));
            }
            WithdrawStep::Settled(Ok(tx)) => {
                info!("✅ Withdraw #{} confirmed: {}", attempt, tx.hash);
                self.ctx.status.remove(&ids.pending);
                self.ctx.status.add(
                    StatusMessage::success(ids.success, format!("Withdrew {}", formatted))
                        .with_tx(tx.chain_id, tx.hash),
                );
                self.set_state(WithdrawState::Confirming { attempt, amount, tx });
            }
            WithdrawStep::Submitted(Err(error)) | WithdrawStep::Settled(Err(error)) => {
                warn!(
                    "Withdraw #{} failed [{}]: {}",
                    attempt,
                    error.kind.code(),
                    error.message
                );
                self.ctx.status.remove(&ids.pending);
                let mut message = StatusMessage::error(ids.error, error.message.clone());
                if let Some(hash) = error.tx_hash {
                    message = message.with_tx(self.ctx.chain_id(), hash);
                }
                self.ctx.status.add(message);
                self.set_state(WithdrawState::Error {
                    attempt,
                    amount,
                    error,
                });
            }
        }
    }

    fn set_state(&mut self, next: WithdrawState) {
        let from = self.state.phase();
        let to = next.phase();
        let attempt = next.attempt().max(self.state.attempt());
        self.state = next;
        self.state_tx.send_replace(self.state.clone());

        if from != to {
            info!("Withdraw #{}: {:?} → {:?}", attempt, from, to);
            let _ = self.transitions.send(Transition {
                flow: Flow::Withdraw,
                attempt,
                from,
                to,
                at: Utc::now(),
            });
        }
    }
}

fn submit_step(ctx: FlowContext, assets: U256) -> Step<WithdrawStep> {
    async move {
        let owner = ctx.account;
        let result = ctx
            .gateway
            .withdraw(assets, owner, owner)
            .await
            .map_err(FlowError::from);
        if matches!(&result, Err(e) if e.kind.requires_refresh()) {
            refresh_quietly(&ctx.cache).await;
        }
        WithdrawStep::Submitted(result)
    }
    .boxed()
}

fn wait_step(ctx: FlowContext, tx: TransactionHandle, pending_id: String) -> Step<WithdrawStep> {
    async move {
        let result = match await_settlement(&ctx, &tx, &pending_id, "Withdrawal").await {
            Ok(settled) if settled.state == TxLifecycle::Reverted => {
                Err(FlowError::reverted(settled.hash))
            }
            Ok(settled) => Ok(settled),
            Err(e) => Err(e.into()),
        };
        refresh_quietly(&ctx.cache).await;
        WithdrawStep::Settled(result)
    }
    .boxed()
}
