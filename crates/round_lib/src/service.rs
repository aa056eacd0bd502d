//! One process-wide entry point for every round operation.
//!
//! Each state-changing call follows the same path: guard against a fresh
//! ledger read, submit, wait a bounded time for confirmation, then update the
//! mirror. A mirror write that fails after the ledger confirmed is logged and
//! the round is flagged for the next sweep; the caller still gets the
//! confirmed result.

use std::thread::sleep;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::Serialize;

use crate::bet_ledger::{BetLedger, RecordOutcome};
use crate::client::{Confirmation, LedgerGateway};
use crate::error::{Result, RoundError};
use crate::mirror::RoundMirror;
use crate::payout::PayoutCalculator;
use crate::reconciler::{ConsistencyReconciler, SweepReport};
use crate::state_machine::{Applied, RoundStateMachine, Transition};
use crate::storage::MirrorStore;
use crate::types::{
    Bet, Outcome, PayoutRecord, PendingKind, PendingSubmission, ProofRef, RoundPhase,
    RoundProjection, RoundSnapshot, TreasuryEntry,
};

#[derive(Clone, Copy, Debug)]
pub struct ConfirmPolicy {
    pub poll_interval: Duration,
    pub timeout: Duration,
}

impl Default for ConfirmPolicy {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
            timeout: Duration::from_secs(30),
        }
    }
}

/// Result of a submission: confirmed within the window, or still in flight
/// (persisted, completed by a later sweep).
#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(tag = "status", content = "result", rename_all = "snake_case")]
pub enum Submission<T> {
    Confirmed(T),
    Pending(ProofRef),
}

impl<T> Submission<T> {
    pub fn confirmed(self) -> Option<T> {
        match self {
            Submission::Confirmed(value) => Some(value),
            Submission::Pending(_) => None,
        }
    }
}

#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
pub struct BetReceipt {
    pub proof_ref: ProofRef,
    pub round_id: u64,
    pub outcome: Outcome,
    pub amount: u64,
}

#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
pub struct TransitionReceipt {
    pub proof_ref: ProofRef,
    pub round_id: u64,
    pub phase: RoundPhase,
}

#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
pub struct WithdrawalReceipt {
    pub proof_ref: ProofRef,
    pub round_id: u64,
    pub amount: u64,
}

pub struct RoundService<G: LedgerGateway> {
    gateway: G,
    store: MirrorStore,
    confirm: ConfirmPolicy,
    admin: Option<String>,
}

impl<G: LedgerGateway> RoundService<G> {
    pub fn new(gateway: G, store: MirrorStore, confirm: ConfirmPolicy, admin: Option<String>) -> Self {
        Self {
            gateway,
            store,
            confirm,
            admin,
        }
    }

    pub fn gateway(&self) -> &G {
        &self.gateway
    }

    pub fn store(&self) -> &MirrorStore {
        &self.store
    }

    fn reconciler(&self) -> ConsistencyReconciler<'_, G> {
        ConsistencyReconciler::new(&self.gateway, &self.store)
    }

    /// Current round as the ledger sees it right now.
    fn ledger_state(&self) -> Result<RoundStateMachine> {
        let current = self.gateway.read_current_round_id()?;
        let snapshot = self.gateway.read_round(current)?;
        Ok(RoundStateMachine::from_current(&snapshot))
    }

    // ---- bettor operations ----

    pub fn place_bet(&self, outcome: Outcome, amount: u64) -> Result<Submission<BetReceipt>> {
        if amount == 0 {
            return Err(RoundError::validation("bet amount must be positive"));
        }
        let machine = self.ledger_state()?;
        let round_id = machine.current_id();
        if !machine.can_accept_bet(round_id) {
            return Err(RoundError::state(format!(
                "round {} is {}, not accepting bets",
                round_id,
                machine.status().phase()
            )));
        }

        let bettor = self.gateway.identity();
        let proof_ref = self.gateway.submit_bet(round_id, outcome, amount)?;
        tracing::info!(round_id, %outcome, amount, %proof_ref, "bet submitted");

        let kind = PendingKind::Bet {
            bettor: bettor.clone(),
            outcome,
            amount,
        };
        self.track(&proof_ref, round_id, kind);
        if !self.await_confirmation(&proof_ref, round_id)? {
            return Ok(Submission::Pending(proof_ref));
        }

        let bet = Bet {
            round_id,
            bettor,
            outcome,
            amount,
            proof_ref: proof_ref.clone(),
            recorded_at: Utc::now(),
        };
        let recorded = BetLedger::new(&self.gateway, &self.store).record(&bet);
        if self.after_confirmed(round_id, "record bet", recorded).is_some() {
            self.untrack(round_id, &proof_ref);
        }
        self.reconcile_after(round_id);

        Ok(Submission::Confirmed(BetReceipt {
            proof_ref,
            round_id,
            outcome,
            amount,
        }))
    }

    pub fn withdraw(&self, round_id: u64) -> Result<Submission<WithdrawalReceipt>> {
        let bettor = self.gateway.identity();
        let snapshot = self.gateway.read_round(round_id)?;
        if snapshot.phase() != RoundPhase::Finalized {
            return Err(RoundError::state(format!(
                "round {} is {}, withdrawals need a finalized round",
                round_id,
                snapshot.phase()
            )));
        }
        RoundMirror::new(&self.store).project(&snapshot)?;

        let calc = PayoutCalculator::new(&self.store);
        calc.settle(&snapshot)?;
        let record = calc.claimable(round_id, &bettor)?;
        if self.store.has_pending_withdrawal(round_id, &bettor)? {
            return Err(RoundError::state(format!(
                "a withdrawal for {} in round {} is already in flight",
                bettor, round_id
            )));
        }

        let proof_ref = self.gateway.submit_withdraw(round_id)?;
        tracing::info!(round_id, %bettor, %proof_ref, "withdrawal submitted");

        let kind = PendingKind::Withdraw {
            bettor: bettor.clone(),
        };
        self.track(&proof_ref, round_id, kind);
        if !self.await_confirmation(&proof_ref, round_id)? {
            return Ok(Submission::Pending(proof_ref));
        }

        let claimed = match calc.claim(round_id, &bettor, &proof_ref) {
            // a concurrent sweep finished this withdrawal first
            Err(RoundError::AlreadyClaimed { .. }) => Ok(record.amount),
            other => other,
        };
        let amount = match self.after_confirmed(round_id, "mark payout claimed", claimed) {
            Some(amount) => {
                self.untrack(round_id, &proof_ref);
                amount
            }
            None => record.amount,
        };

        Ok(Submission::Confirmed(WithdrawalReceipt {
            proof_ref,
            round_id,
            amount,
        }))
    }

    // ---- admin operations ----

    pub fn close_round(&self, round_id: u64) -> Result<Submission<TransitionReceipt>> {
        let transition = self.ledger_state()?.request_close(round_id)?;
        self.drive(transition)
    }

    pub fn finalize_round(&self, round_id: u64, outcome: Outcome) -> Result<Submission<TransitionReceipt>> {
        let transition = self.ledger_state()?.request_finalize(round_id, outcome)?;
        self.drive(transition)
    }

    pub fn start_next_round(&self) -> Result<Submission<TransitionReceipt>> {
        let transition = self.ledger_state()?.request_start_next()?;
        self.drive(transition)
    }

    fn drive(&self, transition: Transition) -> Result<Submission<TransitionReceipt>> {
        let (proof_ref, kind, phase) = match transition {
            Transition::Close { round_id } => (
                self.gateway.submit_close(round_id)?,
                PendingKind::Close,
                RoundPhase::Closed,
            ),
            Transition::Finalize { round_id, outcome } => (
                self.gateway.submit_finalize(round_id, outcome)?,
                PendingKind::Finalize { outcome },
                RoundPhase::Finalized,
            ),
            Transition::StartNext { next_id } => (
                self.gateway.submit_start_next(next_id)?,
                PendingKind::StartNext,
                RoundPhase::Open,
            ),
        };
        let round_id = transition.round_id();
        tracing::info!(round_id, op = kind.label(), %proof_ref, "transition submitted");

        self.track(&proof_ref, round_id, kind);
        if !self.await_confirmation(&proof_ref, round_id)? {
            return Ok(Submission::Pending(proof_ref));
        }
        if self.reconcile_after(round_id) {
            self.untrack(round_id, &proof_ref);
        }

        Ok(Submission::Confirmed(TransitionReceipt {
            proof_ref,
            round_id,
            phase,
        }))
    }

    /// Admin write to the mirror's phase, without touching the ledger.
    pub fn admin_apply_transition(&self, caller: &str, transition: Transition) -> Result<Applied> {
        match &self.admin {
            Some(admin) if admin == caller => {}
            _ => return Err(RoundError::Unauthorized(caller.to_string())),
        }
        RoundMirror::new(&self.store).apply_transition(transition)
    }

    /// Confirmed bet written by an outside consumer.
    pub fn record_external_bet(&self, bet: &Bet) -> Result<RecordOutcome> {
        BetLedger::new(&self.gateway, &self.store).record_external(bet)
    }

    pub fn sweep(&self) -> Result<SweepReport> {
        self.reconciler().sweep()
    }

    // ---- reads (mirror only) ----

    pub fn round(&self, round_id: u64) -> Result<Option<RoundProjection>> {
        RoundMirror::new(&self.store).get(round_id)
    }

    pub fn current_round(&self) -> Result<Option<RoundProjection>> {
        RoundMirror::new(&self.store).current()
    }

    pub fn bets(&self, round_id: u64) -> Result<Vec<Bet>> {
        BetLedger::new(&self.gateway, &self.store).query(round_id)
    }

    /// Payout records of a finalized round, computed on first read. The
    /// round's outcome and pools come from a fresh ledger read, never from
    /// the mirror.
    pub fn payouts(&self, round_id: u64) -> Result<Vec<PayoutRecord>> {
        let snapshot = self.gateway.read_round(round_id)?;
        PayoutCalculator::new(&self.store).settle(&snapshot)
    }

    pub fn treasury(&self) -> Result<Vec<TreasuryEntry>> {
        self.store.treasury_entries()
    }

    pub fn treasury_balance(&self) -> Result<u64> {
        self.store.treasury_balance()
    }

    pub fn pending(&self) -> Result<Vec<PendingSubmission>> {
        self.store.pending_submissions()
    }

    /// The ledger's own view of a round, bypassing the mirror.
    pub fn ledger_round(&self, round_id: u64) -> Result<RoundSnapshot> {
        self.gateway.read_round(round_id)
    }

    // ---- internals ----

    /// Persists the submission before waiting on it. It stays until the
    /// mirror has absorbed the confirmed result, so a crash or a failed
    /// mirror write from here on is finished by the sweep.
    fn track(&self, proof_ref: &ProofRef, round_id: u64, kind: PendingKind) {
        let pending = PendingSubmission {
            proof_ref: proof_ref.clone(),
            round_id,
            kind,
            submitted_at: Utc::now(),
        };
        if let Err(err) = self.store.insert_pending(&pending) {
            tracing::error!(round_id, %proof_ref, error = %err, "failed to persist pending submission");
            self.flag(round_id, "pending submission not persisted");
        }
    }

    fn untrack(&self, round_id: u64, proof_ref: &ProofRef) {
        if let Err(err) = self.store.remove_pending(proof_ref) {
            tracing::warn!(round_id, %proof_ref, error = %err, "failed to drop settled submission, sweep will retry");
        }
    }

    /// Polls until the ledger confirms or rejects, or the window runs out.
    /// Returns false when still pending; the tracked submission is left for
    /// the sweep.
    fn await_confirmation(&self, proof_ref: &ProofRef, round_id: u64) -> Result<bool> {
        let started = Instant::now();
        loop {
            match self.gateway.confirmation(proof_ref) {
                Ok(Confirmation::Confirmed) => return Ok(true),
                Ok(Confirmation::Rejected(reason)) => {
                    tracing::warn!(round_id, %proof_ref, %reason, "submission rejected by the ledger");
                    self.untrack(round_id, proof_ref);
                    return Err(RoundError::Authoritative(reason));
                }
                Ok(Confirmation::Pending) => {}
                Err(err) if err.is_transient() => {
                    tracing::warn!(round_id, %proof_ref, error = %err, "confirmation poll failed");
                }
                Err(err) => return Err(err),
            }
            if started.elapsed() >= self.confirm.timeout {
                break;
            }
            sleep(self.confirm.poll_interval);
        }

        tracing::warn!(
            round_id,
            %proof_ref,
            waited_ms = started.elapsed().as_millis() as u64,
            "confirmation still pending, handing over to the sweep"
        );
        Ok(false)
    }

    /// Swallows a mirror failure that follows a confirmed ledger operation.
    fn after_confirmed<T>(&self, round_id: u64, what: &str, result: Result<T>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(err) => {
                let err = RoundError::MirrorWrite {
                    round_id,
                    reason: format!("{}: {}", what, err),
                };
                tracing::error!(round_id, error = %err, "mirror behind the ledger, flagged for sweep");
                self.flag(round_id, &err.to_string());
                None
            }
        }
    }

    fn reconcile_after(&self, round_id: u64) -> bool {
        let result = self.reconciler().reconcile_round(round_id);
        self.after_confirmed(round_id, "reconcile", result).is_some()
    }

    fn flag(&self, round_id: u64, reason: &str) {
        if let Err(err) = self.store.flag_round(round_id, reason) {
            tracing::error!(round_id, error = %err, "failed to flag round");
        }
    }
}
