use std::collections::BTreeSet;

use chrono::Utc;
use serde::Serialize;

use crate::bet_ledger::BetLedger;
use crate::client::{Confirmation, LedgerGateway};
use crate::error::{Result, RoundError};
use crate::mirror::{ProjectionWrite, RoundMirror};
use crate::payout::PayoutCalculator;
use crate::storage::MirrorStore;
use crate::types::{Bet, PendingKind, PendingSubmission, RoundPhase, RoundSnapshot};

#[derive(Serialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub pending_confirmed: usize,
    pub pending_rejected: usize,
    pub pending_waiting: usize,
    pub rounds_checked: usize,
    pub rounds_written: usize,
    pub rounds_unchanged: usize,
    pub stale_discarded: usize,
    pub failures: usize,
}

/// Re-derives the mirror from the ledger. Every step is a full, monotonic
/// replace, so sweeps may run as often as wanted and overlap with the
/// reconciliations that follow local operations.
pub struct ConsistencyReconciler<'a, G: LedgerGateway + ?Sized> {
    gateway: &'a G,
    store: &'a MirrorStore,
}

impl<'a, G: LedgerGateway + ?Sized> ConsistencyReconciler<'a, G> {
    pub fn new(gateway: &'a G, store: &'a MirrorStore) -> Self {
        Self { gateway, store }
    }

    pub fn reconcile_round(&self, round_id: u64) -> Result<ProjectionWrite> {
        let snapshot = self.gateway.read_round(round_id)?;
        self.apply_snapshot(&snapshot)
    }

    /// Projects the snapshot and, once the round is final, makes sure its
    /// payouts exist.
    fn apply_snapshot(&self, snapshot: &RoundSnapshot) -> Result<ProjectionWrite> {
        let write = RoundMirror::new(self.store).project(snapshot)?;
        if snapshot.phase() == RoundPhase::Finalized && write != ProjectionWrite::StaleDiscarded {
            PayoutCalculator::new(self.store).settle(snapshot)?;
        }
        Ok(write)
    }

    pub fn sweep(&self) -> Result<SweepReport> {
        let mut report = SweepReport::default();
        let mut ids: BTreeSet<u64> = BTreeSet::new();

        for pending in self.store.pending_submissions()? {
            if self.resolve_pending(&pending, &mut report) {
                ids.insert(pending.round_id);
            }
        }

        let current = self.gateway.read_current_round_id()?;
        let mirrored: BTreeSet<u64> = self.store.projection_ids()?.into_iter().collect();
        ids.extend(self.store.flagged_rounds()?);
        ids.extend(self.store.unfinalized_projection_ids()?);
        ids.extend((1..=current).filter(|id| !mirrored.contains(id)));
        ids.insert(current);
        ids.remove(&0);

        let ids: Vec<u64> = ids.into_iter().collect();
        let snapshots = self.gateway.read_rounds(&ids)?;
        let mut seen = BTreeSet::new();

        for snapshot in &snapshots {
            seen.insert(snapshot.id);
            report.rounds_checked += 1;
            match self.apply_snapshot(snapshot) {
                Ok(ProjectionWrite::StaleDiscarded) => report.stale_discarded += 1,
                Ok(write) => {
                    if write.changed() {
                        report.rounds_written += 1;
                    } else {
                        report.rounds_unchanged += 1;
                    }
                    self.store.clear_flag(snapshot.id)?;
                }
                Err(err) => {
                    report.failures += 1;
                    tracing::error!(round_id = snapshot.id, error = %err, "round reconciliation failed");
                    self.flag(snapshot.id, &err.to_string());
                }
            }
        }

        for id in ids.iter().filter(|id| !seen.contains(id)) {
            report.failures += 1;
            tracing::warn!(round_id = id, "round missing on the ledger");
            self.flag(*id, "round missing on the ledger");
        }

        tracing::info!(
            current_round = current,
            pending_confirmed = report.pending_confirmed,
            pending_rejected = report.pending_rejected,
            pending_waiting = report.pending_waiting,
            rounds_checked = report.rounds_checked,
            rounds_written = report.rounds_written,
            stale_discarded = report.stale_discarded,
            failures = report.failures,
            "sweep finished"
        );
        Ok(report)
    }

    /// Returns true when the submission left the queue and its round should
    /// be reconciled.
    fn resolve_pending(&self, pending: &PendingSubmission, report: &mut SweepReport) -> bool {
        let confirmation = match self.gateway.confirmation(&pending.proof_ref) {
            Ok(c) => c,
            Err(err) => {
                report.pending_waiting += 1;
                tracing::warn!(proof_ref = %pending.proof_ref, error = %err, "pending confirmation unreadable");
                return false;
            }
        };

        match confirmation {
            Confirmation::Pending => {
                report.pending_waiting += 1;
                false
            }
            Confirmation::Rejected(reason) => {
                tracing::warn!(
                    proof_ref = %pending.proof_ref,
                    round_id = pending.round_id,
                    kind = pending.kind.label(),
                    %reason,
                    "pending submission rejected by the ledger"
                );
                match self.store.remove_pending(&pending.proof_ref) {
                    Ok(()) => {
                        report.pending_rejected += 1;
                        true
                    }
                    Err(err) => {
                        report.failures += 1;
                        tracing::error!(proof_ref = %pending.proof_ref, error = %err, "failed to drop pending submission");
                        false
                    }
                }
            }
            Confirmation::Confirmed => {
                let applied = self
                    .complete(pending)
                    .and_then(|()| self.store.remove_pending(&pending.proof_ref));
                match applied {
                    Ok(()) => {
                        report.pending_confirmed += 1;
                        tracing::info!(
                            proof_ref = %pending.proof_ref,
                            round_id = pending.round_id,
                            kind = pending.kind.label(),
                            "pending submission confirmed"
                        );
                        true
                    }
                    Err(err) => {
                        report.failures += 1;
                        tracing::error!(proof_ref = %pending.proof_ref, error = %err, "failed to apply confirmed submission");
                        self.flag(pending.round_id, &err.to_string());
                        false
                    }
                }
            }
        }
    }

    fn complete(&self, pending: &PendingSubmission) -> Result<()> {
        match &pending.kind {
            PendingKind::Bet {
                bettor,
                outcome,
                amount,
            } => {
                let bet = Bet {
                    round_id: pending.round_id,
                    bettor: bettor.clone(),
                    outcome: *outcome,
                    amount: *amount,
                    proof_ref: pending.proof_ref.clone(),
                    recorded_at: Utc::now(),
                };
                BetLedger::new(self.gateway, self.store).record(&bet)?;
            }
            PendingKind::Withdraw { bettor } => {
                let snapshot = self.gateway.read_round(pending.round_id)?;
                self.apply_snapshot(&snapshot)?;
                match PayoutCalculator::new(self.store).claim(pending.round_id, bettor, &pending.proof_ref) {
                    Ok(_) | Err(RoundError::AlreadyClaimed { .. }) => {}
                    Err(err) => return Err(err),
                }
            }
            // lifecycle transitions land in the mirror via the round reconcile
            PendingKind::Close | PendingKind::Finalize { .. } | PendingKind::StartNext => {}
        }
        Ok(())
    }

    fn flag(&self, round_id: u64, reason: &str) {
        if let Err(err) = self.store.flag_round(round_id, reason) {
            tracing::error!(round_id, error = %err, "failed to flag round");
        }
    }
}
