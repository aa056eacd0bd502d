use chrono::Utc;
use serde::Serialize;

use crate::client::{Confirmation, LedgerGateway};
use crate::error::{Result, RoundError};
use crate::storage::MirrorStore;
use crate::types::{Bet, RoundStatus};

#[derive(Serialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RecordOutcome {
    Recorded,
    /// The proof reference was already in the log; nothing was written.
    Duplicate,
    /// Recorded, but the ledger no longer reports the round open, so the
    /// round was flagged for reconciliation.
    RecordedFlagged,
}

/// Append-only log of confirmed bets.
pub struct BetLedger<'a, G: LedgerGateway + ?Sized> {
    gateway: &'a G,
    store: &'a MirrorStore,
}

impl<'a, G: LedgerGateway + ?Sized> BetLedger<'a, G> {
    pub fn new(gateway: &'a G, store: &'a MirrorStore) -> Self {
        Self { gateway, store }
    }

    /// Records a bet the ledger confirmed. The ledger's acceptance is final,
    /// so a round that reads as anything but open is flagged, not refused.
    pub fn record(&self, bet: &Bet) -> Result<RecordOutcome> {
        validate(bet)?;
        if self.store.contains_proof(&bet.proof_ref)? {
            tracing::debug!(proof_ref = %bet.proof_ref, "bet already recorded");
            return Ok(RecordOutcome::Duplicate);
        }

        let mismatch = match self.gateway.read_round(bet.round_id) {
            Ok(round) if round.status == RoundStatus::Open => None,
            Ok(round) => Some(format!("bet confirmed while round is {}", round.phase())),
            Err(err) => Some(format!("round unreadable while recording bet: {}", err)),
        };

        if !self.store.insert_bet(bet)? {
            return Ok(RecordOutcome::Duplicate);
        }

        match mismatch {
            None => {
                tracing::info!(
                    round_id = bet.round_id,
                    bettor = %bet.bettor,
                    outcome = %bet.outcome,
                    amount = bet.amount,
                    proof_ref = %bet.proof_ref,
                    "bet recorded"
                );
                Ok(RecordOutcome::Recorded)
            }
            Some(reason) => {
                tracing::warn!(
                    round_id = bet.round_id,
                    proof_ref = %bet.proof_ref,
                    %reason,
                    "bet recorded against a round that is not open, flagged"
                );
                self.store.flag_round(bet.round_id, &reason)?;
                Ok(RecordOutcome::RecordedFlagged)
            }
        }
    }

    /// Write surface for outside consumers. The claimed bet must match the
    /// `place_bet` its confirmed transaction carried on the ledger, and the
    /// log's sum for the outcome may not pass the ledger's pool.
    pub fn record_external(&self, claimed: &Bet) -> Result<RecordOutcome> {
        validate(claimed)?;
        match self.gateway.confirmation(&claimed.proof_ref)? {
            Confirmation::Confirmed => {}
            Confirmation::Pending => {
                return Err(RoundError::state(format!(
                    "transaction {} is not confirmed yet",
                    claimed.proof_ref
                )));
            }
            Confirmation::Rejected(reason) => return Err(RoundError::Authoritative(reason)),
        }
        if self.store.contains_proof(&claimed.proof_ref)? {
            return Ok(RecordOutcome::Duplicate);
        }

        let placed = self
            .gateway
            .read_placed_bet(&claimed.proof_ref, claimed.round_id)?
            .ok_or_else(|| {
                RoundError::validation(format!(
                    "transaction {} placed no bet on round {}",
                    claimed.proof_ref, claimed.round_id
                ))
            })?;
        if placed.bettor != claimed.bettor
            || placed.outcome != claimed.outcome
            || placed.amount != claimed.amount
        {
            return Err(RoundError::validation(format!(
                "transaction {} placed {} on {} for {}, not {} on {} for {}",
                claimed.proof_ref,
                placed.amount,
                placed.outcome,
                placed.bettor,
                claimed.amount,
                claimed.outcome,
                claimed.bettor
            )));
        }

        let bet = Bet {
            round_id: placed.round_id,
            bettor: placed.bettor,
            outcome: placed.outcome,
            amount: placed.amount,
            proof_ref: claimed.proof_ref.clone(),
            recorded_at: Utc::now(),
        };
        self.check_within_pool(&bet)?;
        self.record(&bet)
    }

    fn check_within_pool(&self, bet: &Bet) -> Result<()> {
        let round = self.gateway.read_round(bet.round_id)?;
        let logged: u64 = self
            .store
            .bets_for_round(bet.round_id)?
            .iter()
            .filter(|b| b.outcome == bet.outcome)
            .map(|b| b.amount)
            .sum();
        let pool = round.pools.get(bet.outcome);
        if logged.checked_add(bet.amount).map_or(true, |sum| sum > pool) {
            return Err(RoundError::state(format!(
                "bet {} would take logged stakes on {} to {} + {}, past the ledger pool of {} in round {}",
                bet.proof_ref, bet.outcome, logged, bet.amount, pool, bet.round_id
            )));
        }
        Ok(())
    }

    pub fn query(&self, round_id: u64) -> Result<Vec<Bet>> {
        self.store.bets_for_round(round_id)
    }
}

fn validate(bet: &Bet) -> Result<()> {
    if bet.amount == 0 {
        return Err(RoundError::validation("bet amount must be positive"));
    }
    if bet.round_id == 0 {
        return Err(RoundError::validation("round ids start at 1"));
    }
    if bet.bettor.is_empty() {
        return Err(RoundError::validation("bettor address is empty"));
    }
    Ok(())
}
