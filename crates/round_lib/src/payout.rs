//! Pari-mutuel settlement.
//!
//! With `P` the whole pool and `W` the pool on the winning outcome, a winning
//! stake `s` pays `floor(s * P / W)` and a losing stake pays nothing. When
//! nobody backed the winner (`W = 0`) every stake is refunded as-is. The
//! floor-rounding dust `P - sum(payouts)` is retained in the treasury
//! accumulator instead of being handed to any single bettor.

use std::collections::BTreeMap;

use crate::error::{Result, RoundError};
use crate::storage::MirrorStore;
use crate::types::{Bet, Outcome, PayoutRecord, PoolTotals, ProofRef, RoundSnapshot, RoundStatus};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BetPayout {
    pub proof_ref: ProofRef,
    pub bettor: String,
    pub outcome: Outcome,
    pub stake: u64,
    pub payout: u64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PayoutSchedule {
    pub round_id: u64,
    pub winning_outcome: Outcome,
    pub total_pool: u64,
    pub winning_pool: u64,
    /// True when `W = 0` and every stake is returned.
    pub refunded: bool,
    pub bets: Vec<BetPayout>,
    pub remainder: u64,
}

impl PayoutSchedule {
    pub fn total_paid(&self) -> u64 {
        self.bets.iter().map(|b| b.payout).sum()
    }

    /// One record per bettor, amounts summed over their bets.
    pub fn records(&self) -> Vec<PayoutRecord> {
        let mut by_bettor: BTreeMap<&str, u64> = BTreeMap::new();
        for bet in &self.bets {
            *by_bettor.entry(bet.bettor.as_str()).or_default() += bet.payout;
        }
        by_bettor
            .into_iter()
            .map(|(bettor, amount)| PayoutRecord {
                round_id: self.round_id,
                bettor: bettor.to_string(),
                amount,
                claimed: false,
                claim_proof_ref: None,
            })
            .collect()
    }
}

/// Computes the schedule for a finalized round. The bets must add up to the
/// ledger's pools exactly; a bet ledger that is behind (or ahead of) the
/// ledger would otherwise misallocate.
pub fn compute_payouts(round: &RoundSnapshot, bets: &[Bet]) -> Result<PayoutSchedule> {
    let RoundStatus::Finalized(winning_outcome) = round.status else {
        return Err(RoundError::state(format!(
            "round {} is {}, payouts need a finalized round",
            round.id,
            round.phase()
        )));
    };

    let mut ledger_pools = PoolTotals::default();
    for bet in bets {
        if bet.round_id != round.id {
            return Err(RoundError::validation(format!(
                "bet {} belongs to round {}, not {}",
                bet.proof_ref, bet.round_id, round.id
            )));
        }
        ledger_pools
            .add(bet.outcome, bet.amount)
            .ok_or_else(|| RoundError::validation("stake sum overflows u64"))?;
    }
    if ledger_pools != round.pools {
        return Err(RoundError::state(format!(
            "bet ledger pools {:?} differ from ledger pools {:?} for round {}",
            ledger_pools, round.pools, round.id
        )));
    }

    let total_pool = round
        .pools
        .total()
        .ok_or_else(|| RoundError::validation("pool total overflows u64"))?;
    let winning_pool = round.pools.get(winning_outcome);
    let refunded = winning_pool == 0;

    let bets: Vec<BetPayout> = bets
        .iter()
        .map(|bet| {
            let payout = if refunded {
                bet.amount
            } else if bet.outcome == winning_outcome {
                // s <= W, so s * P / W <= P and fits back into u64
                (bet.amount as u128 * total_pool as u128 / winning_pool as u128) as u64
            } else {
                0
            };
            BetPayout {
                proof_ref: bet.proof_ref.clone(),
                bettor: bet.bettor.clone(),
                outcome: bet.outcome,
                stake: bet.amount,
                payout,
            }
        })
        .collect();

    let paid: u64 = bets.iter().map(|b| b.payout).sum();
    let remainder = total_pool.checked_sub(paid).ok_or_else(|| {
        RoundError::state(format!(
            "round {} payouts {} exceed pool {}",
            round.id, paid, total_pool
        ))
    })?;

    Ok(PayoutSchedule {
        round_id: round.id,
        winning_outcome,
        total_pool,
        winning_pool,
        refunded,
        bets,
        remainder,
    })
}

/// Persists payout records lazily and guards claims.
pub struct PayoutCalculator<'a> {
    store: &'a MirrorStore,
}

impl<'a> PayoutCalculator<'a> {
    pub fn new(store: &'a MirrorStore) -> Self {
        Self { store }
    }

    /// Computes and stores the round's payout records and treasury remainder
    /// the first time it is called for a round; later calls return what is
    /// stored. `round` must be a ledger read. A stored settlement computed
    /// under a different winning outcome is discarded and recomputed.
    pub fn settle(&self, round: &RoundSnapshot) -> Result<Vec<PayoutRecord>> {
        let winning = round.status.winning_outcome();
        match (self.store.settled_outcome(round.id)?, winning) {
            (Some(settled), Some(winning)) if settled == winning => {
                return self.store.payouts_for_round(round.id);
            }
            (Some(settled), Some(winning)) => {
                let dropped = self.store.discard_settlement(round.id)?;
                tracing::warn!(
                    round_id = round.id,
                    %settled,
                    %winning,
                    dropped,
                    "payouts computed under another outcome discarded"
                );
            }
            _ => {}
        }

        let bets = self.store.bets_for_round(round.id)?;
        let schedule = match compute_payouts(round, &bets) {
            Ok(schedule) => schedule,
            Err(err @ RoundError::State(_)) if round.phase() == crate::types::RoundPhase::Finalized => {
                self.store.flag_round(round.id, "bet ledger out of sync with pools")?;
                return Err(err);
            }
            Err(err) => return Err(err),
        };

        tracing::info!(
            round_id = round.id,
            total_pool = schedule.total_pool,
            winning_pool = schedule.winning_pool,
            refunded = schedule.refunded,
            remainder = schedule.remainder,
            "payouts computed"
        );
        self.store
            .insert_payouts(round.id, schedule.winning_outcome, &schedule.records(), schedule.remainder)?;
        self.store.payouts_for_round(round.id)
    }

    /// The bettor's unclaimed record, or why there is nothing to withdraw.
    pub fn claimable(&self, round_id: u64, bettor: &str) -> Result<PayoutRecord> {
        let record = self.store.payout(round_id, bettor)?.ok_or_else(|| {
            RoundError::state(format!("{} has no position in round {}", bettor, round_id))
        })?;
        if record.claimed {
            return Err(RoundError::AlreadyClaimed {
                round_id,
                bettor: bettor.to_string(),
            });
        }
        if record.amount == 0 {
            return Err(RoundError::state(format!(
                "{} has nothing to withdraw in round {}",
                bettor, round_id
            )));
        }
        Ok(record)
    }

    /// Marks the payout claimed against the ledger's withdrawal proof.
    pub fn claim(&self, round_id: u64, bettor: &str, proof_ref: &ProofRef) -> Result<u64> {
        let record = self.store.payout(round_id, bettor)?.ok_or_else(|| {
            RoundError::state(format!("{} has no position in round {}", bettor, round_id))
        })?;
        if record.claimed || !self.store.mark_claimed(round_id, bettor, proof_ref)? {
            return Err(RoundError::AlreadyClaimed {
                round_id,
                bettor: bettor.to_string(),
            });
        }
        Ok(record.amount)
    }

    pub fn treasury_balance(&self) -> Result<u64> {
        self.store.treasury_balance()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn bet(round_id: u64, bettor: &str, outcome: Outcome, amount: u64, proof: &str) -> Bet {
        Bet {
            round_id,
            bettor: bettor.into(),
            outcome,
            amount,
            proof_ref: ProofRef::new(proof),
            recorded_at: Utc::now(),
        }
    }

    fn finalized(round_id: u64, winner: Outcome, a: u64, b: u64) -> RoundSnapshot {
        RoundSnapshot {
            id: round_id,
            status: RoundStatus::Finalized(winner),
            pools: PoolTotals { a, b },
        }
    }

    #[test]
    fn winners_take_the_pool_proportionally() {
        let bets = vec![
            bet(1, "x", Outcome::A, 10, "p1"),
            bet(1, "y", Outcome::B, 5, "p2"),
        ];
        let schedule = compute_payouts(&finalized(1, Outcome::A, 10, 5), &bets).unwrap();
        assert_eq!(schedule.total_pool, 15);
        assert_eq!(schedule.winning_pool, 10);
        assert_eq!(schedule.bets[0].payout, 15);
        assert_eq!(schedule.bets[1].payout, 0);
        assert_eq!(schedule.remainder, 0);
    }

    #[test]
    fn nobody_on_the_winner_refunds_every_stake() {
        let bets = vec![
            bet(2, "x", Outcome::A, 3, "p1"),
            bet(2, "y", Outcome::A, 5, "p2"),
        ];
        let schedule = compute_payouts(&finalized(2, Outcome::B, 8, 0), &bets).unwrap();
        assert!(schedule.refunded);
        for b in &schedule.bets {
            assert_eq!(b.payout, b.stake);
        }
        assert_eq!(schedule.remainder, 0);
    }

    #[test]
    fn floor_rounding_remainder_is_retained_not_overallocated() {
        // P = 10, W = 3: each 1-unit winner gets floor(10/3) = 3, dust of 1
        let bets = vec![
            bet(5, "x", Outcome::A, 1, "p1"),
            bet(5, "y", Outcome::A, 1, "p2"),
            bet(5, "z", Outcome::A, 1, "p3"),
            bet(5, "w", Outcome::B, 7, "p4"),
        ];
        let schedule = compute_payouts(&finalized(5, Outcome::A, 3, 7), &bets).unwrap();
        assert_eq!(schedule.total_paid(), 9);
        assert_eq!(schedule.remainder, 1);
        assert!(schedule.total_paid() <= schedule.total_pool);
    }

    #[test]
    fn sum_never_exceeds_pool_across_many_splits() {
        for winners in 1u64..20 {
            for losing in [0u64, 1, 7, 1_000_003] {
                let mut bets: Vec<Bet> = (0..winners)
                    .map(|i| bet(9, &format!("w{}", i), Outcome::B, i + 1, &format!("w{}", i)))
                    .collect();
                if losing > 0 {
                    bets.push(bet(9, "loser", Outcome::A, losing, "l"));
                }
                let w: u64 = (1..=winners).sum();
                let schedule = compute_payouts(&finalized(9, Outcome::B, losing, w), &bets).unwrap();
                assert!(schedule.total_paid() <= schedule.total_pool);
                assert_eq!(schedule.total_paid() + schedule.remainder, schedule.total_pool);
            }
        }
    }

    #[test]
    fn large_stakes_do_not_overflow() {
        let bets = vec![
            bet(1, "x", Outcome::A, u64::MAX / 2, "p1"),
            bet(1, "y", Outcome::B, u64::MAX / 2, "p2"),
        ];
        let schedule =
            compute_payouts(&finalized(1, Outcome::A, u64::MAX / 2, u64::MAX / 2), &bets).unwrap();
        assert_eq!(schedule.bets[0].payout, schedule.total_pool);
    }

    #[test]
    fn refuses_unfinalized_or_out_of_sync_rounds() {
        let open = RoundSnapshot::genesis(1);
        assert!(matches!(compute_payouts(&open, &[]), Err(RoundError::State(_))));

        let bets = vec![bet(1, "x", Outcome::A, 10, "p1")];
        assert!(matches!(
            compute_payouts(&finalized(1, Outcome::A, 10, 5), &bets),
            Err(RoundError::State(_))
        ));
    }

    #[test]
    fn records_aggregate_per_bettor() {
        let bets = vec![
            bet(1, "x", Outcome::A, 4, "p1"),
            bet(1, "x", Outcome::A, 6, "p2"),
            bet(1, "y", Outcome::B, 10, "p3"),
        ];
        let records = compute_payouts(&finalized(1, Outcome::A, 10, 10), &bets)
            .unwrap()
            .records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].bettor, "x");
        assert_eq!(records[0].amount, 20);
        assert_eq!(records[1].amount, 0);
    }

    #[test]
    fn second_claim_is_rejected() {
        let store = MirrorStore::open_in_memory().unwrap();
        store.insert_bet(&bet(1, "x", Outcome::A, 10, "p1")).unwrap();
        store.insert_bet(&bet(1, "y", Outcome::B, 5, "p2")).unwrap();
        let calc = PayoutCalculator::new(&store);
        calc.settle(&finalized(1, Outcome::A, 10, 5)).unwrap();

        assert_eq!(calc.claimable(1, "x").unwrap().amount, 15);
        assert_eq!(calc.claim(1, "x", &ProofRef::new("w1")).unwrap(), 15);
        assert!(matches!(
            calc.claim(1, "x", &ProofRef::new("w2")),
            Err(RoundError::AlreadyClaimed { .. })
        ));
        assert!(matches!(
            calc.claimable(1, "x"),
            Err(RoundError::AlreadyClaimed { .. })
        ));
        assert!(matches!(calc.claimable(1, "y"), Err(RoundError::State(_))));
    }

    #[test]
    fn remainder_lands_in_treasury_once() {
        let store = MirrorStore::open_in_memory().unwrap();
        for (i, outcome) in [Outcome::A, Outcome::A, Outcome::A, Outcome::B].into_iter().enumerate() {
            let amount = if outcome == Outcome::B { 7 } else { 1 };
            store
                .insert_bet(&bet(5, &format!("b{}", i), outcome, amount, &format!("p{}", i)))
                .unwrap();
        }
        let calc = PayoutCalculator::new(&store);
        let round = finalized(5, Outcome::A, 3, 7);
        calc.settle(&round).unwrap();
        calc.settle(&round).unwrap();
        assert_eq!(calc.treasury_balance().unwrap(), 1);
    }

    #[test]
    fn settlement_under_another_outcome_is_recomputed() {
        let store = MirrorStore::open_in_memory().unwrap();
        store.insert_bet(&bet(1, "x", Outcome::A, 10, "p1")).unwrap();
        store.insert_bet(&bet(1, "y", Outcome::B, 5, "p2")).unwrap();
        let calc = PayoutCalculator::new(&store);

        calc.settle(&finalized(1, Outcome::B, 10, 5)).unwrap();
        assert_eq!(store.payout(1, "y").unwrap().unwrap().amount, 15);

        let records = calc.settle(&finalized(1, Outcome::A, 10, 5)).unwrap();
        let x = records.iter().find(|r| r.bettor == "x").unwrap();
        let y = records.iter().find(|r| r.bettor == "y").unwrap();
        assert_eq!((x.amount, y.amount), (15, 0));
        assert_eq!(store.settled_outcome(1).unwrap(), Some(Outcome::A));
        assert_eq!(calc.claimable(1, "x").unwrap().amount, 15);
    }

    #[test]
    fn out_of_sync_settlement_flags_the_round() {
        let store = MirrorStore::open_in_memory().unwrap();
        store.insert_bet(&bet(1, "x", Outcome::A, 10, "p1")).unwrap();
        let calc = PayoutCalculator::new(&store);
        assert!(calc.settle(&finalized(1, Outcome::A, 10, 5)).is_err());
        assert_eq!(store.flagged_rounds().unwrap(), vec![1]);
        assert!(store.payouts_for_round(1).unwrap().is_empty());
    }
}
