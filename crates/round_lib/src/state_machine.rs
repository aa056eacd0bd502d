//! Round lifecycle: `Open -> Closed -> Finalized -> Open(next id)`.
//!
//! [`RoundStateMachine`] holds the current round as seen by whoever built it
//! (a fresh ledger read for guards on the submit path, the mirror for the
//! admin write surface). `request_*` validate an intent without changing
//! anything; `apply` folds in a transition the ledger already confirmed.

use crate::error::{Result, RoundError};
use crate::types::{Outcome, RoundSnapshot, RoundStatus};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Transition {
    Close { round_id: u64 },
    Finalize { round_id: u64, outcome: Outcome },
    StartNext { next_id: u64 },
}

impl Transition {
    /// Round whose row the transition writes.
    pub fn round_id(&self) -> u64 {
        match *self {
            Transition::Close { round_id } | Transition::Finalize { round_id, .. } => round_id,
            Transition::StartNext { next_id } => next_id,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Applied {
    Advanced,
    AlreadyApplied,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RoundStateMachine {
    current_id: u64,
    status: RoundStatus,
}

impl RoundStateMachine {
    pub fn genesis() -> Self {
        Self {
            current_id: 1,
            status: RoundStatus::Open,
        }
    }

    pub fn from_current(round: &RoundSnapshot) -> Self {
        Self {
            current_id: round.id,
            status: round.status,
        }
    }

    pub fn current_id(&self) -> u64 {
        self.current_id
    }

    pub fn status(&self) -> RoundStatus {
        self.status
    }

    pub fn can_accept_bet(&self, round_id: u64) -> bool {
        round_id == self.current_id && self.status == RoundStatus::Open
    }

    pub fn request_close(&self, round_id: u64) -> Result<Transition> {
        self.ensure_current(round_id)?;
        match self.status {
            RoundStatus::Open => Ok(Transition::Close { round_id }),
            other => Err(RoundError::state(format!(
                "cannot close round {}: phase is {}",
                round_id,
                other.phase()
            ))),
        }
    }

    pub fn request_finalize(&self, round_id: u64, outcome: Outcome) -> Result<Transition> {
        self.ensure_current(round_id)?;
        match self.status {
            RoundStatus::Closed => Ok(Transition::Finalize { round_id, outcome }),
            other => Err(RoundError::state(format!(
                "cannot finalize round {}: phase is {}",
                round_id,
                other.phase()
            ))),
        }
    }

    pub fn request_start_next(&self) -> Result<Transition> {
        match self.status {
            RoundStatus::Finalized(_) => Ok(Transition::StartNext {
                next_id: self.current_id + 1,
            }),
            other => Err(RoundError::state(format!(
                "cannot start round {}: round {} is {}",
                self.current_id + 1,
                self.current_id,
                other.phase()
            ))),
        }
    }

    /// Applies a confirmed transition. Replaying one that is already reflected
    /// is a no-op; one that contradicts the current state is a `StateError`.
    pub fn apply(&mut self, transition: Transition) -> Result<Applied> {
        match transition {
            Transition::Close { round_id } => match (self.status, round_id) {
                (RoundStatus::Open, id) if id == self.current_id => {
                    self.status = RoundStatus::Closed;
                    Ok(Applied::Advanced)
                }
                (_, id) if id < self.current_id => Ok(Applied::AlreadyApplied),
                (RoundStatus::Closed | RoundStatus::Finalized(_), id) if id == self.current_id => {
                    Ok(Applied::AlreadyApplied)
                }
                _ => Err(self.conflict(&transition)),
            },
            Transition::Finalize { round_id, outcome } => match (self.status, round_id) {
                (RoundStatus::Closed, id) if id == self.current_id => {
                    self.status = RoundStatus::Finalized(outcome);
                    Ok(Applied::Advanced)
                }
                (RoundStatus::Finalized(won), id) if id == self.current_id && won == outcome => {
                    Ok(Applied::AlreadyApplied)
                }
                (_, id) if id < self.current_id => Ok(Applied::AlreadyApplied),
                _ => Err(self.conflict(&transition)),
            },
            Transition::StartNext { next_id } => {
                if next_id <= self.current_id {
                    return Ok(Applied::AlreadyApplied);
                }
                match self.status {
                    RoundStatus::Finalized(_) if next_id == self.current_id + 1 => {
                        self.current_id = next_id;
                        self.status = RoundStatus::Open;
                        Ok(Applied::Advanced)
                    }
                    _ => Err(self.conflict(&transition)),
                }
            }
        }
    }

    fn ensure_current(&self, round_id: u64) -> Result<()> {
        if round_id != self.current_id {
            return Err(RoundError::state(format!(
                "round {} is not the current round ({})",
                round_id, self.current_id
            )));
        }
        Ok(())
    }

    fn conflict(&self, transition: &Transition) -> RoundError {
        RoundError::state(format!(
            "{:?} conflicts with round {} in phase {}",
            transition,
            self.current_id,
            self.status.phase()
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_lifecycle_advances_round_ids_without_gaps() {
        let mut sm = RoundStateMachine::genesis();
        let mut seen = vec![sm.current_id()];
        for outcome in [Outcome::A, Outcome::B, Outcome::A] {
            let close = sm.request_close(sm.current_id()).unwrap();
            assert_eq!(sm.apply(close).unwrap(), Applied::Advanced);
            let finalize = sm.request_finalize(sm.current_id(), outcome).unwrap();
            assert_eq!(sm.apply(finalize).unwrap(), Applied::Advanced);
            assert_eq!(sm.status().winning_outcome(), Some(outcome));
            let next = sm.request_start_next().unwrap();
            sm.apply(next).unwrap();
            seen.push(sm.current_id());
        }
        assert_eq!(seen, vec![1, 2, 3, 4]);
    }

    #[test]
    fn illegal_transitions_fail_with_state_error() {
        let sm = RoundStateMachine::genesis();
        // Open -> Finalized is not a thing
        assert!(matches!(
            sm.request_finalize(1, Outcome::A),
            Err(RoundError::State(_))
        ));
        assert!(matches!(sm.request_start_next(), Err(RoundError::State(_))));
        assert!(matches!(sm.request_close(2), Err(RoundError::State(_))));

        let closed = RoundStateMachine::from_current(&RoundSnapshot {
            id: 1,
            status: RoundStatus::Closed,
            pools: Default::default(),
        });
        // only one close can succeed per round
        assert!(matches!(closed.request_close(1), Err(RoundError::State(_))));
        assert!(!closed.can_accept_bet(1));
    }

    #[test]
    fn bets_are_accepted_only_on_the_open_current_round() {
        let sm = RoundStateMachine::from_current(&RoundSnapshot::genesis(3));
        assert!(sm.can_accept_bet(3));
        assert!(!sm.can_accept_bet(2));
        assert!(!sm.can_accept_bet(4));
    }

    #[test]
    fn replayed_confirmations_are_no_ops() {
        let mut sm = RoundStateMachine::genesis();
        let close = Transition::Close { round_id: 1 };
        assert_eq!(sm.apply(close).unwrap(), Applied::Advanced);
        assert_eq!(sm.apply(close).unwrap(), Applied::AlreadyApplied);

        let finalize = Transition::Finalize {
            round_id: 1,
            outcome: Outcome::B,
        };
        sm.apply(finalize).unwrap();
        assert_eq!(sm.apply(finalize).unwrap(), Applied::AlreadyApplied);
        assert_eq!(sm.apply(close).unwrap(), Applied::AlreadyApplied);

        let start = Transition::StartNext { next_id: 2 };
        sm.apply(start).unwrap();
        assert_eq!(sm.apply(start).unwrap(), Applied::AlreadyApplied);
        assert_eq!(sm.current_id(), 2);
        assert_eq!(sm.status(), RoundStatus::Open);
    }

    #[test]
    fn conflicting_confirmations_are_rejected() {
        let mut sm = RoundStateMachine::genesis();
        sm.apply(Transition::Close { round_id: 1 }).unwrap();
        sm.apply(Transition::Finalize {
            round_id: 1,
            outcome: Outcome::A,
        })
        .unwrap();
        assert!(matches!(
            sm.apply(Transition::Finalize {
                round_id: 1,
                outcome: Outcome::B
            }),
            Err(RoundError::State(_))
        ));
        // skipping a round id is never legal
        assert!(matches!(
            sm.apply(Transition::StartNext { next_id: 3 }),
            Err(RoundError::State(_))
        ));
    }
}
