use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::types::enums::{Outcome, RoundPhase, RoundStatus};

/// Opaque reference to a confirmed ledger operation (a transaction signature).
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct ProofRef(String);

impl ProofRef {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProofRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PoolTotals {
    pub a: u64,
    pub b: u64,
}

impl PoolTotals {
    pub fn get(&self, outcome: Outcome) -> u64 {
        match outcome {
            Outcome::A => self.a,
            Outcome::B => self.b,
        }
    }

    pub fn add(&mut self, outcome: Outcome, amount: u64) -> Option<()> {
        let slot = match outcome {
            Outcome::A => &mut self.a,
            Outcome::B => &mut self.b,
        };
        *slot = slot.checked_add(amount)?;
        Some(())
    }

    /// `None` on overflow.
    pub fn total(&self) -> Option<u64> {
        self.a.checked_add(self.b)
    }

    /// True if every outcome pool is at least as large as in `other`.
    pub fn covers(&self, other: &PoolTotals) -> bool {
        self.a >= other.a && self.b >= other.b
    }
}

/// A round as reported by the ledger.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct RoundSnapshot {
    pub id: u64,
    pub status: RoundStatus,
    pub pools: PoolTotals,
}

impl RoundSnapshot {
    pub fn genesis(id: u64) -> Self {
        Self {
            id,
            status: RoundStatus::Open,
            pools: PoolTotals::default(),
        }
    }

    pub fn phase(&self) -> RoundPhase {
        self.status.phase()
    }
}

/// Mirrored round row.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct RoundProjection {
    pub id: u64,
    pub status: RoundStatus,
    pub pools: PoolTotals,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RoundProjection {
    pub fn phase(&self) -> RoundPhase {
        self.status.phase()
    }

    pub fn snapshot(&self) -> RoundSnapshot {
        RoundSnapshot {
            id: self.id,
            status: self.status,
            pools: self.pools,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Bet {
    pub round_id: u64,
    pub bettor: String,
    pub outcome: Outcome,
    pub amount: u64,
    pub proof_ref: ProofRef,
    pub recorded_at: DateTime<Utc>,
}

/// A bet as the ledger executed it, decoded from its confirmed transaction.
#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
pub struct PlacedBet {
    pub round_id: u64,
    pub bettor: String,
    pub outcome: Outcome,
    pub amount: u64,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct PayoutRecord {
    pub round_id: u64,
    pub bettor: String,
    pub amount: u64,
    pub claimed: bool,
    pub claim_proof_ref: Option<ProofRef>,
}

/// Floor-rounding dust retained from one finalized round.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct TreasuryEntry {
    pub round_id: u64,
    pub remainder: u64,
}

/// What an unconfirmed submission was meant to do, kept until the sweep
/// observes its confirmation or rejection.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PendingKind {
    Bet {
        bettor: String,
        outcome: Outcome,
        amount: u64,
    },
    Close,
    Finalize {
        outcome: Outcome,
    },
    StartNext,
    Withdraw {
        bettor: String,
    },
}

impl PendingKind {
    pub fn label(&self) -> &'static str {
        match self {
            PendingKind::Bet { .. } => "bet",
            PendingKind::Close => "close",
            PendingKind::Finalize { .. } => "finalize",
            PendingKind::StartNext => "start_next",
            PendingKind::Withdraw { .. } => "withdraw",
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct PendingSubmission {
    pub proof_ref: ProofRef,
    pub round_id: u64,
    pub kind: PendingKind,
    pub submitted_at: DateTime<Utc>,
}
