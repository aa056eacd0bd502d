use anchor_lang::prelude::*;

use crate::error::RoundError;
use crate::types::enums::{Outcome, RoundStatus};
use crate::types::records::{PoolTotals, RoundSnapshot};

/// On-chain round account. The program keeps two independent flags; they are
/// folded into [`RoundStatus`] before anything else sees them.
#[derive(AnchorSerialize, AnchorDeserialize, Clone, Debug)]
pub struct RoundAccount {
    pub id: u64,
    pub is_active: bool,
    pub is_finalized: bool,
    pub winning_outcome: u8,
    pub total_pool: u64,
    pub pool_by_outcome: [u64; 2],
    pub created_at: i64,
    pub bump: u8,
}

impl RoundAccount {
    pub fn status(&self) -> std::result::Result<RoundStatus, RoundError> {
        match (self.is_active, self.is_finalized) {
            (true, false) => Ok(RoundStatus::Open),
            (false, false) => Ok(RoundStatus::Closed),
            (false, true) => Ok(RoundStatus::Finalized(Outcome::from_index(
                self.winning_outcome,
            )?)),
            (true, true) => Err(RoundError::Authoritative(format!(
                "round {} is flagged both active and finalized",
                self.id
            ))),
        }
    }

    pub fn to_snapshot(&self) -> std::result::Result<RoundSnapshot, RoundError> {
        let pools = PoolTotals {
            a: self.pool_by_outcome[0],
            b: self.pool_by_outcome[1],
        };
        if pools.total() != Some(self.total_pool) {
            return Err(RoundError::Authoritative(format!(
                "round {} total_pool {} does not match outcome pools {:?}",
                self.id, self.total_pool, self.pool_by_outcome
            )));
        }

        Ok(RoundSnapshot {
            id: self.id,
            status: self.status()?,
            pools,
        })
    }
}
