use anchor_lang::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::RoundError;

/// The two sides of a binary market. Borsh encodes it as the variant index,
/// matching the program's `u8` outcome argument.
#[derive(
    AnchorSerialize,
    AnchorDeserialize,
    Serialize,
    Deserialize,
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
)]
pub enum Outcome {
    A,
    B,
}

impl Outcome {
    pub fn from_index(index: u8) -> std::result::Result<Self, RoundError> {
        match index {
            0 => Ok(Outcome::A),
            1 => Ok(Outcome::B),
            other => Err(RoundError::validation(format!(
                "outcome index {} outside {{0, 1}}",
                other
            ))),
        }
    }

    pub fn index(self) -> u8 {
        match self {
            Outcome::A => 0,
            Outcome::B => 1,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Outcome::A => "a",
            Outcome::B => "b",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Outcome {
    type Err = RoundError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "a" | "0" => Ok(Outcome::A),
            "b" | "1" => Ok(Outcome::B),
            other => Err(RoundError::validation(format!("invalid outcome: {:?}", other))),
        }
    }
}

/// Lifecycle phase. The derived ordering is the monotonic order used by the mirror.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RoundPhase {
    Open,
    Closed,
    Finalized,
}

impl RoundPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            RoundPhase::Open => "open",
            RoundPhase::Closed => "closed",
            RoundPhase::Finalized => "finalized",
        }
    }
}

impl fmt::Display for RoundPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RoundPhase {
    type Err = RoundError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "open" => Ok(RoundPhase::Open),
            "closed" => Ok(RoundPhase::Closed),
            "finalized" => Ok(RoundPhase::Finalized),
            other => Err(RoundError::validation(format!("invalid phase: {:?}", other))),
        }
    }
}

/// Round status with the winning outcome carried by the finalized variant,
/// so an outcome without finalization (or the reverse) cannot be expressed.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(tag = "phase", content = "winning_outcome", rename_all = "snake_case")]
pub enum RoundStatus {
    Open,
    Closed,
    Finalized(Outcome),
}

impl RoundStatus {
    pub fn phase(&self) -> RoundPhase {
        match self {
            RoundStatus::Open => RoundPhase::Open,
            RoundStatus::Closed => RoundPhase::Closed,
            RoundStatus::Finalized(_) => RoundPhase::Finalized,
        }
    }

    pub fn winning_outcome(&self) -> Option<Outcome> {
        match self {
            RoundStatus::Finalized(outcome) => Some(*outcome),
            _ => None,
        }
    }

    /// Rebuilds a status from its stored columns.
    pub fn from_parts(
        phase: RoundPhase,
        winning_outcome: Option<Outcome>,
    ) -> std::result::Result<Self, RoundError> {
        match (phase, winning_outcome) {
            (RoundPhase::Open, None) => Ok(RoundStatus::Open),
            (RoundPhase::Closed, None) => Ok(RoundStatus::Closed),
            (RoundPhase::Finalized, Some(outcome)) => Ok(RoundStatus::Finalized(outcome)),
            (phase, outcome) => Err(RoundError::validation(format!(
                "phase {} cannot carry winning outcome {:?}",
                phase, outcome
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_parsing_accepts_only_the_binary_set() {
        assert_eq!("A".parse::<Outcome>().unwrap(), Outcome::A);
        assert_eq!("1".parse::<Outcome>().unwrap(), Outcome::B);
        assert!(matches!(
            "2".parse::<Outcome>(),
            Err(RoundError::Validation(_))
        ));
        assert!(matches!(
            Outcome::from_index(7),
            Err(RoundError::Validation(_))
        ));
        assert_eq!(Outcome::from_index(Outcome::B.index()).unwrap(), Outcome::B);
    }

    #[test]
    fn phases_are_ordered_open_closed_finalized() {
        assert!(RoundPhase::Open < RoundPhase::Closed);
        assert!(RoundPhase::Closed < RoundPhase::Finalized);
    }

    #[test]
    fn winning_outcome_exists_only_when_finalized() {
        assert_eq!(RoundStatus::Open.winning_outcome(), None);
        assert_eq!(RoundStatus::Closed.winning_outcome(), None);
        assert_eq!(
            RoundStatus::Finalized(Outcome::A).winning_outcome(),
            Some(Outcome::A)
        );
        assert!(RoundStatus::from_parts(RoundPhase::Open, Some(Outcome::A)).is_err());
        assert!(RoundStatus::from_parts(RoundPhase::Finalized, None).is_err());
    }
}
