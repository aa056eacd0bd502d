use thiserror::Error;

pub type Result<T> = std::result::Result<T, RoundError>;

#[derive(Debug, Error)]
pub enum RoundError {
    /// Malformed input. Never retried.
    #[error("validation error: {0}")]
    Validation(String),
    /// The operation is not allowed in the round's current phase. Never retried.
    #[error("state error: {0}")]
    State(String),
    #[error("payout for round {round_id} already claimed by {bettor}")]
    AlreadyClaimed { round_id: u64, bettor: String },
    #[error("round {0} not found on the ledger")]
    RoundNotFound(u64),
    #[error("caller {0} is not the configured admin")]
    Unauthorized(String),
    /// The ledger program rejected the operation. Surfaced verbatim.
    #[error("ledger rejected operation: {0}")]
    Authoritative(String),
    /// The submission never reached the ledger, safe to retry.
    #[error("transient io error: {0}")]
    TransientIo(String),
    /// A mirror write failed after the ledger already confirmed the operation.
    #[error("mirror write failed for round {round_id}: {reason}")]
    MirrorWrite { round_id: u64, reason: String },
    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl RoundError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn state(msg: impl Into<String>) -> Self {
        Self::State(msg.into())
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::TransientIo(_))
    }
}
