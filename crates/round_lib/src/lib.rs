pub mod bet_ledger;
pub mod client;
pub mod error;
pub mod mirror;
pub mod payout;
pub mod pda;
pub mod reconciler;
pub mod retry;
pub mod service;
pub mod state_machine;
pub mod storage;
pub mod types;
pub mod wallet;

pub use error::{Result, RoundError};
pub use service::{ConfirmPolicy, RoundService, Submission};
