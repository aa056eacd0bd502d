use solana_sdk::{
    pubkey::Pubkey,
    signature::{Keypair, Signature, Signer},
};
use std::str::FromStr;
use std::sync::Arc;

use crate::client::program::{
    close_betting_ix, decode_place_bet, finalize_outcome_ix, get_config_account,
    get_round_account, get_rounds_by_ids, place_bet_ix, start_new_round_ix, withdraw_winnings_ix,
};
use crate::client::rpc::Rpc;
use crate::error::{Result, RoundError};
use crate::types::{Outcome, PlacedBet, ProofRef, RoundSnapshot};

const READ_BATCH_SIZE: usize = 100;

/// Where a submitted operation stands on the ledger.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Confirmation {
    Pending,
    Confirmed,
    Rejected(String),
}

/// Typed access to the ledger program. Submissions return once the ledger
/// has accepted the transaction; use [`LedgerGateway::confirmation`] to
/// observe the result. Implementations translate, they never decide.
pub trait LedgerGateway: Send + Sync {
    /// Address the gateway signs as (bettor or admin).
    fn identity(&self) -> String;

    fn submit_bet(&self, round_id: u64, outcome: Outcome, amount: u64) -> Result<ProofRef>;
    fn submit_close(&self, round_id: u64) -> Result<ProofRef>;
    fn submit_finalize(&self, round_id: u64, outcome: Outcome) -> Result<ProofRef>;
    fn submit_start_next(&self, next_id: u64) -> Result<ProofRef>;
    fn submit_withdraw(&self, round_id: u64) -> Result<ProofRef>;

    fn confirmation(&self, proof_ref: &ProofRef) -> Result<Confirmation>;

    /// The bet a confirmed transaction placed on `round_id`, read from the
    /// ledger's copy of it. `None` when it placed no bet on that round.
    fn read_placed_bet(&self, proof_ref: &ProofRef, round_id: u64) -> Result<Option<PlacedBet>>;

    fn read_current_round_id(&self) -> Result<u64>;
    fn read_round(&self, round_id: u64) -> Result<RoundSnapshot>;

    /// Rounds that do not exist are omitted.
    fn read_rounds(&self, ids: &[u64]) -> Result<Vec<RoundSnapshot>> {
        let mut out = Vec::with_capacity(ids.len());
        for &id in ids {
            match self.read_round(id) {
                Ok(snapshot) => out.push(snapshot),
                Err(RoundError::RoundNotFound(_)) => continue,
                Err(err) => return Err(err),
            }
        }
        Ok(out)
    }
}

pub struct RpcLedgerGateway {
    rpc: Rpc,
    signer: Arc<Keypair>,
    program_id: Pubkey,
    system_program_id: Pubkey,
}

impl RpcLedgerGateway {
    pub fn new(rpc: Rpc, signer: Arc<Keypair>, program_id: Pubkey, system_program_id: Pubkey) -> Self {
        Self {
            rpc,
            signer,
            program_id,
            system_program_id,
        }
    }

    fn send(&self, op: &str, round_id: u64, ix: solana_sdk::instruction::Instruction) -> Result<ProofRef> {
        let sig = self
            .rpc
            .send_instructions(op, round_id, &self.signer, vec![ix])?;
        Ok(ProofRef::new(sig.to_string()))
    }
}

impl LedgerGateway for RpcLedgerGateway {
    fn identity(&self) -> String {
        self.signer.pubkey().to_string()
    }

    fn submit_bet(&self, round_id: u64, outcome: Outcome, amount: u64) -> Result<ProofRef> {
        let ix = place_bet_ix(
            &self.program_id,
            &self.system_program_id,
            &self.signer.pubkey(),
            round_id,
            outcome,
            amount,
        )?;
        self.send("place_bet", round_id, ix)
    }

    fn submit_close(&self, round_id: u64) -> Result<ProofRef> {
        let ix = close_betting_ix(&self.program_id, &self.signer.pubkey(), round_id);
        self.send("close_betting", round_id, ix)
    }

    fn submit_finalize(&self, round_id: u64, outcome: Outcome) -> Result<ProofRef> {
        let ix = finalize_outcome_ix(&self.program_id, &self.signer.pubkey(), round_id, outcome)?;
        self.send("finalize_outcome", round_id, ix)
    }

    fn submit_start_next(&self, next_id: u64) -> Result<ProofRef> {
        let ix = start_new_round_ix(
            &self.program_id,
            &self.system_program_id,
            &self.signer.pubkey(),
            next_id,
        );
        self.send("start_new_round", next_id, ix)
    }

    fn submit_withdraw(&self, round_id: u64) -> Result<ProofRef> {
        let ix = withdraw_winnings_ix(
            &self.program_id,
            &self.system_program_id,
            &self.signer.pubkey(),
            round_id,
        )?;
        self.send("withdraw_winnings", round_id, ix)
    }

    fn confirmation(&self, proof_ref: &ProofRef) -> Result<Confirmation> {
        let sig = parse_signature(proof_ref)?;
        Ok(match self.rpc.signature_status(&sig)? {
            None => Confirmation::Pending,
            Some(Ok(())) => Confirmation::Confirmed,
            Some(Err(reason)) => Confirmation::Rejected(reason),
        })
    }

    fn read_placed_bet(&self, proof_ref: &ProofRef, round_id: u64) -> Result<Option<PlacedBet>> {
        let sig = parse_signature(proof_ref)?;
        Ok(self
            .rpc
            .confirmed_transaction(&sig)?
            .and_then(|tx| decode_place_bet(&tx, &self.program_id, round_id)))
    }

    fn read_current_round_id(&self) -> Result<u64> {
        let cfg = get_config_account(self.rpc.client(), *self.rpc.commitment_cfg(), &self.program_id)?;
        Ok(cfg.current_round)
    }

    fn read_round(&self, round_id: u64) -> Result<RoundSnapshot> {
        get_round_account(
            self.rpc.client(),
            *self.rpc.commitment_cfg(),
            &self.program_id,
            round_id,
        )?
        .to_snapshot()
    }

    fn read_rounds(&self, ids: &[u64]) -> Result<Vec<RoundSnapshot>> {
        let mut out = Vec::with_capacity(ids.len());
        for chunk in ids.chunks(READ_BATCH_SIZE) {
            let accounts = get_rounds_by_ids(
                self.rpc.client(),
                *self.rpc.commitment_cfg(),
                &self.program_id,
                chunk,
            )?;
            for acc in accounts {
                out.push(acc.to_snapshot()?);
            }
        }
        Ok(out)
    }
}

fn parse_signature(proof_ref: &ProofRef) -> Result<Signature> {
    Signature::from_str(proof_ref.as_str())
        .map_err(|e| RoundError::validation(format!("invalid proof reference {}: {}", proof_ref, e)))
}
