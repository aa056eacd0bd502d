use anchor_lang::prelude::*;
use sha2::{Digest, Sha256};
use solana_client::rpc_client::RpcClient;
use solana_commitment_config::CommitmentConfig;
use solana_sdk::{
    account::Account,
    instruction::{AccountMeta, Instruction},
    pubkey::Pubkey,
    transaction::VersionedTransaction,
};

use crate::client::rpc::classify_client_error;
use crate::error::{Result, RoundError};
use crate::pda::{derive_config_pda, derive_position_pda, derive_round_pda, derive_round_vault_pda};
use crate::types::{ConfigAccount, Outcome, PlacedBet, RoundAccount};

const DISCRIMINATOR_LEN: usize = 8;

/// Generate a 8-byte sighash for a global instruction
pub fn sighash_global(ix_name: &str) -> [u8; 8] {
    let mut hasher = Sha256::new();
    hasher.update(format!("{}:{}", "global", ix_name));
    let hash = hasher.finalize();
    let mut sighash = [0u8; 8];
    sighash.copy_from_slice(&hash[..8]);
    sighash
}

fn instruction_data<A: AnchorSerialize>(ix_name: &str, args: &A) -> Result<Vec<u8>> {
    let mut data = sighash_global(ix_name).to_vec();
    args.serialize(&mut data)
        .map_err(|e| RoundError::validation(format!("failed to encode {} args: {}", ix_name, e)))?;
    Ok(data)
}

fn decode_account<T: AnchorDeserialize>(
    label: &str,
    address: &Pubkey,
    acc: &Account,
    program_id: &Pubkey,
) -> Result<T> {
    if acc.owner != *program_id {
        return Err(RoundError::Authoritative(format!(
            "{} {} owner mismatch. expected={}, got={}",
            label, address, program_id, acc.owner
        )));
    }
    if acc.data.len() < DISCRIMINATOR_LEN {
        return Err(RoundError::Authoritative(format!(
            "{} {} data too short",
            label, address
        )));
    }
    let mut cursor = &acc.data[DISCRIMINATOR_LEN..];
    T::deserialize(&mut cursor).map_err(|e| {
        RoundError::Authoritative(format!("failed to deserialize {} {}: {}", label, address, e))
    })
}

/// Fetch and deserialize Config account
pub fn get_config_account(
    client: &RpcClient,
    commitment: CommitmentConfig,
    program_id: &Pubkey,
) -> Result<ConfigAccount> {
    let config_pda = derive_config_pda(program_id);
    let acc = client
        .get_account_with_commitment(&config_pda, commitment)
        .map_err(|e| classify_client_error(&e))?
        .value
        .ok_or_else(|| RoundError::state(format!("config account {} not initialized", config_pda)))?;

    decode_account("config", &config_pda, &acc, program_id)
}

pub fn get_round_account(
    client: &RpcClient,
    commitment: CommitmentConfig,
    program_id: &Pubkey,
    round_id: u64,
) -> Result<RoundAccount> {
    let round_pda = derive_round_pda(program_id, round_id);
    let acc = client
        .get_account_with_commitment(&round_pda, commitment)
        .map_err(|e| classify_client_error(&e))?
        .value
        .ok_or(RoundError::RoundNotFound(round_id))?;

    decode_account("round", &round_pda, &acc, program_id)
}

/// Fetch and deserialize multiple Round accounts by their IDs. Missing or
/// foreign accounts are skipped.
pub fn get_rounds_by_ids(
    client: &RpcClient,
    commitment: CommitmentConfig,
    program_id: &Pubkey,
    ids: &[u64],
) -> Result<Vec<RoundAccount>> {
    let pubkeys: Vec<Pubkey> = ids
        .iter()
        .map(|&id| derive_round_pda(program_id, id))
        .collect();
    let accounts = client
        .get_multiple_accounts_with_commitment(&pubkeys, commitment)
        .map_err(|e| classify_client_error(&e))?
        .value;

    let mut out = Vec::with_capacity(ids.len());
    for (pda, acc_opt) in pubkeys.iter().zip(accounts.into_iter()) {
        let Some(acc) = acc_opt else { continue };
        match decode_account::<RoundAccount>("round", pda, &acc, program_id) {
            Ok(round) => out.push(round),
            Err(err) => tracing::warn!(round = %pda, error = %err, "skipping undecodable round account"),
        }
    }

    Ok(out)
}

#[derive(AnchorSerialize, AnchorDeserialize)]
struct PlaceBetArgs {
    outcome: Outcome,
    amount: u64,
}

#[derive(AnchorSerialize)]
struct FinalizeOutcomeArgs {
    outcome: Outcome,
}

#[derive(AnchorSerialize)]
struct WithdrawWinningsArgs {
    round_id: u64,
}

pub fn place_bet_ix(
    program_id: &Pubkey,
    system_program_id: &Pubkey,
    bettor: &Pubkey,
    round_id: u64,
    outcome: Outcome,
    amount: u64,
) -> Result<Instruction> {
    let round_pda = derive_round_pda(program_id, round_id);
    let accounts = vec![
        AccountMeta::new(*bettor, true),
        AccountMeta::new_readonly(derive_config_pda(program_id), false),
        AccountMeta::new(round_pda, false),
        AccountMeta::new(derive_round_vault_pda(program_id, &round_pda), false),
        AccountMeta::new(derive_position_pda(program_id, &round_pda, bettor), false),
        AccountMeta::new_readonly(*system_program_id, false),
    ];

    Ok(Instruction {
        data: instruction_data("place_bet", &PlaceBetArgs { outcome, amount })?,
        accounts,
        program_id: *program_id,
    })
}

pub fn close_betting_ix(program_id: &Pubkey, admin: &Pubkey, round_id: u64) -> Instruction {
    Instruction {
        data: sighash_global("close_betting").to_vec(),
        accounts: vec![
            AccountMeta::new(*admin, true),
            AccountMeta::new_readonly(derive_config_pda(program_id), false),
            AccountMeta::new(derive_round_pda(program_id, round_id), false),
        ],
        program_id: *program_id,
    }
}

pub fn finalize_outcome_ix(
    program_id: &Pubkey,
    admin: &Pubkey,
    round_id: u64,
    outcome: Outcome,
) -> Result<Instruction> {
    Ok(Instruction {
        data: instruction_data("finalize_outcome", &FinalizeOutcomeArgs { outcome })?,
        accounts: vec![
            AccountMeta::new(*admin, true),
            AccountMeta::new_readonly(derive_config_pda(program_id), false),
            AccountMeta::new(derive_round_pda(program_id, round_id), false),
        ],
        program_id: *program_id,
    })
}

pub fn start_new_round_ix(
    program_id: &Pubkey,
    system_program_id: &Pubkey,
    admin: &Pubkey,
    next_id: u64,
) -> Instruction {
    let round_pda = derive_round_pda(program_id, next_id);
    Instruction {
        data: sighash_global("start_new_round").to_vec(),
        accounts: vec![
            AccountMeta::new(*admin, true),
            AccountMeta::new(derive_config_pda(program_id), false),
            AccountMeta::new(round_pda, false),
            AccountMeta::new(derive_round_vault_pda(program_id, &round_pda), false),
            AccountMeta::new_readonly(*system_program_id, false),
        ],
        program_id: *program_id,
    }
}

pub fn withdraw_winnings_ix(
    program_id: &Pubkey,
    system_program_id: &Pubkey,
    bettor: &Pubkey,
    round_id: u64,
) -> Result<Instruction> {
    let round_pda = derive_round_pda(program_id, round_id);
    Ok(Instruction {
        data: instruction_data("withdraw_winnings", &WithdrawWinningsArgs { round_id })?,
        accounts: vec![
            AccountMeta::new(*bettor, true),
            AccountMeta::new_readonly(derive_config_pda(program_id), false),
            AccountMeta::new_readonly(round_pda, false),
            AccountMeta::new(derive_round_vault_pda(program_id, &round_pda), false),
            AccountMeta::new(derive_position_pda(program_id, &round_pda, bettor), false),
            AccountMeta::new_readonly(*system_program_id, false),
        ],
        program_id: *program_id,
    })
}

/// Finds the `place_bet` instruction a transaction sent to `program_id`
/// against round `round_id`. The bettor is the signing first account.
pub fn decode_place_bet(tx: &VersionedTransaction, program_id: &Pubkey, round_id: u64) -> Option<PlacedBet> {
    let message = &tx.message;
    let keys = message.static_account_keys();
    let round_pda = derive_round_pda(program_id, round_id);
    let discriminator = sighash_global("place_bet");

    message.instructions().iter().find_map(|ix| {
        if keys.get(ix.program_id_index as usize) != Some(program_id) {
            return None;
        }
        let mut args = ix.data.strip_prefix(&discriminator[..])?;
        let bettor_index = *ix.accounts.first()? as usize;
        let round_index = *ix.accounts.get(2)? as usize;
        if !message.is_signer(bettor_index) || keys.get(round_index) != Some(&round_pda) {
            return None;
        }
        let args = PlaceBetArgs::deserialize(&mut args).ok()?;
        Some(PlacedBet {
            round_id,
            bettor: keys.get(bettor_index)?.to_string(),
            outcome: args.outcome,
            amount: args.amount,
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sighash_is_anchor_global_namespace() {
        let expected: [u8; 8] = {
            let hash = Sha256::digest(b"global:place_bet");
            let mut out = [0u8; 8];
            out.copy_from_slice(&hash[..8]);
            out
        };
        assert_eq!(sighash_global("place_bet"), expected);
        assert_ne!(sighash_global("place_bet"), sighash_global("close_betting"));
    }

    #[test]
    fn place_bet_encodes_outcome_index_then_amount() {
        let program_id = Pubkey::new_unique();
        let bettor = Pubkey::new_unique();
        let ix = place_bet_ix(&program_id, &Pubkey::default(), &bettor, 3, Outcome::B, 10).unwrap();
        assert_eq!(&ix.data[..8], &sighash_global("place_bet"));
        assert_eq!(ix.data[8], 1);
        assert_eq!(&ix.data[9..17], &10u64.to_le_bytes());
        assert!(ix.accounts[0].is_signer);
        assert_eq!(ix.accounts[2].pubkey, derive_round_pda(&program_id, 3));
    }

    fn versioned(ixs: &[Instruction], payer: &Pubkey) -> VersionedTransaction {
        use solana_sdk::message::{Message, VersionedMessage};
        use solana_sdk::signature::Signature;
        VersionedTransaction {
            signatures: vec![Signature::default()],
            message: VersionedMessage::Legacy(Message::new(ixs, Some(payer))),
        }
    }

    #[test]
    fn place_bet_is_read_back_from_its_transaction() {
        let program_id = Pubkey::new_unique();
        let bettor = Pubkey::new_unique();
        let ix = place_bet_ix(&program_id, &Pubkey::default(), &bettor, 4, Outcome::A, 25).unwrap();
        let tx = versioned(&[ix], &bettor);

        let placed = decode_place_bet(&tx, &program_id, 4).unwrap();
        assert_eq!(placed.bettor, bettor.to_string());
        assert_eq!(placed.outcome, Outcome::A);
        assert_eq!(placed.amount, 25);
        assert!(decode_place_bet(&tx, &program_id, 5).is_none());
        assert!(decode_place_bet(&tx, &Pubkey::new_unique(), 4).is_none());
    }

    #[test]
    fn non_bet_transactions_carry_no_bet() {
        let program_id = Pubkey::new_unique();
        let admin = Pubkey::new_unique();
        let tx = versioned(&[close_betting_ix(&program_id, &admin, 1)], &admin);
        assert!(decode_place_bet(&tx, &program_id, 1).is_none());
    }

    #[test]
    fn decode_rejects_foreign_owner() {
        let program_id = Pubkey::new_unique();
        let acc = Account {
            lamports: 1,
            data: vec![0; 64],
            owner: Pubkey::new_unique(),
            executable: false,
            rent_epoch: 0,
        };
        let res = decode_account::<RoundAccount>("round", &Pubkey::new_unique(), &acc, &program_id);
        assert!(matches!(res, Err(RoundError::Authoritative(_))));
    }
}
