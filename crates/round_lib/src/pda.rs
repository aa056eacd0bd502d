use solana_sdk::pubkey::Pubkey;

pub fn derive_config_pda(program_id: &Pubkey) -> Pubkey {
    Pubkey::find_program_address(&[b"config"], program_id).0
}

pub fn derive_round_pda(program_id: &Pubkey, round_id: u64) -> Pubkey {
    Pubkey::find_program_address(&[b"round", &round_id.to_le_bytes()], program_id).0
}

pub fn derive_round_vault_pda(program_id: &Pubkey, round_pda: &Pubkey) -> Pubkey {
    Pubkey::find_program_address(&[b"vault", round_pda.as_ref()], program_id).0
}

/// Per-bettor stake position inside a round; the program marks it withdrawn.
pub fn derive_position_pda(program_id: &Pubkey, round_pda: &Pubkey, bettor: &Pubkey) -> Pubkey {
    Pubkey::find_program_address(
        &[b"position", round_pda.as_ref(), bettor.as_ref()],
        program_id,
    )
    .0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_pdas_are_distinct_per_id() {
        let program_id = Pubkey::new_unique();
        let r1 = derive_round_pda(&program_id, 1);
        let r2 = derive_round_pda(&program_id, 2);
        assert_ne!(r1, r2);
        assert_eq!(r1, derive_round_pda(&program_id, 1));
        assert_ne!(derive_round_vault_pda(&program_id, &r1), r1);
    }

    #[test]
    fn positions_are_scoped_to_round_and_bettor() {
        let program_id = Pubkey::new_unique();
        let bettor = Pubkey::new_unique();
        let r1 = derive_round_pda(&program_id, 1);
        let r2 = derive_round_pda(&program_id, 2);
        assert_ne!(
            derive_position_pda(&program_id, &r1, &bettor),
            derive_position_pda(&program_id, &r2, &bettor)
        );
    }
}
