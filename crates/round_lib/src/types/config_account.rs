use anchor_lang::prelude::*;

#[derive(AnchorSerialize, AnchorDeserialize, Clone, Debug)]
pub struct ConfigAccount {
    pub admin: Pubkey,
    pub treasury: Pubkey,
    /// Id of the highest round created so far; zero before genesis.
    pub current_round: u64,
    pub version: u8,
    pub bump: u8,
}
