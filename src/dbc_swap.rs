//! Dynamic bonding-curve swap instruction builder (Meteora DBC style)
//!
//! Data layout, 24 bytes little-endian:
//! `[discriminator x8][u64 amount_in][u64 min_out]`

use solana_sdk::{
    instruction::{AccountMeta, Instruction},
    pubkey::Pubkey,
};

use crate::constants;
use crate::dbc_state::{derive_event_authority, derive_pool_authority, program_id, DbcPoolState};
use crate::error::BuildError;

/// Swap account order:
/// 0  pool_authority
/// 1  config
/// 2  virtual_pool
/// 3  user_input_token
/// 4  user_output_token
/// 5  base_vault
/// 6  quote_vault
/// 7  base_mint
/// 8  quote_mint
/// 9  payer (signer)
/// 10 token_base_program
/// 11 token_quote_program
/// 12 referral (program id when absent)
/// 13 event_authority
/// 14 program
pub const SWAP_ACCOUNT_COUNT: usize = 15;

pub fn build_swap_instruction(
    state: &DbcPoolState,
    user_input_token: &Pubkey,
    user_output_token: &Pubkey,
    payer: &Pubkey,
    amount_in: u64,
    min_amount_out: u64,
) -> Result<Instruction, BuildError> {
    if amount_in == 0 {
        return Err(BuildError::ZeroQuote);
    }
    let program = program_id();

    let mut data = Vec::with_capacity(24);
    data.extend_from_slice(&constants::ANCHOR_SWAP_DISCRIMINATOR);
    data.extend_from_slice(&amount_in.to_le_bytes());
    data.extend_from_slice(&min_amount_out.to_le_bytes());

    let accounts = vec![
        AccountMeta::new_readonly(derive_pool_authority(), false),
        AccountMeta::new_readonly(state.config, false),
        AccountMeta::new(state.virtual_pool, false),
        AccountMeta::new(*user_input_token, false),
        AccountMeta::new(*user_output_token, false),
        AccountMeta::new(state.base_vault, false),
        AccountMeta::new(state.quote_vault, false),
        AccountMeta::new_readonly(state.base_mint, false),
        AccountMeta::new_readonly(state.quote_mint, false),
        AccountMeta::new(*payer, true),
        AccountMeta::new_readonly(spl_token::id(), false),
        AccountMeta::new_readonly(spl_token::id(), false),
        AccountMeta::new_readonly(program, false),
        AccountMeta::new_readonly(derive_event_authority(), false),
        AccountMeta::new_readonly(program, false),
    ];

    Ok(Instruction {
        program_id: program,
        accounts,
        data,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dbc_state::synthetic_pool_data;

    fn state() -> DbcPoolState {
        let pool = Pubkey::new_unique();
        let data = synthetic_pool_data(
            &Pubkey::new_unique(),
            &Pubkey::new_unique(),
            &Pubkey::new_unique(),
            1_000_000_000_000,
            30_000_000_000,
        );
        DbcPoolState::parse(&pool, &data).unwrap().with_fee(10_000)
    }

    #[test]
    fn test_payload_and_account_order() {
        let state = state();
        let payer = Pubkey::new_unique();
        let ix = build_swap_instruction(
            &state,
            &Pubkey::new_unique(),
            &Pubkey::new_unique(),
            &payer,
            123,
            45,
        )
        .unwrap();

        assert_eq!(ix.data.len(), 24);
        assert_eq!(&ix.data[0..8], &constants::ANCHOR_SWAP_DISCRIMINATOR);
        assert_eq!(&ix.data[8..16], &123u64.to_le_bytes());
        assert_eq!(&ix.data[16..24], &45u64.to_le_bytes());

        assert_eq!(ix.accounts.len(), SWAP_ACCOUNT_COUNT);
        assert_eq!(ix.accounts[0].pubkey, derive_pool_authority());
        assert_eq!(ix.accounts[1].pubkey, state.config);
        assert_eq!(ix.accounts[2].pubkey, state.virtual_pool);
        assert_eq!(ix.accounts[9].pubkey, payer);
        assert!(ix.accounts[9].is_signer);
        assert_eq!(ix.accounts[13].pubkey, derive_event_authority());
    }

    #[test]
    fn test_zero_amount_rejected() {
        let state = state();
        assert!(build_swap_instruction(
            &state,
            &Pubkey::new_unique(),
            &Pubkey::new_unique(),
            &Pubkey::new_unique(),
            0,
            0,
        )
        .is_err());
    }
}
