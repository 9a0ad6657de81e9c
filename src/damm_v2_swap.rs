//! Dynamic constant-product AMM swap instruction builder (Meteora DAMM v2 style)
//!
//! Data layout, 24 bytes little-endian:
//! `[discriminator x8][u64 amount_in][u64 min_out]`
//! Token programs are selected per pool side: classic or 2022.

use solana_sdk::{
    instruction::{AccountMeta, Instruction},
    pubkey::Pubkey,
};

use crate::constants;
use crate::damm_v2_state::{
    derive_event_authority, derive_pool_authority, program_id, DammV2PoolState,
};
use crate::error::BuildError;

/// Swap account order:
/// 0  pool_authority
/// 1  pool
/// 2  user_input_token
/// 3  user_output_token
/// 4  token_a_vault
/// 5  token_b_vault
/// 6  token_a_mint
/// 7  token_b_mint
/// 8  payer (signer)
/// 9  token_a_program
/// 10 token_b_program
/// 11 referral (program id when absent)
/// 12 event_authority
/// 13 program
pub const SWAP_ACCOUNT_COUNT: usize = 14;

pub fn build_swap_instruction(
    state: &DammV2PoolState,
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
        AccountMeta::new(state.pool, false),
        AccountMeta::new(*user_input_token, false),
        AccountMeta::new(*user_output_token, false),
        AccountMeta::new(state.token_a_vault, false),
        AccountMeta::new(state.token_b_vault, false),
        AccountMeta::new_readonly(state.token_a_mint, false),
        AccountMeta::new_readonly(state.token_b_mint, false),
        AccountMeta::new(*payer, true),
        AccountMeta::new_readonly(state.token_a_program(), false),
        AccountMeta::new_readonly(state.token_b_program(), false),
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
