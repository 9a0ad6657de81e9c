//! Constant-product AMM V2 swap instruction builder (Raydium CPMM style)
//!
//! Data layout, 24 bytes little-endian:
//! `[discriminator x8][u64 amount_in][u64 min_out]`

use solana_sdk::{
    instruction::{AccountMeta, Instruction},
    pubkey::Pubkey,
};

use crate::constants;
use crate::cpmm_state::{derive_authority, program_id, CpmmPoolState};
use crate::error::BuildError;

/// Swap-base-in account order:
/// 0  payer (signer)
/// 1  authority
/// 2  amm_config
/// 3  pool_state
/// 4  user_input_token
/// 5  user_output_token
/// 6  input_vault
/// 7  output_vault
/// 8  input_token_program
/// 9  output_token_program
/// 10 input_token_mint
/// 11 output_token_mint
/// 12 observation_state
pub const SWAP_ACCOUNT_COUNT: usize = 13;

pub fn build_swap_instruction(
    state: &CpmmPoolState,
    input_mint: &Pubkey,
    user_input_token: &Pubkey,
    user_output_token: &Pubkey,
    payer: &Pubkey,
    amount_in: u64,
    min_amount_out: u64,
) -> Result<Instruction, BuildError> {
    if amount_in == 0 {
        return Err(BuildError::ZeroQuote);
    }
    let sides = state.orient(input_mint)?;

    let mut data = Vec::with_capacity(24);
    data.extend_from_slice(&constants::CPMM_SWAP_BASE_IN_DISCRIMINATOR);
    data.extend_from_slice(&amount_in.to_le_bytes());
    data.extend_from_slice(&min_amount_out.to_le_bytes());

    let accounts = vec![
        AccountMeta::new(*payer, true),
        AccountMeta::new_readonly(derive_authority(), false),
        AccountMeta::new_readonly(state.amm_config, false),
        AccountMeta::new(state.pool, false),
        AccountMeta::new(*user_input_token, false),
        AccountMeta::new(*user_output_token, false),
        AccountMeta::new(sides.input_vault, false),
        AccountMeta::new(sides.output_vault, false),
        AccountMeta::new_readonly(sides.input_token_program, false),
        AccountMeta::new_readonly(sides.output_token_program, false),
        AccountMeta::new_readonly(sides.input_mint, false),
        AccountMeta::new_readonly(sides.output_mint, false),
        AccountMeta::new(state.observation_key, false),
    ];

    Ok(Instruction {
        program_id: program_id(),
        accounts,
        data,
    })
}
