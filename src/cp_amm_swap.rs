//! Constant-product AMM swap instruction builder (Raydium AMM V4 style)
//!
//! Data layout, 17 bytes little-endian:
//! `[u8 opcode = 9][u64 amount_in][u64 min_out]`

use solana_sdk::{
    instruction::{AccountMeta, Instruction},
    pubkey::Pubkey,
};

use crate::constants;
use crate::cp_amm_state::{program_id, CpAmmPoolState};
use crate::error::BuildError;

/// Swap account order:
/// 0  token_program
/// 1  amm_id (pool)
/// 2  amm_authority
/// 3  amm_open_orders
/// 4  amm_target_orders
/// 5  pool_coin_vault
/// 6  pool_pc_vault
/// 7  serum_program
/// 8  serum_market
/// 9  user_source_token_account
/// 10 user_destination_token_account
/// 11 user_owner (signer)
pub const SWAP_ACCOUNT_COUNT: usize = 12;

pub fn build_swap_instruction(
    state: &CpAmmPoolState,
    user_source_token: &Pubkey,
    user_dest_token: &Pubkey,
    user_owner: &Pubkey,
    amount_in: u64,
    min_amount_out: u64,
) -> Result<Instruction, BuildError> {
    if amount_in == 0 {
        return Err(BuildError::ZeroQuote);
    }

    let mut data = Vec::with_capacity(17);
    data.push(constants::CP_AMM_SWAP_OPCODE);
    data.extend_from_slice(&amount_in.to_le_bytes());
    data.extend_from_slice(&min_amount_out.to_le_bytes());

    let accounts = vec![
        AccountMeta::new_readonly(spl_token::id(), false),
        AccountMeta::new(state.amm_id, false),
        AccountMeta::new_readonly(state.amm_authority, false),
        AccountMeta::new(state.amm_open_orders, false),
        AccountMeta::new(state.amm_target_orders, false),
        AccountMeta::new(state.pool_coin_vault, false),
        AccountMeta::new(state.pool_pc_vault, false),
        AccountMeta::new_readonly(state.serum_program_id, false),
        AccountMeta::new(state.serum_market, false),
        AccountMeta::new(*user_source_token, false),
        AccountMeta::new(*user_dest_token, false),
        AccountMeta::new_readonly(*user_owner, true),
    ];

    Ok(Instruction {
        program_id: program_id(),
        accounts,
        data,
    })
}
