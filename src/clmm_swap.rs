//! Concentrated-liquidity swap instruction builder (Raydium CLMM style)
//!
//! Data layout, 33 bytes little-endian:
//! `[discriminator x8][u64 amount][u64 other_threshold][u64 sqrt_price_limit_lo][u8 is_base_input]`
//! The traversed tick arrays follow the nine primary accounts as writable
//! remaining accounts.

use solana_sdk::{
    instruction::{AccountMeta, Instruction},
    pubkey::Pubkey,
};

use crate::clmm_state::{derive_tick_array_address, program_id, ClmmPoolBundle};
use crate::constants;
use crate::error::BuildError;

/// Primary account order:
/// 0 payer (signer)
/// 1 amm_config
/// 2 pool_state
/// 3 user_input_token
/// 4 user_output_token
/// 5 input_vault
/// 6 output_vault
/// 7 observation_state
/// 8 token_program
/// then one writable tick array per traversed array, in traversal order
pub const PRIMARY_ACCOUNT_COUNT: usize = 9;

#[allow(clippy::too_many_arguments)]
pub fn build_swap_instruction(
    bundle: &ClmmPoolBundle,
    user_input_token: &Pubkey,
    user_output_token: &Pubkey,
    payer: &Pubkey,
    amount_in: u64,
    min_amount_out: u64,
    sqrt_price_limit_lo: u64,
    is_base_input: bool,
    tick_array_starts: &[i32],
) -> Result<Instruction, BuildError> {
    if amount_in == 0 {
        return Err(BuildError::ZeroQuote);
    }
    let pool = &bundle.pool;

    let mut data = Vec::with_capacity(33);
    data.extend_from_slice(&constants::CLMM_SWAP_V2_DISCRIMINATOR);
    data.extend_from_slice(&amount_in.to_le_bytes());
    data.extend_from_slice(&min_amount_out.to_le_bytes());
    data.extend_from_slice(&sqrt_price_limit_lo.to_le_bytes());
    data.push(is_base_input as u8);

    let (input_vault, output_vault) = if is_base_input {
        (pool.token_vault_0, pool.token_vault_1)
    } else {
        (pool.token_vault_1, pool.token_vault_0)
    };

    let mut accounts = vec![
        AccountMeta::new(*payer, true),
        AccountMeta::new_readonly(pool.amm_config, false),
        AccountMeta::new(pool.pool, false),
        AccountMeta::new(*user_input_token, false),
        AccountMeta::new(*user_output_token, false),
        AccountMeta::new(input_vault, false),
        AccountMeta::new(output_vault, false),
        AccountMeta::new(pool.observation_key, false),
        AccountMeta::new_readonly(spl_token::id(), false),
    ];
    for &start in tick_array_starts {
        let address = bundle
            .tick_arrays
            .iter()
            .find(|a| a.start_tick_index == start)
            .map(|a| a.address)
            .unwrap_or_else(|| derive_tick_array_address(&pool.pool, start));
        accounts.push(AccountMeta::new(address, false));
    }

    Ok(Instruction {
        program_id: program_id(),
        accounts,
        data,
    })
}
