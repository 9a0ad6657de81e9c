//! Launchpad curve swap instruction builder (Raydium Launchpad style)
//!
//! Data layout, 32 bytes little-endian:
//! `[discriminator x8][u64 amount_in][u64 min_out][u64 share_fee_rate]`
//! Direction selects the buy-exact-in or sell-exact-in discriminator; the
//! share fee rate is always zero here.

use solana_sdk::{
    instruction::{AccountMeta, Instruction},
    pubkey::Pubkey,
};

use crate::constants;
use crate::error::BuildError;
use crate::launchpad_state::{
    derive_authority, derive_creator_vault, derive_event_authority, derive_platform_vault,
    program_id, LaunchpadPoolState,
};
use crate::types::Direction;

/// Account order (both directions):
/// 0  payer (signer)
/// 1  authority
/// 2  global_config
/// 3  platform_config
/// 4  pool_state
/// 5  user_base_token
/// 6  user_quote_token
/// 7  base_vault
/// 8  quote_vault
/// 9  base_token_mint
/// 10 quote_token_mint
/// 11 platform_vault
/// 12 creator_vault
/// 13 base_token_program
/// 14 quote_token_program
/// 15 event_authority
/// 16 program
pub const SWAP_ACCOUNT_COUNT: usize = 17;

pub fn build_swap_instruction(
    state: &LaunchpadPoolState,
    direction: Direction,
    user_base_token: &Pubkey,
    user_quote_token: &Pubkey,
    payer: &Pubkey,
    amount_in: u64,
    min_amount_out: u64,
) -> Result<Instruction, BuildError> {
    if amount_in == 0 {
        return Err(BuildError::ZeroQuote);
    }
    let program = program_id();

    let discriminator = match direction {
        Direction::Buy => constants::LAUNCHPAD_BUY_EXACT_IN_DISCRIMINATOR,
        Direction::Sell => constants::LAUNCHPAD_SELL_EXACT_IN_DISCRIMINATOR,
    };
    let mut data = Vec::with_capacity(32);
    data.extend_from_slice(&discriminator);
    data.extend_from_slice(&amount_in.to_le_bytes());
    data.extend_from_slice(&min_amount_out.to_le_bytes());
    data.extend_from_slice(&0u64.to_le_bytes());

    let accounts = vec![
        AccountMeta::new(*payer, true),
        AccountMeta::new_readonly(derive_authority(), false),
        AccountMeta::new_readonly(state.global_config, false),
        AccountMeta::new_readonly(state.platform_config, false),
        AccountMeta::new(state.pool, false),
        AccountMeta::new(*user_base_token, false),
        AccountMeta::new(*user_quote_token, false),
        AccountMeta::new(state.base_vault, false),
        AccountMeta::new(state.quote_vault, false),
        AccountMeta::new_readonly(state.base_mint, false),
        AccountMeta::new_readonly(state.quote_mint, false),
        AccountMeta::new(
            derive_platform_vault(&state.platform_config, &state.quote_mint),
            false,
        ),
        AccountMeta::new(derive_creator_vault(&state.creator, &state.quote_mint), false),
        AccountMeta::new_readonly(spl_token::id(), false),
        AccountMeta::new_readonly(spl_token::id(), false),
        AccountMeta::new_readonly(derive_event_authority(), false),
        AccountMeta::new_readonly(program, false),
    ];

    Ok(Instruction {
        program_id: program,
        accounts,
        data,
    })
}
