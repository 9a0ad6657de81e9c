//! Bonding-curve swap instruction builder (pump.fun style)
//!
//! Data layout, 24 bytes little-endian:
//! `[discriminator x8][u64 amount_or_zero][u64 bound]`
//! Buys use max-cost semantics: amount is zero and the bound carries the
//! maximum lamports the buyer will spend. Sells carry the token amount and a
//! slippage-bounded minimum lamports out.

use solana_sdk::{
    instruction::{AccountMeta, Instruction},
    pubkey::Pubkey,
    system_program,
};
use std::str::FromStr;

use crate::bonding_curve_state::{
    derive_associated_token_account, program_id, BondingCurveState,
};
use crate::constants;
use crate::error::BuildError;

/// Buy account order:
/// 0  global
/// 1  fee_recipient
/// 2  mint
/// 3  bonding_curve
/// 4  associated_bonding_curve
/// 5  associated_user
/// 6  user (signer, writable)
/// 7  system_program
/// 8  token_program
/// 9  creator_vault
/// 10 event_authority
/// 11 program
/// 12 global_volume_accumulator
/// 13 user_volume_accumulator
/// 14 fee_config
/// 15 fee_program
pub const BUY_ACCOUNT_COUNT: usize = 16;

/// Sell reuses slots 0..9 with creator_vault swapped before token_program,
/// and drops the volume accumulators.
pub const SELL_ACCOUNT_COUNT: usize = 14;

pub fn build_buy_instruction(
    state: &BondingCurveState,
    user_wallet: &Pubkey,
    max_sol_cost: u64,
) -> Result<Instruction, BuildError> {
    if max_sol_cost == 0 {
        return Err(BuildError::ZeroQuote);
    }
    let program = program_id();
    let associated_user =
        derive_associated_token_account(user_wallet, &state.mint, &spl_token::id());

    let mut data = Vec::with_capacity(24);
    data.extend_from_slice(&constants::BONDING_CURVE_BUY_DISCRIMINATOR);
    data.extend_from_slice(&0u64.to_le_bytes());
    data.extend_from_slice(&max_sol_cost.to_le_bytes());

    let (global_volume, _) =
        Pubkey::find_program_address(&[b"global_volume_accumulator"], &program);
    let (user_volume, _) = Pubkey::find_program_address(
        &[b"user_volume_accumulator", user_wallet.as_ref()],
        &program,
    );
    let fee_program = parse(constants::BONDING_CURVE_FEE_PROGRAM);
    let (fee_config, _) =
        Pubkey::find_program_address(&[b"fee_config", program.as_ref()], &fee_program);

    let accounts = vec![
        AccountMeta::new(parse(constants::BONDING_CURVE_GLOBAL), false),
        AccountMeta::new(parse(constants::BONDING_CURVE_FEE_RECIPIENT), false),
        AccountMeta::new_readonly(state.mint, false),
        AccountMeta::new(state.bonding_curve, false),
        AccountMeta::new(state.associated_bonding_curve, false),
        AccountMeta::new(associated_user, false),
        AccountMeta::new(*user_wallet, true),
        AccountMeta::new_readonly(system_program::id(), false),
        AccountMeta::new_readonly(spl_token::id(), false),
        AccountMeta::new(state.creator_vault, false),
        AccountMeta::new_readonly(parse(constants::BONDING_CURVE_EVENT_AUTHORITY), false),
        AccountMeta::new_readonly(program, false),
        AccountMeta::new(global_volume, false),
        AccountMeta::new(user_volume, false),
        AccountMeta::new_readonly(fee_config, false),
        AccountMeta::new_readonly(fee_program, false),
    ];

    Ok(Instruction {
        program_id: program,
        accounts,
        data,
    })
}

pub fn build_sell_instruction(
    state: &BondingCurveState,
    user_wallet: &Pubkey,
    token_amount: u64,
    min_sol_out: u64,
) -> Result<Instruction, BuildError> {
    if token_amount == 0 {
        return Err(BuildError::ZeroQuote);
    }
    let program = program_id();
    let associated_user =
        derive_associated_token_account(user_wallet, &state.mint, &spl_token::id());

    let mut data = Vec::with_capacity(24);
    data.extend_from_slice(&constants::BONDING_CURVE_SELL_DISCRIMINATOR);
    data.extend_from_slice(&token_amount.to_le_bytes());
    data.extend_from_slice(&min_sol_out.to_le_bytes());

    let fee_program = parse(constants::BONDING_CURVE_FEE_PROGRAM);
    let (fee_config, _) =
        Pubkey::find_program_address(&[b"fee_config", program.as_ref()], &fee_program);

    let accounts = vec![
        AccountMeta::new(parse(constants::BONDING_CURVE_GLOBAL), false),
        AccountMeta::new(parse(constants::BONDING_CURVE_FEE_RECIPIENT), false),
        AccountMeta::new_readonly(state.mint, false),
        AccountMeta::new(state.bonding_curve, false),
        AccountMeta::new(state.associated_bonding_curve, false),
        AccountMeta::new(associated_user, false),
        AccountMeta::new(*user_wallet, true),
        AccountMeta::new_readonly(system_program::id(), false),
        AccountMeta::new(state.creator_vault, false),
        AccountMeta::new_readonly(spl_token::id(), false),
        AccountMeta::new_readonly(parse(constants::BONDING_CURVE_EVENT_AUTHORITY), false),
        AccountMeta::new_readonly(program, false),
        AccountMeta::new_readonly(fee_config, false),
        AccountMeta::new_readonly(fee_program, false),
    ];

    Ok(Instruction {
        program_id: program,
        accounts,
        data,
    })
}

fn parse(address: &str) -> Pubkey {
    Pubkey::from_str(address).expect("valid constant address")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bonding_curve_state::{synthetic_curve_data, derive_bonding_curve};

    fn state() -> BondingCurveState {
        let mint = Pubkey::new_unique();
        let creator = Pubkey::new_unique();
        let data = synthetic_curve_data(
            1_000_000_000_000,
            30_000_000_000,
            800_000_000_000,
            10_000_000_000,
            &creator,
        );
        BondingCurveState::parse(&mint, &data).unwrap()
    }

    #[test]
    fn test_buy_payload_uses_max_cost_semantics() {
        let state = state();
        let user = Pubkey::new_unique();
        let ix = build_buy_instruction(&state, &user, 100_000_000).unwrap();

        assert_eq!(ix.data.len(), 24);
        assert_eq!(&ix.data[0..8], &constants::BONDING_CURVE_BUY_DISCRIMINATOR);
        // Buys encode amount = 0 and carry the cost bound instead
        assert_eq!(&ix.data[8..16], &0u64.to_le_bytes());
        assert_eq!(&ix.data[16..24], &100_000_000u64.to_le_bytes());

        assert_eq!(ix.accounts.len(), BUY_ACCOUNT_COUNT);
        assert_eq!(ix.accounts[2].pubkey, state.mint);
        assert_eq!(ix.accounts[3].pubkey, state.bonding_curve);
        assert_eq!(ix.accounts[4].pubkey, state.associated_bonding_curve);
        assert_eq!(ix.accounts[6].pubkey, user);
        assert!(ix.accounts[6].is_signer);
        assert_eq!(ix.accounts[9].pubkey, state.creator_vault);
    }

    #[test]
    fn test_sell_payload_carries_token_amount_and_min_out() {
        let state = state();
        let user = Pubkey::new_unique();
        let ix = build_sell_instruction(&state, &user, 5_000_000, 1_234).unwrap();

        assert_eq!(ix.data.len(), 24);
        assert_eq!(&ix.data[0..8], &constants::BONDING_CURVE_SELL_DISCRIMINATOR);
        assert_eq!(&ix.data[8..16], &5_000_000u64.to_le_bytes());
        assert_eq!(&ix.data[16..24], &1_234u64.to_le_bytes());
        assert_eq!(ix.accounts.len(), SELL_ACCOUNT_COUNT);
        assert!(ix.accounts[6].is_signer);
    }

    #[test]
    fn test_zero_amounts_are_rejected() {
        let state = state();
        let user = Pubkey::new_unique();
        assert!(matches!(
            build_buy_instruction(&state, &user, 0),
            Err(BuildError::ZeroQuote)
        ));
        assert!(matches!(
            build_sell_instruction(&state, &user, 0, 1),
            Err(BuildError::ZeroQuote)
        ));
    }

    #[test]
    fn test_curve_accounts_derive_from_mint() {
        let state = state();
        let (expected_curve, _) = derive_bonding_curve(&state.mint);
        assert_eq!(state.bonding_curve, expected_curve);
    }
}
