//! Bin-liquidity AMM swap instruction builder (Meteora DLMM style)
//!
//! Data layout, 24 bytes little-endian:
//! `[discriminator x8][u64 amount_in][u64 min_out]`
//! The generator emits a compute-budget instruction ahead of the swap the
//! way the pool SDK does; the caller strips it because the executor owns
//! compute budgeting.

use solana_sdk::{
    instruction::{AccountMeta, Instruction},
    pubkey::Pubkey,
};
use std::str::FromStr;

use crate::constants;
use crate::dlmm_state::{derive_event_authority, program_id, DlmmPairState};
use crate::error::BuildError;

/// Swap account order:
/// 0  lb_pair
/// 1  bin_array_bitmap_extension (program id when absent)
/// 2  reserve_x
/// 3  reserve_y
/// 4  user_token_in
/// 5  user_token_out
/// 6  token_x_mint
/// 7  token_y_mint
/// 8  oracle
/// 9  host_fee_in (program id when absent)
/// 10 user (signer)
/// 11 token_x_program
/// 12 token_y_program
/// 13 event_authority
/// 14 program
/// then one writable bin array per potentially traversed array
pub const PRIMARY_ACCOUNT_COUNT: usize = 15;

/// Generate the instruction sequence the way the pool SDK would: a
/// compute-budget request followed by the swap itself.
pub fn generate_swap_sequence(
    state: &DlmmPairState,
    user_token_in: &Pubkey,
    user_token_out: &Pubkey,
    user: &Pubkey,
    amount_in: u64,
    min_amount_out: u64,
) -> Result<Vec<Instruction>, BuildError> {
    if amount_in == 0 {
        return Err(BuildError::ZeroQuote);
    }
    let program = program_id();

    let mut data = Vec::with_capacity(24);
    data.extend_from_slice(&constants::ANCHOR_SWAP_DISCRIMINATOR);
    data.extend_from_slice(&amount_in.to_le_bytes());
    data.extend_from_slice(&min_amount_out.to_le_bytes());

    // Orientation is carried by the user token accounts
    let (user_in, user_out) = (*user_token_in, *user_token_out);

    let mut accounts = vec![
        AccountMeta::new(state.lb_pair, false),
        AccountMeta::new_readonly(program, false),
        AccountMeta::new(state.reserve_x, false),
        AccountMeta::new(state.reserve_y, false),
        AccountMeta::new(user_in, false),
        AccountMeta::new(user_out, false),
        AccountMeta::new_readonly(state.token_x_mint, false),
        AccountMeta::new_readonly(state.token_y_mint, false),
        AccountMeta::new(state.oracle, false),
        AccountMeta::new_readonly(program, false),
        AccountMeta::new(*user, true),
        AccountMeta::new_readonly(spl_token::id(), false),
        AccountMeta::new_readonly(spl_token::id(), false),
        AccountMeta::new_readonly(derive_event_authority(), false),
        AccountMeta::new_readonly(program, false),
    ];
    for bin_array in state.swap_bin_arrays() {
        accounts.push(AccountMeta::new(bin_array, false));
    }

    let swap = Instruction {
        program_id: program,
        accounts,
        data,
    };

    // SDK-style compute budget request preceding the swap
    let compute_budget = Instruction {
        program_id: Pubkey::from_str(constants::COMPUTE_BUDGET_PROGRAM_ID)
            .expect("valid program id"),
        accounts: vec![],
        data: {
            let mut d = vec![2u8]; // set-compute-unit-limit opcode
            d.extend_from_slice(&1_400_000u32.to_le_bytes());
            d
        },
    };

    Ok(vec![compute_budget, swap])
}

/// Remove any compute-budget instructions a generator added
pub fn strip_compute_budget(instructions: Vec<Instruction>) -> Vec<Instruction> {
    let compute_budget =
        Pubkey::from_str(constants::COMPUTE_BUDGET_PROGRAM_ID).expect("valid program id");
    instructions
        .into_iter()
        .filter(|ix| ix.program_id != compute_budget)
        .collect()
}

/// Quote and emit the bare swap instruction
pub fn build_swap_instruction(
    state: &DlmmPairState,
    user_token_in: &Pubkey,
    user_token_out: &Pubkey,
    user: &Pubkey,
    amount_in: u64,
    min_amount_out: u64,
) -> Result<Instruction, BuildError> {
    let sequence = generate_swap_sequence(
        state,
        user_token_in,
        user_token_out,
        user,
        amount_in,
        min_amount_out,
    )?;
    let mut stripped = strip_compute_budget(sequence);
    match stripped.pop() {
        Some(swap) if stripped.is_empty() => Ok(swap),
        _ => Err(BuildError::ZeroQuote),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dlmm_state::synthetic_pair_data;

    fn state() -> DlmmPairState {
        let lb_pair = Pubkey::new_unique();
        let data = synthetic_pair_data(&Pubkey::new_unique(), &Pubkey::new_unique(), 25, 0, 1_000);
        DlmmPairState::parse(&lb_pair, &data).unwrap()
    }

    #[test]
    fn test_generator_prepends_compute_budget() {
        let state = state();
        let sequence = generate_swap_sequence(
            &state,
            &Pubkey::new_unique(),
            &Pubkey::new_unique(),
            &Pubkey::new_unique(),
            1_000_000,
            990_000,
        )
        .unwrap();
        assert_eq!(sequence.len(), 2);
        assert_eq!(
            sequence[0].program_id.to_string(),
            constants::COMPUTE_BUDGET_PROGRAM_ID
        );
    }

    #[test]
    fn test_builder_strips_compute_budget() {
        let state = state();
        let ix = build_swap_instruction(
            &state,
            &Pubkey::new_unique(),
            &Pubkey::new_unique(),
            &Pubkey::new_unique(),
            1_000_000,
            990_000,
        )
        .unwrap();
        assert_eq!(ix.program_id, program_id());
        assert_eq!(ix.data.len(), 24);
        assert_eq!(&ix.data[0..8], &constants::ANCHOR_SWAP_DISCRIMINATOR);
        assert_eq!(&ix.data[8..16], &1_000_000u64.to_le_bytes());
        assert_eq!(&ix.data[16..24], &990_000u64.to_le_bytes());
    }

    #[test]
    fn test_accounts_include_bin_arrays_after_primaries() {
        let state = state();
        let user = Pubkey::new_unique();
        let ix = build_swap_instruction(
            &state,
            &Pubkey::new_unique(),
            &Pubkey::new_unique(),
            &user,
            1_000_000,
            990_000,
        )
        .unwrap();
        assert_eq!(ix.accounts.len(), PRIMARY_ACCOUNT_COUNT + 3);
        assert_eq!(ix.accounts[0].pubkey, state.lb_pair);
        assert_eq!(ix.accounts[10].pubkey, user);
        assert!(ix.accounts[10].is_signer);
        for extra in &ix.accounts[PRIMARY_ACCOUNT_COUNT..] {
            assert!(extra.is_writable);
            assert!(!extra.is_signer);
        }
    }

    #[test]
    fn test_strip_keeps_non_budget_instructions() {
        let keep = Instruction {
            program_id: Pubkey::new_unique(),
            accounts: vec![],
            data: vec![1, 2, 3],
        };
        let drop = Instruction {
            program_id: Pubkey::from_str(constants::COMPUTE_BUDGET_PROGRAM_ID).unwrap(),
            accounts: vec![],
            data: vec![2, 0, 0, 0, 0],
        };
        let stripped = strip_compute_budget(vec![drop.clone(), keep.clone(), drop]);
        assert_eq!(stripped.len(), 1);
        assert_eq!(stripped[0].data, keep.data);
    }
}
