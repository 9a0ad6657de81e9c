//! Constant-product AMM pool state (Raydium AMM V4 style)
//!
//! The pool account stores its companion accounts inline; live reserves are
//! read from the two vault token accounts. The authority is a PDA of the
//! AMM program.

use solana_sdk::pubkey::Pubkey;
use std::str::FromStr;

use crate::constants;
use crate::error::BuildError;

/// Serum DEX program the V4 pools settle against
pub const SERUM_PROGRAM_ID: &str = "9xQeWvG816bUx9EPjHmaT23yvVM2ZWbrrpZb9PusVFin";

/// Pool account layout (offsets from the published SDK):
/// - swap_fee_numerator: u64 at offset 176
/// - swap_fee_denominator: u64 at offset 184
/// then the companion pubkeys:
/// - amm_target_orders at 128 (pre-fee block), pool vaults at 160/192,
///   mints at 224/256, open orders at 320, serum market at 352,
///   serum program at 384, withdraw queue at 448, temp LP at 480
#[derive(Debug, Clone, PartialEq)]
pub struct CpAmmPoolState {
    pub amm_id: Pubkey,
    pub amm_authority: Pubkey,
    pub amm_open_orders: Pubkey,
    pub amm_target_orders: Pubkey,
    pub pool_coin_vault: Pubkey,
    pub pool_pc_vault: Pubkey,
    pub serum_program_id: Pubkey,
    pub serum_market: Pubkey,
    pub coin_mint: Pubkey,
    pub pc_mint: Pubkey,
    /// Live vault balances, coin side then pc side
    pub coin_reserve: u64,
    pub pc_reserve: u64,
    /// Swap fee as numerator/denominator from the pool account
    pub fee_numerator: u64,
    pub fee_denominator: u64,
}

impl CpAmmPoolState {
    pub fn parse(amm_id: &Pubkey, data: &[u8]) -> Result<Self, BuildError> {
        if data.len() < 576 {
            return Err(BuildError::PoolStateUnavailable(format!(
                "amm account {} bytes, expected at least 576",
                data.len()
            )));
        }

        let read_pubkey = |offset: usize| {
            let bytes: [u8; 32] = data[offset..offset + 32].try_into().expect("32 bytes");
            Pubkey::from(bytes)
        };
        let read_u64 = |offset: usize| {
            u64::from_le_bytes(data[offset..offset + 8].try_into().expect("8 bytes"))
        };

        let fee_numerator = read_u64(176);
        let fee_denominator = read_u64(184);
        if fee_denominator == 0 {
            return Err(BuildError::PoolStateUnavailable(
                "zero fee denominator".into(),
            ));
        }

        Ok(Self {
            amm_id: *amm_id,
            amm_authority: derive_amm_authority(),
            amm_target_orders: read_pubkey(128),
            pool_coin_vault: read_pubkey(160),
            pool_pc_vault: read_pubkey(192),
            coin_mint: read_pubkey(224),
            pc_mint: read_pubkey(256),
            amm_open_orders: read_pubkey(320),
            serum_market: read_pubkey(352),
            serum_program_id: read_pubkey(384),
            coin_reserve: 0,
            pc_reserve: 0,
            fee_numerator,
            fee_denominator,
        })
    }

    pub fn with_reserves(mut self, coin_reserve: u64, pc_reserve: u64) -> Self {
        self.coin_reserve = coin_reserve;
        self.pc_reserve = pc_reserve;
        self
    }

    /// Reserves oriented for a swap spending `input_mint`
    pub fn reserves_for(&self, input_mint: &Pubkey) -> Result<(u64, u64), BuildError> {
        if input_mint == &self.coin_mint {
            Ok((self.coin_reserve, self.pc_reserve))
        } else if input_mint == &self.pc_mint {
            Ok((self.pc_reserve, self.coin_reserve))
        } else {
            Err(BuildError::PoolStateUnavailable(format!(
                "mint {} not in pool {}",
                input_mint, self.amm_id
            )))
        }
    }

    /// Vaults oriented for a swap spending `input_mint`
    pub fn vaults_for(&self, input_mint: &Pubkey) -> Result<(Pubkey, Pubkey), BuildError> {
        if input_mint == &self.coin_mint {
            Ok((self.pool_coin_vault, self.pool_pc_vault))
        } else if input_mint == &self.pc_mint {
            Ok((self.pool_pc_vault, self.pool_coin_vault))
        } else {
            Err(BuildError::PoolStateUnavailable(format!(
                "mint {} not in pool {}",
                input_mint, self.amm_id
            )))
        }
    }
}

/// Minimum output after pool fee and the caller's slippage bound, floored
/// once over the whole expression:
/// `out = reserve_out * in / (reserve_in + in) * (1 - fee) * (1 - slippage)`
pub fn quote_min_out(
    reserve_in: u64,
    reserve_out: u64,
    amount_in: u64,
    fee_numerator: u64,
    fee_denominator: u64,
    slippage_bps: u16,
) -> Result<u64, BuildError> {
    if amount_in == 0 || reserve_in == 0 || reserve_out == 0 {
        return Err(BuildError::ZeroQuote);
    }
    if fee_numerator >= fee_denominator || slippage_bps >= 10_000 {
        return Err(BuildError::ZeroQuote);
    }
    let numerator = reserve_out as u128
        * amount_in as u128
        * (fee_denominator - fee_numerator) as u128
        * (10_000 - slippage_bps as u64) as u128;
    let denominator = (reserve_in as u128 + amount_in as u128)
        * fee_denominator as u128
        * 10_000u128;
    let out = numerator / denominator;
    if out == 0 {
        return Err(BuildError::ZeroQuote);
    }
    u64::try_from(out).map_err(|_| BuildError::ZeroQuote)
}

/// Shared V4 authority PDA: seeds `["amm authority"]`
pub fn derive_amm_authority() -> Pubkey {
    let program = program_id();
    Pubkey::find_program_address(&[b"amm authority"], &program).0
}

pub fn program_id() -> Pubkey {
    Pubkey::from_str(constants::CP_AMM_PROGRAM_ID).expect("valid program id")
}

#[cfg(test)]
pub(crate) fn synthetic_pool_data(
    coin_mint: &Pubkey,
    pc_mint: &Pubkey,
    fee_numerator: u64,
    fee_denominator: u64,
) -> Vec<u8> {
    let mut data = vec![0u8; 576];
    data[176..184].copy_from_slice(&fee_numerator.to_le_bytes());
    data[184..192].copy_from_slice(&fee_denominator.to_le_bytes());
    data[128..160].copy_from_slice(Pubkey::new_unique().as_ref());
    data[160..192].copy_from_slice(Pubkey::new_unique().as_ref());
    data[192..224].copy_from_slice(Pubkey::new_unique().as_ref());
    data[224..256].copy_from_slice(coin_mint.as_ref());
    data[256..288].copy_from_slice(pc_mint.as_ref());
    data[320..352].copy_from_slice(Pubkey::new_unique().as_ref());
    data[352..384].copy_from_slice(Pubkey::new_unique().as_ref());
    data[384..416].copy_from_slice(Pubkey::new_unique().as_ref());
    data
}
