//! Constant-product AMM V2 pool state (Raydium CPMM style)
//!
//! A leaner pooled AMM than V4: no serum companion accounts, fees live in a
//! separate amm-config account, token programs are recorded per side.

use solana_sdk::pubkey::Pubkey;
use std::str::FromStr;

use crate::constants;
use crate::error::BuildError;

/// Pool account layout, little-endian, after the 8-byte discriminator:
/// - amm_config: Pubkey at 8, pool_creator: Pubkey at 40
/// - token_0_vault: Pubkey at 72, token_1_vault: Pubkey at 104
/// - lp_mint: Pubkey at 136
/// - token_0_mint: Pubkey at 168, token_1_mint: Pubkey at 200
/// - token_0_program: Pubkey at 232, token_1_program: Pubkey at 264
/// - observation_key: Pubkey at 296
pub const CPMM_POOL_STATE_MIN_LEN: usize = 328;

/// amm-config layout: trade_fee_rate u64 (parts per million) at offset 16
pub const CPMM_CONFIG_MIN_LEN: usize = 24;

#[derive(Debug, Clone, PartialEq)]
pub struct CpmmPoolState {
    pub pool: Pubkey,
    pub amm_config: Pubkey,
    pub token_0_vault: Pubkey,
    pub token_1_vault: Pubkey,
    pub token_0_mint: Pubkey,
    pub token_1_mint: Pubkey,
    pub token_0_program: Pubkey,
    pub token_1_program: Pubkey,
    pub observation_key: Pubkey,
    /// Live vault balances, token 0 then token 1
    pub reserve_0: u64,
    pub reserve_1: u64,
    /// Trade fee in parts per million, from the amm-config account
    pub trade_fee_rate_ppm: u64,
}

impl CpmmPoolState {
    pub fn parse(pool: &Pubkey, data: &[u8]) -> Result<Self, BuildError> {
        if data.len() < CPMM_POOL_STATE_MIN_LEN {
            return Err(BuildError::PoolStateUnavailable(format!(
                "cpmm pool account {} bytes, expected at least {}",
                data.len(),
                CPMM_POOL_STATE_MIN_LEN
            )));
        }
        let read_pubkey = |offset: usize| {
            let bytes: [u8; 32] = data[offset..offset + 32].try_into().expect("32 bytes");
            Pubkey::from(bytes)
        };
        Ok(Self {
            pool: *pool,
            amm_config: read_pubkey(8),
            token_0_vault: read_pubkey(72),
            token_1_vault: read_pubkey(104),
            token_0_mint: read_pubkey(168),
            token_1_mint: read_pubkey(200),
            token_0_program: read_pubkey(232),
            token_1_program: read_pubkey(264),
            observation_key: read_pubkey(296),
            reserve_0: 0,
            reserve_1: 0,
            trade_fee_rate_ppm: 0,
        })
    }

    /// Read the trade fee out of the amm-config account
    pub fn parse_config_fee(data: &[u8]) -> Result<u64, BuildError> {
        if data.len() < CPMM_CONFIG_MIN_LEN {
            return Err(BuildError::PoolStateUnavailable(format!(
                "cpmm config account {} bytes, expected at least {}",
                data.len(),
                CPMM_CONFIG_MIN_LEN
            )));
        }
        Ok(u64::from_le_bytes(data[16..24].try_into().expect("8 bytes")))
    }

    pub fn with_reserves(mut self, reserve_0: u64, reserve_1: u64) -> Self {
        self.reserve_0 = reserve_0;
        self.reserve_1 = reserve_1;
        self
    }

    pub fn with_fee(mut self, trade_fee_rate_ppm: u64) -> Self {
        self.trade_fee_rate_ppm = trade_fee_rate_ppm;
        self
    }

    /// (input side, output side) oriented for a swap spending `input_mint`:
    /// reserves, vaults, mints and token programs
    pub fn orient(&self, input_mint: &Pubkey) -> Result<CpmmSwapSides, BuildError> {
        if input_mint == &self.token_0_mint {
            Ok(CpmmSwapSides {
                reserve_in: self.reserve_0,
                reserve_out: self.reserve_1,
                input_vault: self.token_0_vault,
                output_vault: self.token_1_vault,
                input_mint: self.token_0_mint,
                output_mint: self.token_1_mint,
                input_token_program: self.token_0_program,
                output_token_program: self.token_1_program,
            })
        } else if input_mint == &self.token_1_mint {
            Ok(CpmmSwapSides {
                reserve_in: self.reserve_1,
                reserve_out: self.reserve_0,
                input_vault: self.token_1_vault,
                output_vault: self.token_0_vault,
                input_mint: self.token_1_mint,
                output_mint: self.token_0_mint,
                input_token_program: self.token_1_program,
                output_token_program: self.token_0_program,
            })
        } else {
            Err(BuildError::PoolStateUnavailable(format!(
                "mint {} not in pool {}",
                input_mint, self.pool
            )))
        }
    }

    /// Minimum output after the ppm trade fee and the caller's slippage,
    /// floored once over the whole expression
    pub fn quote_min_out(
        &self,
        input_mint: &Pubkey,
        amount_in: u64,
        slippage_bps: u16,
    ) -> Result<u64, BuildError> {
        let sides = self.orient(input_mint)?;
        if amount_in == 0 || sides.reserve_in == 0 || sides.reserve_out == 0 {
            return Err(BuildError::ZeroQuote);
        }
        if self.trade_fee_rate_ppm >= 1_000_000 || slippage_bps >= 10_000 {
            return Err(BuildError::ZeroQuote);
        }
        let numerator = sides.reserve_out as u128
            * amount_in as u128
            * (1_000_000 - self.trade_fee_rate_ppm) as u128
            * (10_000 - slippage_bps as u64) as u128;
        let denominator = (sides.reserve_in as u128 + amount_in as u128)
            * 1_000_000u128
            * 10_000u128;
        let out = numerator / denominator;
        if out == 0 {
            return Err(BuildError::ZeroQuote);
        }
        u64::try_from(out).map_err(|_| BuildError::ZeroQuote)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CpmmSwapSides {
    pub reserve_in: u64,
    pub reserve_out: u64,
    pub input_vault: Pubkey,
    pub output_vault: Pubkey,
    pub input_mint: Pubkey,
    pub output_mint: Pubkey,
    pub input_token_program: Pubkey,
    pub output_token_program: Pubkey,
}

/// Vault authority PDA: seeds `["vault_and_lp_mint_auth_seed"]`
pub fn derive_authority() -> Pubkey {
    Pubkey::find_program_address(&[b"vault_and_lp_mint_auth_seed"], &program_id()).0
}

pub fn program_id() -> Pubkey {
    Pubkey::from_str(constants::CPMM_PROGRAM_ID).expect("valid program id")
}

#[cfg(test)]
pub(crate) fn synthetic_pool_data(
    amm_config: &Pubkey,
    token_0_mint: &Pubkey,
    token_1_mint: &Pubkey,
) -> Vec<u8> {
    let mut data = vec![0u8; CPMM_POOL_STATE_MIN_LEN];
    data[8..40].copy_from_slice(amm_config.as_ref());
    data[72..104].copy_from_slice(Pubkey::new_unique().as_ref());
    data[104..136].copy_from_slice(Pubkey::new_unique().as_ref());
    data[168..200].copy_from_slice(token_0_mint.as_ref());
    data[200..232].copy_from_slice(token_1_mint.as_ref());
    data[232..264].copy_from_slice(spl_token::id().as_ref());
    data[264..296].copy_from_slice(spl_token::id().as_ref());
    data[296..328].copy_from_slice(Pubkey::new_unique().as_ref());
    data
}
