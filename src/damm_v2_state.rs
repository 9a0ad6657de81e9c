//! Dynamic constant-product AMM pool state (Meteora DAMM v2 style)
//!
//! Constant-product over live vault balances; each side records whether it
//! uses the classic token program or the 2022 one.

use solana_sdk::pubkey::Pubkey;
use std::str::FromStr;

use crate::constants;
use crate::error::BuildError;

/// Pool account layout, little-endian, after the 8-byte discriminator:
/// - token_a_mint: Pubkey at 8, token_b_mint: Pubkey at 40
/// - token_a_vault: Pubkey at 72, token_b_vault: Pubkey at 104
/// - token_a_flag: u8 at 136, token_b_flag: u8 at 137 (0 classic, 1 = 2022)
/// - trade_fee_ppm: u64 at 138
pub const DAMM_V2_POOL_STATE_MIN_LEN: usize = 146;

#[derive(Debug, Clone, PartialEq)]
pub struct DammV2PoolState {
    pub pool: Pubkey,
    pub token_a_mint: Pubkey,
    pub token_b_mint: Pubkey,
    pub token_a_vault: Pubkey,
    pub token_b_vault: Pubkey,
    pub token_a_flag: u8,
    pub token_b_flag: u8,
    pub trade_fee_ppm: u64,
    /// Live vault balances, token A then token B
    pub reserve_a: u64,
    pub reserve_b: u64,
}

impl DammV2PoolState {
    pub fn parse(pool: &Pubkey, data: &[u8]) -> Result<Self, BuildError> {
        if data.len() < DAMM_V2_POOL_STATE_MIN_LEN {
            return Err(BuildError::PoolStateUnavailable(format!(
                "damm v2 pool account {} bytes, expected at least {}",
                data.len(),
                DAMM_V2_POOL_STATE_MIN_LEN
            )));
        }
        let read_pubkey = |offset: usize| {
            let bytes: [u8; 32] = data[offset..offset + 32].try_into().expect("32 bytes");
            Pubkey::from(bytes)
        };
        Ok(Self {
            pool: *pool,
            token_a_mint: read_pubkey(8),
            token_b_mint: read_pubkey(40),
            token_a_vault: read_pubkey(72),
            token_b_vault: read_pubkey(104),
            token_a_flag: data[136],
            token_b_flag: data[137],
            trade_fee_ppm: u64::from_le_bytes(data[138..146].try_into().expect("8 bytes")),
            reserve_a: 0,
            reserve_b: 0,
        })
    }

    pub fn with_reserves(mut self, reserve_a: u64, reserve_b: u64) -> Self {
        self.reserve_a = reserve_a;
        self.reserve_b = reserve_b;
        self
    }

    /// Token program for one side of the pool
    pub fn token_program_for(flag: u8) -> Pubkey {
        if flag == 1 {
            Pubkey::from_str(constants::TOKEN_2022_PROGRAM_ID).expect("valid program id")
        } else {
            spl_token::id()
        }
    }

    pub fn token_a_program(&self) -> Pubkey {
        Self::token_program_for(self.token_a_flag)
    }

    pub fn token_b_program(&self) -> Pubkey {
        Self::token_program_for(self.token_b_flag)
    }

    /// Expected output for `amount_in`, fee off the input.
    /// `a_to_b` sells token A.
    pub fn quote(&self, amount_in: u64, a_to_b: bool) -> Result<u64, BuildError> {
        if amount_in == 0 {
            return Err(BuildError::ZeroQuote);
        }
        let (reserve_in, reserve_out) = if a_to_b {
            (self.reserve_a, self.reserve_b)
        } else {
            (self.reserve_b, self.reserve_a)
        };
        if reserve_in == 0 || reserve_out == 0 || self.trade_fee_ppm >= 1_000_000 {
            return Err(BuildError::ZeroQuote);
        }
        let net_in =
            (amount_in as u128 * (1_000_000 - self.trade_fee_ppm) as u128) / 1_000_000u128;
        let out = (reserve_out as u128 * net_in) / (reserve_in as u128 + net_in);
        if out == 0 {
            return Err(BuildError::ZeroQuote);
        }
        u64::try_from(out).map_err(|_| BuildError::ZeroQuote)
    }
}

/// Shared pool authority PDA: seeds `["pool_authority"]`
pub fn derive_pool_authority() -> Pubkey {
    Pubkey::find_program_address(&[b"pool_authority"], &program_id()).0
}

/// CPI event authority PDA: seeds `["__event_authority"]`
pub fn derive_event_authority() -> Pubkey {
    Pubkey::find_program_address(&[b"__event_authority"], &program_id()).0
}

pub fn program_id() -> Pubkey {
    Pubkey::from_str(constants::DAMM_V2_PROGRAM_ID).expect("valid program id")
}

#[cfg(test)]
pub(crate) fn synthetic_pool_data(
    token_a_mint: &Pubkey,
    token_b_mint: &Pubkey,
    token_a_flag: u8,
    token_b_flag: u8,
    trade_fee_ppm: u64,
) -> Vec<u8> {
    let mut data = vec![0u8; DAMM_V2_POOL_STATE_MIN_LEN];
    data[8..40].copy_from_slice(token_a_mint.as_ref());
    data[40..72].copy_from_slice(token_b_mint.as_ref());
    data[72..104].copy_from_slice(Pubkey::new_unique().as_ref());
    data[104..136].copy_from_slice(Pubkey::new_unique().as_ref());
    data[136] = token_a_flag;
    data[137] = token_b_flag;
    data[138..146].copy_from_slice(&trade_fee_ppm.to_le_bytes());
    data
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_reads_flags_and_fee() {
        let pool = Pubkey::new_unique();
        let mint_a = Pubkey::new_unique();
        let mint_b = Pubkey::new_unique();
        let data = synthetic_pool_data(&mint_a, &mint_b, 0, 1, 2_500);

        let state = DammV2PoolState::parse(&pool, &data).unwrap();
        assert_eq!(state.token_a_mint, mint_a);
        assert_eq!(state.token_b_mint, mint_b);
        assert_eq!(state.trade_fee_ppm, 2_500);
        assert_eq!(state.token_a_program(), spl_token::id());
        assert_eq!(
            state.token_b_program().to_string(),
            constants::TOKEN_2022_PROGRAM_ID
        );
    }

    #[test]
    fn test_quote_constant_product_with_fee() {
        let pool = Pubkey::new_unique();
        let data = synthetic_pool_data(
            &Pubkey::new_unique(),
            &Pubkey::new_unique(),
            0,
            0,
            2_500,
        );
        let state = DammV2PoolState::parse(&pool, &data)
            .unwrap()
            .with_reserves(1_000_000_000_000, 500_000_000_000);

        let net_in = (1_000_000_000u128 * 997_500) / 1_000_000;
        let expected = (500_000_000_000u128 * net_in) / (1_000_000_000_000u128 + net_in);
        assert_eq!(
            state.quote(1_000_000_000, true).unwrap() as u128,
            expected
        );
        assert!(state.quote(0, true).is_err());
    }
}
