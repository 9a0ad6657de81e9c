//! Dynamic bonding-curve pool state (Meteora DBC style)
//!
//! A virtual pool account pairs with a shared pool-config account; quotes
//! run constant-product over the virtual reserves with the config's fee.

use solana_sdk::pubkey::Pubkey;
use std::str::FromStr;

use crate::constants;
use crate::error::BuildError;

/// Virtual-pool account layout, little-endian, after the 8-byte discriminator:
/// - config: Pubkey at 8
/// - base_mint: Pubkey at 40, quote_mint: Pubkey at 72
/// - base_vault: Pubkey at 104, quote_vault: Pubkey at 136
/// - virtual_base_reserve: u64 at 168, virtual_quote_reserve: u64 at 176
/// - migrated: u8 at 184
pub const DBC_POOL_STATE_MIN_LEN: usize = 185;

/// Pool-config layout: trade_fee_ppm u64 at offset 8
pub const DBC_CONFIG_MIN_LEN: usize = 16;

#[derive(Debug, Clone, PartialEq)]
pub struct DbcPoolState {
    pub virtual_pool: Pubkey,
    pub config: Pubkey,
    pub base_mint: Pubkey,
    pub quote_mint: Pubkey,
    pub base_vault: Pubkey,
    pub quote_vault: Pubkey,
    pub virtual_base_reserve: u64,
    pub virtual_quote_reserve: u64,
    pub migrated: bool,
    /// From the config account
    pub trade_fee_ppm: u64,
}

impl DbcPoolState {
    pub fn parse(virtual_pool: &Pubkey, data: &[u8]) -> Result<Self, BuildError> {
        if data.len() < DBC_POOL_STATE_MIN_LEN {
            return Err(BuildError::PoolStateUnavailable(format!(
                "dbc pool account {} bytes, expected at least {}",
                data.len(),
                DBC_POOL_STATE_MIN_LEN
            )));
        }
        let read_pubkey = |offset: usize| {
            let bytes: [u8; 32] = data[offset..offset + 32].try_into().expect("32 bytes");
            Pubkey::from(bytes)
        };
        let read_u64 = |offset: usize| {
            u64::from_le_bytes(data[offset..offset + 8].try_into().expect("8 bytes"))
        };
        Ok(Self {
            virtual_pool: *virtual_pool,
            config: read_pubkey(8),
            base_mint: read_pubkey(40),
            quote_mint: read_pubkey(72),
            base_vault: read_pubkey(104),
            quote_vault: read_pubkey(136),
            virtual_base_reserve: read_u64(168),
            virtual_quote_reserve: read_u64(176),
            migrated: data[184] != 0,
            trade_fee_ppm: 0,
        })
    }

    pub fn parse_config_fee(data: &[u8]) -> Result<u64, BuildError> {
        if data.len() < DBC_CONFIG_MIN_LEN {
            return Err(BuildError::PoolStateUnavailable(format!(
                "dbc config account {} bytes, expected at least {}",
                data.len(),
                DBC_CONFIG_MIN_LEN
            )));
        }
        Ok(u64::from_le_bytes(data[8..16].try_into().expect("8 bytes")))
    }

    pub fn with_fee(mut self, trade_fee_ppm: u64) -> Self {
        self.trade_fee_ppm = trade_fee_ppm;
        self
    }

    /// Expected output over the virtual reserves, fee off the input.
    /// `base_in` selects base->quote; otherwise quote->base.
    pub fn quote(&self, amount_in: u64, base_in: bool) -> Result<u64, BuildError> {
        if amount_in == 0 {
            return Err(BuildError::ZeroQuote);
        }
        let (reserve_in, reserve_out) = if base_in {
            (self.virtual_base_reserve, self.virtual_quote_reserve)
        } else {
            (self.virtual_quote_reserve, self.virtual_base_reserve)
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
    Pubkey::from_str(constants::DBC_PROGRAM_ID).expect("valid program id")
}

#[cfg(test)]
pub(crate) fn synthetic_pool_data(
    config: &Pubkey,
    base_mint: &Pubkey,
    quote_mint: &Pubkey,
    virtual_base: u64,
    virtual_quote: u64,
) -> Vec<u8> {
    let mut data = vec![0u8; DBC_POOL_STATE_MIN_LEN];
    data[8..40].copy_from_slice(config.as_ref());
    data[40..72].copy_from_slice(base_mint.as_ref());
    data[72..104].copy_from_slice(quote_mint.as_ref());
    data[104..136].copy_from_slice(Pubkey::new_unique().as_ref());
    data[136..168].copy_from_slice(Pubkey::new_unique().as_ref());
    data[168..176].copy_from_slice(&virtual_base.to_le_bytes());
    data[176..184].copy_from_slice(&virtual_quote.to_le_bytes());
    data
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_config_fee() {
        let pool = Pubkey::new_unique();
        let config = Pubkey::new_unique();
        let data = synthetic_pool_data(
            &config,
            &Pubkey::new_unique(),
            &Pubkey::new_unique(),
            1_000_000_000_000,
            30_000_000_000,
        );
        let state = DbcPoolState::parse(&pool, &data).unwrap();
        assert_eq!(state.config, config);
        assert_eq!(state.virtual_base_reserve, 1_000_000_000_000);
        assert!(!state.migrated);

        let mut config_data = vec![0u8; DBC_CONFIG_MIN_LEN];
        config_data[8..16].copy_from_slice(&10_000u64.to_le_bytes());
        assert_eq!(DbcPoolState::parse_config_fee(&config_data).unwrap(), 10_000);
    }

    #[test]
    fn test_quote_directions_are_inverse_shaped() {
        let pool = Pubkey::new_unique();
        let data = synthetic_pool_data(
            &Pubkey::new_unique(),
            &Pubkey::new_unique(),
            &Pubkey::new_unique(),
            1_000_000_000_000,
            30_000_000_000,
        );
        let state = DbcPoolState::parse(&pool, &data).unwrap().with_fee(10_000);

        // quote->base buys many tokens; base->quote returns few lamports
        let buy_out = state.quote(1_000_000_000, false).unwrap();
        let sell_out = state.quote(1_000_000_000, true).unwrap();
        assert!(buy_out > sell_out);
        assert!(state.quote(0, true).is_err());
    }
}
