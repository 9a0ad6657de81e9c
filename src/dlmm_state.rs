//! Bin-liquidity AMM pair state (Meteora DLMM style)
//!
//! Liquidity sits in discrete bins; the active bin sets the spot price as
//! `(1 + bin_step/10000)^active_id`. Quotes here stay within the active
//! bin's neighborhood, which is what a mirrored swap of follower size needs.

use solana_sdk::pubkey::Pubkey;
use std::str::FromStr;

use crate::constants;
use crate::error::BuildError;

/// Bins covered by one bin-array account
pub const BINS_PER_ARRAY: i32 = 70;

/// Pair account layout, little-endian, after the 8-byte discriminator:
/// - bin_step: u16 at offset 8
/// - active_id: i32 at offset 10
/// - base_fee_rate_ppm: u32 at offset 14 (stored in the parameter block)
/// - reserve_x: Pubkey at 18, reserve_y: Pubkey at 50
/// - token_x_mint: Pubkey at 82, token_y_mint: Pubkey at 114
/// - oracle: Pubkey at 146
pub const DLMM_PAIR_STATE_MIN_LEN: usize = 178;

#[derive(Debug, Clone, PartialEq)]
pub struct DlmmPairState {
    pub lb_pair: Pubkey,
    pub token_x_mint: Pubkey,
    pub token_y_mint: Pubkey,
    pub reserve_x: Pubkey,
    pub reserve_y: Pubkey,
    pub oracle: Pubkey,
    pub active_id: i32,
    pub bin_step: u16,
    pub base_fee_rate_ppm: u32,
}

impl DlmmPairState {
    pub fn parse(lb_pair: &Pubkey, data: &[u8]) -> Result<Self, BuildError> {
        if data.len() < DLMM_PAIR_STATE_MIN_LEN {
            return Err(BuildError::PoolStateUnavailable(format!(
                "dlmm pair account {} bytes, expected at least {}",
                data.len(),
                DLMM_PAIR_STATE_MIN_LEN
            )));
        }
        let read_pubkey = |offset: usize| {
            let bytes: [u8; 32] = data[offset..offset + 32].try_into().expect("32 bytes");
            Pubkey::from(bytes)
        };
        let bin_step = u16::from_le_bytes(data[8..10].try_into().expect("2 bytes"));
        if bin_step == 0 {
            return Err(BuildError::PoolStateUnavailable("zero bin step".into()));
        }
        Ok(Self {
            lb_pair: *lb_pair,
            active_id: i32::from_le_bytes(data[10..14].try_into().expect("4 bytes")),
            base_fee_rate_ppm: u32::from_le_bytes(data[14..18].try_into().expect("4 bytes")),
            reserve_x: read_pubkey(18),
            reserve_y: read_pubkey(50),
            token_x_mint: read_pubkey(82),
            token_y_mint: read_pubkey(114),
            oracle: read_pubkey(146),
            bin_step,
        })
    }

    /// Spot price of token X in token Y at the active bin
    pub fn active_price(&self) -> f64 {
        let step = 1.0 + self.bin_step as f64 / 10_000.0;
        step.powi(self.active_id)
    }

    /// Expected output for `amount_in`, active-bin pricing with the base fee
    /// taken off the input. `x_to_y` sells token X for token Y.
    pub fn quote(&self, amount_in: u64, x_to_y: bool) -> Result<u64, BuildError> {
        if amount_in == 0 {
            return Err(BuildError::ZeroQuote);
        }
        let fee = (self.base_fee_rate_ppm as f64 / 1_000_000.0).min(0.99);
        let net_in = amount_in as f64 * (1.0 - fee);
        let price = self.active_price();
        let out = if x_to_y { net_in * price } else { net_in / price };
        let out = out.floor();
        if out < 1.0 {
            return Err(BuildError::ZeroQuote);
        }
        Ok(out as u64)
    }

    /// Index of the bin array containing `bin_id`
    pub fn bin_array_index(bin_id: i32) -> i32 {
        bin_id.div_euclid(BINS_PER_ARRAY)
    }

    /// The three arrays a swap may touch: active and one neighbor each side
    pub fn swap_bin_arrays(&self) -> Vec<Pubkey> {
        let index = Self::bin_array_index(self.active_id);
        [index - 1, index, index + 1]
            .iter()
            .map(|&i| derive_bin_array(&self.lb_pair, i))
            .collect()
    }
}

/// Bin-array PDA: seeds `["bin_array", lb_pair, i64 index little-endian]`
pub fn derive_bin_array(lb_pair: &Pubkey, index: i32) -> Pubkey {
    Pubkey::find_program_address(
        &[b"bin_array", lb_pair.as_ref(), &(index as i64).to_le_bytes()],
        &program_id(),
    )
    .0
}

/// CPI event authority PDA: seeds `["__event_authority"]`
pub fn derive_event_authority() -> Pubkey {
    Pubkey::find_program_address(&[b"__event_authority"], &program_id()).0
}

pub fn program_id() -> Pubkey {
    Pubkey::from_str(constants::DLMM_PROGRAM_ID).expect("valid program id")
}

#[cfg(test)]
pub(crate) fn synthetic_pair_data(
    token_x_mint: &Pubkey,
    token_y_mint: &Pubkey,
    bin_step: u16,
    active_id: i32,
    base_fee_rate_ppm: u32,
) -> Vec<u8> {
    let mut data = vec![0u8; DLMM_PAIR_STATE_MIN_LEN];
    data[8..10].copy_from_slice(&bin_step.to_le_bytes());
    data[10..14].copy_from_slice(&active_id.to_le_bytes());
    data[14..18].copy_from_slice(&base_fee_rate_ppm.to_le_bytes());
    data[18..50].copy_from_slice(Pubkey::new_unique().as_ref());
    data[50..82].copy_from_slice(Pubkey::new_unique().as_ref());
    data[82..114].copy_from_slice(token_x_mint.as_ref());
    data[114..146].copy_from_slice(token_y_mint.as_ref());
    data[146..178].copy_from_slice(Pubkey::new_unique().as_ref());
    data
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_reads_bin_parameters() {
        let lb_pair = Pubkey::new_unique();
        let mint_x = Pubkey::new_unique();
        let mint_y = Pubkey::new_unique();
        let data = synthetic_pair_data(&mint_x, &mint_y, 25, -100, 1_000);

        let state = DlmmPairState::parse(&lb_pair, &data).unwrap();
        assert_eq!(state.bin_step, 25);
        assert_eq!(state.active_id, -100);
        assert_eq!(state.base_fee_rate_ppm, 1_000);
        assert_eq!(state.token_x_mint, mint_x);
        assert_eq!(state.token_y_mint, mint_y);
    }

    #[test]
    fn test_price_at_bin_zero_is_unity() {
        let data = synthetic_pair_data(&Pubkey::new_unique(), &Pubkey::new_unique(), 25, 0, 0);
        let state = DlmmPairState::parse(&Pubkey::new_unique(), &data).unwrap();
        assert!((state.active_price() - 1.0).abs() < 1e-12);

        // One bin up moves price by exactly one step
        let data = synthetic_pair_data(&Pubkey::new_unique(), &Pubkey::new_unique(), 25, 1, 0);
        let state = DlmmPairState::parse(&Pubkey::new_unique(), &data).unwrap();
        assert!((state.active_price() - 1.0025).abs() < 1e-12);
    }

    #[test]
    fn test_quote_applies_fee_and_direction() {
        let data = synthetic_pair_data(&Pubkey::new_unique(), &Pubkey::new_unique(), 25, 0, 10_000);
        let state = DlmmPairState::parse(&Pubkey::new_unique(), &data).unwrap();

        // Unity price, 1% fee
        assert_eq!(state.quote(1_000_000, true).unwrap(), 990_000);
        assert_eq!(state.quote(1_000_000, false).unwrap(), 990_000);
        assert!(state.quote(0, true).is_err());
    }

    #[test]
    fn test_bin_array_indexing_handles_negative_bins() {
        assert_eq!(DlmmPairState::bin_array_index(0), 0);
        assert_eq!(DlmmPairState::bin_array_index(69), 0);
        assert_eq!(DlmmPairState::bin_array_index(70), 1);
        assert_eq!(DlmmPairState::bin_array_index(-1), -1);
        assert_eq!(DlmmPairState::bin_array_index(-70), -1);
        assert_eq!(DlmmPairState::bin_array_index(-71), -2);
    }

    #[test]
    fn test_swap_bin_arrays_are_three_distinct_pdas() {
        let data = synthetic_pair_data(&Pubkey::new_unique(), &Pubkey::new_unique(), 25, 35, 0);
        let state = DlmmPairState::parse(&Pubkey::new_unique(), &data).unwrap();
        let arrays = state.swap_bin_arrays();
        assert_eq!(arrays.len(), 3);
        assert_ne!(arrays[0], arrays[1]);
        assert_ne!(arrays[1], arrays[2]);
    }
}
