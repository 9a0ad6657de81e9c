//! Bonding-curve pool state (pump.fun style)
//!
//! The curve account keeps virtual and real reserves; price is the ratio of
//! the virtual pair. Everything a swap needs besides the curve account
//! itself is derived from the token mint and the curve creator.

use solana_sdk::pubkey::Pubkey;
use std::str::FromStr;

use crate::constants;
use crate::error::BuildError;

/// Curve account layout, little-endian:
/// - discriminator: 8 bytes at offset 0
/// - virtual_token_reserves: u64 at offset 8
/// - virtual_sol_reserves: u64 at offset 16
/// - real_token_reserves: u64 at offset 24
/// - real_sol_reserves: u64 at offset 32
/// - token_total_supply: u64 at offset 40
/// - complete: bool at offset 48
/// - creator: Pubkey (32 bytes) at offset 49
pub const BONDING_CURVE_STATE_LEN: usize = 81;

#[derive(Debug, Clone, PartialEq)]
pub struct BondingCurveState {
    pub mint: Pubkey,
    pub bonding_curve: Pubkey,
    pub associated_bonding_curve: Pubkey,
    pub creator: Pubkey,
    pub creator_vault: Pubkey,
    pub virtual_token_reserves: u64,
    pub virtual_sol_reserves: u64,
    pub real_token_reserves: u64,
    pub real_sol_reserves: u64,
    pub complete: bool,
}

impl BondingCurveState {
    pub fn parse(mint: &Pubkey, data: &[u8]) -> Result<Self, BuildError> {
        if data.len() < BONDING_CURVE_STATE_LEN {
            return Err(BuildError::PoolStateUnavailable(format!(
                "bonding curve account {} bytes, expected at least {}",
                data.len(),
                BONDING_CURVE_STATE_LEN
            )));
        }

        let read_u64 = |offset: usize| {
            u64::from_le_bytes(data[offset..offset + 8].try_into().expect("8 bytes"))
        };
        let creator_bytes: [u8; 32] = data[49..81].try_into().expect("32 bytes");
        let creator = Pubkey::from(creator_bytes);

        let program = program_id();
        let (bonding_curve, _) = derive_bonding_curve(mint);
        let associated_bonding_curve = derive_curve_token_account(&bonding_curve, mint);
        let (creator_vault, _) =
            Pubkey::find_program_address(&[b"creator-vault", creator.as_ref()], &program);

        Ok(Self {
            mint: *mint,
            bonding_curve,
            associated_bonding_curve,
            creator,
            creator_vault,
            virtual_token_reserves: read_u64(8),
            virtual_sol_reserves: read_u64(16),
            real_token_reserves: read_u64(24),
            real_sol_reserves: read_u64(32),
            complete: data[48] != 0,
        })
    }

    /// Tokens received for `lamports_in` along the virtual curve
    pub fn quote_buy(&self, lamports_in: u64) -> u64 {
        if lamports_in == 0 || self.virtual_sol_reserves == 0 {
            return 0;
        }
        let vtr = self.virtual_token_reserves as u128;
        let vsr = self.virtual_sol_reserves as u128;
        let input = lamports_in as u128;
        let new_token_reserves = (vtr * vsr) / (vsr + input);
        let out = vtr.saturating_sub(new_token_reserves);
        out.min(self.real_token_reserves as u128) as u64
    }

    /// Lamports received for `tokens_in` along the virtual curve
    pub fn quote_sell(&self, tokens_in: u64) -> u64 {
        if tokens_in == 0 || self.virtual_token_reserves == 0 {
            return 0;
        }
        let vtr = self.virtual_token_reserves as u128;
        let vsr = self.virtual_sol_reserves as u128;
        let input = tokens_in as u128;
        let out = (vsr * input) / (vtr + input);
        out.min(self.real_sol_reserves as u128) as u64
    }
}

pub fn program_id() -> Pubkey {
    Pubkey::from_str(constants::BONDING_CURVE_PROGRAM_ID).expect("valid program id")
}

/// Curve PDA: seeds `["bonding-curve", mint]`
pub fn derive_bonding_curve(mint: &Pubkey) -> (Pubkey, u8) {
    Pubkey::find_program_address(&[b"bonding-curve", mint.as_ref()], &program_id())
}

/// The curve's token vault is its associated token account for the mint
pub fn derive_curve_token_account(bonding_curve: &Pubkey, mint: &Pubkey) -> Pubkey {
    derive_associated_token_account(bonding_curve, mint, &spl_token::id())
}

/// Standard associated-token-account derivation
pub fn derive_associated_token_account(
    wallet: &Pubkey,
    mint: &Pubkey,
    token_program: &Pubkey,
) -> Pubkey {
    let ata_program = Pubkey::from_str(constants::ATA_PROGRAM_ID).expect("valid program id");
    Pubkey::find_program_address(
        &[wallet.as_ref(), token_program.as_ref(), mint.as_ref()],
        &ata_program,
    )
    .0
}

#[cfg(test)]
pub(crate) fn synthetic_curve_data(
    virtual_token: u64,
    virtual_sol: u64,
    real_token: u64,
    real_sol: u64,
    creator: &Pubkey,
) -> Vec<u8> {
    let mut data = vec![0u8; BONDING_CURVE_STATE_LEN];
    data[8..16].copy_from_slice(&virtual_token.to_le_bytes());
    data[16..24].copy_from_slice(&virtual_sol.to_le_bytes());
    data[24..32].copy_from_slice(&real_token.to_le_bytes());
    data[32..40].copy_from_slice(&real_sol.to_le_bytes());
    data[40..48].copy_from_slice(&(virtual_token + real_token).to_le_bytes());
    data[48] = 0;
    data[49..81].copy_from_slice(creator.as_ref());
    data
}
