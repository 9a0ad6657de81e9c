//! Launchpad curve pool state (Raydium Launchpad style)
//!
//! A pre-graduation curve quoted on virtual reserves. The swap's authority,
//! platform-vault, creator-vault and CPI-event accounts are all program
//! addresses derived from the on-chain config.

use solana_sdk::pubkey::Pubkey;
use std::str::FromStr;

use crate::constants;
use crate::error::BuildError;

/// Pool account layout, little-endian, after the 8-byte discriminator:
/// - global_config: Pubkey at 8, platform_config: Pubkey at 40
/// - base_mint: Pubkey at 72, quote_mint: Pubkey at 104
/// - base_vault: Pubkey at 136, quote_vault: Pubkey at 168
/// - creator: Pubkey at 200
/// - virtual_base: u64 at 232, virtual_quote: u64 at 240
/// - real_base: u64 at 248, real_quote: u64 at 256
/// - status: u8 at 264
pub const LAUNCHPAD_POOL_STATE_MIN_LEN: usize = 265;

#[derive(Debug, Clone, PartialEq)]
pub struct LaunchpadPoolState {
    pub pool: Pubkey,
    pub global_config: Pubkey,
    pub platform_config: Pubkey,
    pub base_mint: Pubkey,
    pub quote_mint: Pubkey,
    pub base_vault: Pubkey,
    pub quote_vault: Pubkey,
    pub creator: Pubkey,
    pub virtual_base: u64,
    pub virtual_quote: u64,
    pub real_base: u64,
    pub real_quote: u64,
    pub migrated: bool,
}

impl LaunchpadPoolState {
    pub fn parse(pool: &Pubkey, data: &[u8]) -> Result<Self, BuildError> {
        if data.len() < LAUNCHPAD_POOL_STATE_MIN_LEN {
            return Err(BuildError::PoolStateUnavailable(format!(
                "launchpad pool account {} bytes, expected at least {}",
                data.len(),
                LAUNCHPAD_POOL_STATE_MIN_LEN
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
            pool: *pool,
            global_config: read_pubkey(8),
            platform_config: read_pubkey(40),
            base_mint: read_pubkey(72),
            quote_mint: read_pubkey(104),
            base_vault: read_pubkey(136),
            quote_vault: read_pubkey(168),
            creator: read_pubkey(200),
            virtual_base: read_u64(232),
            virtual_quote: read_u64(240),
            real_base: read_u64(248),
            real_quote: read_u64(256),
            migrated: data[264] != 0,
        })
    }

    /// Base tokens still available for sale on the curve
    fn base_available(&self) -> u64 {
        self.virtual_base.saturating_sub(self.real_base)
    }

    /// Effective quote depth of the curve
    fn quote_depth(&self) -> u64 {
        self.virtual_quote.saturating_add(self.real_quote)
    }

    /// Base tokens out for `quote_in`
    pub fn quote_buy(&self, quote_in: u64) -> u64 {
        if quote_in == 0 || self.base_available() == 0 {
            return 0;
        }
        let available = self.base_available() as u128;
        let depth = self.quote_depth() as u128;
        let input = quote_in as u128;
        ((available * input) / (depth + input)) as u64
    }

    /// Quote out for `base_in`, never exceeding the curve's real holdings
    pub fn quote_sell(&self, base_in: u64) -> u64 {
        if base_in == 0 {
            return 0;
        }
        let available = self.base_available() as u128;
        let depth = self.quote_depth() as u128;
        let input = base_in as u128;
        let out = (depth * input) / (available + input);
        out.min(self.real_quote as u128) as u64
    }
}

/// Vault authority PDA: seeds `["vault_auth_seed"]`
pub fn derive_authority() -> Pubkey {
    Pubkey::find_program_address(&[b"vault_auth_seed"], &program_id()).0
}

/// Platform fee vault PDA: seeds `["platform_vault", platform_config, quote_mint]`
pub fn derive_platform_vault(platform_config: &Pubkey, quote_mint: &Pubkey) -> Pubkey {
    Pubkey::find_program_address(
        &[b"platform_vault", platform_config.as_ref(), quote_mint.as_ref()],
        &program_id(),
    )
    .0
}

/// Creator fee vault PDA: seeds `["creator_vault", creator, quote_mint]`
pub fn derive_creator_vault(creator: &Pubkey, quote_mint: &Pubkey) -> Pubkey {
    Pubkey::find_program_address(
        &[b"creator_vault", creator.as_ref(), quote_mint.as_ref()],
        &program_id(),
    )
    .0
}

/// CPI event authority PDA: seeds `["__event_authority"]`
pub fn derive_event_authority() -> Pubkey {
    Pubkey::find_program_address(&[b"__event_authority"], &program_id()).0
}

pub fn program_id() -> Pubkey {
    Pubkey::from_str(constants::LAUNCHPAD_PROGRAM_ID).expect("valid program id")
}

#[cfg(test)]
pub(crate) fn synthetic_pool_data(
    base_mint: &Pubkey,
    quote_mint: &Pubkey,
    virtual_base: u64,
    virtual_quote: u64,
    real_base: u64,
    real_quote: u64,
) -> Vec<u8> {
    let mut data = vec![0u8; LAUNCHPAD_POOL_STATE_MIN_LEN];
    data[8..40].copy_from_slice(Pubkey::new_unique().as_ref());
    data[40..72].copy_from_slice(Pubkey::new_unique().as_ref());
    data[72..104].copy_from_slice(base_mint.as_ref());
    data[104..136].copy_from_slice(quote_mint.as_ref());
    data[136..168].copy_from_slice(Pubkey::new_unique().as_ref());
    data[168..200].copy_from_slice(Pubkey::new_unique().as_ref());
    data[200..232].copy_from_slice(Pubkey::new_unique().as_ref());
    data[232..240].copy_from_slice(&virtual_base.to_le_bytes());
    data[240..248].copy_from_slice(&virtual_quote.to_le_bytes());
    data[248..256].copy_from_slice(&real_base.to_le_bytes());
    data[256..264].copy_from_slice(&real_quote.to_le_bytes());
    data
}
