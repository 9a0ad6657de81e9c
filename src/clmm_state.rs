//! Concentrated-liquidity AMM pool state (Raydium CLMM style)
//!
//! Besides the pool account itself a swap needs the tick arrays it will
//! traverse and the tick-array-bitmap extension that says which arrays are
//! initialized. The whole bundle is fetched together so a build is
//! deterministic against one cache snapshot.

use solana_sdk::pubkey::Pubkey;
use std::str::FromStr;

use crate::constants;
use crate::error::BuildError;

/// Ticks per tick array
pub const TICK_ARRAY_SIZE: i32 = 60;

/// Per-tick record length inside a tick array:
/// tick i32, liquidity_net i128, liquidity_gross u128
pub const TICK_STATE_LEN: usize = 4 + 16 + 16;

/// Tick array header: discriminator 8, pool id 32, start index 4
pub const TICK_ARRAY_HEADER_LEN: usize = 44;

/// Bitmap words per side of the extension account
pub const BITMAP_WORDS: usize = 14;

/// Pool account layout, little-endian:
/// - discriminator: 8 bytes at 0, bump: u8 at 8
/// - amm_config: Pubkey at 9, owner: Pubkey at 41
/// - token_mint_0: Pubkey at 73, token_mint_1: Pubkey at 105
/// - token_vault_0: Pubkey at 137, token_vault_1: Pubkey at 169
/// - observation_key: Pubkey at 201
/// - mint_decimals_0: u8 at 233, mint_decimals_1: u8 at 234
/// - tick_spacing: u16 at 235
/// - liquidity: u128 at 237, sqrt_price_x64: u128 at 253
/// - tick_current: i32 at 269
pub const CLMM_POOL_STATE_MIN_LEN: usize = 273;

#[derive(Debug, Clone, PartialEq)]
pub struct ClmmPoolState {
    pub pool: Pubkey,
    pub amm_config: Pubkey,
    pub token_mint_0: Pubkey,
    pub token_mint_1: Pubkey,
    pub token_vault_0: Pubkey,
    pub token_vault_1: Pubkey,
    pub observation_key: Pubkey,
    pub tick_spacing: u16,
    pub liquidity: u128,
    pub sqrt_price_x64: u128,
    pub tick_current: i32,
}

impl ClmmPoolState {
    pub fn parse(pool: &Pubkey, data: &[u8]) -> Result<Self, BuildError> {
        if data.len() < CLMM_POOL_STATE_MIN_LEN {
            return Err(BuildError::PoolStateUnavailable(format!(
                "clmm pool account {} bytes, expected at least {}",
                data.len(),
                CLMM_POOL_STATE_MIN_LEN
            )));
        }
        let read_pubkey = |offset: usize| {
            let bytes: [u8; 32] = data[offset..offset + 32].try_into().expect("32 bytes");
            Pubkey::from(bytes)
        };
        let tick_spacing = u16::from_le_bytes(data[235..237].try_into().expect("2 bytes"));
        if tick_spacing == 0 {
            return Err(BuildError::PoolStateUnavailable("zero tick spacing".into()));
        }
        Ok(Self {
            pool: *pool,
            amm_config: read_pubkey(9),
            token_mint_0: read_pubkey(73),
            token_mint_1: read_pubkey(105),
            token_vault_0: read_pubkey(137),
            token_vault_1: read_pubkey(169),
            observation_key: read_pubkey(201),
            tick_spacing,
            liquidity: u128::from_le_bytes(data[237..253].try_into().expect("16 bytes")),
            sqrt_price_x64: u128::from_le_bytes(data[253..269].try_into().expect("16 bytes")),
            tick_current: i32::from_le_bytes(data[269..273].try_into().expect("4 bytes")),
        })
    }

    /// Ticks covered by one array at this pool's spacing
    pub fn ticks_per_array(&self) -> i32 {
        self.tick_spacing as i32 * TICK_ARRAY_SIZE
    }

    /// Start index of the array containing `tick`
    pub fn tick_array_start(&self, tick: i32) -> i32 {
        let span = self.ticks_per_array();
        tick.div_euclid(span) * span
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TickInfo {
    pub tick: i32,
    pub liquidity_net: i128,
    pub liquidity_gross: u128,
}

impl TickInfo {
    pub fn initialized(&self) -> bool {
        self.liquidity_gross > 0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TickArrayState {
    pub address: Pubkey,
    pub pool: Pubkey,
    pub start_tick_index: i32,
    pub ticks: Vec<TickInfo>,
}

impl TickArrayState {
    pub fn parse(address: &Pubkey, data: &[u8]) -> Result<Self, BuildError> {
        let needed = TICK_ARRAY_HEADER_LEN + TICK_ARRAY_SIZE as usize * TICK_STATE_LEN;
        if data.len() < needed {
            return Err(BuildError::PoolStateUnavailable(format!(
                "tick array {} bytes, expected at least {}",
                data.len(),
                needed
            )));
        }
        let pool_bytes: [u8; 32] = data[8..40].try_into().expect("32 bytes");
        let start_tick_index = i32::from_le_bytes(data[40..44].try_into().expect("4 bytes"));
        let mut ticks = Vec::with_capacity(TICK_ARRAY_SIZE as usize);
        for i in 0..TICK_ARRAY_SIZE as usize {
            let base = TICK_ARRAY_HEADER_LEN + i * TICK_STATE_LEN;
            ticks.push(TickInfo {
                tick: i32::from_le_bytes(data[base..base + 4].try_into().expect("4 bytes")),
                liquidity_net: i128::from_le_bytes(
                    data[base + 4..base + 20].try_into().expect("16 bytes"),
                ),
                liquidity_gross: u128::from_le_bytes(
                    data[base + 20..base + 36].try_into().expect("16 bytes"),
                ),
            });
        }
        Ok(Self {
            address: *address,
            pool: Pubkey::from(pool_bytes),
            start_tick_index,
            ticks,
        })
    }

    /// Net liquidity change from crossing every initialized tick, oriented
    /// for a downward (`zero_for_one`) or upward crossing
    pub fn net_liquidity_crossed(&self, zero_for_one: bool) -> i128 {
        let net: i128 = self
            .ticks
            .iter()
            .filter(|t| t.initialized())
            .map(|t| t.liquidity_net)
            .sum();
        if zero_for_one {
            -net
        } else {
            net
        }
    }
}

/// amm-config layout: trade_fee_rate u64 (parts per million) at offset 16
pub const CLMM_CONFIG_MIN_LEN: usize = 24;

/// Read the trade fee out of the amm-config account
pub fn parse_config_fee(data: &[u8]) -> Result<u64, BuildError> {
    if data.len() < CLMM_CONFIG_MIN_LEN {
        return Err(BuildError::PoolStateUnavailable(format!(
            "clmm config account {} bytes, expected at least {}",
            data.len(),
            CLMM_CONFIG_MIN_LEN
        )));
    }
    Ok(u64::from_le_bytes(data[16..24].try_into().expect("8 bytes")))
}

/// Bitmap extension PDA: seeds `["pool_tick_array_bitmap_extension", pool]`
pub fn derive_bitmap_extension(pool: &Pubkey) -> Pubkey {
    Pubkey::find_program_address(
        &[b"pool_tick_array_bitmap_extension", pool.as_ref()],
        &program_id(),
    )
    .0
}

/// Tick-array PDA: seeds `["tick_array", pool, start_index big-endian]`
pub fn derive_tick_array_address(pool: &Pubkey, start_index: i32) -> Pubkey {
    let program = program_id();
    Pubkey::find_program_address(
        &[b"tick_array", pool.as_ref(), &start_index.to_be_bytes()],
        &program,
    )
    .0
}

/// Bitmap extension layout: discriminator 8, pool id 32, then 14 u64 words
/// for non-negative array indices followed by 14 for negative indices.
#[derive(Debug, Clone, PartialEq)]
pub struct TickArrayBitmapExtension {
    pub address: Pubkey,
    pub pool: Pubkey,
    pub positive_words: [u64; BITMAP_WORDS],
    pub negative_words: [u64; BITMAP_WORDS],
}

impl TickArrayBitmapExtension {
    pub fn parse(address: &Pubkey, data: &[u8]) -> Result<Self, BuildError> {
        let needed = 40 + BITMAP_WORDS * 8 * 2;
        if data.len() < needed {
            return Err(BuildError::PoolStateUnavailable(format!(
                "bitmap extension {} bytes, expected at least {}",
                data.len(),
                needed
            )));
        }
        let pool_bytes: [u8; 32] = data[8..40].try_into().expect("32 bytes");
        let mut positive_words = [0u64; BITMAP_WORDS];
        let mut negative_words = [0u64; BITMAP_WORDS];
        for i in 0..BITMAP_WORDS {
            let p = 40 + i * 8;
            positive_words[i] = u64::from_le_bytes(data[p..p + 8].try_into().expect("8 bytes"));
            let n = 40 + BITMAP_WORDS * 8 + i * 8;
            negative_words[i] = u64::from_le_bytes(data[n..n + 8].try_into().expect("8 bytes"));
        }
        Ok(Self {
            address: *address,
            pool: Pubkey::from(pool_bytes),
            positive_words,
            negative_words,
        })
    }

    /// Whether the array starting at `start_index` is initialized
    pub fn is_initialized(&self, start_index: i32, ticks_per_array: i32) -> bool {
        let array_index = start_index.div_euclid(ticks_per_array);
        let (words, offset) = if array_index >= 0 {
            (&self.positive_words, array_index as usize)
        } else {
            (&self.negative_words, (-array_index - 1) as usize)
        };
        let word = offset / 64;
        let bit = offset % 64;
        word < BITMAP_WORDS && (words[word] >> bit) & 1 == 1
    }
}

/// Everything a concentrated-liquidity build reads from one cache snapshot
#[derive(Debug, Clone, PartialEq)]
pub struct ClmmPoolBundle {
    pub pool: ClmmPoolState,
    /// Trade fee in parts per million, from the amm config account
    pub fee_rate_ppm: u64,
    pub bitmap: Option<TickArrayBitmapExtension>,
    pub tick_arrays: Vec<TickArrayState>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SwapSimulation {
    pub amount_out: u64,
    /// Start indices of the arrays the swap traversed, in traversal order
    pub tick_array_starts: Vec<i32>,
}

fn sqrt_price_at_tick(tick: i32) -> f64 {
    (tick as f64 * 1.0001f64.ln() / 2.0).exp()
}

/// Walk the swap across tick arrays.
///
/// Computes the expected output for `amount_in` (fee already deducted by the
/// caller) and enumerates the arrays the on-chain program will touch. The
/// walk works at tick-array granularity: liquidity is adjusted by the net of
/// each array's initialized ticks as the boundary is crossed.
pub fn simulate_swap(
    bundle: &ClmmPoolBundle,
    amount_in: u64,
    zero_for_one: bool,
) -> Result<SwapSimulation, BuildError> {
    if amount_in == 0 {
        return Err(BuildError::ZeroQuote);
    }
    let pool = &bundle.pool;
    let span = pool.ticks_per_array();
    let mut sqrt_price = pool.sqrt_price_x64 as f64 / 2f64.powi(64);
    if sqrt_price <= 0.0 {
        return Err(BuildError::PoolStateUnavailable("zero sqrt price".into()));
    }
    let mut liquidity = pool.liquidity as f64;
    let mut remaining = amount_in as f64;
    let mut amount_out = 0.0f64;
    let mut used = Vec::new();

    let mut start = pool.tick_array_start(pool.tick_current);
    loop {
        let array = bundle
            .tick_arrays
            .iter()
            .find(|a| a.start_tick_index == start);
        let Some(array) = array else {
            // The bundle ran out of arrays in this direction; the swap is
            // quoted against what was fetched.
            break;
        };
        if let Some(bitmap) = &bundle.bitmap {
            if !bitmap.is_initialized(start, span) && used.is_empty() {
                return Err(BuildError::PoolStateUnavailable(format!(
                    "tick array at {} not initialized",
                    start
                )));
            }
        }
        used.push(start);

        // Price at the boundary the walk is moving toward
        let boundary_tick = if zero_for_one { start } else { start + span };
        let boundary_price = sqrt_price_at_tick(boundary_tick);

        if liquidity > 0.0 {
            let (capacity_in, full_out) = if zero_for_one {
                let d_in = liquidity * (1.0 / boundary_price - 1.0 / sqrt_price);
                let d_out = liquidity * (sqrt_price - boundary_price);
                (d_in, d_out)
            } else {
                let d_in = liquidity * (boundary_price - sqrt_price);
                let d_out = liquidity * (1.0 / sqrt_price - 1.0 / boundary_price);
                (d_in, d_out)
            };

            if remaining < capacity_in {
                // Swap finishes inside this array
                let new_price = if zero_for_one {
                    1.0 / (1.0 / sqrt_price + remaining / liquidity)
                } else {
                    sqrt_price + remaining / liquidity
                };
                amount_out += if zero_for_one {
                    liquidity * (sqrt_price - new_price)
                } else {
                    liquidity * (1.0 / sqrt_price - 1.0 / new_price)
                };
                remaining = 0.0;
                break;
            }
            amount_out += full_out;
            remaining -= capacity_in;
        }

        // Cross into the next array, adjusting liquidity by the ticks passed
        sqrt_price = boundary_price;
        liquidity = (liquidity + array.net_liquidity_crossed(zero_for_one) as f64).max(0.0);
        start = if zero_for_one { start - span } else { start + span };
        if remaining <= 0.0 {
            break;
        }
    }

    let out = amount_out.floor();
    if out < 1.0 {
        return Err(BuildError::ZeroQuote);
    }
    Ok(SwapSimulation {
        amount_out: out as u64,
        tick_array_starts: used,
    })
}

pub fn program_id() -> Pubkey {
    Pubkey::from_str(constants::CLMM_PROGRAM_ID).expect("valid program id")
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;

    #[test]
    fn test_pool_parse_round_trips_fields() {
        let pool = Pubkey::new_unique();
        let amm_config = Pubkey::new_unique();
        let sqrt_price = 2u128.pow(64);
        let data = synthetic_pool_data(&amm_config, 10, 1_000_000, sqrt_price, -15);

        let state = ClmmPoolState::parse(&pool, &data).unwrap();
        assert_eq!(state.amm_config, amm_config);
        assert_eq!(state.tick_spacing, 10);
        assert_eq!(state.liquidity, 1_000_000);
        assert_eq!(state.sqrt_price_x64, sqrt_price);
        assert_eq!(state.tick_current, -15);
        // -15 lives in the array starting at -600 for spacing 10
        assert_eq!(state.tick_array_start(-15), -600);
        assert_eq!(state.tick_array_start(15), 0);
    }

    #[test]
    fn test_tick_array_parse_round_trips() {
        let pool = Pubkey::new_unique();
        let address = Pubkey::new_unique();
        let mut data =
            vec![0u8; TICK_ARRAY_HEADER_LEN + TICK_ARRAY_SIZE as usize * TICK_STATE_LEN];
        data[8..40].copy_from_slice(pool.as_ref());
        data[40..44].copy_from_slice(&600i32.to_le_bytes());
        // First tick initialized with net +5
        data[44..48].copy_from_slice(&600i32.to_le_bytes());
        data[48..64].copy_from_slice(&5i128.to_le_bytes());
        data[64..80].copy_from_slice(&5u128.to_le_bytes());

        let array = TickArrayState::parse(&address, &data).unwrap();
        assert_eq!(array.pool, pool);
        assert_eq!(array.start_tick_index, 600);
        assert_eq!(array.ticks.len(), TICK_ARRAY_SIZE as usize);
        assert!(array.ticks[0].initialized());
        assert_eq!(array.net_liquidity_crossed(false), 5);
        assert_eq!(array.net_liquidity_crossed(true), -5);
    }

    #[test]
    fn test_bitmap_tracks_positive_and_negative_arrays() {
        let pool = Pubkey::new_unique();
        let address = Pubkey::new_unique();
        let mut data = vec![0u8; 40 + BITMAP_WORDS * 16];
        data[8..40].copy_from_slice(pool.as_ref());
        // array index 3 initialized (positive word 0 bit 3)
        data[40..48].copy_from_slice(&(1u64 << 3).to_le_bytes());
        // array index -1 initialized (negative word 0 bit 0)
        let n = 40 + BITMAP_WORDS * 8;
        data[n..n + 8].copy_from_slice(&1u64.to_le_bytes());

        let bitmap = TickArrayBitmapExtension::parse(&address, &data).unwrap();
        let span = 600;
        assert!(bitmap.is_initialized(3 * span, span));
        assert!(!bitmap.is_initialized(2 * span, span));
        assert!(bitmap.is_initialized(-span, span));
        assert!(!bitmap.is_initialized(-2 * span, span));
    }

    #[test]
    fn test_simulation_spans_two_arrays() {
        let pool_key = Pubkey::new_unique();
        let amm_config = Pubkey::new_unique();
        // Price at tick 30, spacing 10, array span 600: selling token0
        // traverses array 0 then array -600.
        let sqrt_price = sqrt_price_at_tick(30);
        let sqrt_price_x64 = (sqrt_price * 2f64.powi(64)) as u128;
        let data = synthetic_pool_data(&amm_config, 10, 0, sqrt_price_x64, 30);
        let mut state = ClmmPoolState::parse(&pool_key, &data).unwrap();
        state.liquidity = 10_000_000_000;

        let bundle = ClmmPoolBundle {
            pool: state,
            fee_rate_ppm: 2500,
            bitmap: None,
            tick_arrays: vec![
                synthetic_tick_array(&pool_key, 0),
                synthetic_tick_array(&pool_key, -600),
            ],
        };

        // Large enough to exhaust the first array's range
        let sim = simulate_swap(&bundle, 2_000_000_000, true).unwrap();
        assert_eq!(sim.tick_array_starts, vec![0, -600]);
        assert!(sim.amount_out > 0);
    }

    #[test]
    fn test_small_swap_stays_in_one_array() {
        let pool_key = Pubkey::new_unique();
        let amm_config = Pubkey::new_unique();
        let sqrt_price_x64 = (sqrt_price_at_tick(30) * 2f64.powi(64)) as u128;
        let data = synthetic_pool_data(&amm_config, 10, 0, sqrt_price_x64, 30);
        let mut state = ClmmPoolState::parse(&pool_key, &data).unwrap();
        state.liquidity = 10_000_000_000_000;

        let bundle = ClmmPoolBundle {
            pool: state,
            fee_rate_ppm: 2500,
            bitmap: None,
            tick_arrays: vec![
                synthetic_tick_array(&pool_key, 0),
                synthetic_tick_array(&pool_key, -600),
            ],
        };

        let sim = simulate_swap(&bundle, 1_000, true).unwrap();
        assert_eq!(sim.tick_array_starts, vec![0]);
        // Near-unity price: output close to input
        assert!(sim.amount_out > 0 && sim.amount_out <= 1_100);
    }

    #[test]
    fn test_zero_amount_is_rejected() {
        let pool_key = Pubkey::new_unique();
        let data = synthetic_pool_data(&Pubkey::new_unique(), 10, 1, 2u128.pow(64), 0);
        let state = ClmmPoolState::parse(&pool_key, &data).unwrap();
        let bundle = ClmmPoolBundle {
            pool: state,
            fee_rate_ppm: 0,
            bitmap: None,
            tick_arrays: vec![],
        };
        assert!(matches!(
            simulate_swap(&bundle, 0, true),
            Err(BuildError::ZeroQuote)
        ));
    }
}
