/// Global constants for the copy-trading engine
///
/// This module centralizes program ids, instruction discriminators and
/// default tuning values so the rest of the code never spells a magic
/// number twice.
use std::time::Duration;

// ============================================================================
// SOLANA BLOCKCHAIN CONSTANTS
// ============================================================================

/// 1 SOL = 1 billion lamports
pub const LAMPORTS_PER_SOL: u64 = 1_000_000_000;

/// Convert lamports to SOL (floating point, display only)
pub const fn lamports_to_sol(lamports: u64) -> f64 {
    lamports as f64 / LAMPORTS_PER_SOL as f64
}

/// Solana block time (approximately 400ms per slot)
pub const SOLANA_BLOCK_TIME_MS: u64 = 400;

/// System program
pub const SYSTEM_PROGRAM_ID: &str = "11111111111111111111111111111111";

/// SPL Token program
pub const TOKEN_PROGRAM_ID: &str = "TokenkegQfeZyiNwAJbNbGKPFXCWuBvf9Ss623VQ5DA";

/// SPL Token-2022 program
pub const TOKEN_2022_PROGRAM_ID: &str = "TokenzQdBNbLqP5VEhdkAS6EPFLC1PHnBqCXEpPxuEb";

/// Associated token account program
pub const ATA_PROGRAM_ID: &str = "ATokenGPvbdGVxr1b2hvZbsiqW5xWH25efTNsLJA8knL";

/// Compute budget program
pub const COMPUTE_BUDGET_PROGRAM_ID: &str = "ComputeBudget111111111111111111111111111111";

/// Wrapped SOL mint (the quote side of every curve-style pool we watch)
pub const WSOL_MINT: &str = "So11111111111111111111111111111111111111112";

// ============================================================================
// DEX PROGRAM IDS
// ============================================================================

/// Bonding-curve program (pump.fun)
pub const BONDING_CURVE_PROGRAM_ID: &str = "6EF8rrecthR5Dkzon8Nwu78hRvfCKubJ14M5uBEwF6P";

/// Constant-product AMM program (Raydium AMM V4)
pub const CP_AMM_PROGRAM_ID: &str = "675kPX9MHTjS2zt1qfr1NYHuzeLXfQM9H24wFSUt1Mp8";

/// Concentrated-liquidity AMM program (Raydium CLMM)
pub const CLMM_PROGRAM_ID: &str = "CAMMCzo5YL8w4VFF8KVHrK22GGUsp5VTaW7grrKgrWqK";

/// Constant-product AMM V2 program (Raydium CPMM)
pub const CPMM_PROGRAM_ID: &str = "CPMMoo8L3F4NbTegBCKVNunggL7H1ZpdTHKxQB5qKP1C";

/// Launchpad curve program (Raydium Launchpad)
pub const LAUNCHPAD_PROGRAM_ID: &str = "LanMV9sAd7wArD4vJFi2qDdfnVhFxYSUg6eADduJ3uj";

/// Bin-liquidity AMM program (Meteora DLMM)
pub const DLMM_PROGRAM_ID: &str = "LBUZKhRxPF3XUpBCjp4YzTKgLccjZhTSDM9YuVaPwxo";

/// Dynamic bonding-curve program (Meteora DBC)
pub const DBC_PROGRAM_ID: &str = "dbcij3LWUppWqq96dh6gJWwBifmcGfLSB5D4DuSMaqN";

/// Dynamic constant-product AMM program (Meteora DAMM v2)
pub const DAMM_V2_PROGRAM_ID: &str = "cpamdpZCGKUy5JxQXB4dcpGPiikHawvSWAd6mEn1sGG";

/// Router/aggregator program (Jupiter v6)
pub const ROUTER_PROGRAM_ID: &str = "JUP6LkbZbjS1jKKwapdHNy74zcZ3tLUZoi5QNyVTaV4";

// ============================================================================
// BONDING CURVE ACCOUNTS
// ============================================================================

/// Bonding-curve global config account
pub const BONDING_CURVE_GLOBAL: &str = "4wTV1YmiEkRvAtNtsSGPtUrqRYQMe5SKy2uB4Jjaxnjf";

/// Bonding-curve protocol fee recipient
pub const BONDING_CURVE_FEE_RECIPIENT: &str = "CebN5WGQ4jvEPvsVU4EoHEpgzq1VV7AbicfhtW4xC9iM";

/// Bonding-curve CPI event authority PDA
pub const BONDING_CURVE_EVENT_AUTHORITY: &str = "Ce6TQqeHC9p8KetsN6JsjHK7UTZk7nasjjnr7XxXp9F1";

/// Bonding-curve fee program
pub const BONDING_CURVE_FEE_PROGRAM: &str = "pfeeUxB6jkeY1Hxd7CsFCAjcbHA9rWtchMGdZ6VojVZ";

// ============================================================================
// INSTRUCTION DISCRIMINATORS
// ============================================================================

/// Bonding-curve buy (Anchor: sha256("global:buy")[..8])
pub const BONDING_CURVE_BUY_DISCRIMINATOR: [u8; 8] = [102, 6, 61, 18, 1, 218, 235, 234];

/// Bonding-curve sell (Anchor: sha256("global:sell")[..8])
pub const BONDING_CURVE_SELL_DISCRIMINATOR: [u8; 8] = [51, 230, 133, 164, 1, 127, 131, 173];

/// Constant-product AMM swap-base-in opcode (single byte, not Anchor)
pub const CP_AMM_SWAP_OPCODE: u8 = 9;

/// CLMM swap-v2 (Anchor: sha256("global:swap_v2")[..8])
pub const CLMM_SWAP_V2_DISCRIMINATOR: [u8; 8] = [43, 4, 237, 11, 26, 201, 30, 98];

/// CPMM swap-base-in (Anchor: sha256("global:swap_base_input")[..8])
pub const CPMM_SWAP_BASE_IN_DISCRIMINATOR: [u8; 8] = [143, 190, 90, 218, 196, 30, 51, 222];

/// Launchpad buy-exact-in (Anchor: sha256("global:buy_exact_in")[..8])
pub const LAUNCHPAD_BUY_EXACT_IN_DISCRIMINATOR: [u8; 8] = [250, 234, 13, 123, 213, 156, 19, 236];

/// Launchpad sell-exact-in (Anchor: sha256("global:sell_exact_in")[..8])
pub const LAUNCHPAD_SELL_EXACT_IN_DISCRIMINATOR: [u8; 8] = [149, 39, 222, 155, 211, 124, 152, 26];

/// Anchor swap discriminator shared by DLMM, DBC and DAMM v2
/// (all three name their instruction "swap": sha256("global:swap")[..8])
pub const ANCHOR_SWAP_DISCRIMINATOR: [u8; 8] = [248, 198, 158, 145, 225, 117, 135, 200];

// ============================================================================
// STREAM INGRESS DEFAULTS
// ============================================================================

/// Signature dedup window (at-least-once source, at-most-once downstream)
pub const SIGNATURE_DEDUP_CAPACITY: usize = 4096;

/// Transactions older than this on arrival are dropped as stale
pub const FRESHNESS_HORIZON: Duration = Duration::from_secs(20);

/// Reconnect backoff floor
pub const RECONNECT_BACKOFF_MIN: Duration = Duration::from_millis(250);

/// Reconnect backoff ceiling
pub const RECONNECT_BACKOFF_MAX: Duration = Duration::from_secs(8);

/// Reconnect backoff jitter (fraction of the current delay)
pub const RECONNECT_JITTER: f64 = 0.25;

// ============================================================================
// POOL CACHE DEFAULTS
// ============================================================================

/// TTL for dynamic pool state (reserves, active bin, sqrt price)
pub const POOL_CACHE_TTL: Duration = Duration::from_secs(2);

/// Hard cap on cached pool entries, LRU beyond this
pub const POOL_CACHE_CAPACITY: usize = 4096;

// ============================================================================
// EXECUTOR DEFAULTS
// ============================================================================

/// Maximum compute units a transaction may request
pub const MAX_COMPUTE_UNITS: u32 = 1_400_000;

/// Compute-unit floor when simulation reports less
pub const COMPUTE_UNIT_FLOOR: u32 = 80_000;

/// Headroom applied on top of simulated units
pub const COMPUTE_UNIT_HEADROOM: f64 = 1.3;

/// Blockhash reuse window per master
pub const BLOCKHASH_MAX_AGE: Duration = Duration::from_secs(2);

/// Confirmation deadline after submission
pub const CONFIRM_TIMEOUT: Duration = Duration::from_secs(20);

/// Submission retries on blockhash expiry / transient endpoint errors
pub const SUBMIT_RETRIES: u32 = 2;

/// Fee + rent headroom checked before a buy (lamports)
pub const FEE_BUFFER_LAMPORTS: u64 = 5_000_000;

/// Simulation log tail retained on a rejected plan (bytes)
pub const SIMULATION_LOG_TAIL: usize = 4096;

/// Known MEV tip accounts; one is picked at random per protected transaction
pub const TIP_ACCOUNTS: [&str; 8] = [
    "96gYZGLnJYVFmbjzopPSU6QiEV5fGqZNyN9nmNhvrZU5",
    "HFqU5x63VTqvQss8hp11i4wVV8bD44PvwucfZ2bU7gRe",
    "Cw8CFyM9FkoMi7K7Crf6HNQqf4uEMzpKw6QNghXLvLkY",
    "ADaUMid9yfUytqMBgopwjb2DTLSokTSzL1zt6iGPaS49",
    "DfXygSm4jCyNCybVYYK6DwvWqjKee8pbDmJGcLWNDXjh",
    "ADuUkR4vqLUMWXxW9gh6D6L8pMSawimctcNZ5pGwDcEt",
    "DttWaMuVvTiduZRnguLF7jNxTgiMBZ1hyAumKUiL2KRL",
    "3AVi9Tg9Uo68tJfuvoKvqKNWKkC5wPdSSdeBnizKZ6jT",
];

// ============================================================================
// COORDINATOR DEFAULTS
// ============================================================================

/// Plans a single follower may execute in parallel
pub const PER_FOLLOWER_CONCURRENCY: usize = 4;

/// Bounded per-follower plan queue; overflow drops the oldest plan
pub const FOLLOWER_QUEUE_CAPACITY: usize = 64;

/// Default plan deadline relative to intent observation
pub const PLAN_DEADLINE: Duration = Duration::from_secs(15);

/// Idempotency window over (master signature, follower) pairs
pub const IDEMPOTENCY_CAPACITY: usize = 8192;

#[cfg(test)]
mod tests {
    use super::*;
    use sha2::{Digest, Sha256};
    use solana_sdk::pubkey::Pubkey;
    use std::str::FromStr;

    fn anchor_discriminator(name: &str) -> [u8; 8] {
        let digest = Sha256::digest(format!("global:{}", name).as_bytes());
        digest[..8].try_into().unwrap()
    }

    #[test]
    fn test_anchor_discriminators_match_derivation() {
        assert_eq!(anchor_discriminator("buy"), BONDING_CURVE_BUY_DISCRIMINATOR);
        assert_eq!(anchor_discriminator("sell"), BONDING_CURVE_SELL_DISCRIMINATOR);
        assert_eq!(anchor_discriminator("swap_v2"), CLMM_SWAP_V2_DISCRIMINATOR);
        assert_eq!(
            anchor_discriminator("swap_base_input"),
            CPMM_SWAP_BASE_IN_DISCRIMINATOR
        );
        assert_eq!(
            anchor_discriminator("buy_exact_in"),
            LAUNCHPAD_BUY_EXACT_IN_DISCRIMINATOR
        );
        assert_eq!(
            anchor_discriminator("sell_exact_in"),
            LAUNCHPAD_SELL_EXACT_IN_DISCRIMINATOR
        );
        assert_eq!(anchor_discriminator("swap"), ANCHOR_SWAP_DISCRIMINATOR);
    }

    #[test]
    fn test_program_ids_parse() {
        for id in [
            BONDING_CURVE_PROGRAM_ID,
            CP_AMM_PROGRAM_ID,
            CLMM_PROGRAM_ID,
            CPMM_PROGRAM_ID,
            LAUNCHPAD_PROGRAM_ID,
            DLMM_PROGRAM_ID,
            DBC_PROGRAM_ID,
            DAMM_V2_PROGRAM_ID,
            ROUTER_PROGRAM_ID,
            TOKEN_PROGRAM_ID,
            TOKEN_2022_PROGRAM_ID,
            COMPUTE_BUDGET_PROGRAM_ID,
        ] {
            assert!(Pubkey::from_str(id).is_ok(), "bad program id: {}", id);
        }
        for tip in TIP_ACCOUNTS {
            assert!(Pubkey::from_str(tip).is_ok(), "bad tip account: {}", tip);
        }
    }
}
