// Well-known addresses and endpoints used by the Solana adapters

use solana_sdk::pubkey::Pubkey;

/// Wrapped SOL token mint address (9 decimals)
pub const WSOL_MINT: Pubkey = solana_sdk::pubkey!("So11111111111111111111111111111111111111112");

/// USDC token mint address (6 decimals)
pub const USDC_MINT: Pubkey = solana_sdk::pubkey!("EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v");

pub const LAMPORTS_PER_SOL: u64 = 1_000_000_000;

pub const JUPITER_QUOTE_URL: &str = "https://quote-api.jup.ag/v6/quote";
pub const JUPITER_SWAP_URL: &str = "https://quote-api.jup.ag/v6/swap";
pub const JUPITER_PRICE_URL: &str = "https://api.jup.ag/price/v2";

pub const JITO_BLOCK_ENGINE_URL: &str = "https://mainnet.block-engine.jito.wtf/api/v1/bundles";

pub const DEXSCREENER_TOKENS_URL: &str = "https://api.dexscreener.com/latest/dex/tokens";
pub const DEXSCREENER_PROFILES_URL: &str = "https://api.dexscreener.com/token-profiles/latest/v1";

/// Compute units assumed for an aggregator swap when pricing a relay tip
pub const SWAP_COMPUTE_UNITS: u64 = 300_000;

/// Total lamports paid for `compute_units` at a per-CU price in micro-lamports
pub fn priority_fee_lamports(micro_lamports_per_cu: u64, compute_units: u64) -> u64 {
    micro_lamports_per_cu.saturating_mul(compute_units) / 1_000_000
}

/// Convert a SOL amount to lamports, rounding down
pub fn sol_to_lamports(sol: f64) -> u64 {
    if sol <= 0.0 {
        return 0;
    }
    (sol * LAMPORTS_PER_SOL as f64).floor() as u64
}

/// Convert whole token units to base units for `decimals`
pub fn to_base_units(amount: f64, decimals: u8) -> u64 {
    if amount <= 0.0 {
        return 0;
    }
    (amount * 10f64.powi(decimals as i32)).floor() as u64
}
