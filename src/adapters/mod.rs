// Concrete Solana implementations of the collaborator traits

pub mod dexscreener;
pub mod jito;
pub mod jupiter;
pub mod solana;
pub mod wallet;

pub use dexscreener::{DexScreenerDetector, DexScreenerMarket};
pub use jito::JitoRelay;
pub use jupiter::{JupiterPriceFeed, JupiterSwapBuilder};
pub use solana::SolanaRpcNode;
pub use wallet::KeypairWallet;
