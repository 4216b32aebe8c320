// Solana Sniper Core Library
//
// Trading execution core for new-token sniping on Solana:
// - Weighted multi-RPC pool with health-adjusted provider selection
// - Percentile-based priority fee optimizer
// - Transaction bundler with relay bundle -> parallel -> sequential fallback
// - Opportunity scoring of freshly detected tokens
// - Position lifecycle with take-profit ladder, stop loss and rug-pull exits
// - Engine wiring with graceful shutdown

pub mod adapters;
pub mod chain;
pub mod config;
pub mod data;
pub mod engine;
pub mod error;
pub mod events;
pub mod strategy;
pub mod utils;

pub use engine::{DetectorFeed, Engine, EngineConfig, EngineContext, EngineHandle, ShutdownReport};
pub use error::{ExecutionError, RpcError};
pub use events::{EngineEvent, EventBus};
