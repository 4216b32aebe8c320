// Decision layer: scoring candidates and managing positions

pub mod lifecycle;
pub mod market;
pub mod position;
pub mod scorer;

pub use lifecycle::{ExecutionReport, LifecycleConfig, LifecycleManager, ReportKind};
pub use market::{median, MarketData, PriceAggregator};
pub use position::{
    ExitDecision, ExitPlan, ExitReason, LadderStep, Position, PositionStatus, TakeProfitRung,
    UnresolvedExit,
};
pub use scorer::{
    OpportunityScorer, Recommendation, ScoreCategory, ScoreResult, ScoringConfig, SocialFlags,
    Thresholds, TokenSnapshot,
};
