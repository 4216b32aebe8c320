// Opportunity scorer
//
// Each indicator maps a raw metric to 0-10 through a monotonic piecewise
// linear curve:
//
//   below minimum          -> 0
//   minimum .. target      -> 2 .. 5
//   target .. excellent    -> 5 .. 8
//   excellent .. 2x excel. -> 8 .. 10 (capped)
//
// The aggregate is the weight-normalized mean scaled to 0-100. Scoring is
// pure and deterministic.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tracing::debug;

/// Social links advertised for a token
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SocialFlags {
    pub website: bool,
    pub twitter: bool,
    pub telegram: bool,
}

impl SocialFlags {
    pub fn count(&self) -> u32 {
        [self.website, self.twitter, self.telegram]
            .iter()
            .filter(|present| **present)
            .count() as u32
    }
}

/// Candidate token as emitted by a detector feed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenSnapshot {
    pub token_id: String,
    pub symbol: String,
    pub name: String,
    pub liquidity_usd: f64,
    pub volume_24h_usd: f64,
    /// Price in SOL per token
    pub price: f64,
    pub age: Duration,
    pub price_change_5m_pct: Option<f64>,
    pub price_change_1h_pct: Option<f64>,
    pub social: SocialFlags,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    pub minimum: f64,
    pub target: f64,
    pub excellent: f64,
}

impl Thresholds {
    pub const fn new(minimum: f64, target: f64, excellent: f64) -> Self {
        Self {
            minimum,
            target,
            excellent,
        }
    }

    /// Map a raw metric onto 0-10
    pub fn score(&self, value: f64) -> f64 {
        if !value.is_finite() || value < self.minimum {
            return 0.0;
        }
        if value < self.target {
            return 2.0 + 3.0 * fraction(value - self.minimum, self.target - self.minimum);
        }
        if value < self.excellent {
            return 5.0 + 3.0 * fraction(value - self.target, self.excellent - self.target);
        }
        if self.excellent <= 0.0 {
            return 10.0;
        }
        (8.0 + 2.0 * (value - self.excellent) / self.excellent).min(10.0)
    }
}

fn fraction(offset: f64, span: f64) -> f64 {
    if span <= 0.0 {
        1.0
    } else {
        (offset / span).clamp(0.0, 1.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IndicatorWeights {
    pub liquidity: f64,
    pub volume: f64,
    pub social: f64,
    pub momentum_short: f64,
    pub momentum_medium: f64,
    pub name: f64,
}

impl Default for IndicatorWeights {
    fn default() -> Self {
        Self {
            liquidity: 0.35,
            volume: 0.30,
            social: 0.05,
            momentum_short: 0.10,
            momentum_medium: 0.05,
            name: 0.15,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScoringConfig {
    pub liquidity: Thresholds,
    pub volume: Thresholds,
    /// Percent price change
    pub momentum: Thresholds,
    pub weights: IndicatorWeights,
    /// Aggregate (0-100) at or above which the recommendation is BUY
    pub buy_threshold: f64,
    /// Lowercase words that mark a name as suspicious
    pub blocklist: Vec<String>,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            liquidity: Thresholds::new(5_000.0, 50_000.0, 100_000.0),
            volume: Thresholds::new(10_000.0, 50_000.0, 100_000.0),
            momentum: Thresholds::new(0.0, 10.0, 50.0),
            weights: IndicatorWeights::default(),
            buy_threshold: 70.0,
            blocklist: ["test", "rug", "scam", "honeypot", "fake"]
                .iter()
                .map(|w| w.to_string())
                .collect(),
        }
    }
}

/// Score used when a momentum window is not reported
const NEUTRAL_SCORE: f64 = 5.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScoreCategory {
    Excellent,
    Good,
    Fair,
    Poor,
}

impl ScoreCategory {
    pub fn from_aggregate(aggregate: f64) -> Self {
        if aggregate >= 85.0 {
            ScoreCategory::Excellent
        } else if aggregate >= 70.0 {
            ScoreCategory::Good
        } else if aggregate >= 50.0 {
            ScoreCategory::Fair
        } else {
            ScoreCategory::Poor
        }
    }
}

impl fmt::Display for ScoreCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ScoreCategory::Excellent => "excellent",
            ScoreCategory::Good => "good",
            ScoreCategory::Fair => "fair",
            ScoreCategory::Poor => "poor",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Recommendation {
    Buy,
    Pass,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndicatorScore {
    pub name: String,
    pub score: f64,
    pub weight: f64,
}

impl IndicatorScore {
    fn new(name: &str, score: f64, weight: f64) -> Self {
        Self {
            name: name.to_string(),
            score,
            weight,
        }
    }

    pub fn weighted(&self) -> f64 {
        self.score * self.weight
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreResult {
    pub token_id: String,
    pub indicators: Vec<IndicatorScore>,
    /// 0-100
    pub aggregate: f64,
    pub category: ScoreCategory,
    pub recommendation: Recommendation,
}

impl ScoreResult {
    pub fn is_buy(&self) -> bool {
        self.recommendation == Recommendation::Buy
    }
}

pub struct OpportunityScorer {
    config: ScoringConfig,
}

impl OpportunityScorer {
    pub fn new(config: ScoringConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ScoringConfig {
        &self.config
    }

    pub fn score(&self, token: &TokenSnapshot) -> ScoreResult {
        let w = &self.config.weights;
        let momentum = |change: Option<f64>| {
            change.map_or(NEUTRAL_SCORE, |pct| self.config.momentum.score(pct))
        };

        let indicators = vec![
            IndicatorScore::new(
                "liquidity",
                self.config.liquidity.score(token.liquidity_usd),
                w.liquidity,
            ),
            IndicatorScore::new(
                "volume",
                self.config.volume.score(token.volume_24h_usd),
                w.volume,
            ),
            IndicatorScore::new("social", social_score(&token.social), w.social),
            IndicatorScore::new(
                "momentum_5m",
                momentum(token.price_change_5m_pct),
                w.momentum_short,
            ),
            IndicatorScore::new(
                "momentum_1h",
                momentum(token.price_change_1h_pct),
                w.momentum_medium,
            ),
            IndicatorScore::new(
                "name",
                name_score(&token.symbol, &token.name, &self.config.blocklist),
                w.name,
            ),
        ];

        let total_weight: f64 = indicators.iter().map(|i| i.weight.max(0.0)).sum();
        let aggregate = if total_weight > 0.0 {
            let weighted: f64 = indicators
                .iter()
                .map(|i| i.score * i.weight.max(0.0))
                .sum();
            (weighted / total_weight * 10.0).clamp(0.0, 100.0)
        } else {
            0.0
        };

        let recommendation = if aggregate >= self.config.buy_threshold {
            Recommendation::Buy
        } else {
            Recommendation::Pass
        };

        debug!(
            token = %token.token_id,
            symbol = %token.symbol,
            aggregate = format!("{:.1}", aggregate),
            ?recommendation,
            "Scored token"
        );

        ScoreResult {
            token_id: token.token_id.clone(),
            indicators,
            aggregate,
            category: ScoreCategory::from_aggregate(aggregate),
            recommendation,
        }
    }
}

impl Default for OpportunityScorer {
    fn default() -> Self {
        Self::new(ScoringConfig::default())
    }
}

/// 2 with no links, 10 with all three
fn social_score(flags: &SocialFlags) -> f64 {
    2.0 + 8.0 * flags.count() as f64 / 3.0
}

fn name_score(symbol: &str, name: &str, blocklist: &[String]) -> f64 {
    let mut score: f64 = 6.0;

    let symbol_len = symbol.chars().count();
    if (3..=6).contains(&symbol_len)
        && symbol
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit())
    {
        score += 2.0;
    }

    let name_len = name.trim().chars().count();
    if (3..=24).contains(&name_len) {
        score += 1.0;
    }

    let haystack = format!("{} {}", symbol, name).to_lowercase();
    if blocklist.iter().any(|word| haystack.contains(word.as_str())) {
        score -= 5.0;
    }

    score.clamp(0.0, 10.0)
}
