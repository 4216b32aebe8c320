// Typed event bus. One tagged enum over a broadcast channel; subscribers
// match exhaustively. Publishing never blocks and a bus without subscribers
// drops events.

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::trace;

use crate::strategy::{Recommendation, ScoreCategory, TokenSnapshot};

pub const DEFAULT_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EngineEvent {
    NewTokenDetected {
        chain: String,
        token: TokenSnapshot,
    },
    TokenAnalysisComplete {
        token_id: String,
        aggregate: f64,
        category: ScoreCategory,
        recommendation: Recommendation,
    },
    PotentialOpportunity {
        token_id: String,
        symbol: String,
        aggregate: f64,
        price: f64,
    },
    RugPullDetected {
        token_id: String,
        held: bool,
    },
}

impl EngineEvent {
    pub fn name(&self) -> &'static str {
        match self {
            EngineEvent::NewTokenDetected { .. } => "new_token_detected",
            EngineEvent::TokenAnalysisComplete { .. } => "token_analysis_complete",
            EngineEvent::PotentialOpportunity { .. } => "potential_opportunity",
            EngineEvent::RugPullDetected { .. } => "rug_pull_detected",
        }
    }
}

#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<EngineEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn publish(&self, event: EngineEvent) {
        let name = event.name();
        // Err only means nobody is listening
        let receivers = self.sender.send(event).unwrap_or(0);
        trace!(event = name, receivers, "Published event");
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
