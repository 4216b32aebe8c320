// Market data sources combined by median
//
// Every source is queried concurrently; the answer is the median of the
// sources that replied in time, so one slow or manipulated venue cannot
// move the result on its own.

use anyhow::Result;
use async_trait::async_trait;
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::debug;

/// One price/liquidity venue
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MarketData: Send + Sync {
    fn source(&self) -> String;

    /// Price in SOL per token
    async fn price(&self, token_id: &str) -> Result<f64>;

    /// Pool liquidity in USD
    async fn liquidity(&self, token_id: &str) -> Result<f64>;
}

/// Median of the finite values, or `None` when there are none
pub fn median(values: &[f64]) -> Option<f64> {
    let mut finite: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    if finite.is_empty() {
        return None;
    }
    finite.sort_by(|a, b| a.total_cmp(b));
    let mid = finite.len() / 2;
    if finite.len() % 2 == 0 {
        Some((finite[mid - 1] + finite[mid]) / 2.0)
    } else {
        Some(finite[mid])
    }
}

#[derive(Clone, Copy)]
enum Quote {
    Price,
    Liquidity,
}

pub struct PriceAggregator {
    sources: Vec<Arc<dyn MarketData>>,
    query_timeout: Duration,
}

impl PriceAggregator {
    pub fn new(sources: Vec<Arc<dyn MarketData>>, query_timeout: Duration) -> Self {
        Self {
            sources,
            query_timeout,
        }
    }

    pub fn source_count(&self) -> usize {
        self.sources.len()
    }

    /// Median price across sources
    pub async fn price(&self, token_id: &str) -> Option<f64> {
        self.query(token_id, Quote::Price).await
    }

    /// Median liquidity across sources
    pub async fn liquidity(&self, token_id: &str) -> Option<f64> {
        self.query(token_id, Quote::Liquidity).await
    }

    async fn query(&self, token_id: &str, quote: Quote) -> Option<f64> {
        let futures = self.sources.iter().map(|source| async move {
            let call = async {
                match quote {
                    Quote::Price => source.price(token_id).await,
                    Quote::Liquidity => source.liquidity(token_id).await,
                }
            };
            match timeout(self.query_timeout, call).await {
                Ok(Ok(value)) if value.is_finite() && value > 0.0 => Some(value),
                Ok(Ok(value)) => {
                    debug!(source = %source.source(), token = %token_id, value, "Discarding non-positive quote");
                    None
                }
                Ok(Err(e)) => {
                    debug!(source = %source.source(), token = %token_id, error = %e, "Market source failed");
                    None
                }
                Err(_) => {
                    debug!(source = %source.source(), token = %token_id, "Market source timed out");
                    None
                }
            }
        });

        let values: Vec<f64> = join_all(futures).await.into_iter().flatten().collect();
        median(&values)
    }
}
