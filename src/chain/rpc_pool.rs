// Health-weighted multi-RPC pool
//
// Every outbound node call goes through `RpcPool::call`, which:
// 1. Picks a provider by weighted random draw over adjusted weights
//    (static weight x success rate x latency factor x jitter)
// 2. Records success/latency metrics for that provider
// 3. Retries with linear backoff, re-selecting a provider on every attempt
//
// Metrics are owned by the pool; selection works on cloned snapshots so a
// concurrent update never leaks a half-written record into the draw.

use dashmap::DashMap;
use rand::Rng;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{debug, info, warn};

use super::types::ChainClient;
use crate::error::{ExecutionError, RpcError};

pub const DEFAULT_RETRIES: u32 = 3;
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(100);
pub const DEFAULT_HEALTH_WINDOW: usize = 100;

const JITTER_MIN: f64 = 0.9;
const JITTER_MAX: f64 = 1.1;

/// Rolling health metrics for one provider
#[derive(Debug, Clone)]
pub struct ProviderMetrics {
    outcomes: VecDeque<bool>,
    window: usize,
    pub success_count: u64,
    pub error_count: u64,
    pub total_calls: u64,
    pub cumulative_latency_ms: f64,
    pub last_latency_ms: Option<f64>,
    pub last_used_at: Option<Instant>,
}

impl ProviderMetrics {
    pub fn new(window: usize) -> Self {
        Self {
            outcomes: VecDeque::with_capacity(window),
            window: window.max(1),
            success_count: 0,
            error_count: 0,
            total_calls: 0,
            cumulative_latency_ms: 0.0,
            last_latency_ms: None,
            last_used_at: None,
        }
    }

    /// Record one completed call; the oldest outcome falls out of the window
    pub fn record(&mut self, success: bool, latency: Duration) {
        if self.outcomes.len() == self.window {
            match self.outcomes.pop_front() {
                Some(true) => self.success_count -= 1,
                Some(false) => self.error_count -= 1,
                None => {}
            }
        }
        self.outcomes.push_back(success);
        if success {
            self.success_count += 1;
        } else {
            self.error_count += 1;
        }

        let latency_ms = latency.as_secs_f64() * 1000.0;
        self.total_calls += 1;
        self.cumulative_latency_ms += latency_ms;
        self.last_latency_ms = Some(latency_ms);
        self.last_used_at = Some(Instant::now());
    }

    /// Share of successful calls in the window, 1.0 with no history
    pub fn success_rate(&self) -> f64 {
        let total = self.success_count + self.error_count;
        if total == 0 {
            1.0
        } else {
            self.success_count as f64 / total as f64
        }
    }

    /// min(1, 1000 / last_latency_ms), 1.0 with no history
    pub fn latency_factor(&self) -> f64 {
        match self.last_latency_ms {
            Some(ms) if ms > 0.0 => (1000.0 / ms).min(1.0),
            _ => 1.0,
        }
    }

    pub fn average_latency_ms(&self) -> Option<f64> {
        if self.total_calls == 0 {
            None
        } else {
            Some(self.cumulative_latency_ms / self.total_calls as f64)
        }
    }
}

/// Immutable copy of a provider's state taken for one selection
#[derive(Debug, Clone)]
pub struct ProviderSnapshot {
    pub endpoint: String,
    pub weight: f64,
    pub metrics: ProviderMetrics,
}

impl ProviderSnapshot {
    /// Adjusted weight before jitter
    pub fn health_weight(&self) -> f64 {
        self.weight * self.metrics.success_rate() * self.metrics.latency_factor()
    }
}

/// Adjusted weight of a provider for a given jitter draw
pub fn adjusted_weight(snapshot: &ProviderSnapshot, jitter: f64) -> f64 {
    snapshot.health_weight() * jitter
}

/// Draw an index proportionally to `weights`; uniform when they sum to <= 0.
///
/// `weights` must not be empty.
pub fn weighted_choice<R: Rng + ?Sized>(weights: &[f64], rng: &mut R) -> usize {
    let total: f64 = weights.iter().filter(|w| w.is_finite() && **w > 0.0).sum();
    if total <= 0.0 {
        return rng.gen_range(0..weights.len());
    }

    let target = rng.gen::<f64>() * total;
    let mut cumulative = 0.0;
    for (idx, weight) in weights.iter().enumerate() {
        if !weight.is_finite() || *weight <= 0.0 {
            continue;
        }
        cumulative += weight;
        if target < cumulative {
            return idx;
        }
    }

    // Float rounding can leave target == total; hand it to the last positive weight
    weights
        .iter()
        .rposition(|w| w.is_finite() && *w > 0.0)
        .unwrap_or(weights.len() - 1)
}

/// Provider picked for one call
#[derive(Clone)]
pub struct SelectedProvider {
    pub index: usize,
    pub endpoint: String,
    pub client: Arc<dyn ChainClient>,
}

struct Provider {
    weight: f64,
    client: Arc<dyn ChainClient>,
}

/// Pool of upstream node endpoints
pub struct RpcPool {
    providers: Vec<Provider>,
    metrics: DashMap<usize, ProviderMetrics>,
    retries: u32,
    base_delay: Duration,
}

impl RpcPool {
    /// Create a pool from `(client, static_weight)` pairs.
    ///
    /// Negative weights are clamped to zero.
    pub fn new(providers: Vec<(Arc<dyn ChainClient>, f64)>) -> Self {
        Self::with_health_window(providers, DEFAULT_HEALTH_WINDOW)
    }

    pub fn with_health_window(providers: Vec<(Arc<dyn ChainClient>, f64)>, window: usize) -> Self {
        let metrics = DashMap::new();
        let providers: Vec<Provider> = providers
            .into_iter()
            .enumerate()
            .map(|(idx, (client, weight))| {
                if weight < 0.0 || !weight.is_finite() {
                    warn!(provider = client.endpoint(), weight, "Invalid provider weight, clamping to 0");
                }
                metrics.insert(idx, ProviderMetrics::new(window));
                Provider {
                    weight: if weight.is_finite() { weight.max(0.0) } else { 0.0 },
                    client,
                }
            })
            .collect();

        info!(
            "Initialized RpcPool with {} providers, health window={}",
            providers.len(),
            window
        );

        Self {
            providers,
            metrics,
            retries: DEFAULT_RETRIES,
            base_delay: DEFAULT_BASE_DELAY,
        }
    }

    /// Override the default retry budget used by [`RpcPool::call`]
    pub fn with_retry(mut self, retries: u32, base_delay: Duration) -> Self {
        self.retries = retries.max(1);
        self.base_delay = base_delay;
        self
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// Cloned view of every provider's state
    pub fn snapshot(&self) -> Vec<ProviderSnapshot> {
        self.providers
            .iter()
            .enumerate()
            .map(|(idx, provider)| ProviderSnapshot {
                endpoint: provider.client.endpoint().to_string(),
                weight: provider.weight,
                metrics: self
                    .metrics
                    .get(&idx)
                    .map(|m| m.value().clone())
                    .unwrap_or_else(|| ProviderMetrics::new(DEFAULT_HEALTH_WINDOW)),
            })
            .collect()
    }

    pub fn select_provider(&self) -> Option<SelectedProvider> {
        self.select_provider_with(&mut rand::thread_rng())
    }

    /// Weighted draw with a caller-supplied RNG
    pub fn select_provider_with<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<SelectedProvider> {
        if self.providers.is_empty() {
            return None;
        }

        let weights: Vec<f64> = self
            .snapshot()
            .iter()
            .map(|snapshot| adjusted_weight(snapshot, rng.gen_range(JITTER_MIN..=JITTER_MAX)))
            .collect();

        let index = weighted_choice(&weights, rng);
        let provider = &self.providers[index];
        Some(SelectedProvider {
            index,
            endpoint: provider.client.endpoint().to_string(),
            client: Arc::clone(&provider.client),
        })
    }

    fn record(&self, index: usize, success: bool, latency: Duration) {
        if let Some(mut metrics) = self.metrics.get_mut(&index) {
            metrics.record(success, latency);
        }
    }

    /// Run `op` against a selected provider with the pool's default budget
    pub async fn call<T, F, Fut>(&self, method: &str, op: F) -> Result<T, ExecutionError>
    where
        F: FnMut(Arc<dyn ChainClient>) -> Fut,
        Fut: Future<Output = Result<T, RpcError>>,
    {
        self.call_with(method, self.retries, self.base_delay, op).await
    }

    /// Run `op` up to `retries` times with linear backoff `base_delay * attempt`.
    ///
    /// Each attempt re-selects a provider. When every attempt fails, the last
    /// error decides between a transport failure and a remote call failure.
    pub async fn call_with<T, F, Fut>(
        &self,
        method: &str,
        retries: u32,
        base_delay: Duration,
        mut op: F,
    ) -> Result<T, ExecutionError>
    where
        F: FnMut(Arc<dyn ChainClient>) -> Fut,
        Fut: Future<Output = Result<T, RpcError>>,
    {
        let attempts = retries.max(1);
        let mut last_error = RpcError::Transport("no providers configured".to_string());
        let mut last_provider = String::from("<none>");

        for attempt in 1..=attempts {
            let Some(selected) = self.select_provider() else {
                break;
            };

            let start = Instant::now();
            let result = op(Arc::clone(&selected.client)).await;
            let latency = start.elapsed();

            match result {
                Ok(value) => {
                    self.record(selected.index, true, latency);
                    debug!(
                        method,
                        provider = %selected.endpoint,
                        attempt,
                        latency_ms = latency.as_millis() as u64,
                        "RPC call succeeded"
                    );
                    return Ok(value);
                }
                Err(e) => {
                    self.record(selected.index, false, latency);
                    warn!(
                        method,
                        provider = %selected.endpoint,
                        attempt,
                        attempts,
                        error = %e,
                        "RPC call failed"
                    );
                    last_error = e;
                    last_provider = selected.endpoint;
                }
            }

            if attempt < attempts {
                sleep(base_delay * attempt).await;
            }
        }

        Err(match last_error {
            RpcError::Transport(message) => ExecutionError::Transport {
                method: method.to_string(),
                provider: last_provider,
                attempts,
                message,
            },
            RpcError::Remote(message) => ExecutionError::ContractCall {
                method: method.to_string(),
                provider: last_provider,
                attempts,
                message,
            },
        })
    }
}
