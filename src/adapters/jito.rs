// Jito block-engine bundle relay

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

use crate::chain::{BundleRelay, BundleStatus, SignedTransaction};
use crate::error::ExecutionError;

#[derive(Debug, Deserialize)]
struct JsonRpcResponse<T> {
    result: Option<T>,
    error: Option<JsonRpcErrorBody>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcErrorBody {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct InflightStatuses {
    value: Vec<InflightStatus>,
}

#[derive(Debug, Deserialize)]
struct InflightStatus {
    status: String,
    landed_slot: Option<u64>,
}

pub struct JitoRelay {
    http: reqwest::Client,
    url: String,
}

impl JitoRelay {
    pub fn new(url: &str, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            http,
            url: url.trim_end_matches('/').to_string(),
        })
    }

    async fn rpc<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T> {
        let body = json!({ "jsonrpc": "2.0", "id": 1, "method": method, "params": params });
        let response = self
            .http
            .post(&self.url)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .context("Relay request failed")?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(anyhow!("relay returned {}: {}", status, text));
        }

        let parsed: JsonRpcResponse<T> = response.json().await.context("Relay response parse failed")?;
        if let Some(error) = parsed.error {
            return Err(anyhow!("{} ({})", error.message, error.code));
        }
        parsed.result.ok_or_else(|| anyhow!("relay response has no result"))
    }

    fn error(&self, bundle_id: Option<&str>, e: anyhow::Error) -> ExecutionError {
        ExecutionError::BundleSubmission {
            relay: self.name().to_string(),
            bundle_id: bundle_id.map(str::to_string),
            reason: format!("{:#}", e),
        }
    }
}

fn map_status(status: &InflightStatus) -> BundleStatus {
    match status.status.as_str() {
        "Landed" => BundleStatus::Confirmed {
            slot: status.landed_slot.unwrap_or_default(),
        },
        "Failed" | "Invalid" => BundleStatus::Rejected(status.status.clone()),
        _ => BundleStatus::Pending,
    }
}

#[async_trait]
impl BundleRelay for JitoRelay {
    fn name(&self) -> &str {
        "jito"
    }

    async fn send_bundle(&self, txs: &[SignedTransaction]) -> Result<String, ExecutionError> {
        let encoded: Vec<String> = txs.iter().map(|tx| BASE64.encode(&tx.payload)).collect();
        let bundle_id: String = self
            .rpc("sendBundle", json!([encoded, { "encoding": "base64" }]))
            .await
            .map_err(|e| self.error(None, e))?;
        debug!(%bundle_id, txs = txs.len(), "Bundle submitted to relay");
        Ok(bundle_id)
    }

    async fn bundle_status(&self, bundle_id: &str) -> Result<BundleStatus, ExecutionError> {
        let statuses: InflightStatuses = self
            .rpc("getInflightBundleStatuses", json!([[bundle_id]]))
            .await
            .map_err(|e| self.error(Some(bundle_id), e))?;
        Ok(statuses
            .value
            .first()
            .map(map_status)
            .unwrap_or(BundleStatus::Pending))
    }
}
