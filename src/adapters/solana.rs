// ChainClient over the Solana JSON-RPC API

use async_trait::async_trait;
use solana_client::client_error::{ClientError, ClientErrorKind};
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_client::rpc_config::RpcSendTransactionConfig;
use solana_sdk::commitment_config::CommitmentConfig;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::Signature;
use solana_sdk::transaction::VersionedTransaction;
use solana_transaction_status::TransactionConfirmationStatus;
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

use crate::chain::{ChainClient, SignatureStatus, SignedTransaction};
use crate::error::RpcError;

pub struct SolanaRpcNode {
    endpoint: String,
    client: RpcClient,
}

impl SolanaRpcNode {
    pub fn new(endpoint: &str, commitment: CommitmentConfig, timeout: Duration) -> Self {
        Self {
            endpoint: endpoint.to_string(),
            client: RpcClient::new_with_timeout_and_commitment(
                endpoint.to_string(),
                timeout,
                commitment,
            ),
        }
    }
}

/// The node answered with an error payload -> Remote; everything else is
/// transport-level.
fn map_client_error(e: ClientError) -> RpcError {
    match e.kind() {
        ClientErrorKind::RpcError(_) | ClientErrorKind::TransactionError(_) => {
            RpcError::Remote(e.to_string())
        }
        _ => RpcError::Transport(e.to_string()),
    }
}

#[async_trait]
impl ChainClient for SolanaRpcNode {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn recent_priority_fees(&self) -> Result<Vec<u64>, RpcError> {
        let fees = self
            .client
            .get_recent_prioritization_fees(&[])
            .await
            .map_err(map_client_error)?;
        Ok(fees.into_iter().map(|f| f.prioritization_fee).collect())
    }

    async fn send_transaction(&self, tx: &SignedTransaction) -> Result<String, RpcError> {
        let transaction: VersionedTransaction = bincode::deserialize(&tx.payload)
            .map_err(|e| RpcError::Remote(format!("undecodable transaction payload: {}", e)))?;

        let config = RpcSendTransactionConfig {
            skip_preflight: true,
            preflight_commitment: None,
            encoding: None,
            max_retries: Some(0),
            min_context_slot: None,
        };

        let signature = self
            .client
            .send_transaction_with_config(&transaction, config)
            .await
            .map_err(map_client_error)?;
        debug!(endpoint = %self.endpoint, %signature, "Transaction sent");
        Ok(signature.to_string())
    }

    async fn signature_status(&self, signature: &str) -> Result<SignatureStatus, RpcError> {
        let signature = Signature::from_str(signature)
            .map_err(|e| RpcError::Remote(format!("invalid signature {}: {}", signature, e)))?;

        let response = self
            .client
            .get_signature_statuses(&[signature])
            .await
            .map_err(map_client_error)?;

        let Some(Some(status)) = response.value.first() else {
            return Ok(SignatureStatus::Pending);
        };

        if let Some(err) = &status.err {
            return Ok(SignatureStatus::Failed(format!("{:?}", err)));
        }

        match status.confirmation_status {
            Some(TransactionConfirmationStatus::Confirmed)
            | Some(TransactionConfirmationStatus::Finalized) => {
                Ok(SignatureStatus::Confirmed { slot: status.slot })
            }
            _ => Ok(SignatureStatus::Pending),
        }
    }

    async fn token_decimals(&self, mint: &str) -> Result<u8, RpcError> {
        let mint = Pubkey::from_str(mint)
            .map_err(|e| RpcError::Remote(format!("invalid mint {}: {}", mint, e)))?;
        let supply = self
            .client
            .get_token_supply(&mint)
            .await
            .map_err(map_client_error)?;
        Ok(supply.decimals)
    }
}
