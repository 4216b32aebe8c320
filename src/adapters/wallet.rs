use anyhow::{Context, Result};
use solana_sdk::signature::{read_keypair_file, Keypair};
use solana_sdk::signer::Signer;
use solana_sdk::transaction::VersionedTransaction;
use tracing::info;

use crate::chain::{SignedTransaction, UnsignedTransaction, Wallet};
use crate::config::WalletConfig;
use crate::error::ExecutionError;

/// Signs swap transactions with a local keypair
pub struct KeypairWallet {
    keypair: Keypair,
}

impl KeypairWallet {
    pub fn new(keypair: Keypair) -> Self {
        Self { keypair }
    }

    /// Load from a keypair file or a base58 private key
    pub fn load(config: &WalletConfig) -> Result<Self> {
        if let Some(ref keypair_path) = config.keypair_path {
            info!("Loading keypair from file: {}", keypair_path);
            let keypair = read_keypair_file(keypair_path)
                .map_err(|e| anyhow::anyhow!("Failed to read keypair file: {}", e))?;
            Ok(Self::new(keypair))
        } else if let Some(ref private_key) = config.private_key {
            info!("Loading keypair from environment variable");
            let decoded = bs58::decode(private_key)
                .into_vec()
                .context("Failed to decode base58 private key")?;
            let keypair =
                Keypair::from_bytes(&decoded).context("Failed to create keypair from bytes")?;
            Ok(Self::new(keypair))
        } else {
            Err(anyhow::anyhow!(
                "No wallet configuration found. Set WALLET_KEYPAIR_PATH or WALLET_PRIVATE_KEY"
            ))
        }
    }
}

impl Wallet for KeypairWallet {
    fn address(&self) -> String {
        self.keypair.pubkey().to_string()
    }

    fn sign(&self, tx: &UnsignedTransaction) -> Result<SignedTransaction, ExecutionError> {
        let build_error = |reason: String| ExecutionError::Build {
            token_id: tx.token_id.clone(),
            reason,
        };

        let unsigned: VersionedTransaction = bincode::deserialize(&tx.payload)
            .map_err(|e| build_error(format!("undecodable transaction: {}", e)))?;
        let signed = VersionedTransaction::try_new(unsigned.message, &[&self.keypair])
            .map_err(|e| build_error(format!("signing failed: {}", e)))?;
        let signature = signed
            .signatures
            .first()
            .map(|s| s.to_string())
            .ok_or_else(|| build_error("signed transaction has no signature".to_string()))?;
        let payload = bincode::serialize(&signed)
            .map_err(|e| build_error(format!("serialization failed: {}", e)))?;

        Ok(SignedTransaction {
            signature,
            payload,
            priority_fee: tx.priority_fee,
        })
    }
}
