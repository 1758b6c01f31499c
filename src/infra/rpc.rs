//! RPC context - chain access and the node's signing key

use solana_client::nonblocking::rpc_client::RpcClient;
use solana_client::rpc_client::GetConfirmedSignaturesForAddress2Config;
use solana_client::rpc_config::{RpcSendTransactionConfig, RpcTransactionConfig};
use solana_sdk::commitment_config::CommitmentConfig;
use solana_sdk::hash::Hash;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::{Keypair, Signature};
use solana_sdk::signer::Signer;
use solana_sdk::transaction::Transaction;
use solana_transaction_status::{EncodedConfirmedTransactionWithStatusMeta, UiTransactionEncoding};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::config::{KeySource, RpcConfig, WalletConfig};
use crate::curve::program::derive_bonding_curve;
use crate::curve::BondingCurveState;
use crate::error::{Error, Result};

/// Simulation result
#[derive(Debug, Clone)]
pub struct SimulationOutcome {
    /// Whether simulation succeeded
    pub success: bool,
    /// Error message if failed
    pub error: Option<String>,
    /// Compute units consumed
    pub compute_units: Option<u64>,
    /// Logs from simulation
    pub logs: Vec<String>,
}

/// Chain access plus the single signing key the node custodies
pub struct RpcContext {
    rpc: RpcClient,
    ws_url: String,
    keypair: Arc<Keypair>,
}

impl RpcContext {
    pub fn new(config: &RpcConfig, wallet: &WalletConfig) -> Result<Self> {
        let keypair = load_keypair(&wallet.key_source)?;
        info!("Signing wallet: {}", keypair.pubkey());
        Ok(Self {
            rpc: RpcClient::new_with_commitment(config.url.clone(), CommitmentConfig::confirmed()),
            ws_url: config.ws_url.clone(),
            keypair: Arc::new(keypair),
        })
    }

    pub fn keypair(&self) -> Arc<Keypair> {
        self.keypair.clone()
    }

    pub fn payer(&self) -> Pubkey {
        self.keypair.pubkey()
    }

    pub fn ws_url(&self) -> &str {
        &self.ws_url
    }

    /// Startup health check; failure here aborts the process.
    pub async fn health_check(&self) -> Result<u64> {
        self.rpc
            .get_slot()
            .await
            .map_err(|e| Error::RpcConnection(e.to_string()))
    }

    pub async fn current_slot(&self) -> Result<u64> {
        Ok(self.rpc.get_slot().await?)
    }

    /// Fetch and decode the bonding curve account for a mint.
    pub async fn fetch_bonding_curve(&self, mint: &Pubkey) -> Result<BondingCurveState> {
        let (curve_address, _) = derive_bonding_curve(mint);
        let account = self.rpc.get_account(&curve_address).await?;
        BondingCurveState::try_from_slice(&account.data)
    }

    /// Whether a bonding curve account exists for the mint.
    pub async fn bonding_curve_exists(&self, mint: &Pubkey) -> Result<bool> {
        let (curve_address, _) = derive_bonding_curve(mint);
        Ok(self.rpc.get_account(&curve_address).await.is_ok())
    }

    /// Whether an account exists at the address.
    pub async fn account_exists(&self, address: &Pubkey) -> Result<bool> {
        Ok(self
            .rpc
            .get_account_with_commitment(address, CommitmentConfig::confirmed())
            .await?
            .value
            .is_some())
    }

    pub async fn latest_blockhash(&self) -> Result<(Hash, u64)> {
        let (blockhash, last_valid_block_height) = self
            .rpc
            .get_latest_blockhash_with_commitment(CommitmentConfig::confirmed())
            .await?;
        Ok((blockhash, last_valid_block_height))
    }

    pub async fn simulate(&self, transaction: &Transaction) -> Result<SimulationOutcome> {
        let result = self
            .rpc
            .simulate_transaction(transaction)
            .await
            .map_err(|e| Error::TransactionSimulation(e.to_string()))?;

        let success = result.value.err.is_none();
        let error = result.value.err.map(|e| e.to_string());
        let logs = result.value.logs.unwrap_or_default();
        let compute_units = result.value.units_consumed;

        if success {
            debug!("Simulation succeeded, compute units: {:?}", compute_units);
        }

        Ok(SimulationOutcome {
            success,
            error,
            compute_units,
            logs,
        })
    }

    /// Raw send without RPC-side retries; retry policy lives in the caller.
    pub async fn send_raw(&self, transaction: &Transaction, skip_preflight: bool) -> Result<Signature> {
        let config = RpcSendTransactionConfig {
            skip_preflight,
            max_retries: Some(0),
            ..RpcSendTransactionConfig::default()
        };
        self.rpc
            .send_transaction_with_config(transaction, config)
            .await
            .map_err(|e| Error::TransactionSend(e.to_string()))
    }

    /// Poll until the signature confirms or the blockhash expires.
    pub async fn confirm(&self, signature: &Signature, last_valid_block_height: u64) -> Result<()> {
        loop {
            let statuses = self.rpc.get_signature_statuses(&[*signature]).await?;
            if let Some(Some(status)) = statuses.value.first() {
                if let Some(err) = &status.err {
                    return Err(Error::TransactionSend(format!(
                        "transaction failed on chain: {}",
                        err
                    )));
                }
                if status.satisfies_commitment(CommitmentConfig::confirmed()) {
                    return Ok(());
                }
            }

            let block_height = self.rpc.get_block_height().await?;
            if block_height > last_valid_block_height {
                return Err(Error::TransactionSend(
                    "blockhash expired before confirmation".to_string(),
                ));
            }

            tokio::time::sleep(Duration::from_millis(500)).await;
        }
    }

    /// Recent signatures that touched an address, newest first.
    pub async fn signatures_for_address(
        &self,
        address: &Pubkey,
        limit: usize,
    ) -> Result<Vec<String>> {
        let config = GetConfirmedSignaturesForAddress2Config {
            limit: Some(limit),
            ..GetConfirmedSignaturesForAddress2Config::default()
        };
        let signatures = self
            .rpc
            .get_signatures_for_address_with_config(address, config)
            .await?;
        Ok(signatures.into_iter().map(|s| s.signature).collect())
    }

    /// Fetch a confirmed transaction in parsed encoding.
    pub async fn get_transaction(
        &self,
        signature: &str,
    ) -> Result<EncodedConfirmedTransactionWithStatusMeta> {
        let signature = Signature::from_str(signature)
            .map_err(|e| Error::Rpc(format!("invalid signature: {}", e)))?;
        let config = RpcTransactionConfig {
            encoding: Some(UiTransactionEncoding::JsonParsed),
            commitment: Some(CommitmentConfig::confirmed()),
            max_supported_transaction_version: Some(0),
        };
        Ok(self
            .rpc
            .get_transaction_with_config(&signature, config)
            .await?)
    }
}

/// Load the signing keypair from the configured source.
fn load_keypair(source: &KeySource) -> Result<Keypair> {
    match source {
        KeySource::PrivateKey(encoded) => {
            let bytes = bs58::decode(encoded.trim())
                .into_vec()
                .map_err(|e| Error::InvalidKeypair(format!("bad base58: {}", e)))?;
            Keypair::from_bytes(&bytes)
                .map_err(|e| Error::InvalidKeypair(format!("bad key bytes: {}", e)))
        }
        KeySource::KeypairPath(path) => {
            let raw = std::fs::read_to_string(path)
                .map_err(|e| Error::InvalidKeypair(format!("read {}: {}", path, e)))?;
            let bytes: Vec<u8> = serde_json::from_str(&raw)
                .map_err(|e| Error::InvalidKeypair(format!("parse {}: {}", path, e)))?;
            Keypair::from_bytes(&bytes)
                .map_err(|e| Error::InvalidKeypair(format!("bad key bytes: {}", e)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keypair_loads_from_json_file() {
        let keypair = Keypair::new();
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), serde_json::to_string(&keypair.to_bytes().to_vec()).unwrap())
            .unwrap();

        let loaded =
            load_keypair(&KeySource::KeypairPath(file.path().to_string_lossy().into())).unwrap();
        assert_eq!(loaded.pubkey(), keypair.pubkey());
    }

    #[test]
    fn keypair_loads_from_base58() {
        let keypair = Keypair::new();
        let encoded = bs58::encode(keypair.to_bytes()).into_string();
        let loaded = load_keypair(&KeySource::PrivateKey(encoded)).unwrap();
        assert_eq!(loaded.pubkey(), keypair.pubkey());
    }

    #[test]
    fn rejects_garbage_key_material() {
        assert!(load_keypair(&KeySource::PrivateKey("!!not-base58!!".into())).is_err());
    }
}
