//! JSON-RPC implementation of [`ChainClient`] on an alloy provider.
//!
//! With a private key configured, transactions are signed locally and sent
//! with `eth_sendRawTransaction`. Without one, the node signs for its own
//! accounts (`eth_accounts` / `eth_sendTransaction`), which is what local
//! development nodes offer.

use alloy::network::{EthereumWallet, ReceiptResponse, TransactionBuilder};
use alloy::primitives::{Address, TxHash};
use alloy::providers::{DynProvider, Provider, ProviderBuilder};
use alloy::rpc::types::{TransactionReceipt, TransactionRequest};
use alloy::signers::local::PrivateKeySigner;
use alloy::transports::{RpcError, TransportError, TransportErrorKind};
use async_trait::async_trait;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

use super::abi;
use super::artifact::ArtifactStore;
use super::retry::RetryPolicy;
use super::{Account, CallReceipt, CallRequest, ChainClient, DeployReceipt, DeployRequest};
use crate::errors::ChainError;

/// Timing and gas settings for [`JsonRpcClient`].
#[derive(Debug, Clone, Copy)]
pub struct RpcSettings {
    /// Gas limit attached to every transaction; estimated when unset.
    pub gas: Option<u64>,
    pub retry: RetryPolicy,
    pub poll_interval: Duration,
    pub mining_timeout: Duration,
}

impl Default for RpcSettings {
    fn default() -> Self {
        Self {
            gas: None,
            retry: RetryPolicy::default(),
            poll_interval: Duration::from_secs(2),
            mining_timeout: Duration::from_secs(300),
        }
    }
}

/// Map a provider error onto [`ChainError`], keeping the JSON-RPC error code.
pub(crate) fn chain_error(err: TransportError) -> ChainError {
    match err {
        RpcError::ErrorResp(payload) => ChainError::Rpc {
            code: payload.code,
            message: payload.message.to_string(),
        },
        RpcError::Transport(TransportErrorKind::HttpError(http)) if http.status == 429 => {
            ChainError::Rpc {
                code: 429,
                message: "rate limited".to_string(),
            }
        }
        RpcError::Transport(kind) => ChainError::Transport(kind.to_string()),
        other => ChainError::InvalidResponse(other.to_string()),
    }
}

/// Parse a hex-encoded secp256k1 private key, with or without `0x`.
pub fn parse_private_key(key: &str) -> Result<PrivateKeySigner, ChainError> {
    key.trim()
        .parse::<PrivateKeySigner>()
        .map_err(|e| ChainError::InvalidKey(e.to_string()))
}

fn ensure_success(receipt: &TransactionReceipt) -> Result<(), ChainError> {
    if receipt.status() {
        Ok(())
    } else {
        Err(ChainError::Reverted {
            tx_hash: receipt.transaction_hash.to_string(),
        })
    }
}

fn created_address(receipt: &TransactionReceipt) -> Result<Address, ChainError> {
    ensure_success(receipt)?;
    receipt
        .contract_address
        .ok_or_else(|| ChainError::MissingContractAddress {
            tx_hash: receipt.transaction_hash.to_string(),
        })
}

pub struct JsonRpcClient {
    provider: DynProvider,
    /// Address of the local signing key, when one is configured.
    wallet: Option<Address>,
    artifacts: ArtifactStore,
    settings: RpcSettings,
}

impl JsonRpcClient {
    pub fn new(
        url: &str,
        signer: Option<PrivateKeySigner>,
        artifacts: ArtifactStore,
        settings: RpcSettings,
    ) -> Result<Self, ChainError> {
        let url: reqwest::Url = url
            .parse()
            .map_err(|e| ChainError::Transport(format!("invalid RPC URL: {}", e)))?;

        let (provider, wallet) = match signer {
            Some(signer) => {
                let address = signer.address();
                let provider = ProviderBuilder::new()
                    .wallet(EthereumWallet::from(signer))
                    .connect_http(url)
                    .erased();
                (provider, Some(address))
            }
            None => {
                let provider = ProviderBuilder::new()
                    .disable_recommended_fillers()
                    .connect_http(url)
                    .erased();
                (provider, None)
            }
        };

        Ok(Self {
            provider,
            wallet,
            artifacts,
            settings,
        })
    }

    fn transaction(&self, from: Address) -> TransactionRequest {
        let tx = TransactionRequest::default().with_from(from);
        match self.settings.gas {
            Some(gas) => tx.with_gas_limit(gas),
            None => tx,
        }
    }

    async fn accounts(&self) -> Result<Vec<Address>, ChainError> {
        self.provider.get_accounts().await.map_err(chain_error)
    }

    async fn receipt(&self, tx_hash: TxHash) -> Result<Option<TransactionReceipt>, ChainError> {
        self.provider
            .get_transaction_receipt(tx_hash)
            .await
            .map_err(chain_error)
    }

    /// Submit a transaction exactly once. Resubmitting after an ambiguous
    /// transport error could send it twice.
    async fn send(&self, tx: TransactionRequest) -> Result<TxHash, ChainError> {
        let pending = self
            .provider
            .send_transaction(tx)
            .await
            .map_err(chain_error)?;
        Ok(*pending.tx_hash())
    }

    async fn wait_for_receipt(&self, tx_hash: TxHash) -> Result<TransactionReceipt, ChainError> {
        let started = Instant::now();
        loop {
            let receipt = self
                .settings
                .retry
                .run("eth_getTransactionReceipt", ChainError::is_transient, || {
                    self.receipt(tx_hash)
                })
                .await?;
            if let Some(receipt) = receipt {
                return Ok(receipt);
            }
            if started.elapsed() >= self.settings.mining_timeout {
                return Err(ChainError::MiningTimeout {
                    tx_hash: tx_hash.to_string(),
                    waited: started.elapsed(),
                });
            }
            debug!(%tx_hash, "waiting for transaction to be mined");
            tokio::time::sleep(self.settings.poll_interval).await;
        }
    }
}

#[async_trait]
impl ChainClient for JsonRpcClient {
    async fn signers(&self) -> Result<Vec<Account>, ChainError> {
        if let Some(address) = self.wallet {
            return Ok(vec![Account { address }]);
        }
        let accounts = self
            .settings
            .retry
            .run("eth_accounts", ChainError::is_transient, || self.accounts())
            .await?;
        Ok(accounts
            .into_iter()
            .map(|address| Account { address })
            .collect())
    }

    async fn deploy(&self, request: &DeployRequest) -> Result<DeployReceipt, ChainError> {
        let artifact = self.artifacts.load(&request.contract)?;
        let args = abi::encode_constructor(&artifact.abi, &request.args)?;
        let mut code = artifact.bytecode;
        code.extend(args);

        let tx = self.transaction(request.from).with_deploy_code(code);
        let tx_hash = self.send(tx).await?;
        debug!(contract = %request.contract, %tx_hash, "creation transaction submitted");

        let receipt = self.wait_for_receipt(tx_hash).await?;
        let address = created_address(&receipt)?;
        Ok(DeployReceipt {
            address,
            tx_hash: tx_hash.to_string(),
        })
    }

    async fn call(&self, request: &CallRequest) -> Result<CallReceipt, ChainError> {
        let data = abi::encode_call(&request.method, &request.args)?;
        let tx = self
            .transaction(request.from)
            .with_to(request.to)
            .with_input(data);
        let tx_hash = self.send(tx).await?;
        debug!(method = %request.method, %tx_hash, "call transaction submitted");

        let receipt = self.wait_for_receipt(tx_hash).await?;
        ensure_success(&receipt)?;
        Ok(CallReceipt {
            tx_hash: tx_hash.to_string(),
        })
    }
}
