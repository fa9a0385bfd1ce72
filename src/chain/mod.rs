//! Network client adapter.
//!
//! The orchestrator talks to the chain only through [`ChainClient`]. The
//! production implementation is [`JsonRpcClient`], built on an alloy HTTP
//! provider; tests use in-memory doubles.

pub mod abi;
pub mod artifact;
pub mod retry;
pub mod rpc;

use async_trait::async_trait;

use crate::address::Address;
use crate::errors::ChainError;

pub use abi::Token;
pub use artifact::{ArtifactStore, BuildInfo, ContractArtifact};
pub use retry::RetryPolicy;
pub use rpc::{JsonRpcClient, RpcSettings, parse_private_key};

/// An account able to sign transactions on the target network.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Account {
    pub address: Address,
}

/// Contract-creation transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployRequest {
    /// Artifact name of the contract to deploy.
    pub contract: String,
    pub args: Vec<Token>,
    pub from: Address,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployReceipt {
    pub address: Address,
    pub tx_hash: String,
}

/// State-changing method call against a deployed contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallRequest {
    pub to: Address,
    pub method: String,
    pub args: Vec<Token>,
    pub from: Address,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallReceipt {
    pub tx_hash: String,
}

/// Abstraction over the chain RPC for testability.
/// Real implementation: `JsonRpcClient`.
///
/// `deploy` and `call` return only once the transaction is mined (or has
/// definitively failed).
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Accounts available for signing; the first one deploys.
    async fn signers(&self) -> Result<Vec<Account>, ChainError>;

    async fn deploy(&self, request: &DeployRequest) -> Result<DeployReceipt, ChainError>;

    async fn call(&self, request: &CallRequest) -> Result<CallReceipt, ChainError>;
}
