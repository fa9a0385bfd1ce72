//! Typed error hierarchy for the deployment orchestrator.
//!
//! Three top-level enums cover the three layers:
//! - `OrchestratorError`: run-level failures that abort a deployment
//! - `ChainError`: failures reported by the network client adapter
//! - `PlanError`: invalid deployment plans, rejected before any transaction

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::address::{Address, AddressError};

/// Errors from the orchestrator. Every variant aborts the run; the failing
/// step stays incomplete so a re-run retries it.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("Step '{step}' requires the address of '{dependency}', which has not been deployed")]
    UnresolvedDependency { step: String, dependency: String },

    #[error("Deployment of '{step}' failed: {source}")]
    DeploymentFailed {
        step: String,
        #[source]
        source: ChainError,
    },

    #[error("Wiring call '{step}' failed: {source}")]
    CallFailed {
        step: String,
        #[source]
        source: ChainError,
    },

    #[error("{}", persistence_message(.step, .deployed.as_ref(), .source))]
    PersistenceFailed {
        step: String,
        /// Address produced by the step, if it was a deployment.
        deployed: Option<Address>,
        #[source]
        source: PersistenceError,
    },

    #[error("Failed to load checkpoint: {0}")]
    Checkpoint(#[source] PersistenceError),

    #[error("No signer accounts available on the network (set private_key for the network to sign locally)")]
    NoSigner,

    #[error("Failed to query signer accounts: {0}")]
    Signers(#[source] ChainError),

    #[error("Another deployment is already running against {path} ({holder})")]
    Locked { path: PathBuf, holder: String },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

fn persistence_message(step: &str, deployed: Option<&Address>, source: &PersistenceError) -> String {
    match deployed {
        Some(address) => format!(
            "Step '{}' deployed {} but the checkpoint could not be saved: {}. \
             Record the address manually before re-running",
            step, address, source
        ),
        None => format!(
            "Step '{}' succeeded on-chain but the checkpoint could not be saved: {}",
            step, source
        ),
    }
}

/// Errors reading or writing the checkpoint documents.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed checkpoint document {path}: {source}")]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid address for '{tag}' in {path}: {source}")]
    InvalidAddress {
        path: PathBuf,
        tag: String,
        #[source]
        source: AddressError,
    },
}

/// Errors from the network client adapter.
#[derive(Debug, Error)]
pub enum ChainError {
    #[error("RPC transport error: {0}")]
    Transport(String),

    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("Transaction {tx_hash} reverted")]
    Reverted { tx_hash: String },

    #[error("Transaction {tx_hash} was not mined within {waited:?}")]
    MiningTimeout { tx_hash: String, waited: Duration },

    #[error("Receipt for {tx_hash} has no contract address")]
    MissingContractAddress { tx_hash: String },

    #[error("Invalid RPC response: {0}")]
    InvalidResponse(String),

    #[error("Failed to encode arguments: {0}")]
    Encoding(String),

    #[error(transparent)]
    Artifact(#[from] crate::chain::artifact::ArtifactError),

    #[error("Invalid private key: {0}")]
    InvalidKey(String),
}

impl ChainError {
    /// Whether the failure is worth retrying for a read-only request.
    pub fn is_transient(&self) -> bool {
        match self {
            ChainError::Transport(_) => true,
            // -32005: limit exceeded, -32000 covers "header not found" on many nodes
            ChainError::Rpc { code, .. } => matches!(code, -32005 | -32000 | 429),
            _ => false,
        }
    }
}

/// Errors found while building or validating a deployment plan.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PlanError {
    #[error("Duplicate step tag '{0}'")]
    DuplicateTag(String),

    #[error("Step '{step}' depends on unknown step '{dependency}'")]
    UnknownDependency { step: String, dependency: String },

    #[error("Step '{step}' depends on '{dependency}', which is declared after it")]
    ForwardDependency { step: String, dependency: String },

    #[error("Step '{step}' depends on wiring step '{dependency}', which has no address")]
    NoAddress { step: String, dependency: String },

    #[error("Step '{step}': {message}")]
    InvalidStep { step: String, message: String },

    #[error("Invalid argument in step '{step}': {message}")]
    InvalidArgument { step: String, message: String },
}
