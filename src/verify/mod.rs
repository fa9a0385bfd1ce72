//! Verification client adapter.
//!
//! Verification publishes contract source on a block explorer. It only aids
//! readability, so [`Verifier::verify`] reports failures as an outcome value
//! and never as an error.

pub mod explorer;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::address::Address;
use crate::chain::Token;

pub use explorer::{ExplorerSettings, ExplorerVerifier};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "reason", rename_all = "snake_case")]
pub enum VerificationOutcome {
    Verified,
    AlreadyVerified,
    Failed(String),
}

impl VerificationOutcome {
    pub fn is_success(&self) -> bool {
        !matches!(self, Self::Failed(_))
    }
}

impl fmt::Display for VerificationOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Verified => write!(f, "verified"),
            Self::AlreadyVerified => write!(f, "already verified"),
            Self::Failed(reason) => write!(f, "failed: {}", reason),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifyRequest {
    /// Artifact name of the deployed contract.
    pub contract: String,
    pub address: Address,
    pub constructor_args: Vec<Token>,
}

/// Abstraction over the explorer verification service.
/// Real implementation: `ExplorerVerifier`.
#[async_trait]
pub trait Verifier: Send + Sync {
    async fn verify(&self, request: &VerifyRequest) -> VerificationOutcome;
}

/// Used when verification is disabled or the network has no explorer API.
pub struct NoopVerifier {
    reason: String,
}

impl NoopVerifier {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl Verifier for NoopVerifier {
    async fn verify(&self, _request: &VerifyRequest) -> VerificationOutcome {
        VerificationOutcome::Failed(self.reason.clone())
    }
}
