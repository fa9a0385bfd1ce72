//! Etherscan-compatible source verification.

use alloy::primitives::hex;
use async_trait::async_trait;
use serde::Deserialize;
use std::fmt;
use std::time::Duration;
use tracing::{debug, info};

use super::{VerificationOutcome, Verifier, VerifyRequest};
use crate::chain::abi;
use crate::chain::artifact::ArtifactStore;
use crate::chain::retry::RetryPolicy;

/// Maximum number of `checkverifystatus` polls before giving up.
const MAX_STATUS_POLLS: u32 = 20;

#[derive(Debug, Clone)]
pub struct ExplorerSettings {
    /// API endpoint, e.g. `https://api-sepolia.etherscan.io/api`.
    pub api_url: String,
    pub api_key: String,
    pub retry: RetryPolicy,
    pub poll_interval: Duration,
}

#[derive(Debug, Deserialize)]
struct ExplorerResponse {
    status: String,
    #[serde(default)]
    message: String,
    #[serde(default)]
    result: serde_json::Value,
}

impl ExplorerResponse {
    fn result_text(&self) -> String {
        match &self.result {
            serde_json::Value::String(s) => s.clone(),
            serde_json::Value::Null => self.message.clone(),
            other => other.to_string(),
        }
    }
}

/// How an explorer answer should be handled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ExplorerAnswer {
    Verified,
    AlreadyVerified,
    Pending,
    /// The explorer has not indexed the contract yet; worth retrying.
    NotIndexed(String),
    Failed(String),
}

pub(crate) fn classify(result: &str) -> ExplorerAnswer {
    let lower = result.to_lowercase();
    if lower.contains("already verified") {
        ExplorerAnswer::AlreadyVerified
    } else if lower.starts_with("pass") {
        ExplorerAnswer::Verified
    } else if lower.contains("pending") || lower.contains("in queue") {
        ExplorerAnswer::Pending
    } else if lower.contains("unable to locate contractcode")
        || lower.contains("does not have bytecode")
    {
        ExplorerAnswer::NotIndexed(result.to_string())
    } else {
        ExplorerAnswer::Failed(result.to_string())
    }
}

#[derive(Debug)]
struct AttemptError {
    message: String,
    transient: bool,
}

impl AttemptError {
    fn transient(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            transient: true,
        }
    }

    fn fatal(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            transient: false,
        }
    }
}

impl fmt::Display for AttemptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

enum Submission {
    Guid(String),
    Done(VerificationOutcome),
}

pub struct ExplorerVerifier {
    http: reqwest::Client,
    artifacts: ArtifactStore,
    settings: ExplorerSettings,
}

impl ExplorerVerifier {
    pub fn new(artifacts: ArtifactStore, settings: ExplorerSettings) -> Self {
        Self {
            http: reqwest::Client::new(),
            artifacts,
            settings,
        }
    }

    async fn submit_once(&self, form: &[(&str, String)]) -> Result<Submission, AttemptError> {
        let resp: ExplorerResponse = self
            .http
            .post(&self.settings.api_url)
            .form(form)
            .send()
            .await
            .map_err(|e| AttemptError::transient(e.to_string()))?
            .json()
            .await
            .map_err(|e| AttemptError::transient(format!("invalid explorer response: {}", e)))?;

        let text = resp.result_text();
        if resp.status == "1" {
            return Ok(Submission::Guid(text));
        }
        match classify(&text) {
            ExplorerAnswer::AlreadyVerified => {
                Ok(Submission::Done(VerificationOutcome::AlreadyVerified))
            }
            ExplorerAnswer::Verified => Ok(Submission::Done(VerificationOutcome::Verified)),
            ExplorerAnswer::NotIndexed(msg) => Err(AttemptError::transient(msg)),
            ExplorerAnswer::Pending => Err(AttemptError::transient(text)),
            ExplorerAnswer::Failed(msg) => Err(AttemptError::fatal(msg)),
        }
    }

    async fn poll_status(&self, guid: &str) -> Result<VerificationOutcome, AttemptError> {
        for poll in 1..=MAX_STATUS_POLLS {
            tokio::time::sleep(self.settings.poll_interval).await;
            let resp: ExplorerResponse = self
                .http
                .get(&self.settings.api_url)
                .query(&[
                    ("apikey", self.settings.api_key.as_str()),
                    ("module", "contract"),
                    ("action", "checkverifystatus"),
                    ("guid", guid),
                ])
                .send()
                .await
                .map_err(|e| AttemptError::transient(e.to_string()))?
                .json()
                .await
                .map_err(|e| AttemptError::transient(format!("invalid explorer response: {}", e)))?;

            let text = resp.result_text();
            match classify(&text) {
                ExplorerAnswer::Verified => return Ok(VerificationOutcome::Verified),
                ExplorerAnswer::AlreadyVerified => return Ok(VerificationOutcome::AlreadyVerified),
                ExplorerAnswer::Pending => {
                    debug!(guid, poll, "verification pending");
                }
                ExplorerAnswer::NotIndexed(msg) | ExplorerAnswer::Failed(msg) => {
                    return Ok(VerificationOutcome::Failed(msg));
                }
            }
        }
        Ok(VerificationOutcome::Failed(format!(
            "verification still pending after {} status checks (guid {})",
            MAX_STATUS_POLLS, guid
        )))
    }

    async fn try_verify(&self, request: &VerifyRequest) -> Result<VerificationOutcome, AttemptError> {
        let artifact = self
            .artifacts
            .load(&request.contract)
            .map_err(|e| AttemptError::fatal(e.to_string()))?;
        let build_info = self
            .artifacts
            .build_info(&artifact)
            .map_err(|e| AttemptError::fatal(e.to_string()))?;
        let constructor_args = abi::encode_constructor(&artifact.abi, &request.constructor_args)
            .map_err(|e| AttemptError::fatal(e.to_string()))?;

        let form: Vec<(&str, String)> = vec![
            ("apikey", self.settings.api_key.clone()),
            ("module", "contract".to_string()),
            ("action", "verifysourcecode".to_string()),
            ("contractaddress", request.address.to_string()),
            ("sourceCode", build_info.input.to_string()),
            ("codeformat", "solidity-standard-json-input".to_string()),
            ("contractname", artifact.qualified_name()),
            ("compilerversion", format!("v{}", build_info.solc_long_version)),
            // The misspelling is part of the explorer API.
            ("constructorArguements", hex::encode(constructor_args)),
        ];

        let submission = self
            .settings
            .retry
            .run("verifysourcecode", |e: &AttemptError| e.transient, || {
                self.submit_once(&form)
            })
            .await?;

        match submission {
            Submission::Done(outcome) => Ok(outcome),
            Submission::Guid(guid) => {
                info!(contract = %request.contract, %guid, "verification submitted");
                self.poll_status(&guid).await
            }
        }
    }
}

#[async_trait]
impl Verifier for ExplorerVerifier {
    async fn verify(&self, request: &VerifyRequest) -> VerificationOutcome {
        match self.try_verify(request).await {
            Ok(outcome) => outcome,
            Err(err) => VerificationOutcome::Failed(err.message),
        }
    }
}
