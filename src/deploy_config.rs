//! `deploy.toml` configuration.
//!
//! Settings are layered file → environment → CLI:
//! - the file supplies the plan, networks and tuning knobs
//! - `${VAR}` references in RPC URLs, API keys and private keys are expanded
//!   from the environment (after `.env` is loaded). Only an unset `rpc_url`
//!   variable is an error; an unset `api_key` or `private_key` is dropped
//!   with a warning
//! - `CHAINPLAN_VERIFY_DELAY_SECS` overrides the verification delay
//! - CLI flags (`--no-verify`, `--state-dir`) are applied by [`crate::config::Config`]
//!
//! # Configuration File Format
//!
//! ```toml
//! [project]
//! artifacts_dir = "artifacts"
//! state_dir = "deployments/networks"
//!
//! [verification]
//! enabled = true
//! delay_secs = 30
//!
//! [rpc]
//! max_attempts = 5
//! initial_delay_ms = 500
//! max_delay_ms = 8000
//! poll_interval_ms = 2000
//! mining_timeout_secs = 300
//!
//! [networks.sepolia]
//! rpc_url = "https://sepolia.infura.io/v3/${INFURA_KEY}"
//! private_key = "${DEPLOYER_PRIVATE_KEY}"
//! api_key = "${ETHERSCAN_API_KEY}"
//! gas = 7000000
//!
//! [[steps]]
//! tag = "AdminControl"
//! contract = "AdminControl"
//!
//! [[steps]]
//! tag = "TrainerManagement"
//! contract = "TrainerManagement"
//! args = [{ ref = "AdminControl" }]
//! ```

use anyhow::{Context, Result, anyhow};
use regex::Regex;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::fmt;
use std::sync::LazyLock;
use std::time::Duration;
use tracing::warn;

use crate::chain::{RetryPolicy, RpcSettings};
use crate::plan::{DeploymentPlan, StepConfig};

pub const CONFIG_FILE: &str = "deploy.toml";

/// Environment variable overriding `verification.delay_secs`.
pub const VERIFY_DELAY_ENV: &str = "CHAINPLAN_VERIFY_DELAY_SECS";

/// Explorer site and API for networks that need no configuration.
struct KnownNetwork {
    name: &'static str,
    explorer: &'static str,
    explorer_api: &'static str,
}

const KNOWN_NETWORKS: &[KnownNetwork] = &[
    KnownNetwork {
        name: "goerli",
        explorer: "https://goerli.etherscan.io",
        explorer_api: "https://api-goerli.etherscan.io/api",
    },
    KnownNetwork {
        name: "sepolia",
        explorer: "https://sepolia.etherscan.io",
        explorer_api: "https://api-sepolia.etherscan.io/api",
    },
];

fn known_network(name: &str) -> Option<&'static KnownNetwork> {
    KNOWN_NETWORKS.iter().find(|n| n.name == name)
}

/// Project-level paths, relative to the project directory.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProjectSection {
    #[serde(default = "default_artifacts_dir")]
    pub artifacts_dir: PathBuf,
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,
}

fn default_artifacts_dir() -> PathBuf {
    PathBuf::from("artifacts")
}

fn default_state_dir() -> PathBuf {
    PathBuf::from("deployments/networks")
}

impl Default for ProjectSection {
    fn default() -> Self {
        Self {
            artifacts_dir: default_artifacts_dir(),
            state_dir: default_state_dir(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VerificationSection {
    #[serde(default = "default_verification_enabled")]
    pub enabled: bool,
    /// Seconds to wait after a deployment is mined before verifying it.
    #[serde(default = "default_delay_secs")]
    pub delay_secs: u64,
}

fn default_verification_enabled() -> bool {
    true
}

fn default_delay_secs() -> u64 {
    30
}

impl Default for VerificationSection {
    fn default() -> Self {
        Self {
            enabled: default_verification_enabled(),
            delay_secs: default_delay_secs(),
        }
    }
}

impl VerificationSection {
    /// Delay with the environment override applied.
    pub fn delay(&self) -> Result<Duration> {
        match std::env::var(VERIFY_DELAY_ENV) {
            Ok(raw) => {
                let secs: u64 = raw
                    .trim()
                    .parse()
                    .with_context(|| format!("{} must be a whole number of seconds", VERIFY_DELAY_ENV))?;
                Ok(Duration::from_secs(secs))
            }
            Err(_) => Ok(Duration::from_secs(self.delay_secs)),
        }
    }
}

/// Retry and polling knobs for network calls.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RpcSection {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_mining_timeout_secs")]
    pub mining_timeout_secs: u64,
}

fn default_max_attempts() -> u32 {
    5
}

fn default_initial_delay_ms() -> u64 {
    500
}

fn default_max_delay_ms() -> u64 {
    8000
}

fn default_poll_interval_ms() -> u64 {
    2000
}

fn default_mining_timeout_secs() -> u64 {
    300
}

impl Default for RpcSection {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            mining_timeout_secs: default_mining_timeout_secs(),
        }
    }
}

impl RpcSection {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts.max(1),
            initial_delay: Duration::from_millis(self.initial_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn rpc_settings(&self, gas: Option<u64>) -> RpcSettings {
        RpcSettings {
            gas,
            retry: self.retry_policy(),
            poll_interval: self.poll_interval(),
            mining_timeout: Duration::from_secs(self.mining_timeout_secs),
        }
    }
}

/// `[networks.<name>]` table. String values may contain `${VAR}` references.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NetworkSection {
    pub rpc_url: String,
    /// Explorer site, used for address links.
    #[serde(default)]
    pub explorer: Option<String>,
    /// Explorer API endpoint, used for verification.
    #[serde(default)]
    pub explorer_api: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    /// Hex private key of the deploying account. Without one, the node's own
    /// accounts sign.
    #[serde(default)]
    pub private_key: Option<String>,
    /// Gas limit applied to every transaction.
    #[serde(default)]
    pub gas: Option<u64>,
}

/// A private key that never appears in debug output.
#[derive(Clone, PartialEq, Eq)]
pub struct PrivateKey(String);

impl PrivateKey {
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PrivateKey(<redacted>)")
    }
}

/// A network with environment references expanded and built-in explorer
/// defaults applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedNetwork {
    pub name: String,
    pub rpc_url: String,
    pub explorer: Option<String>,
    pub explorer_api: Option<String>,
    pub api_key: Option<String>,
    pub private_key: Option<PrivateKey>,
    pub gas: Option<u64>,
}

/// Root of `deploy.toml`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeployToml {
    #[serde(default)]
    pub project: ProjectSection,
    #[serde(default)]
    pub verification: VerificationSection,
    #[serde(default)]
    pub rpc: RpcSection,
    #[serde(default)]
    pub networks: BTreeMap<String, NetworkSection>,
    #[serde(default)]
    pub steps: Vec<StepConfig>,
}

static ENV_REF: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("valid regex"));

/// Expand `${VAR}` references using `lookup`. Unknown variables are an error.
pub fn interpolate<F>(input: &str, lookup: F) -> Result<String>
where
    F: Fn(&str) -> Option<String>,
{
    let mut missing = Vec::new();
    let expanded = ENV_REF.replace_all(input, |caps: &regex::Captures<'_>| {
        let name = &caps[1];
        lookup(name).unwrap_or_else(|| {
            missing.push(name.to_string());
            String::new()
        })
    });
    if !missing.is_empty() {
        return Err(anyhow!(
            "Environment variable(s) not set: {}",
            missing.join(", ")
        ));
    }
    Ok(expanded.into_owned())
}

fn interpolate_env(input: &str) -> Result<String> {
    interpolate(input, |name| std::env::var(name).ok())
}

/// Expand a credential that the run can do without. An unset variable or an
/// empty result yields `None`.
fn expand_optional<F>(network: &str, field: &str, value: Option<&str>, expand: &F) -> Option<String>
where
    F: Fn(&str) -> Result<String>,
{
    let value = value?;
    match expand(value) {
        Ok(expanded) if expanded.trim().is_empty() => None,
        Ok(expanded) => Some(expanded),
        Err(e) => {
            warn!(network, field, "{:#}; continuing without {}", e, field);
            None
        }
    }
}

impl DeployToml {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::parse(&content).with_context(|| format!("Invalid config file: {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse deploy.toml")
    }

    /// Load `deploy.toml` from `project_dir`, or defaults when absent.
    pub fn load_or_default(project_dir: &Path) -> Result<Self> {
        let config_path = project_dir.join(CONFIG_FILE);
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    /// Build and validate the deployment plan from `[[steps]]`.
    pub fn plan(&self) -> Result<DeploymentPlan> {
        DeploymentPlan::from_configs(self.steps.clone()).context("Invalid deployment plan")
    }

    /// Resolve a network by name, expanding environment references.
    pub fn network(&self, name: &str) -> Result<ResolvedNetwork> {
        self.network_with(name, interpolate_env)
    }

    fn network_with<F>(&self, name: &str, expand: F) -> Result<ResolvedNetwork>
    where
        F: Fn(&str) -> Result<String>,
    {
        let section = self.networks.get(name).ok_or_else(|| {
            let known: Vec<&str> = self.networks.keys().map(String::as_str).collect();
            if known.is_empty() {
                anyhow!("Unknown network '{}': no networks configured in {}", name, CONFIG_FILE)
            } else {
                anyhow!(
                    "Unknown network '{}'. Configured networks: {}",
                    name,
                    known.join(", ")
                )
            }
        })?;

        let builtin = known_network(name);
        let rpc_url = expand(&section.rpc_url)
            .with_context(|| format!("Failed to resolve rpc_url for network '{}'", name))?;
        let api_key = expand_optional(name, "api_key", section.api_key.as_deref(), &expand);
        let private_key =
            expand_optional(name, "private_key", section.private_key.as_deref(), &expand)
                .map(PrivateKey);

        Ok(ResolvedNetwork {
            name: name.to_string(),
            rpc_url,
            explorer: section
                .explorer
                .clone()
                .or_else(|| builtin.map(|n| n.explorer.to_string())),
            explorer_api: section
                .explorer_api
                .clone()
                .or_else(|| builtin.map(|n| n.explorer_api.to_string())),
            api_key,
            private_key,
            gas: section.gas,
        })
    }

    /// Validate the configuration and return warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.steps.is_empty() {
            warnings.push("No [[steps]] defined; nothing will be deployed".to_string());
        }
        if self.networks.is_empty() {
            warnings.push("No [networks.*] tables defined".to_string());
        }
        if let Err(e) = self.plan() {
            warnings.push(format!("{:#}", e));
        }
        if self.verification.enabled {
            for (name, network) in &self.networks {
                let has_api = network.explorer_api.is_some() || known_network(name).is_some();
                if !has_api {
                    warnings.push(format!(
                        "Network '{}' has no explorer_api; verification will be skipped",
                        name
                    ));
                } else if network.api_key.is_none() {
                    warnings.push(format!(
                        "Network '{}' has no api_key; verification will be skipped",
                        name
                    ));
                }
            }
        }
        if self.rpc.initial_delay_ms > self.rpc.max_delay_ms {
            warnings.push(format!(
                "rpc.initial_delay_ms ({}) exceeds rpc.max_delay_ms ({})",
                self.rpc.initial_delay_ms, self.rpc.max_delay_ms
            ));
        }

        warnings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::StepKind;
    use std::collections::HashMap;
    use tempfile::tempdir;

    const FULL: &str = r#"
[project]
artifacts_dir = "build/artifacts"

[verification]
enabled = true
delay_secs = 45

[rpc]
max_attempts = 3
initial_delay_ms = 100

[networks.sepolia]
rpc_url = "https://sepolia.infura.io/v3/${INFURA_KEY}"
private_key = "${DEPLOYER_PRIVATE_KEY}"
api_key = "${ETHERSCAN_API_KEY}"
gas = 7000000

[networks.localhost]
rpc_url = "http://127.0.0.1:8545"

[[steps]]
tag = "AdminControl"
contract = "AdminControl"

[[steps]]
tag = "TrainerManagement"
contract = "TrainerManagement"
args = [{ ref = "AdminControl" }]

[[steps]]
tag = "FEBlockchainLearning"
contract = "FEBlockchainLearning"
args = [{ ref = "TrainerManagement" }, { ref = "AdminControl" }]
"#;

    fn fake_env(vars: &[(&str, &str)]) -> impl Fn(&str) -> Result<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |input: &str| interpolate(input, |name| vars.get(name).cloned())
    }

    #[test]
    fn test_parse_full_config() {
        let config = DeployToml::parse(FULL).unwrap();
        assert_eq!(config.project.artifacts_dir, PathBuf::from("build/artifacts"));
        assert_eq!(config.project.state_dir, PathBuf::from("deployments/networks"));
        assert_eq!(config.verification.delay_secs, 45);
        assert_eq!(config.rpc.max_attempts, 3);
        assert_eq!(config.rpc.max_delay_ms, 8000);
        assert_eq!(config.networks.len(), 2);
        assert_eq!(config.steps.len(), 3);
    }

    #[test]
    fn test_defaults_when_empty() {
        let config = DeployToml::parse("").unwrap();
        assert_eq!(config.project.artifacts_dir, PathBuf::from("artifacts"));
        assert!(config.verification.enabled);
        assert_eq!(config.verification.delay_secs, 30);
        assert_eq!(config.rpc.mining_timeout_secs, 300);
        assert!(config.steps.is_empty());
    }

    #[test]
    fn test_unknown_field_rejected() {
        assert!(DeployToml::parse("[verification]\nenable = true\n").is_err());
    }

    #[test]
    fn test_plan_from_steps() {
        let config = DeployToml::parse(FULL).unwrap();
        let plan = config.plan().unwrap();
        assert_eq!(plan.len(), 3);
        let learning = plan.get("FEBlockchainLearning").unwrap();
        assert_eq!(learning.kind, StepKind::Deploy);
        assert_eq!(learning.dependencies, vec!["TrainerManagement", "AdminControl"]);
        assert_eq!(
            learning.body.describe(),
            "FEBlockchainLearning(@TrainerManagement, @AdminControl)"
        );
    }

    #[test]
    fn test_wiring_step_from_toml() {
        let config = DeployToml::parse(
            r#"
[[steps]]
tag = "AdminControl"
contract = "AdminControl"

[[steps]]
tag = "TrainerManagement"
contract = "TrainerManagement"
args = [{ ref = "AdminControl" }]

[[steps]]
tag = "RegisterTrainers"
target = "AdminControl"
method = "setTrainerManagement"
args = [{ ref = "TrainerManagement" }]
"#,
        )
        .unwrap();
        let plan = config.plan().unwrap();
        let wire = plan.get("RegisterTrainers").unwrap();
        assert_eq!(wire.kind, StepKind::Wire);
        assert_eq!(wire.dependencies, vec!["AdminControl", "TrainerManagement"]);
    }

    #[test]
    fn test_invalid_plan_is_error() {
        let config = DeployToml::parse(
            r#"
[[steps]]
tag = "B"
contract = "B"
args = [{ ref = "A" }]
"#,
        )
        .unwrap();
        let err = config.plan().unwrap_err();
        assert!(format!("{:#}", err).contains("unknown step 'A'"));
    }

    #[test]
    fn test_network_interpolation_and_builtin_explorer() {
        let config = DeployToml::parse(FULL).unwrap();
        let network = config
            .network_with(
                "sepolia",
                fake_env(&[
                    ("INFURA_KEY", "abc"),
                    ("ETHERSCAN_API_KEY", "key"),
                    ("DEPLOYER_PRIVATE_KEY", "0x01"),
                ]),
            )
            .unwrap();
        assert_eq!(network.rpc_url, "https://sepolia.infura.io/v3/abc");
        assert_eq!(network.api_key.as_deref(), Some("key"));
        assert_eq!(network.private_key.as_ref().map(PrivateKey::expose), Some("0x01"));
        assert_eq!(network.explorer.as_deref(), Some("https://sepolia.etherscan.io"));
        assert_eq!(
            network.explorer_api.as_deref(),
            Some("https://api-sepolia.etherscan.io/api")
        );
        assert_eq!(network.gas, Some(7_000_000));
    }

    #[test]
    fn test_network_without_builtin_explorer() {
        let config = DeployToml::parse(FULL).unwrap();
        let network = config.network_with("localhost", fake_env(&[])).unwrap();
        assert_eq!(network.rpc_url, "http://127.0.0.1:8545");
        assert!(network.explorer.is_none());
        assert!(network.explorer_api.is_none());
    }

    #[test]
    fn test_missing_env_var_is_error() {
        let config = DeployToml::parse(FULL).unwrap();
        let err = config
            .network_with("sepolia", fake_env(&[("ETHERSCAN_API_KEY", "key")]))
            .unwrap_err();
        assert!(format!("{:#}", err).contains("INFURA_KEY"));
    }

    #[test]
    fn test_unset_credentials_do_not_block_resolution() {
        let config = DeployToml::parse(FULL).unwrap();
        let network = config
            .network_with("sepolia", fake_env(&[("INFURA_KEY", "abc")]))
            .unwrap();
        assert_eq!(network.rpc_url, "https://sepolia.infura.io/v3/abc");
        assert!(network.api_key.is_none());
        assert!(network.private_key.is_none());
    }

    #[test]
    fn test_empty_api_key_is_none() {
        let config = DeployToml::parse(FULL).unwrap();
        let network = config
            .network_with(
                "sepolia",
                fake_env(&[("INFURA_KEY", "abc"), ("ETHERSCAN_API_KEY", "")]),
            )
            .unwrap();
        assert!(network.api_key.is_none());
    }

    #[test]
    fn test_private_key_is_redacted_in_debug() {
        let key = PrivateKey("0xdeadbeef".into());
        let shown = format!("{:?}", key);
        assert!(!shown.contains("deadbeef"));
    }

    #[test]
    fn test_unknown_network_lists_configured() {
        let config = DeployToml::parse(FULL).unwrap();
        let err = config.network("mainnet").unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("mainnet"));
        assert!(msg.contains("localhost, sepolia"));
    }

    #[test]
    fn test_interpolate_multiple_refs() {
        let out = interpolate("${A}-${B}-plain", |name| Some(name.to_lowercase())).unwrap();
        assert_eq!(out, "a-b-plain");
        assert_eq!(interpolate("no refs", |_| None).unwrap(), "no refs");
    }

    #[test]
    fn test_rpc_section_conversion() {
        let rpc = RpcSection::default();
        let settings = rpc.rpc_settings(Some(1_000_000));
        assert_eq!(settings.gas, Some(1_000_000));
        assert_eq!(settings.retry.max_attempts, 5);
        assert_eq!(settings.retry.initial_delay, Duration::from_millis(500));
        assert_eq!(settings.poll_interval, Duration::from_secs(2));
        assert_eq!(settings.mining_timeout, Duration::from_secs(300));
    }

    #[test]
    fn test_validate_warnings() {
        let config = DeployToml::parse(FULL).unwrap();
        let warnings = config.validate();
        assert!(warnings.iter().any(|w| w.contains("'localhost' has no explorer_api")));
        assert!(!warnings.iter().any(|w| w.contains("'sepolia'")));

        let empty = DeployToml::default();
        assert!(empty.validate().iter().any(|w| w.contains("No [[steps]]")));
    }

    #[test]
    fn test_load_or_default() {
        let dir = tempdir().unwrap();
        let config = DeployToml::load_or_default(dir.path()).unwrap();
        assert!(config.networks.is_empty());

        std::fs::write(dir.path().join(CONFIG_FILE), FULL).unwrap();
        let config = DeployToml::load_or_default(dir.path()).unwrap();
        assert_eq!(config.networks.len(), 2);
    }
}
