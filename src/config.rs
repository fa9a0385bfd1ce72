use anyhow::{Context, Result, bail};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::chain::{ArtifactStore, ChainClient, JsonRpcClient, parse_private_key};
use crate::deploy_config::{CONFIG_FILE, DeployToml, ResolvedNetwork};
use crate::orchestrator::lock::LOCK_FILE;
use crate::orchestrator::{CheckpointStore, RunContext};
use crate::plan::DeploymentPlan;
use crate::verify::{ExplorerSettings, ExplorerVerifier, NoopVerifier, Verifier};

/// Runtime configuration for chainplan.
///
/// Bridges `deploy.toml` with CLI overrides and resolves every path
/// against the project directory.
#[derive(Debug, Clone)]
pub struct Config {
    pub project_dir: PathBuf,
    pub config_file: PathBuf,
    pub artifacts_dir: PathBuf,
    pub state_dir: PathBuf,
    pub verbose: bool,
    /// Cleared by `--no-verify`.
    pub verify: bool,
    deploy: DeployToml,
    has_config_file: bool,
}

impl Config {
    /// Load configuration for `project_dir`.
    ///
    /// An explicit `config_file` must exist; the default `deploy.toml` may be
    /// absent, in which case defaults apply and the plan is empty.
    pub fn new(project_dir: PathBuf, config_file: Option<PathBuf>, verbose: bool) -> Result<Self> {
        let project_dir = project_dir
            .canonicalize()
            .context("Failed to resolve project directory")?;

        let (config_file, deploy, has_config_file) = match config_file {
            Some(path) => {
                let path = project_dir.join(path);
                let deploy = DeployToml::load(&path)?;
                (path, deploy, true)
            }
            None => {
                let path = project_dir.join(CONFIG_FILE);
                let exists = path.exists();
                let deploy = DeployToml::load_or_default(&project_dir)?;
                (path, deploy, exists)
            }
        };

        let artifacts_dir = project_dir.join(&deploy.project.artifacts_dir);
        let state_dir = project_dir.join(&deploy.project.state_dir);

        Ok(Self {
            project_dir,
            config_file,
            artifacts_dir,
            state_dir,
            verbose,
            verify: true,
            deploy,
            has_config_file,
        })
    }

    /// Apply CLI overrides on top of the file settings.
    pub fn with_overrides(mut self, state_dir: Option<PathBuf>, no_verify: bool) -> Self {
        if let Some(dir) = state_dir {
            self.state_dir = self.project_dir.join(dir);
        }
        if no_verify {
            self.verify = false;
        }
        self
    }

    pub fn deploy_toml(&self) -> &DeployToml {
        &self.deploy
    }

    pub fn has_config_file(&self) -> bool {
        self.has_config_file
    }

    pub fn plan(&self) -> Result<DeploymentPlan> {
        if !self.has_config_file {
            bail!(
                "No {} found in {}. Create one with [networks.*] and [[steps]] tables",
                CONFIG_FILE,
                self.project_dir.display()
            );
        }
        self.deploy.plan()
    }

    pub fn network(&self, name: &str) -> Result<ResolvedNetwork> {
        self.deploy.network(name)
    }

    pub fn network_dir(&self, network: &str) -> PathBuf {
        self.state_dir.join(network)
    }

    pub fn store(&self, network: &str) -> CheckpointStore {
        CheckpointStore::for_network(&self.state_dir, network)
    }

    pub fn lock_path(&self, network: &str) -> PathBuf {
        self.network_dir(network).join(LOCK_FILE)
    }

    /// Networks that have a checkpoint directory on disk, sorted by name.
    pub fn recorded_networks(&self) -> Result<Vec<String>> {
        if !self.state_dir.exists() {
            return Ok(Vec::new());
        }
        let mut networks = Vec::new();
        for entry in std::fs::read_dir(&self.state_dir)
            .with_context(|| format!("Failed to read {}", self.state_dir.display()))?
        {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                networks.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        networks.sort();
        Ok(networks)
    }

    fn verifier_for(
        &self,
        network: &ResolvedNetwork,
        artifacts: ArtifactStore,
    ) -> Result<(Arc<dyn Verifier>, Duration)> {
        let verification = &self.deploy.verification;
        let disabled = |reason: String| -> (Arc<dyn Verifier>, Duration) {
            let verifier: Arc<dyn Verifier> = Arc::new(NoopVerifier::new(reason));
            (verifier, Duration::ZERO)
        };

        if !self.verify || !verification.enabled {
            return Ok(disabled("verification disabled".to_string()));
        }
        let Some(api_url) = network.explorer_api.clone() else {
            return Ok(disabled(format!(
                "no explorer API configured for network '{}'",
                network.name
            )));
        };
        let Some(api_key) = network.api_key.clone().filter(|key| !key.is_empty()) else {
            return Ok(disabled(format!(
                "no explorer API key configured for network '{}'",
                network.name
            )));
        };

        let settings = ExplorerSettings {
            api_url,
            api_key,
            retry: self.deploy.rpc.retry_policy(),
            poll_interval: self.deploy.rpc.poll_interval(),
        };
        let verifier: Arc<dyn Verifier> = Arc::new(ExplorerVerifier::new(artifacts, settings));
        Ok((verifier, verification.delay()?))
    }

    /// Build the run context for `network`, wiring the JSON-RPC client and
    /// the explorer verifier.
    pub fn run_context(&self, network: &ResolvedNetwork) -> Result<RunContext> {
        let artifacts = ArtifactStore::new(self.artifacts_dir.clone());
        let signer = network
            .private_key
            .as_ref()
            .map(|key| parse_private_key(key.expose()))
            .transpose()
            .with_context(|| format!("Invalid private_key for network '{}'", network.name))?;
        match &signer {
            Some(key) => info!(network = %network.name, signer = %key.address(), "Signing with configured private key"),
            None => info!(network = %network.name, "No private key configured; using node accounts"),
        }
        let client = JsonRpcClient::new(
            &network.rpc_url,
            signer,
            artifacts.clone(),
            self.deploy.rpc.rpc_settings(network.gas),
        )
        .with_context(|| format!("Failed to create RPC client for network '{}'", network.name))?;
        let chain: Arc<dyn ChainClient> = Arc::new(client);
        let (verifier, verification_delay) = self.verifier_for(network, artifacts)?;

        Ok(RunContext {
            network: network.name.clone(),
            explorer: network.explorer.clone(),
            store: self.store(&network.name),
            lock_path: Some(self.lock_path(&network.name)),
            chain,
            verifier,
            verification_delay,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    const CONFIG: &str = r#"
[verification]
delay_secs = 0

[networks.localhost]
rpc_url = "http://127.0.0.1:8545"

[networks.sepolia]
rpc_url = "https://rpc.sepolia.org"
api_key = "key"

[networks.goerli]
rpc_url = "https://rpc.goerli.org"
api_key = "${CHAINPLAN_TEST_UNSET_EXPLORER_KEY}"
private_key = "${CHAINPLAN_TEST_UNSET_PRIVATE_KEY}"

[networks.broken]
rpc_url = "http://127.0.0.1:8545"
private_key = "not-a-key"

[[steps]]
tag = "A"
contract = "A"
"#;

    fn setup(content: &str) -> tempfile::TempDir {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join(CONFIG_FILE), content).unwrap();
        dir
    }

    #[test]
    fn test_paths_resolve_against_project_dir() {
        let dir = setup(CONFIG);
        let config = Config::new(dir.path().to_path_buf(), None, false).unwrap();
        let root = dir.path().canonicalize().unwrap();
        assert_eq!(config.artifacts_dir, root.join("artifacts"));
        assert_eq!(config.state_dir, root.join("deployments/networks"));
        assert_eq!(
            config.store("sepolia").progress_file(),
            root.join("deployments/networks/sepolia/progress.json")
        );
        assert_eq!(
            config.lock_path("sepolia"),
            root.join("deployments/networks/sepolia/.lock")
        );
        assert!(config.has_config_file());
    }

    #[test]
    fn test_overrides() {
        let dir = setup(CONFIG);
        let config = Config::new(dir.path().to_path_buf(), None, true)
            .unwrap()
            .with_overrides(Some(PathBuf::from("state")), true);
        assert!(config.verbose);
        assert!(!config.verify);
        assert_eq!(config.state_dir, dir.path().canonicalize().unwrap().join("state"));
    }

    #[test]
    fn test_missing_default_config_is_not_error() {
        let dir = tempdir().unwrap();
        let config = Config::new(dir.path().to_path_buf(), None, false).unwrap();
        assert!(!config.has_config_file());
        assert!(config.plan().is_err());
    }

    #[test]
    fn test_missing_explicit_config_is_error() {
        let dir = tempdir().unwrap();
        let result = Config::new(dir.path().to_path_buf(), Some(PathBuf::from("other.toml")), false);
        assert!(result.is_err());
    }

    #[test]
    fn test_recorded_networks() {
        let dir = setup(CONFIG);
        let config = Config::new(dir.path().to_path_buf(), None, false).unwrap();
        assert!(config.recorded_networks().unwrap().is_empty());

        fs::create_dir_all(config.network_dir("sepolia")).unwrap();
        fs::create_dir_all(config.network_dir("goerli")).unwrap();
        assert_eq!(config.recorded_networks().unwrap(), vec!["goerli", "sepolia"]);
    }

    #[tokio::test]
    async fn test_run_context_without_explorer_uses_noop_verifier() {
        let dir = setup(CONFIG);
        let config = Config::new(dir.path().to_path_buf(), None, false).unwrap();
        let network = config.network("localhost").unwrap();
        let ctx = config.run_context(&network).unwrap();

        assert_eq!(ctx.network, "localhost");
        assert!(ctx.explorer.is_none());
        assert_eq!(ctx.verification_delay, Duration::ZERO);

        let outcome = ctx
            .verifier
            .verify(&crate::verify::VerifyRequest {
                contract: "A".into(),
                address: crate::address::Address::ZERO,
                constructor_args: vec![],
            })
            .await;
        match outcome {
            crate::verify::VerificationOutcome::Failed(reason) => {
                assert!(reason.contains("no explorer API"))
            }
            other => panic!("Expected Failed, got {:?}", other),
        }
    }

    #[test]
    fn test_run_context_for_known_network() {
        let dir = setup(CONFIG);
        let config = Config::new(dir.path().to_path_buf(), None, false).unwrap();
        let network = config.network("sepolia").unwrap();
        let ctx = config.run_context(&network).unwrap();
        assert_eq!(ctx.explorer.as_deref(), Some("https://sepolia.etherscan.io"));
        assert_eq!(
            ctx.lock_path,
            Some(config.network_dir("sepolia").join(LOCK_FILE))
        );
    }

    #[tokio::test]
    async fn test_unset_api_key_falls_back_to_noop_verifier() {
        let dir = setup(CONFIG);
        let config = Config::new(dir.path().to_path_buf(), None, false).unwrap();
        let network = config.network("goerli").unwrap();
        assert!(network.api_key.is_none());
        assert!(network.private_key.is_none());

        let ctx = config.run_context(&network).unwrap();
        let outcome = ctx
            .verifier
            .verify(&crate::verify::VerifyRequest {
                contract: "A".into(),
                address: crate::address::Address::ZERO,
                constructor_args: vec![],
            })
            .await;
        match outcome {
            crate::verify::VerificationOutcome::Failed(reason) => {
                assert!(reason.contains("no explorer API key"))
            }
            other => panic!("Expected Failed, got {:?}", other),
        }
    }

    #[test]
    fn test_invalid_private_key_is_error() {
        let dir = setup(CONFIG);
        let config = Config::new(dir.path().to_path_buf(), None, false).unwrap();
        let network = config.network("broken").unwrap();
        let err = config.run_context(&network).err().unwrap();
        let msg = format!("{:#}", err);
        assert!(msg.contains("private_key"));
        assert!(!msg.contains("not-a-key"));
    }
}
