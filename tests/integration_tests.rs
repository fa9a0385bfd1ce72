//! Integration tests for the chainplan CLI
//!
//! These run the binary against temporary project directories. None of them
//! need a reachable node: deploys only touch the network when a step is
//! still pending.

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

const DEPLOY_TOML: &str = r#"
[verification]
delay_secs = 0

[networks.localhost]
rpc_url = "http://127.0.0.1:1"

[[steps]]
tag = "AdminControl"
contract = "AdminControl"

[[steps]]
tag = "TrainerManagement"
contract = "TrainerManagement"
args = [{ ref = "AdminControl" }]

[[steps]]
tag = "GrantTrainerRole"
target = "AdminControl"
method = "setTrainerManagement"
args = [{ ref = "TrainerManagement" }]
"#;

const ADMIN: &str = "0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed";
const TRAINER: &str = "0xfB6916095ca1df60bB79Ce92cE3Ea74c37c5d359";

fn chainplan() -> Command {
    let mut cmd = cargo_bin_cmd!("chainplan");
    cmd.env_remove("CHAINPLAN_NETWORK")
        .env_remove("CHAINPLAN_VERIFY_DELAY_SECS")
        .env_remove("RUST_LOG");
    cmd
}

fn create_project() -> TempDir {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("deploy.toml"), DEPLOY_TOML).unwrap();
    dir
}

fn network_dir(dir: &TempDir, network: &str) -> PathBuf {
    dir.path().join("deployments/networks").join(network)
}

fn write_checkpoint(dir: &TempDir, network: &str, complete: &[&str]) {
    let net = network_dir(dir, network);
    fs::create_dir_all(&net).unwrap();
    fs::write(
        net.join("address.json"),
        format!(
            "{{\n  \"AdminControl\": \"{}\",\n  \"TrainerManagement\": \"{}\"\n}}\n",
            ADMIN, TRAINER
        ),
    )
    .unwrap();
    let progress: Vec<String> = complete
        .iter()
        .map(|tag| format!("  \"{}\": true", tag))
        .collect();
    fs::write(
        net.join("progress.json"),
        format!("{{\n{}\n}}\n", progress.join(",\n")),
    )
    .unwrap();
}

// =============================================================================
// Basic CLI
// =============================================================================

mod cli {
    use super::*;

    #[test]
    fn test_help() {
        chainplan()
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("deployment orchestrator"))
            .stdout(predicate::str::contains("deploy"))
            .stdout(predicate::str::contains("reset"));
    }

    #[test]
    fn test_version() {
        chainplan()
            .arg("--version")
            .assert()
            .success()
            .stdout(predicate::str::contains("chainplan"));
    }

    #[test]
    fn test_deploy_requires_network() {
        let dir = create_project();
        chainplan()
            .current_dir(dir.path())
            .arg("deploy")
            .assert()
            .failure()
            .stderr(predicate::str::contains("--network"));
    }

    #[test]
    fn test_project_dir_flag() {
        let dir = create_project();
        chainplan()
            .arg("--project-dir")
            .arg(dir.path())
            .arg("list")
            .assert()
            .success()
            .stdout(predicate::str::contains("TrainerManagement"));
    }
}

// =============================================================================
// Plan listing
// =============================================================================

mod list {
    use super::*;

    #[test]
    fn test_list_shows_steps_in_order() {
        let dir = create_project();
        chainplan()
            .current_dir(dir.path())
            .arg("list")
            .assert()
            .success()
            .stdout(predicate::str::contains("AdminControl"))
            .stdout(predicate::str::contains("GrantTrainerRole"))
            .stdout(predicate::str::contains("needs: AdminControl"))
            .stdout(predicate::str::contains("Networks: localhost"));
    }

    #[test]
    fn test_list_without_config() {
        let dir = TempDir::new().unwrap();
        chainplan()
            .current_dir(dir.path())
            .arg("list")
            .assert()
            .success()
            .stdout(predicate::str::contains("No deploy.toml found"));
    }

    #[test]
    fn test_list_rejects_unknown_dependency() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("deploy.toml"),
            r#"
[[steps]]
tag = "B"
contract = "B"
args = [{ ref = "A" }]
"#,
        )
        .unwrap();
        chainplan()
            .current_dir(dir.path())
            .arg("list")
            .assert()
            .failure();
    }
}

// =============================================================================
// Status and reset
// =============================================================================

mod state {
    use super::*;

    #[test]
    fn test_status_without_deployments() {
        let dir = create_project();
        chainplan()
            .current_dir(dir.path())
            .arg("status")
            .assert()
            .success()
            .stdout(predicate::str::contains("No deployments recorded"));
    }

    #[test]
    fn test_status_shows_recorded_progress() {
        let dir = create_project();
        write_checkpoint(&dir, "localhost", &["AdminControl"]);

        chainplan()
            .current_dir(dir.path())
            .arg("status")
            .assert()
            .success()
            .stdout(predicate::str::contains("localhost"))
            .stdout(predicate::str::contains("1/3 steps complete"))
            .stdout(predicate::str::contains(ADMIN))
            .stdout(predicate::str::contains("recorded"));
    }

    #[test]
    fn test_status_reports_malformed_checkpoint() {
        let dir = create_project();
        let net = network_dir(&dir, "localhost");
        fs::create_dir_all(&net).unwrap();
        fs::write(net.join("progress.json"), "{ not json").unwrap();

        chainplan()
            .current_dir(dir.path())
            .args(["status", "--network", "localhost"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("progress.json"));
    }

    #[test]
    fn test_reset_with_force_keeps_addresses() {
        let dir = create_project();
        write_checkpoint(&dir, "localhost", &["AdminControl", "TrainerManagement"]);

        chainplan()
            .current_dir(dir.path())
            .args(["reset", "--network", "localhost", "--force"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Reset complete"));

        let net = network_dir(&dir, "localhost");
        assert!(!net.join("progress.json").exists());
        assert!(net.join("address.json").exists());
    }

    #[test]
    fn test_reset_all_removes_addresses() {
        let dir = create_project();
        write_checkpoint(&dir, "localhost", &["AdminControl"]);

        chainplan()
            .current_dir(dir.path())
            .args(["reset", "--network", "localhost", "--all", "--force"])
            .assert()
            .success()
            .stdout(predicate::str::contains("addresses removed"));

        let net = network_dir(&dir, "localhost");
        assert!(!net.join("progress.json").exists());
        assert!(!net.join("address.json").exists());
    }

    #[test]
    fn test_reset_nothing_recorded() {
        let dir = create_project();
        chainplan()
            .current_dir(dir.path())
            .args(["reset", "--network", "localhost", "--force"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Nothing to reset"));
    }
}

// =============================================================================
// Deploy
// =============================================================================

mod deploy {
    use super::*;

    #[test]
    fn test_deploy_unknown_network() {
        let dir = create_project();
        chainplan()
            .current_dir(dir.path())
            .args(["deploy", "--network", "mainnet"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Unknown network 'mainnet'"));
    }

    #[test]
    fn test_deploy_network_from_env() {
        let dir = create_project();
        chainplan()
            .current_dir(dir.path())
            .env("CHAINPLAN_NETWORK", "mainnet")
            .arg("deploy")
            .assert()
            .failure()
            .stderr(predicate::str::contains("Unknown network 'mainnet'"));
    }

    #[test]
    fn test_deploy_without_config_fails() {
        let dir = TempDir::new().unwrap();
        chainplan()
            .current_dir(dir.path())
            .args(["deploy", "--network", "localhost"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("No deploy.toml found"));
    }

    #[test]
    fn test_completed_plan_rerun_is_offline_noop() {
        let dir = create_project();
        write_checkpoint(
            &dir,
            "localhost",
            &["AdminControl", "TrainerManagement", "GrantTrainerRole"],
        );
        let net = network_dir(&dir, "localhost");
        let before = fs::read_to_string(net.join("address.json")).unwrap();

        chainplan()
            .current_dir(dir.path())
            .args(["deploy", "--network", "localhost", "--no-verify"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Deployed addresses"))
            .stdout(predicate::str::contains(TRAINER));

        assert_eq!(fs::read_to_string(net.join("address.json")).unwrap(), before);
    }
}
