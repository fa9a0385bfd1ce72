//! Plan execution: `chainplan deploy` and `chainplan verify`.

use anyhow::Result;
use std::path::Path;
use std::sync::Arc;

use super::super::Cli;

fn load_config(cli: &Cli, project_dir: &Path, no_verify: bool) -> Result<chainplan::config::Config> {
    use chainplan::config::Config;

    Ok(Config::new(
        project_dir.to_path_buf(),
        cli.config.clone(),
        cli.verbose,
    )?
    .with_overrides(cli.state_dir.clone(), no_verify))
}

pub async fn cmd_deploy(cli: &Cli, project_dir: &Path, network: &str, no_verify: bool) -> Result<()> {
    use chainplan::orchestrator::Orchestrator;
    use chainplan::ui::{OrchestratorUI, explorer_link};
    use console::style;

    let config = load_config(cli, project_dir, no_verify)?;
    let plan = config.plan()?;
    let resolved = config.network(network)?;

    for warning in config.deploy_toml().validate() {
        tracing::warn!("{}", warning);
    }

    let ctx = config.run_context(&resolved)?;
    let ui = Arc::new(OrchestratorUI::new(plan.len() as u64, cli.verbose));
    let orchestrator = Orchestrator::new(ctx).with_ui(ui);

    let summary = orchestrator.run(&plan).await?;

    println!("{}", style("Deployed addresses:").underlined());
    for (tag, address) in &summary.addresses {
        match resolved.explorer.as_deref() {
            Some(explorer) => println!(
                "  {:<28} {}  {}",
                tag,
                address,
                style(explorer_link(explorer, address)).dim()
            ),
            None => println!("  {:<28} {}", tag, address),
        }
    }

    let failed: Vec<_> = summary
        .verifications
        .iter()
        .filter(|r| !r.outcome.is_success())
        .collect();
    if !failed.is_empty() {
        println!();
        println!(
            "{} verification(s) did not succeed; run 'chainplan verify --network {}' to retry.",
            failed.len(),
            network
        );
    }
    println!();
    Ok(())
}

pub async fn cmd_verify(cli: &Cli, project_dir: &Path, network: &str) -> Result<()> {
    use chainplan::orchestrator::Orchestrator;

    let config = load_config(cli, project_dir, false)?;
    let plan = config.plan()?;
    let resolved = config.network(network)?;
    let orchestrator = Orchestrator::new(config.run_context(&resolved)?);

    let records = orchestrator.verify_all(&plan).await?;

    println!();
    if records.is_empty() {
        println!("No deployed contracts recorded for '{}'.", network);
        println!();
        return Ok(());
    }
    println!("{:<28} {:<44} Outcome", "Step", "Address");
    for record in &records {
        println!(
            "{:<28} {:<44} {}",
            record.tag,
            record.address.to_string(),
            record.outcome
        );
    }
    println!();
    Ok(())
}
