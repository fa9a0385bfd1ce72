//! Plan listing, checkpoint status and reset commands.

use anyhow::Result;
use std::path::Path;

use super::super::Cli;

pub fn cmd_list(cli: &Cli, project_dir: &Path) -> Result<()> {
    use chainplan::config::Config;

    let config = Config::new(project_dir.to_path_buf(), cli.config.clone(), cli.verbose)?;

    if !config.has_config_file() {
        println!();
        println!(
            "No deploy.toml found in {}. Create one to define networks and steps.",
            config.project_dir.display()
        );
        println!();
        return Ok(());
    }

    let plan = config.plan()?;

    println!();
    println!("Plan loaded from: {}", config.config_file.display());
    println!();
    println!("{:<4} {:<28} {:<8} Action", "#", "Step", "Kind");
    println!("{:<4} {:<28} {:<8} ------", "--", "----", "----");
    for (i, step) in plan.steps().iter().enumerate() {
        println!(
            "{:<4} {:<28} {:<8} {}",
            i + 1,
            step.tag,
            step.kind,
            step.body.describe()
        );
        if !step.dependencies.is_empty() {
            println!(
                "     {}",
                console::style(format!("needs: {}", step.dependencies.join(", "))).dim()
            );
        }
    }
    println!();

    let networks: Vec<&str> = config
        .deploy_toml()
        .networks
        .keys()
        .map(String::as_str)
        .collect();
    if !networks.is_empty() {
        println!("Networks: {}", networks.join(", "));
        println!();
    }

    for warning in config.deploy_toml().validate() {
        println!("{} {}", console::style("warning:").yellow(), warning);
    }
    Ok(())
}

pub fn cmd_status(cli: &Cli, project_dir: &Path, network: Option<&str>) -> Result<()> {
    use chainplan::config::Config;
    use console::style;

    let config = Config::new(project_dir.to_path_buf(), cli.config.clone(), cli.verbose)?
        .with_overrides(cli.state_dir.clone(), false);

    println!();
    println!("Deployment Status");
    println!("=================");
    println!();

    let networks = match network {
        Some(name) => vec![name.to_string()],
        None => config.recorded_networks()?,
    };
    if networks.is_empty() {
        println!("No deployments recorded under {}", config.state_dir.display());
        println!();
        return Ok(());
    }

    let plan = if config.has_config_file() {
        Some(config.plan()?)
    } else {
        None
    };

    for name in &networks {
        let checkpoint = config.store(name).load()?;
        println!("Network: {}", style(name).yellow().bold());

        match &plan {
            Some(plan) => {
                let done = plan
                    .steps()
                    .iter()
                    .filter(|s| checkpoint.is_complete(&s.tag))
                    .count();
                println!("  {}/{} steps complete", done, plan.len());
                for step in plan.steps() {
                    let status = if checkpoint.is_complete(&step.tag) {
                        style("done").green()
                    } else if checkpoint.address_of(&step.tag).is_some() {
                        style("recorded").yellow()
                    } else {
                        style("pending").dim()
                    };
                    let address = checkpoint
                        .address_of(&step.tag)
                        .map(|a| a.to_string())
                        .unwrap_or_default();
                    println!("  {:<28} {:<10} {}", step.tag, status, address);
                }
                for tag in checkpoint.addresses.keys() {
                    if plan.get(tag).is_none() {
                        println!(
                            "  {:<28} {:<10} {}",
                            tag,
                            style("not in plan").dim(),
                            checkpoint.addresses[tag]
                        );
                    }
                }
            }
            None => {
                println!("  {} steps complete", checkpoint.completed_tags().len());
                for (tag, address) in &checkpoint.addresses {
                    println!("  {:<28} {}", tag, address);
                }
            }
        }
        println!();
    }
    Ok(())
}

pub fn cmd_reset(cli: &Cli, project_dir: &Path, network: &str, all: bool, force: bool) -> Result<()> {
    use chainplan::config::Config;
    use dialoguer::Confirm;

    let config = Config::new(project_dir.to_path_buf(), cli.config.clone(), cli.verbose)?
        .with_overrides(cli.state_dir.clone(), false);

    if !force {
        let prompt = if all {
            format!(
                "This will forget all progress and recorded addresses for '{}'. Are you sure?",
                network
            )
        } else {
            format!("This will reset all progress for '{}'. Are you sure?", network)
        };
        let confirm = Confirm::new()
            .with_prompt(prompt)
            .default(false)
            .interact()
            .unwrap_or(false);

        if !confirm {
            println!("Reset cancelled");
            return Ok(());
        }
    }

    let store = config.store(network);
    let removed = if all {
        store.reset_all()?
    } else {
        store.reset_progress()?
    };

    if !removed {
        println!("Nothing to reset for '{}'", network);
    } else if all {
        println!("Reset complete: progress and addresses removed for '{}'", network);
    } else {
        println!(
            "Reset complete: progress removed for '{}' (recorded addresses kept)",
            network
        );
    }
    Ok(())
}
