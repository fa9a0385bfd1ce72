use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod cmd;

#[derive(Parser)]
#[command(name = "chainplan")]
#[command(version, about = "Resumable contract deployment orchestrator")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    /// Path to the deployment config. Defaults to deploy.toml in the project directory
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Directory holding per-network checkpoints. Overrides [project].state_dir
    #[arg(long, global = true)]
    pub state_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the deployment plan against a network, resuming from its checkpoint
    Deploy {
        #[arg(short, long, env = "CHAINPLAN_NETWORK")]
        network: String,

        /// Skip source verification of deployed contracts
        #[arg(long)]
        no_verify: bool,
    },
    /// Retry source verification for every recorded contract
    Verify {
        #[arg(short, long, env = "CHAINPLAN_NETWORK")]
        network: String,
    },
    /// Show the steps of the deployment plan
    List,
    /// Show checkpoint progress and recorded addresses
    Status {
        /// Only show this network (defaults to every recorded network)
        #[arg(short, long)]
        network: Option<String>,
    },
    /// Forget progress for a network so the next deploy re-runs every step
    Reset {
        #[arg(short, long, env = "CHAINPLAN_NETWORK")]
        network: String,

        /// Also forget recorded addresses
        #[arg(long)]
        all: bool,

        /// Skip confirmation prompt
        #[arg(long)]
        force: bool,
    },
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "chainplan=debug" } else { "chainplan=warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };
    dotenvy::from_path(project_dir.join(".env")).ok();
    init_tracing(cli.verbose);

    match &cli.command {
        Commands::Deploy { network, no_verify } => {
            cmd::cmd_deploy(&cli, &project_dir, network, *no_verify).await?;
        }
        Commands::Verify { network } => cmd::cmd_verify(&cli, &project_dir, network).await?,
        Commands::List => cmd::cmd_list(&cli, &project_dir)?,
        Commands::Status { network } => cmd::cmd_status(&cli, &project_dir, network.as_deref())?,
        Commands::Reset {
            network,
            all,
            force,
        } => cmd::cmd_reset(&cli, &project_dir, network, *all, *force)?,
    }

    Ok(())
}
