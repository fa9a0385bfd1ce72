use crate::address::Address;
use crate::orchestrator::state::AddressTable;
use crate::plan::StepKind;
use crate::ui::icons::{CHECK, CLOCK, CROSS, LINK, RECOVER, RUNNING, SEARCH, SKIP, SPARKLE, WARN};
use crate::verify::VerificationOutcome;
use console::style;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::time::Duration;

/// Explorer page for a deployed address, e.g. `https://sepolia.etherscan.io/address/0x..`.
pub fn explorer_link(explorer: &str, address: &Address) -> String {
    format!("{}/address/{}", explorer.trim_end_matches('/'), address)
}

/// Terminal UI for a deployment run, rendered via `indicatif` progress bars.
///
/// Two bars are stacked vertically:
/// - Step bar: tracks how many plan steps are done (completed or skipped)
/// - Activity spinner: what the current step is waiting on
///
/// All output is routed through `MultiProgress` so log lines do not tear the bars.
pub struct OrchestratorUI {
    multi: MultiProgress,
    step_bar: ProgressBar,
    activity_bar: ProgressBar,
    verbose: bool,
}

impl OrchestratorUI {
    /// Create the UI sized for `total_steps` plan steps.
    ///
    /// When `verbose` is set, intermediate activity (mining waits, retries)
    /// is also printed as dim lines.
    pub fn new(total_steps: u64, verbose: bool) -> Self {
        let multi = MultiProgress::new();

        let step_style = ProgressStyle::default_bar()
            .template("{prefix:.bold.dim} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .expect("progress bar template is a valid static string")
            .progress_chars("█▓▒░");

        let step_bar = multi.add(ProgressBar::new(total_steps));
        step_bar.set_style(step_style);
        step_bar.set_prefix("Steps");

        let activity_style = ProgressStyle::default_spinner()
            .template("{prefix:.bold.dim} {spinner} {msg}")
            .expect("progress bar template is a valid static string");

        let activity_bar = multi.add(ProgressBar::new_spinner());
        activity_bar.set_style(activity_style);
        activity_bar.set_prefix("  Now");

        Self {
            multi,
            step_bar,
            activity_bar,
            verbose,
        }
    }

    /// Print a line via `MultiProgress`, falling back to plain output when
    /// the bars are hidden (not a terminal) or the rich UI fails.
    fn print_line(&self, msg: impl AsRef<str>) {
        if self.multi.is_hidden() {
            println!("{}", msg.as_ref());
        } else if self.multi.println(msg.as_ref()).is_err() {
            eprintln!("{}", msg.as_ref());
        }
    }

    fn print_separator(&self) {
        self.print_line(format!("{}", style("═".repeat(70)).cyan()));
    }

    /// Header printed before any step runs.
    pub fn print_run_header(&self, network: &str, steps: usize) {
        self.print_line("");
        self.print_separator();
        self.print_line(format!(
            "{} Deploying to {} ({} steps)",
            style("▶").green().bold(),
            style(network).yellow().bold(),
            steps
        ));
        self.print_separator();
        self.print_line("");
    }

    /// "Preparing..." block listing addresses already recorded for the network.
    pub fn print_address_table(&self, addresses: &AddressTable) {
        self.print_line(format!("{}", style("Preparing...").underlined()));
        if addresses.is_empty() {
            self.print_line(format!("  {}", style("no recorded addresses").dim()));
        }
        for (tag, address) in addresses {
            self.print_line(format!("  {:<28} {}", style(tag).cyan(), address));
        }
        self.print_line("");
    }

    pub fn print_signer(&self, signer: &Address) {
        self.print_line(format!("{}  {}", style("Signer:").dim(), signer));
    }

    pub fn step_skipped(&self, tag: &str) {
        self.step_bar.inc(1);
        self.print_line(format!("{}Skipping: {}", SKIP, style(tag).dim()));
    }

    pub fn start_step(&self, tag: &str, kind: StepKind, description: &str) {
        self.step_bar
            .set_message(format!("{}: {}", style(kind).yellow(), tag));
        self.print_line(format!(
            "{}Running: {} {}",
            RUNNING,
            style(tag).yellow().bold(),
            style(format!("({})", description)).dim()
        ));
        self.activity_bar.set_message(format!(
            "{} {}",
            style(tag).cyan(),
            style("(submitting transaction...)").dim()
        ));
        self.activity_bar
            .enable_steady_tick(Duration::from_millis(100));
    }

    /// Update the activity spinner; printed as well in verbose mode.
    pub fn log_activity(&self, msg: &str) {
        self.activity_bar
            .set_message(format!("{}", style(format!("({})", msg)).dim()));
        if self.verbose {
            self.print_line(format!("    {} {}", style("→").dim(), style(msg).dim()));
        }
    }

    pub fn step_deployed(&self, tag: &str, address: &Address, explorer: Option<&str>) {
        self.step_bar.inc(1);
        self.print_line(format!(
            "  {}{} deployed at {}",
            CHECK,
            style(tag).green().bold(),
            style(address).cyan()
        ));
        if let Some(explorer) = explorer {
            self.print_line(format!("    {}{}", LINK, explorer_link(explorer, address)));
        }
    }

    pub fn step_recovered(&self, tag: &str, address: &Address, explorer: Option<&str>) {
        self.step_bar.inc(1);
        self.print_line(format!(
            "  {}{} already deployed at {}, marking complete",
            RECOVER,
            style(tag).green().bold(),
            style(address).cyan()
        ));
        if let Some(explorer) = explorer {
            self.print_line(format!("    {}{}", LINK, explorer_link(explorer, address)));
        }
    }

    pub fn step_wired(&self, tag: &str, tx_hash: &str) {
        self.step_bar.inc(1);
        self.print_line(format!(
            "  {}{} mined in {}",
            CHECK,
            style(tag).green().bold(),
            style(tx_hash).dim()
        ));
    }

    pub fn step_failed(&self, tag: &str, reason: &str) {
        self.activity_bar
            .finish_with_message(format!("{} {} failed", CROSS, tag));
        self.step_bar.abandon();
        self.print_line(format!(
            "\n{}Step {} failed: {}\n",
            CROSS,
            style(tag).red().bold(),
            reason
        ));
    }

    pub fn verification_waiting(&self, tag: &str, delay: Duration) {
        self.activity_bar.set_message(format!(
            "{}{} {}",
            CLOCK,
            style(tag).cyan(),
            style(format!("(waiting {}s for explorer indexing)", delay.as_secs())).dim()
        ));
    }

    pub fn verification_result(&self, tag: &str, outcome: &VerificationOutcome) {
        let line = match outcome {
            VerificationOutcome::Failed(reason) => format!(
                "    {}Verification of {} failed: {}",
                WARN,
                tag,
                style(reason).yellow()
            ),
            other => format!("    {}{} {}", SEARCH, tag, style(other).green()),
        };
        self.print_line(line);
    }

    /// Stop the spinner and print the closing banner.
    pub fn run_complete(&self, executed: usize, skipped: usize) {
        self.activity_bar.finish_and_clear();
        self.step_bar.finish();
        self.print_line(format!(
            "\n{} Deployment complete: {} executed, {} skipped\n",
            SPARKLE,
            style(executed).green().bold(),
            skipped
        ));
    }
}
