use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

/// Bare numbers are seconds; anything else goes through `humantime` (`250ms`, `1m 30s`).
fn parse_duration(input: &str) -> Result<Duration, String> {
    let s = input.trim();
    if s.is_empty() {
        return Err("duration cannot be empty (expected e.g. 10s, 250ms, 1m)".to_string());
    }
    if let Ok(secs) = s.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }
    humantime::parse_duration(s)
        .map_err(|err| format!("invalid duration '{s}': {err} (expected e.g. 10s, 250ms, 1m)"))
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable summary table.
    HumanReadable,
    /// Emit the summary as a single JSON line on stdout.
    Json,
}

#[derive(Debug, Parser)]
#[command(
    name = "hammr",
    author,
    version,
    about = "Thread-group load generator",
    long_about = "hammr runs test plans made of thread groups.\n\nEach thread group starts a number of virtual threads (optionally ramped up over a period) that repeatedly run a pipeline of pre-processors, timers, one sampler, post-processors and assertions, either for a fixed number of loops or for a scheduled duration.\n\nPress Ctrl-C once to stop after the current iterations, twice to interrupt in-flight samplers.",
    after_help = "Examples:\n  hammr run plan.yaml\n  hammr run plan.yaml --threads 50 --ramp-up 10s --duration 1m\n  hammr run plan.yaml --loops 100 --output json"
)]
pub struct Cli {
    /// Log filter used when RUST_LOG is not set (e.g. info, hammr_core=debug)
    #[arg(
        long,
        global = true,
        env = "HAMMR_LOG_LEVEL",
        default_value = "warn",
        value_name = "FILTER"
    )]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run a test plan
    #[command(
        long_about = "Run a YAML test plan.\n\nCLI flags override the corresponding settings of every thread group in the plan."
    )]
    Run(RunArgs),
}

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Path to the test plan (.yaml)
    pub plan: PathBuf,

    /// Override the number of threads of every group
    #[arg(long)]
    pub threads: Option<u64>,

    /// Override the ramp-up period of every group (e.g. 10s, 250ms, 1m)
    #[arg(long, value_parser = parse_duration)]
    pub ramp_up: Option<Duration>,

    /// Override the loop count of every group (-1 loops forever)
    #[arg(long, allow_negative_numbers = true)]
    pub loops: Option<i64>,

    /// Run every group in scheduler mode for this long (e.g. 10s, 250ms, 1m)
    #[arg(long, value_parser = parse_duration)]
    pub duration: Option<Duration>,

    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::HumanReadable)]
    pub output: OutputFormat,
}
