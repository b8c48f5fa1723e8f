use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

fn parse_duration(input: &str) -> Result<Duration, String> {
    let s = input.trim();
    if s.is_empty() {
        return Err("duration cannot be empty (expected e.g. 10s, 250ms, 1m)".to_string());
    }
    if s.bytes().all(|b| b.is_ascii_digit()) {
        return s
            .parse::<u64>()
            .map(Duration::from_secs)
            .map_err(|_| format!("duration '{s}' is too large"));
    }
    humantime::parse_duration(s)
        .map_err(|err| format!("invalid duration '{s}' ({err}; expected e.g. 10s, 250ms, 1m)"))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable summary.
    HumanReadable,
    /// Emit one JSON line per report to stdout.
    Json,
}

#[derive(Debug, Parser)]
#[command(
    name = "feedr",
    author,
    version,
    about = "Test-data coordination for distributed load generators",
    long_about = "feedr hands out test data to virtual users spread across workers.\n\nA plan declares variables (CSV/JSON record sets, ranges, counters, dates, random values) and scenarios whose steps reference them as `{{ name }}` or `{{ name.field }}`. Exclusive variables are served by a single producer so no value is used twice; replicated ones are computed by every consumer.",
    after_help = "Examples:\n  feedr check plan.yaml\n  feedr run plan.yaml --workers 4 --vus 25\n  feedr run plan.yaml --iterations 100 --output json"
)]
pub struct Cli {
    /// Log filter used when RUST_LOG is not set (e.g. warn, info, feedr_core=debug)
    #[arg(long, global = true, default_value = "warn", env = "FEEDR_LOG")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Validate a plan: declarations, record sets and step templates
    Check(CheckArgs),

    /// Run a plan with an in-process controller and workers
    #[command(
        long_about = "Run every scenario of a plan. Steps are rendered against the producer and keystore exactly as a distributed run would, without sending the rendered requests anywhere.\n\nCLI flags override values from the plan."
    )]
    Run(RunArgs),
}

#[derive(Debug, Args)]
pub struct CheckArgs {
    /// Path to the plan (.yaml)
    pub plan: PathBuf,

    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::HumanReadable)]
    pub output: OutputFormat,
}

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Path to the plan (.yaml)
    pub plan: PathBuf,

    /// Number of worker connections virtual users are spread across
    #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u64).range(1..))]
    pub workers: u64,

    /// Override virtual users per scenario
    #[arg(long)]
    pub vus: Option<u64>,

    /// Override iterations per virtual user
    #[arg(long)]
    pub iterations: Option<u64>,

    /// Per-request timeout (e.g. 10s, 250ms)
    #[arg(long, value_parser = parse_duration)]
    pub timeout: Option<Duration>,

    /// Shuffle seed for `random: true` record sets without their own seed
    #[arg(long)]
    pub seed: Option<u64>,

    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::HumanReadable)]
    pub output: OutputFormat,
}
