//! Command-line argument parsing.
//!
//! `hiloop-server` is otherwise entirely environment-configured
//! (`hiloop_core::AppConfig::load`, spec §6) — these flags only cover the
//! things an operator wants to flip without touching the environment:
//! bind port, log verbosity/format, and the deployment label that shows up
//! in logs.

use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(
    name = "hiloop-server",
    about = "Human-in-the-loop workflow orchestrator",
    version,
    long_about = "Executes ordered, multi-step workflows in which some steps \
                  are automated and others require an asynchronous human \
                  approval delivered through a chat platform or webhook."
)]
pub struct Args {
    /// HTTP server port. Overrides `PORT` from the environment when set.
    #[arg(short, long, env = "PORT")]
    pub port: Option<u16>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(
        short,
        long,
        env = "LOG_LEVEL",
        default_value = "info",
        value_parser = ["trace", "debug", "info", "warn", "error"]
    )]
    pub log_level: String,

    /// Environment label (dev, staging, prod) — affects nothing but logs.
    #[arg(
        short,
        long,
        env = "ENVIRONMENT",
        default_value = "dev",
        value_parser = ["dev", "staging", "prod"]
    )]
    pub env: String,

    /// Emit JSON-formatted logs instead of pretty-printed ones.
    #[arg(long, env = "JSON_LOGS")]
    pub json_logs: bool,
}

impl Args {
    pub fn validate(&self) -> anyhow::Result<()> {
        Ok(())
    }
}
