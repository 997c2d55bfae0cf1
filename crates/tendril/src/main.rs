//! Tendril: garden task reminders
//!
//! Main binary with subcommands:
//! - `daemon`: Daily due-task scan feeding the notification workers
//! - `scan`: Scan one day, deliver, print a JSON report and exit

use std::path::PathBuf;

use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use miette::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod daemon;
mod snapshot;

use daemon::{DaemonConfig, GatewayConfig};

/// Parse boolean from environment variable, accepting common truthy values.
fn parse_bool_env(s: &str) -> Result<bool, String> {
    match s.to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(format!(
            "invalid boolean value '{}', expected 1/true/yes/on or 0/false/no/off",
            s
        )),
    }
}

#[derive(Parser)]
#[command(name = "tendril")]
#[command(about = "Recurring garden tasks and their reminders", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Options shared by every command that delivers notifications.
#[derive(Args)]
struct CommonArgs {
    /// JSON snapshot of users, tasks and devices
    #[arg(long, env = "TENDRIL_SNAPSHOT")]
    snapshot: PathBuf,

    /// Push relay base URL (pushes are only logged when unset)
    #[arg(long, env = "TENDRIL_PUSH_URL")]
    push_url: Option<String>,

    /// Push relay API token
    #[arg(long, env = "TENDRIL_PUSH_TOKEN", hide_env_values = true)]
    push_token: Option<String>,

    /// Email API base URL (emails are only logged when unset)
    #[arg(long, env = "TENDRIL_EMAIL_URL")]
    email_url: Option<String>,

    /// Email API token
    #[arg(long, env = "TENDRIL_EMAIL_TOKEN", hide_env_values = true)]
    email_token: Option<String>,

    /// Sender address for notification emails
    #[arg(long, env = "TENDRIL_EMAIL_FROM", default_value = "reminders@tendril.garden")]
    email_from: String,

    /// Gateway HTTP timeout in seconds
    #[arg(long, env = "TENDRIL_GATEWAY_TIMEOUT")]
    gateway_timeout: Option<u64>,

    /// Number of concurrent notification workers
    #[arg(long, env = "TENDRIL_WORKERS")]
    workers: Option<usize>,

    /// Seconds allowed for delivering one scan's events
    #[arg(long, env = "TENDRIL_BATCH_TIMEOUT")]
    batch_timeout: Option<u64>,

    /// First retry delay in milliseconds
    #[arg(long, env = "TENDRIL_RETRY_BASE_MS")]
    retry_base_ms: Option<u64>,

    /// Dedup claim lifetime in seconds
    #[arg(long, env = "TENDRIL_DEDUP_TTL")]
    dedup_ttl: Option<u64>,
}

impl CommonArgs {
    fn into_config(self) -> DaemonConfig {
        let gateways = GatewayConfig {
            push_url: self.push_url,
            push_token: self.push_token,
            email_url: self.email_url,
            email_token: self.email_token,
            email_from: self.email_from,
            timeout: self.gateway_timeout,
        };
        let mut config = DaemonConfig::new(self.snapshot, gateways);
        config.worker_count = self.workers;
        config.batch_timeout = self.batch_timeout;
        config.retry_base_ms = self.retry_base_ms;
        config.dedup_ttl = self.dedup_ttl;
        config
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Run the daemon (daily scan, notification workers, dedup sweeper)
    Daemon {
        #[command(flatten)]
        common: CommonArgs,

        /// Hour of day (UTC) for the daily scan
        #[arg(long, env = "TENDRIL_SCAN_HOUR")]
        scan_hour: Option<u32>,

        /// Also scan once immediately on startup
        #[arg(long, env = "TENDRIL_SCAN_ON_START", value_parser = parse_bool_env, default_value = "false")]
        scan_on_start: bool,

        /// Work queue size
        #[arg(long, env = "TENDRIL_QUEUE_SIZE")]
        queue_size: Option<usize>,

        /// Seconds between dedup sweeps
        #[arg(long, env = "TENDRIL_SWEEP_INTERVAL")]
        sweep_interval: Option<u64>,
    },

    /// Scan a single day, deliver its notifications and print a report
    Scan {
        #[command(flatten)]
        common: CommonArgs,

        /// Day to scan (YYYY-MM-DD, default today in UTC)
        #[arg(long)]
        as_of: Option<NaiveDate>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "tendril=info".to_string()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Daemon {
            common,
            scan_hour,
            scan_on_start,
            queue_size,
            sweep_interval,
        } => {
            let mut config = common.into_config();
            config.scan_hour = scan_hour;
            config.scan_on_start = scan_on_start;
            config.queue_size = queue_size;
            config.sweep_interval = sweep_interval;
            daemon::run(config).await
        }

        Commands::Scan { common, as_of } => daemon::run_scan(common.into_config(), as_of).await,
    }
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;
    use test_case::test_case;

    use super::*;

    #[test_case("1" => Ok(true))]
    #[test_case("Yes" => Ok(true))]
    #[test_case("off" => Ok(false))]
    #[test_case("" => Ok(false))]
    fn test_parse_bool_env(s: &str) -> Result<bool, String> {
        parse_bool_env(s)
    }

    #[test]
    fn test_parse_bool_env_rejects_garbage() {
        assert!(parse_bool_env("maybe").is_err());
    }

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_scan_args_build_config() {
        let cli = Cli::try_parse_from([
            "tendril",
            "scan",
            "--snapshot",
            "garden.json",
            "--as-of",
            "2024-07-01",
            "--workers",
            "2",
            "--email-url",
            "https://mail.example.com",
        ])
        .unwrap();

        let Commands::Scan { common, as_of } = cli.command else {
            panic!("expected scan command");
        };
        assert_eq!(as_of, NaiveDate::from_ymd_opt(2024, 7, 1));

        let config = common.into_config();
        assert_eq!(config.snapshot, PathBuf::from("garden.json"));
        assert_eq!(config.worker_count, Some(2));
        assert_eq!(
            config.gateways.email_url.as_deref(),
            Some("https://mail.example.com")
        );
        assert!(config.gateways.push_url.is_none());
    }
}
