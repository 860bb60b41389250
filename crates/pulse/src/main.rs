//! Pulse: live view of a job-queue dashboard backend.
//!
//! Main binary with subcommands:
//! - `watch`: keep one or more views fresh and print every change
//! - `get`: fetch one view once
//! - `job`, `queue`, `scheduled`: writes, followed by invalidation and refetch
//! - `settings`: show or change the persisted refresh settings

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use miette::{IntoDiagnostic, Result};
use pulse_api::{ApiClient, ApiConfig};
use pulse_query::{
    AggregationConfig, FanOutWindow, PartitionFailurePolicy, QueryClient, QueryConfig,
};
use pulse_scheduler::{FileSettingsStore, SettingsStore};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::commands::{JobCommand, QueueCommand, ScheduledCommand, SettingsCommand};
use crate::views::ViewArgs;

/// Parse boolean from environment variable, accepting common truthy values.
/// Accepts "1", "true", "yes", "on" (case-insensitive) as true.
/// Accepts "0", "false", "no", "off", "" (case-insensitive) as false.
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

mod commands;
mod output;
mod views;
mod watch;

#[derive(Parser)]
#[command(name = "pulse")]
#[command(about = "Live view of a job-queue dashboard backend", long_about = None)]
struct Cli {
    /// Backend API base URL
    #[arg(
        long,
        env = "PULSE_API_URL",
        default_value = "http://localhost:8000/api",
        global = true
    )]
    api_url: String,

    /// Refresh settings file (defaults to the user config directory)
    #[arg(long, env = "PULSE_SETTINGS_PATH", global = true)]
    settings_path: Option<PathBuf>,

    /// Per-request timeout in seconds
    #[arg(long, env = "PULSE_REQUEST_TIMEOUT", default_value = "30", global = true)]
    request_timeout: u64,

    /// What a multi-queue job listing does when some queues fail
    #[arg(
        long,
        env = "PULSE_PARTITION_FAILURE",
        value_enum,
        default_value_t = FailurePolicyArg::FailFast,
        global = true
    )]
    partition_failure: FailurePolicyArg,

    /// How many jobs to request from each queue of a multi-queue listing
    #[arg(
        long,
        env = "PULSE_FAN_OUT_WINDOW",
        value_enum,
        default_value_t = WindowArg::Proportional,
        global = true
    )]
    fan_out_window: WindowArg,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum FailurePolicyArg {
    FailFast,
    BestEffort,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum WindowArg {
    Proportional,
    Exact,
}

#[derive(Subcommand)]
enum Commands {
    /// Keep a view fresh and print it on every change (Ctrl-C to stop)
    Watch {
        #[command(subcommand)]
        view: ViewArgs,
    },

    /// Fetch a view once
    Get {
        #[command(subcommand)]
        view: ViewArgs,
    },

    /// Job writes
    Job {
        #[command(subcommand)]
        command: JobCommand,
    },

    /// Queue writes
    Queue {
        #[command(subcommand)]
        command: QueueCommand,
    },

    /// Scheduled job writes
    Scheduled {
        #[command(subcommand)]
        command: ScheduledCommand,
    },

    /// Refresh settings
    Settings {
        #[command(subcommand)]
        command: SettingsCommand,
    },
}

impl Cli {
    fn query_config(&self) -> QueryConfig {
        QueryConfig {
            request_timeout: Duration::from_secs(self.request_timeout),
            aggregation: AggregationConfig {
                policy: match self.partition_failure {
                    FailurePolicyArg::FailFast => PartitionFailurePolicy::FailFast,
                    FailurePolicyArg::BestEffort => PartitionFailurePolicy::BestEffort,
                },
                window: match self.fan_out_window {
                    WindowArg::Proportional => FanOutWindow::Proportional,
                    WindowArg::Exact => FanOutWindow::Exact,
                },
            },
            ..QueryConfig::default()
        }
    }

    fn client(&self) -> Result<Arc<QueryClient>> {
        let api = ApiClient::new(ApiConfig::new(&self.api_url))
            .map_err(|e| miette::miette!("failed to create API client: {}", e))?;
        Ok(QueryClient::new(Arc::new(api), self.query_config()))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "pulse=info".to_string()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    match &cli.command {
        Commands::Watch { view } => {
            let key = view.key().into_diagnostic()?;
            let settings: Arc<dyn SettingsStore> = Arc::new(
                FileSettingsStore::load(cli.settings_path.clone())
                    .await
                    .into_diagnostic()?,
            );
            watch::run(cli.client()?, settings, vec![key]).await
        }

        Commands::Get { view } => {
            let key = view.key().into_diagnostic()?;
            let view = cli.client()?.fetch(&key).await;
            output::print(&key, &view);
            match view.error {
                Some(error) => Err(miette::miette!("{}", error)),
                None => Ok(()),
            }
        }

        Commands::Job { command } => commands::mutate(&cli.client()?, command.mutation()?).await,

        Commands::Queue { command } => commands::mutate(&cli.client()?, command.mutation()).await,

        Commands::Scheduled { command } => {
            commands::mutate(&cli.client()?, command.mutation()).await
        }

        Commands::Settings { command } => {
            commands::settings(cli.settings_path.clone(), command.clone()).await
        }
    }
}
