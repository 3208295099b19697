use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use tracklog::upload::CoordinatesQuery;

#[derive(Parser)]
#[command(name = "tracklog")]
#[command(about = "Duty-cycled position tracker with bucketed uploads", long_about = None)]
struct Cli {
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the tracker until Ctrl+C
    Run,
    /// Upload every buffered bucket once and exit
    Upload,
    /// Check that the sink is reachable
    Ping,
    /// Show recent coordinates held by the sink
    History {
        #[arg(long, default_value_t = 24)]
        lookback_hours: u32,
        #[arg(long)]
        min_accuracy: Option<f64>,
        #[arg(long)]
        max_distance: Option<f64>,
    },
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Write a starter config
    Init {
        #[arg(long)]
        stdout: bool,
    },
    /// Load and validate the config
    Validate,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tracklog=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config_path = tracklog::config::resolve_config_path(cli.config.as_deref());

    match cli.command {
        Some(Commands::Run) | None => {
            // Default behavior is to run
            tracklog::cli::run::run(config_path).await?;
        }
        Some(Commands::Upload) => tracklog::cli::remote::upload(config_path).await?,
        Some(Commands::Ping) => tracklog::cli::remote::ping(config_path).await?,
        Some(Commands::History {
            lookback_hours,
            min_accuracy,
            max_distance,
        }) => {
            let query = CoordinatesQuery {
                lookback_hours,
                min_accuracy,
                max_distance,
            };
            tracklog::cli::remote::history(config_path, query).await?;
        }
        Some(Commands::Config { action }) => match action {
            ConfigAction::Init { stdout } => tracklog::cli::config::init(stdout)?,
            ConfigAction::Validate => tracklog::cli::config::validate(config_path)?,
        },
    }

    Ok(())
}
