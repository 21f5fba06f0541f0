use clap::{Parser, Subcommand};
use podlog::config::resolve_config_path;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "podlog")]
#[command(about = "Collects pod logs from a cluster and serves them in one total order", long_about = None)]
struct Cli {
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Collect logs from the configured cluster and serve them
    Run,
    /// Load a saved pod log file and serve it
    Import {
        #[arg(long)]
        file: PathBuf,
        /// Worker name for the imported lines, the file name by default
        #[arg(long)]
        pod: Option<String>,
    },
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    Init {
        #[arg(long)]
        stdout: bool,
    },
    Validate,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing subscriber
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "podlog=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    let config_path = resolve_config_path(cli.config.as_deref());

    match cli.command {
        Some(Commands::Run) | None => {
            // Default behavior is to run
            podlog::cli::run::run(config_path).await?;
        }
        Some(Commands::Import { file, pod }) => {
            podlog::cli::import::import(config_path, file, pod).await?;
        }
        Some(Commands::Config { action }) => match action {
            ConfigAction::Init { stdout } => {
                podlog::cli::config::init(stdout)?;
            }
            ConfigAction::Validate => {
                podlog::cli::config::validate(config_path)?;
            }
        },
    }

    Ok(())
}
