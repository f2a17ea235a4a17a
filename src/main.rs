//! Earnings Radar - flags wallets with anomalous earnings-market behavior
//!
//! # NOTE
//! - Scores rank wallets against the rest of the input population only.
//! - A high score is a lead for manual review, not evidence of anything.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::error;
use tracing_subscriber::EnvFilter;

// Use the library crate
use earnings_radar::cli::commands::{self, Overrides};
use earnings_radar::config::Config;
use earnings_radar::rank::TopN;

/// Earnings Radar - anomalous wallet screening for prediction markets
#[derive(Parser)]
#[command(name = "radar")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, default_value = "radar.toml", env = "RADAR_CONFIG")]
    config: PathBuf,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full pipeline and write the ranked wallet table
    Run {
        /// Trade table (CSV)
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Ranked output (CSV)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Number of rows to export, or "all"
        #[arg(long, value_name = "N|all")]
        top_n: Option<TopN>,

        /// Isolation forest seed
        #[arg(long)]
        seed: Option<u64>,
    },

    /// Build wallet features only
    Features {
        /// Trade table (CSV)
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Feature output (CSV)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Classify `|`-separated market titles
    Classify {
        /// Titles, e.g. "Will Oklo (OKLO) beat quarterly earnings? | Bitcoin above $100k?"
        titles: String,
    },

    /// Show the effective configuration
    Config,
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("earnings_radar=info"));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    // Parse CLI arguments
    let cli = Cli::parse();

    init_tracing(cli.json);

    // Load configuration
    let config = match Config::load(&cli.config) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!("Failed to load configuration: {:#}", e);
            std::process::exit(1);
        }
    };

    // Execute command
    let result = match cli.command {
        Commands::Run {
            input,
            output,
            top_n,
            seed,
        } => commands::run(
            &config,
            &Overrides {
                input,
                output,
                top_n,
                seed,
            },
        ),
        Commands::Features { input, output } => commands::features(
            &config,
            &Overrides {
                input,
                output,
                ..Default::default()
            },
        ),
        Commands::Classify { titles } => commands::classify(&config, &titles),
        Commands::Config => commands::show_config(&config),
    };

    if let Err(e) = result {
        error!("Command failed: {:#}", e);
        std::process::exit(1);
    }

    Ok(())
}
