use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use greenlight::config::{self, StoreConfig};
use greenlight::model::Brief;
use greenlight::server::{ServerConfig, start_server};

#[derive(Parser)]
#[command(name = "greenlight")]
#[command(version, about = "Run orchestrator for a human-gated content pipeline")]
struct Cli {
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server
    Serve {
        /// Port to serve on
        #[arg(short, long, default_value = "4117")]
        port: u16,

        /// SQLite database path
        #[arg(long)]
        db_path: Option<PathBuf>,

        /// Remote document store URL (takes precedence over --db-path)
        #[arg(long)]
        store_url: Option<String>,

        /// Directory agent artifacts are written to
        #[arg(long)]
        artifact_dir: Option<PathBuf>,

        /// Enable dev mode (permissive CORS, binds 0.0.0.0)
        #[arg(long)]
        dev: bool,
    },
    /// Validate a brief file without creating a run
    Validate {
        /// Path to the brief JSON file
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false))
        .with(filter)
        .init();

    match cli.command {
        Commands::Serve {
            port,
            db_path,
            store_url,
            artifact_dir,
            dev,
        } => {
            let config = ServerConfig {
                port,
                store: StoreConfig::resolve(store_url, db_path),
                artifact_dir: config::artifact_dir(artifact_dir),
                dev_mode: dev,
            };
            start_server(config).await?;
        }
        Commands::Validate { file } => cmd_validate(&file)?,
    }

    Ok(())
}

fn cmd_validate(file: &Path) -> Result<()> {
    let raw = std::fs::read_to_string(file)
        .with_context(|| format!("failed to read {}", file.display()))?;
    let brief: Brief = serde_json::from_str(&raw)
        .with_context(|| format!("{} does not parse as a brief", file.display()))?;

    match brief.validate() {
        Ok(()) => {
            println!("ok: {} / {}", brief.industry, brief.theme);
            Ok(())
        }
        Err(reason) => anyhow::bail!("invalid brief: {}", reason),
    }
}
