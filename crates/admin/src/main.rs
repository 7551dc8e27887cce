//! GenMedia Arena admin CLI
//!
//! Operational tasks run outside the gateway: creating collections,
//! registering studies, bulk uploading pre-generated images and loading
//! their metadata.

use anyhow::Result;
use clap::{Parser, Subcommand};
use genmedia_arena_common::config::AppConfig;
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(name = "arena-admin", about = "GenMedia Arena administration")]
#[command(version, propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the image, rating and study collections
    InitDb,
    /// Register a study
    AddStudy(commands::study::AddStudyArgs),
    /// Upload a directory tree to object storage
    Upload(commands::upload::UploadArgs),
    /// Record image metadata from a prompt/image JSON file
    LoadMetadata(commands::metadata::LoadMetadataArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if cli.verbose { "debug" } else { "info" }));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = AppConfig::load()?;

    match cli.command {
        Commands::InitDb => commands::study::init_db(&config).await,
        Commands::AddStudy(args) => commands::study::add_study(&config, args).await,
        Commands::Upload(args) => commands::upload::run(&config, args).await,
        Commands::LoadMetadata(args) => commands::metadata::run(&config, args).await,
    }
}
