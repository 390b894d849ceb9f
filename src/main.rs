mod api;
mod cli;
mod config;
mod db;
mod errors;
mod models;
mod services;
mod utils;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use config::Settings;

#[derive(Parser)]
#[command(name = "vctsync")]
#[command(about = "Scrapes VCT match results and keeps fantasy points and prices up to date")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the API server
    Serve {
        #[arg(short, long, default_value = "3000")]
        port: u16,
    },
    /// Sync one event listing, or every built-in event with --all
    Sync {
        /// Event listing path, e.g. /event/matches/2682/vct-2026-americas-kickoff
        #[arg(short, long, required_unless_present = "all")]
        event: Option<String>,
        #[arg(short, long)]
        name: Option<String>,
        #[arg(short, long, default_value = "Americas")]
        region: String,
        #[arg(long, conflicts_with = "event")]
        all: bool,
    },
    /// Re-fetch specific matches by id, even when already processed
    Resync {
        ids: Vec<String>,
        #[arg(short, long, default_value = "Resync")]
        name: String,
        #[arg(short, long)]
        region: String,
    },
    /// Rescore every stat line and recompute all points and prices
    Recalibrate,
    /// Re-derive player roles from the agents they played
    Roles,
    /// Show the most valuable players
    Leaderboard {
        #[arg(short, long, default_value = "20")]
        limit: usize,
        /// Also export to this CSV file
        #[arg(long)]
        csv: Option<PathBuf>,
    },
    /// Create demo league members and draft the player pool into their rosters
    SeedLeague {
        #[arg(short, long, default_value = "4")]
        members: usize,
        #[arg(short, long, default_value = "5")]
        roster_size: usize,
    },
    /// Initialize the database
    InitDb,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let settings = Settings::from_env();

    let cancel = CancellationToken::new();
    let on_ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Ctrl-C received, finishing the current match and stopping");
            on_ctrl_c.cancel();
        }
    });

    let command = cli.command.unwrap_or(Commands::Serve { port: 3000 });
    if let Commands::InitDb = command {
        tracing::info!("Initializing database...");
        return db::init_database(&settings.database_url).await;
    }

    let (pool, service) = cli::build_service(&settings, cancel.clone()).await?;

    match command {
        Commands::Serve { port } => {
            tracing::info!("Starting vctsync API server on port {}", port);
            api::serve(port, api::AppState { pool, sync: service }, cancel).await?;
        }
        Commands::Sync { event, name, region, all } => {
            let event = match event {
                Some(path) if !all => Some(cli::event_from_args(path, name, &region)?),
                _ => None,
            };
            cli::sync(&service, event).await?;
        }
        Commands::Resync { ids, name, region } => {
            let event = cli::event_from_args(String::new(), Some(name), &region)?;
            cli::resync(&service, &ids, event).await?;
        }
        Commands::Recalibrate => cli::recalibrate(&service).await?,
        Commands::Roles => cli::reassign_roles(&service).await?,
        Commands::Leaderboard { limit, csv } => cli::leaderboard(&pool, limit, csv.as_deref()).await?,
        Commands::SeedLeague { members, roster_size } => {
            cli::seed_league(&pool, members, roster_size).await?
        }
        Commands::InitDb => {}
    }

    Ok(())
}
