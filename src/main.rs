use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

use playlog::backfill::run_backfill;
use playlog::config::Config;
use playlog::history_db::HistoryDb;
use playlog::poll::Poller;
use playlog::service::SpotifyClient;

#[derive(Parser)]
#[command(name = "playlog")]
#[command(about = "Log Spotify recently-played history into SQLite")]
struct Args {
    /// Config file (defaults to the user config dir)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Poll the recently-played feed forever
    Poll {
        /// Seconds between polls (overrides config)
        #[arg(long)]
        interval: Option<u64>,
    },
    /// Fill in missing album and artist artwork once, then exit
    Backfill,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("playlog=info")),
        )
        .init();

    let args = Args::parse();

    let mut config = Config::load(args.config.as_deref())?;
    if let Command::Poll {
        interval: Some(secs),
    } = args.command
    {
        config.poll.interval_seconds = secs;
    }
    config.validate()?;

    let db_path = config.database_path()?;
    let db = HistoryDb::open(&db_path)?;
    let feed = SpotifyClient::new(&config.spotify)?;
    log_store_summary(&db_path, &db)?;

    match args.command {
        Command::Poll { .. } => poll(&config, feed, db).await,
        Command::Backfill => backfill(feed, db).await,
    }
}

async fn poll(config: &Config, feed: SpotifyClient, db: HistoryDb) -> Result<()> {
    tracing::info!("Starting recently-played logger (Ctrl+C to stop)");
    let mut poller = Poller::new(feed, db, config.poll.interval());

    tokio::select! {
        _ = poller.run() => {}
        result = tokio::signal::ctrl_c() => {
            result.context("Failed to listen for Ctrl+C")?;
        }
    }

    drop(poller.into_db());
    tracing::info!("History database closed");
    Ok(())
}

fn log_store_summary(path: &Path, db: &HistoryDb) -> Result<()> {
    let plays = db.count_plays()?;
    match db.get_recent(1)?.first() {
        Some(last) => tracing::info!(
            db = %path.display(),
            plays,
            last_played_at = %last.played_at_utc,
            last_track = %last.track_name,
            last_artist = %last.artist_name,
            "History database ready"
        ),
        None => tracing::info!(db = %path.display(), plays, "History database ready"),
    }
    Ok(())
}

async fn backfill(mut feed: SpotifyClient, mut db: HistoryDb) -> Result<()> {
    // run_backfill logs its own structured summary
    run_backfill(&mut feed, &mut db).await?;
    Ok(())
}
