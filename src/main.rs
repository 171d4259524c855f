//! Larder - scheduled git snapshots of an application's data and program files.
//!
//! # Usage
//!
//! ```text
//! larder --config /etc/larder.toml serve
//! larder list data
//! larder show data 1a2b3c4
//! larder capture program
//! larder restore data 1a2b3c4
//! ```

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use larder::logging::{self, LogConfig};
use larder::{Backups, Settings, SnapshotScheduler, Stream, Tool, RESTORE_VERB};
use tracing::info;

#[derive(Debug, Parser)]
#[command(name = "larder", version, about = "Scheduled git snapshots with safe restores")]
struct Cli {
    /// Settings file (.toml or .json)
    #[arg(short, long, default_value = "larder.toml")]
    config: PathBuf,

    /// Override the configured log level
    #[arg(long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run scheduled captures until interrupted
    Serve,
    /// List snapshots, newest first
    List {
        #[arg(default_value = "data")]
        stream: Stream,
        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },
    /// Show one snapshot and the paths changed since
    Show { stream: Stream, id: String },
    /// Capture the stream now
    Capture { stream: Stream },
    /// Capture the current state, then check out snapshot `id`
    Restore { stream: Stream, id: String },
    /// Apply a restore verb to snapshot `id`
    Update {
        stream: Stream,
        id: String,
        #[arg(long, default_value = RESTORE_VERB)]
        command: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let settings = Settings::from_file(&cli.config)
        .with_context(|| format!("Failed to load {}", cli.config.display()))?;

    let level = match cli.log_level.as_deref() {
        Some(s) => match logging::LogLevel::parse(s) {
            Some(level) => level,
            None => bail!("Unknown log level {s:?}"),
        },
        None => settings.log.level,
    };
    logging::init(LogConfig {
        level,
        include_location: false,
    });

    let version = Tool::new(&settings.git.command, settings.git.timeout())
        .probe()
        .await
        .context("git is not available")?;
    info!(version = %version.trim(), "Found git");

    let backups = Backups::open(&settings).await?;

    match cli.command {
        Command::Serve => serve(&backups).await?,
        Command::List { stream, json } => list(&backups, stream, json).await?,
        Command::Show { stream, id } => show(&backups, stream, &id).await?,
        Command::Capture { stream } => {
            let capture = backups.get(stream).run().await?;
            match capture.commit {
                Some(commit) => println!("{commit}"),
                None => println!("No changes since last snapshot"),
            }
        }
        Command::Restore { stream, id } => {
            let output = backups.get(stream).apply(RESTORE_VERB, &id).await?;
            print!("{output}");
        }
        Command::Update {
            stream,
            id,
            command,
        } => {
            let output = backups.get(stream).apply(&command, &id).await?;
            print!("{output}");
        }
    }

    Ok(())
}

async fn serve(backups: &Backups) -> Result<()> {
    let mut scheduler = SnapshotScheduler::new().await?;
    let bound = backups.schedule(&scheduler).await?;
    if bound == 0 {
        info!("No stream has a schedule, waiting for interrupt anyway");
    }
    scheduler.start().await?;

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for interrupt")?;

    let stats = scheduler.stats();
    scheduler.shutdown().await?;
    info!(
        fired = stats.fired(),
        completed = stats.completed(),
        skipped = stats.skipped(),
        failed = stats.failed(),
        "Stopped"
    );
    Ok(())
}

async fn list(backups: &Backups, stream: Stream, json: bool) -> Result<()> {
    let job = backups.get(stream);
    let commits = job.list().await?;
    let head = job.head().await?;

    if json {
        let value = serde_json::json!({
            "stream": stream,
            "head": head,
            "commits": commits,
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    println!("{}", stream.title());
    for commit in &commits {
        let marker = if head.as_ref() == Some(commit) { "*" } else { " " };
        println!("{marker} {commit}");
    }
    Ok(())
}

async fn show(backups: &Backups, stream: Stream, id: &str) -> Result<()> {
    let job = backups.get(stream);
    let Some(commit) = job.get(id).await? else {
        println!("no such snapshot");
        return Ok(());
    };

    println!("{commit}");
    for path in job.diff(&commit.id).await? {
        println!("  {path}");
    }
    Ok(())
}
