//! Mirador admin CLI.
//!
//! DB-side operations only: inspect sync state, flip the persisted schedule,
//! and clean up bookkeeping after a crash. The scheduler task itself runs in
//! the embedding process, which picks up schedule changes on restart.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use mirador_cache::freshness;
use mirador_db::MiradorDb;
use mirador_logging::{default_db_path, init_logging, LogConfig};
use mirador_sync::{cleanup_stuck_runs, EventBus};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "mirador", about = "Admin CLI for the Mirador sync mirror")]
struct Cli {
    /// Enable verbose logging on stderr
    #[arg(short = 'v', long, global = true)]
    verbose: bool,

    /// Path to the mirror database
    #[arg(long, global = true, env = "MIRADOR_DB")]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Initialize the mirror database for an organization
    Init {
        /// Upstream organization identifier
        #[arg(long)]
        org: String,
    },

    /// Show sync configuration, freshness marker, and the latest run
    Status,

    /// List recent sync runs
    Runs {
        /// Maximum number of runs to show
        #[arg(long, default_value_t = 20)]
        limit: i64,
    },

    /// Enable or disable the persisted automatic sync schedule
    Schedule {
        #[command(subcommand)]
        command: ScheduleCommands,
    },

    /// Mark runs left `running` by a crashed process as failed
    CleanupStuckRuns,

    /// Show cache entries and whether each is fresh
    CacheStatus,
}

#[derive(Subcommand, Debug)]
enum ScheduleCommands {
    /// Enable automatic sync at the given cadence
    Enable {
        /// Minutes between automatic runs
        #[arg(long, default_value_t = 60)]
        interval_minutes: i64,
    },
    /// Disable automatic sync
    Disable,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(LogConfig {
        app_name: "mirador",
        verbose: cli.verbose,
    })?;

    let db_path = cli.db.unwrap_or_else(default_db_path);
    let db = MiradorDb::open(&db_path)
        .await
        .with_context(|| format!("Failed to open database at {}", db_path.display()))?;

    match cli.command {
        Commands::Init { org } => init(&db, &org).await,
        Commands::Status => status(&db).await,
        Commands::Runs { limit } => runs(&db, limit).await,
        Commands::Schedule { command } => schedule(&db, command).await,
        Commands::CleanupStuckRuns => cleanup(&db).await,
        Commands::CacheStatus => cache_status(&db).await,
    }
}

async fn init(db: &MiradorDb, org: &str) -> Result<()> {
    if org.trim().is_empty() {
        anyhow::bail!("organization identifier must not be empty");
    }
    db.ensure_config(org).await?;
    let config = db.get_config().await?;
    println!("Initialized mirror for org '{}'", config.org_id);
    Ok(())
}

async fn status(db: &MiradorDb) -> Result<()> {
    let config = db
        .get_config()
        .await
        .context("Mirror not initialized (run `mirador init --org <id>` first)")?;

    println!("Org:               {}", config.org_id);
    println!(
        "Auto-sync:         {}",
        if config.auto_sync_enabled {
            format!("enabled (every {} min)", config.interval_minutes)
        } else {
            "disabled".to_string()
        }
    );
    println!("Last started:      {}", fmt_opt(config.last_sync_started_at));
    println!("Last completed:    {}", fmt_opt(config.last_sync_completed_at));
    println!(
        "Data fresh as of:  {}",
        fmt_opt(config.last_successful_sync_at)
    );

    let recent = db.list_runs(1).await?;
    match recent.first() {
        Some(run) => {
            println!(
                "Latest run:        #{} {} {} ({})",
                run.id, run.run_type, run.strategy, run.status
            );
            if let Some(error) = &run.error_message {
                println!("                   error: {error}");
            }
        }
        None => println!("Latest run:        none"),
    }
    Ok(())
}

async fn runs(db: &MiradorDb, limit: i64) -> Result<()> {
    let runs = db.list_runs(limit.max(1)).await?;
    if runs.is_empty() {
        println!("No sync runs recorded");
        return Ok(());
    }
    println!(
        "{:>6}  {:<10}  {:<12}  {:<8}  {:<25}  {}",
        "ID", "TYPE", "STRATEGY", "STATUS", "STARTED", "ERROR"
    );
    for run in runs {
        println!(
            "{:>6}  {:<10}  {:<12}  {:<8}  {:<25}  {}",
            run.id,
            run.run_type.to_string(),
            run.strategy.to_string(),
            run.status.to_string(),
            run.started_at.to_rfc3339(),
            run.error_message.as_deref().unwrap_or("-")
        );
    }
    Ok(())
}

async fn schedule(db: &MiradorDb, command: ScheduleCommands) -> Result<()> {
    match command {
        ScheduleCommands::Enable { interval_minutes } => {
            if interval_minutes < 1 {
                anyhow::bail!("interval must be at least 1 minute, got {interval_minutes}");
            }
            db.set_schedule(true, interval_minutes).await?;
            println!("Auto-sync enabled, every {interval_minutes} min");
        }
        ScheduleCommands::Disable => {
            let interval = db.get_config().await?.interval_minutes;
            db.set_schedule(false, interval).await?;
            println!("Auto-sync disabled");
        }
    }
    Ok(())
}

async fn cleanup(db: &MiradorDb) -> Result<()> {
    let report = cleanup_stuck_runs(db, &EventBus::default()).await?;
    if report.runs_failed.is_empty() && report.steps_failed == 0 {
        println!("No stuck runs found");
    } else {
        println!(
            "Marked {} run(s) and {} step(s) as failed: {:?}",
            report.runs_failed.len(),
            report.steps_failed,
            report.runs_failed
        );
    }
    Ok(())
}

async fn cache_status(db: &MiradorDb) -> Result<()> {
    let marker = db
        .get_config()
        .await
        .ok()
        .and_then(|c| c.last_successful_sync_at);
    let states = db.list_cache_states().await?;
    if states.is_empty() {
        println!("No cache entries");
        return Ok(());
    }
    println!("{:<30}  {:>8}  {:<25}  {}", "KEY", "ITEMS", "GENERATED", "FRESH");
    for state in states {
        let fresh = freshness::is_fresh(Some(state.generated_at.as_str()), marker);
        println!(
            "{:<30}  {:>8}  {:<25}  {}",
            state.cache_key,
            state.item_count,
            state.generated_at,
            if fresh { "yes" } else { "STALE" }
        );
    }
    Ok(())
}

fn fmt_opt(ts: Option<chrono::DateTime<chrono::Utc>>) -> String {
    ts.map(|t| t.to_rfc3339()).unwrap_or_else(|| "never".to_string())
}
