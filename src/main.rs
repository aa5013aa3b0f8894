//! # Teamline Approval Daemon
//!
//! Runs the approval sweeps against a Teamline database: auto-approves
//! tasks whose review deadline passed (checklist permitting) and
//! escalates overdue pending approvals.
//!
//! Usage:
//!   teamline-approvald                          # Run both sweep loops
//!   teamline-approvald --once                   # One pass of each sweep, then exit
//!   teamline-approvald --db-path ./approval.db  # Custom database

use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing_subscriber::EnvFilter;

use teamline_approval::engine::ApprovalEngine;
use teamline_approval::store::{ApprovalDb, SharedCollaborators, SqliteCollaborators};
use teamline_core::config::TeamlineConfig;
use teamline_scheduler::{Sweeper, spawn_sweep_loops};

#[derive(Parser)]
#[command(
    name = "teamline-approvald",
    version,
    about = "📋 Teamline — approval sweep daemon"
)]
struct Cli {
    /// Config file (default: ~/.teamline/config.toml)
    #[arg(short, long)]
    config: Option<String>,

    /// Database path (overrides config)
    #[arg(long)]
    db_path: Option<String>,

    /// Seconds between auto-approval sweeps (overrides config)
    #[arg(long)]
    auto_interval: Option<u64>,

    /// Seconds between escalation sweeps (overrides config)
    #[arg(long)]
    escalation_interval: Option<u64>,

    /// Run each sweep once and exit
    #[arg(long)]
    once: bool,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn expand_path(p: &str) -> String {
    shellexpand::tilde(p).to_string()
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "teamline=debug,teamline_approval=debug,teamline_scheduler=debug"
    } else {
        "teamline=info,teamline_approval=info,teamline_scheduler=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();

    let mut config = match &cli.config {
        Some(path) => TeamlineConfig::load_from(std::path::Path::new(&expand_path(path)))?,
        None => TeamlineConfig::load()?,
    };
    if let Some(db_path) = &cli.db_path {
        config.db_path = db_path.clone();
    }
    if let Some(secs) = cli.auto_interval {
        config.approval.auto_approve_check_secs = secs;
    }
    if let Some(secs) = cli.escalation_interval {
        config.approval.escalation_check_secs = secs;
    }

    let db_path = expand_path(&config.db_path);
    if let Some(parent) = std::path::Path::new(&db_path).parent() {
        std::fs::create_dir_all(parent)?;
    }

    let db = ApprovalDb::open(std::path::Path::new(&db_path))?;
    let collaborators =
        SharedCollaborators::new(SqliteCollaborators::open(std::path::Path::new(&db_path))?);
    let engine = ApprovalEngine::new(
        db,
        Box::new(collaborators.clone()),
        Box::new(collaborators.clone()),
        Box::new(collaborators),
    );
    let sweeper = Sweeper::new(Arc::new(Mutex::new(engine)));

    tracing::info!("📋 Teamline approval daemon starting (db: {db_path})");

    if cli.once {
        let auto = sweeper.run_auto_approval_sweep().await?;
        let esc = sweeper.run_escalation_sweep().await?;
        println!(
            "auto-approval: {} examined, {} approved, {} skipped, {} failed",
            auto.examined, auto.approved, auto.skipped, auto.failed
        );
        println!(
            "escalation:    {} examined, {} escalated, {} skipped, {} failed",
            esc.examined, esc.escalated, esc.skipped, esc.failed
        );
        return Ok(());
    }

    spawn_sweep_loops(sweeper, &config.approval);
    tokio::signal::ctrl_c().await?;
    tracing::info!("👋 Teamline approval daemon shutting down");
    Ok(())
}
