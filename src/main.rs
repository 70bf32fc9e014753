use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use chrono::{DateTime, Utc};
use clap::{ArgGroup, Args, Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;
use tracing::info;
use uuid::Uuid;

use attendance_groups::config::Settings;
use attendance_groups::engine::{CancelSignal, Engine};
use attendance_groups::groups::GroupService;
use attendance_groups::models::{GroupPatch, NewGroup};
use attendance_groups::{db, logging, report};

#[derive(Parser)]
#[command(name = "attendance-groups")]
#[command(about = "Attendance-driven student groups with on-demand recompute", long_about = None)]
struct Cli {
    #[command(flatten)]
    settings: Settings,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load realistic seed data
    Seed,
    /// Import attendance records from a CSV file
    Import {
        #[arg(long)]
        csv: PathBuf,
    },
    /// Manage group definitions
    #[command(subcommand)]
    Groups(GroupCommand),
    /// Recompute the membership of every group
    Recompute {
        /// Evaluate windows as of this RFC 3339 instant instead of now
        #[arg(long)]
        now: Option<DateTime<Utc>>,
        /// Write a markdown report of the pass
        #[arg(long)]
        out: Option<PathBuf>,
        /// Print outcomes as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum GroupCommand {
    /// List groups with their last computed member count
    List,
    /// Define a new group
    Create {
        #[arg(long)]
        name: String,
        #[command(flatten)]
        window: WindowArgs,
        /// Comma-separated attendance states counted as incidents
        #[arg(long)]
        states: String,
        /// Incident threshold
        #[arg(long)]
        incidents: Option<i32>,
        /// Comparator, `<` or `>`
        #[arg(long)]
        ltmt: Option<String>,
    },
    /// Change some fields of a group, keeping the rest
    Update {
        id: Uuid,
        #[arg(long)]
        name: Option<String>,
        #[command(flatten)]
        window: WindowArgs,
        #[arg(long)]
        states: Option<String>,
        #[arg(long)]
        incidents: Option<i32>,
        #[arg(long)]
        ltmt: Option<String>,
    },
    /// Delete a group and its membership
    Delete { id: Uuid },
    /// Show the current members of a group
    Members {
        id: Uuid,
        #[arg(long)]
        json: bool,
    },
}

#[derive(Args)]
#[command(group(
    ArgGroup::new("window")
        .args(["weeks", "days"])
        .multiple(false)
))]
struct WindowArgs {
    #[arg(long)]
    weeks: Option<i32>,
    #[arg(long)]
    days: Option<i32>,
}

impl WindowArgs {
    fn window_days(&self) -> anyhow::Result<Option<i32>> {
        match (self.days, self.weeks) {
            (Some(days), _) => Ok(Some(days)),
            (None, Some(weeks)) => weeks
                .checked_mul(7)
                .map(Some)
                .with_context(|| format!("--weeks {weeks} is too large a window")),
            (None, None) => Ok(None),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init_tracing(cli.settings.log_json);

    let vocabulary = cli
        .settings
        .vocabulary()
        .context("ATTENDANCE_STATES must name at least one state")?;

    let pool = PgPoolOptions::new()
        .max_connections(cli.settings.max_connections)
        .connect(&cli.settings.database_url)
        .await
        .context("failed to connect to Postgres")?;

    match cli.command {
        Commands::InitDb => {
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            db::seed(&pool, Utc::now()).await?;
            println!("Seed data inserted.");
        }
        Commands::Import { csv } => {
            let summary = db::import_csv(&pool, &csv, &vocabulary).await?;
            println!(
                "Inserted {} attendance records from {} ({} rejected).",
                summary.inserted,
                csv.display(),
                summary.rejected
            );
        }
        Commands::Groups(command) => {
            let service = GroupService::new(Arc::new(db::PgStore::new(pool)), vocabulary);
            run_group_command(&service, command).await?;
        }
        Commands::Recompute { now, out, json } => {
            let engine = Engine::postgres(pool, vocabulary, cli.settings.worker_limit());
            let (handle, signal) = CancelSignal::pair();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("cancellation requested, finishing groups already in flight");
                    handle.cancel();
                }
            });

            let report = engine
                .recompute_all_with_cancel(now.unwrap_or_else(Utc::now), signal)
                .await?;

            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else if report.outcomes.is_empty() {
                println!("No groups are defined.");
            } else {
                for outcome in &report.outcomes {
                    println!(
                        "- {} {} {} members{}",
                        outcome.group_id,
                        outcome.status,
                        outcome.member_count,
                        outcome
                            .reason
                            .as_deref()
                            .map(|reason| format!(" ({reason})"))
                            .unwrap_or_default()
                    );
                }
            }

            if let Some(out) = out {
                std::fs::write(&out, report::build_report(&report))?;
                println!("Report written to {}.", out.display());
            }
        }
    }

    Ok(())
}

async fn run_group_command(service: &GroupService, command: GroupCommand) -> anyhow::Result<()> {
    match command {
        GroupCommand::List => {
            let groups = service.list().await?;
            if groups.is_empty() {
                println!("No groups are defined.");
                return Ok(());
            }
            for group in groups {
                let last_run = group
                    .run_at
                    .map(|at| at.to_rfc3339())
                    .unwrap_or_else(|| "never".to_string());
                println!(
                    "- {} {} ({} days, states {}, {} {}) {} students, last run {}",
                    group.id,
                    group.name,
                    group.window_days,
                    group.roll_states,
                    group.ltmt.as_deref().unwrap_or("?"),
                    group
                        .incidents
                        .map(|incidents| incidents.to_string())
                        .unwrap_or_else(|| "?".to_string()),
                    group.student_count,
                    last_run
                );
            }
        }
        GroupCommand::Create {
            name,
            window,
            states,
            incidents,
            ltmt,
        } => {
            let window_days = window
                .window_days()?
                .context("either --weeks or --days is required")?;
            let group = service
                .create(NewGroup {
                    name,
                    window_days,
                    roll_states: states,
                    incidents,
                    ltmt,
                })
                .await?;
            println!("Created group {} ({}).", group.name, group.id);
        }
        GroupCommand::Update {
            id,
            name,
            window,
            states,
            incidents,
            ltmt,
        } => {
            let group = service
                .update(
                    id,
                    GroupPatch {
                        name,
                        window_days: window.window_days()?,
                        roll_states: states,
                        incidents,
                        ltmt,
                    },
                )
                .await?;
            println!("Updated group {} ({}).", group.name, group.id);
        }
        GroupCommand::Delete { id } => {
            service.delete(id).await?;
            println!("Deleted group {id}.");
        }
        GroupCommand::Members { id, json } => {
            let members = service.members(id).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&members)?);
            } else if members.is_empty() {
                println!("No students in this group.");
            } else {
                for member in members {
                    println!("- {} ({})", member.full_name, member.student_id);
                }
            }
        }
    }
    Ok(())
}
