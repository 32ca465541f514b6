use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::{Months, NaiveDate};
use clap::{ArgGroup, Parser, Subcommand};
use serde::Serialize;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use classroom_attention_monitor::alerts::{HistoryQuery, RoleAlertQuery};
use classroom_attention_monitor::db;
use classroom_attention_monitor::ingest::{read_events_csv, read_events_json};
use classroom_attention_monitor::models::{
    AlertKind, NotifyRole, PeriodKind, Severity, TargetRole,
};
use classroom_attention_monitor::report::{render_markdown, ReportRequest};
use classroom_attention_monitor::store::ReportFilter;
use classroom_attention_monitor::threshold::TeacherAlertRequest;
use classroom_attention_monitor::{Monitor, MonitorConfig, PgStore};

#[derive(Parser)]
#[command(name = "attention-monitor")]
#[command(about = "Classroom attention monitoring and alerting", long_about = None)]
struct Cli {
    /// TOML file overriding windows, limits and thresholds
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load a demo roster with a week of sessions
    Seed,
    /// Ingest perception events and evaluate thresholds
    #[command(group(
        ArgGroup::new("source")
            .args(["json", "csv"])
            .required(true)
            .multiple(false)
    ))]
    Ingest {
        #[arg(long)]
        json: Option<PathBuf>,
        #[arg(long)]
        csv: Option<PathBuf>,
    },
    /// Active alerts visible to a role
    Alerts {
        #[arg(long)]
        role: NotifyRole,
        #[arg(long)]
        batch: Option<String>,
        #[arg(long)]
        room: Option<String>,
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Alerts of any status inside the history window
    History {
        #[arg(long)]
        room: Option<String>,
        #[arg(long)]
        batch: Option<String>,
        #[arg(long)]
        kind: Option<AlertKind>,
        #[arg(long)]
        offset: Option<usize>,
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Dismiss an active alert
    Dismiss {
        #[arg(long)]
        id: Uuid,
        #[arg(long)]
        by: String,
    },
    /// Resolve an active alert
    Resolve {
        #[arg(long)]
        id: Uuid,
    },
    /// Raise an alert about the teacher or the class as a whole
    TeacherAlert {
        #[arg(long)]
        room: String,
        #[arg(long)]
        kind: AlertKind,
        #[arg(long, default_value = "warning")]
        severity: Severity,
        #[arg(long)]
        message: String,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        session: Option<String>,
        #[arg(long)]
        teacher_email: Option<String>,
        #[arg(long)]
        teacher_name: Option<String>,
        #[arg(long)]
        notify_teacher: bool,
    },
    /// Live engagement summary for a room
    Live {
        #[arg(long)]
        room: String,
    },
    /// Generate (or regenerate) a student or teacher report
    Report {
        #[arg(long)]
        role: TargetRole,
        #[arg(long)]
        email: String,
        #[arg(long, default_value = "daily")]
        period: PeriodKind,
        #[arg(long)]
        start: NaiveDate,
        /// Defaults to the end of the period that starts on `--start`
        #[arg(long)]
        end: Option<NaiveDate>,
        #[arg(long)]
        batch: Option<String>,
        #[arg(long, default_value = "cli")]
        generated_by: String,
    },
    /// List stored reports, newest period first
    Reports {
        #[arg(long)]
        role: Option<TargetRole>,
        #[arg(long)]
        period: Option<PeriodKind>,
        #[arg(long)]
        email: Option<String>,
        #[arg(long)]
        batch: Option<String>,
        #[arg(long, default_value_t = 0)]
        offset: usize,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Render a stored report as markdown
    ShowReport {
        #[arg(long)]
        id: Uuid,
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Mark a report as forwarded to the guardian
    ForwardReport {
        #[arg(long)]
        id: Uuid,
    },
    /// Periodically retry failed evaluations and resolve lapsed alerts
    Watch,
}

fn init_logging() {
    let debug_enabled = env::var("ATTENTION_MONITOR_DEBUG_LOG")
        .map(|value| matches!(value.as_str(), "1" | "true" | "TRUE" | "yes" | "YES"))
        .unwrap_or(false);
    let filter = if debug_enabled {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn default_period_end(period: PeriodKind, start: NaiveDate) -> anyhow::Result<NaiveDate> {
    let end = match period {
        PeriodKind::Daily => Some(start),
        PeriodKind::Weekly => start.checked_add_days(chrono::Days::new(6)),
        PeriodKind::Monthly => start
            .checked_add_months(Months::new(1))
            .and_then(|next| next.pred_opt()),
    };
    end.context("period end is out of range")
}

async fn watch(monitor: &Monitor<PgStore>) -> anyhow::Result<()> {
    let every = Duration::from_secs(monitor.config().reconcile_interval_secs.max(1));
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    info!(interval_secs = every.as_secs(), "watching for lapsed alerts");

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match monitor.retry_failed_evaluations().await {
                    Ok(0) => {}
                    Ok(count) => info!(count, "retried failed evaluations"),
                    Err(err) => warn!(error = %err, "retrying evaluations failed"),
                }
                match monitor.reconcile().await {
                    Ok(0) => {}
                    Ok(count) => info!(count, "resolved lapsed alerts"),
                    Err(err) => warn!(error = %err, "reconcile failed"),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("shutting down");
                break;
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging();
    let cli = Cli::parse();
    let config = MonitorConfig::load(cli.config.as_deref()).context("failed to load config")?;

    let database_url = env::var("DATABASE_URL")
        .context("DATABASE_URL must be set to a production Postgres instance")?;
    let max_connections = match env::var("ATTENTION_MONITOR_MAX_CONNECTIONS") {
        Ok(value) => value
            .parse::<u32>()
            .context("ATTENTION_MONITOR_MAX_CONNECTIONS must be a positive integer")?,
        Err(_) => 5,
    };

    let store = PgStore::connect(&database_url, max_connections)
        .await
        .context("failed to connect to Postgres")?;

    match cli.command {
        Commands::InitDb => {
            db::init_db(store.pool()).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            db::seed(store.pool()).await?;
            println!("Seed data inserted.");
        }
        command => {
            let monitor = Monitor::new(Arc::new(store), config);
            run(&monitor, command).await?;
        }
    }

    Ok(())
}

async fn run(monitor: &Monitor<PgStore>, command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::InitDb | Commands::Seed => {}
        Commands::Ingest { json, csv } => {
            let events = match (json, csv) {
                (Some(path), _) => read_events_json(&path)
                    .with_context(|| format!("failed to read {}", path.display()))?,
                (None, Some(path)) => read_events_csv(&path)
                    .with_context(|| format!("failed to read {}", path.display()))?,
                (None, None) => anyhow::bail!("pass --json or --csv"),
            };
            let outcome = monitor.ingest(events).await?;
            if !outcome.failed.is_empty() {
                warn!(failed = outcome.failed.len(), "some events could not be stored");
            }
            if monitor.pending_evaluations() > 0 {
                monitor.retry_failed_evaluations().await?;
                let left = monitor.pending_evaluations();
                if left > 0 {
                    warn!(pending = left, "some events were stored but not evaluated");
                }
            }
            print_json(&outcome)?;
        }
        Commands::Alerts {
            role,
            batch,
            room,
            limit,
        } => {
            let alerts = monitor
                .active_alerts_for_role(RoleAlertQuery {
                    role,
                    batch_id: batch,
                    room_id: room,
                    limit,
                })
                .await?;
            print_json(&alerts)?;
        }
        Commands::History {
            room,
            batch,
            kind,
            offset,
            limit,
        } => {
            let page = monitor
                .alert_history(HistoryQuery {
                    room_id: room,
                    batch_id: batch,
                    kind,
                    offset,
                    limit,
                })
                .await?;
            print_json(&page)?;
        }
        Commands::Dismiss { id, by } => {
            if monitor.dismiss(id, &by).await? {
                println!("Alert {id} dismissed.");
            } else {
                println!("Alert {id} is not active.");
            }
        }
        Commands::Resolve { id } => {
            if monitor.resolve(id).await? {
                println!("Alert {id} resolved.");
            } else {
                println!("Alert {id} is not active.");
            }
        }
        Commands::TeacherAlert {
            room,
            kind,
            severity,
            message,
            title,
            session,
            teacher_email,
            teacher_name,
            notify_teacher,
        } => {
            let raised = monitor
                .raise_teacher_alert(TeacherAlertRequest {
                    room_id: room,
                    session_id: session,
                    teacher_email,
                    teacher_name,
                    kind,
                    severity,
                    title,
                    message,
                    notify_coordinator: true,
                    notify_academic_operator: true,
                    notify_teacher,
                })
                .await?;
            match raised {
                Some(alert) => print_json(&alert)?,
                None => println!("Suppressed: an equivalent alert is already active."),
            }
        }
        Commands::Live { room } => {
            let summary = monitor.live_summary(&room).await?;
            print_json(&summary)?;
        }
        Commands::Report {
            role,
            email,
            period,
            start,
            end,
            batch,
            generated_by,
        } => {
            let period_end = match end {
                Some(end) => end,
                None => default_period_end(period, start)?,
            };
            let id = monitor
                .generate_report(ReportRequest {
                    target_email: email,
                    role,
                    period_kind: period,
                    period_start: start,
                    period_end,
                    batch_id: batch,
                    generated_by,
                })
                .await?;
            println!("Report {id} stored.");
        }
        Commands::Reports {
            role,
            period,
            email,
            batch,
            offset,
            limit,
        } => {
            let page = monitor
                .list_reports(ReportFilter {
                    target_role: role,
                    period_kind: period,
                    target_email: email,
                    batch_id: batch,
                    offset,
                    limit: Some(limit),
                    ..Default::default()
                })
                .await?;
            print_json(&page)?;
        }
        Commands::ShowReport { id, out } => {
            let report = monitor.require_report(id).await?;
            let markdown = render_markdown(&report);
            match out {
                Some(out) => {
                    std::fs::write(&out, markdown)?;
                    println!("Report written to {}.", out.display());
                }
                None => print!("{markdown}"),
            }
        }
        Commands::ForwardReport { id } => {
            monitor.mark_forwarded(id).await?;
            println!("Report {id} marked as forwarded.");
        }
        Commands::Watch => watch(monitor).await?,
    }
    Ok(())
}
