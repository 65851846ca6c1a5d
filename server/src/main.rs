#![allow(dead_code)]

mod db_core;
mod email;
mod error;
mod model;
mod normalize;
mod prompt;
mod rate_limiters;
mod server_config;
mod state;
#[cfg(test)]
mod testing;
mod util;

use anyhow::Context;
use clap::{Parser, Subcommand};
use mimalloc::MiMalloc;
use sea_orm::{ConnectOptions, Database, DatabaseConnection};
use serde_json::json;
use tokio::signal;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use model::{application::ApplicationCtrl, email::EmailCtrl};
use server_config::{cfg, ServerConfig};
use state::ingestion::IngestionOrchestrator;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

pub type HttpClient = reqwest::Client;

#[derive(Parser)]
#[command(name = "applytrack", version, about = "Tracks job applications found in a Gmail inbox")]
struct Cli {
    #[arg(long, env = "DATABASE_URL")]
    database_url: String,

    /// Emit logs as JSON lines
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run one ingestion for a user
    Ingest {
        #[arg(long)]
        user: Uuid,
        /// Earliest date to fetch, YYYY/MM/DD or YYYY-MM-DD
        #[arg(long)]
        after: Option<String>,
    },
    /// Run ingestion for every configured account on the configured cron
    Schedule,
    /// List a user's applications, most recently updated first
    Applications {
        #[arg(long)]
        user: Uuid,
    },
    /// List a user's most recent stored emails
    Emails {
        #[arg(long)]
        user: Uuid,
        #[arg(long, default_value_t = 20)]
        limit: u64,
    },
    /// Delete every application and email stored for a user
    Purge {
        #[arg(long)]
        user: Uuid,
    },
    /// Create tables and indexes
    InitDb,
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);

    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::Layer::default().with_ansi(false))
            .init();
    }
}

async fn connect_db(database_url: &str) -> anyhow::Result<DatabaseConnection> {
    let mut db_options = ConnectOptions::new(database_url);
    db_options.sqlx_logging(false);

    let conn = Database::connect(db_options)
        .await
        .context("Database connection failed")?;
    db_core::schema::create_schema(&conn).await?;
    Ok(conn)
}

fn build_http_client(config: &ServerConfig) -> anyhow::Result<HttpClient> {
    let http_client = reqwest::ClientBuilder::new()
        .use_rustls_tls()
        .connect_timeout(config.http.connect_timeout())
        .timeout(config.http.request_timeout())
        .build()?;
    Ok(http_client)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let config: &ServerConfig = &cfg;
    tracing::debug!("{}", config);
    let conn = connect_db(&cli.database_url).await?;

    match cli.command {
        Command::Ingest { user, after } => {
            let after = match after {
                Some(raw) => util::parse_cursor_date(&raw)?,
                None => util::lookback_date(config.settings.default_lookback_days),
            };
            let orchestrator =
                IngestionOrchestrator::from_config(config, conn, build_http_client(config)?);
            let report = orchestrator.run(user, after).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Schedule => {
            let orchestrator =
                IngestionOrchestrator::from_config(config, conn, build_http_client(config)?);
            run_schedule(orchestrator, config).await?;
        }
        Command::Applications { user } => {
            let applications = ApplicationCtrl::list_for_user(&conn, user).await?;
            println!("{}", serde_json::to_string_pretty(&applications)?);
        }
        Command::Emails { user, limit } => {
            let emails: Vec<_> = EmailCtrl::recent_for_user(&conn, user, limit)
                .await?
                .into_iter()
                .map(|e| {
                    json!({
                        "id": e.id,
                        "sent_at": e.sent_at,
                        "from": e.from_addr,
                        "subject": e.subject,
                        "labels": e.raw_label,
                    })
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&emails)?);
        }
        Command::Purge { user } => {
            let summary = model::purge_user_data(&conn, user).await?;
            tracing::info!("Purged data for user {}: {:?}", user, summary);
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Command::InitDb => {
            tracing::info!("Database initialised");
        }
    }

    Ok(())
}

async fn run_schedule(
    orchestrator: IngestionOrchestrator,
    config: &ServerConfig,
) -> anyhow::Result<()> {
    if config.accounts.is_empty() {
        anyhow::bail!("No [[accounts]] configured, nothing to schedule");
    }

    let mut scheduler = JobScheduler::new().await?;
    for account in &config.accounts {
        let user_id = account.user_id;
        let lookback_days = config.schedule.lookback_days;
        let orchestrator = orchestrator.clone();

        scheduler
            .add(Job::new_async(config.schedule.cron.as_str(), move |uuid, mut l| {
                let orchestrator = orchestrator.clone();
                Box::pin(async move {
                    let after = util::lookback_date(lookback_days);
                    match orchestrator.run(user_id, after).await {
                        Ok(report) => {
                            tracing::info!("Ingestion job {} succeeded: {}", uuid, report);
                        }
                        Err(e) => {
                            tracing::error!(
                                "Ingestion job {} for user {} failed: {:?}",
                                uuid,
                                user_id,
                                e
                            );
                        }
                    }

                    let next_tick = l.next_tick_for_job(uuid).await;
                    if let Ok(Some(ts)) = next_tick {
                        tracing::info!("Next ingestion for user {} at {:?}", user_id, ts)
                    }
                })
            })?)
            .await?;
        tracing::info!(
            "Scheduled ingestion for user {} on '{}'",
            user_id,
            config.schedule.cron
        );
    }

    scheduler.set_shutdown_handler(Box::new(move || {
        Box::pin(async move {
            tracing::info!("Shutting down scheduler");
        })
    }));

    scheduler.start().await?;
    shutdown_signal().await;
    scheduler.shutdown().await?;
    tracing::info!("Cleanups done, shutting down");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
