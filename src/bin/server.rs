use clap::Parser;
use healthwatch::db::SeaOrmStore;
use healthwatch::monitor::MonitorContext;
use healthwatch::monitor::host::HostReadiness;
use healthwatch::server::ServerConfig;
use healthwatch::web::{AppState, create_axum_router};
use sea_orm::Database;
use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use tracing_appender::rolling;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser, Debug)]
#[command(version, about = "Service health-monitoring server")]
struct Args {
    /// Optional TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Default cron schedule, overriding MONITOR_SCHEDULE.
    #[arg(long)]
    schedule: Option<String>,
}

fn init_logging(log_dir: &str) {
    // Log to a file: JSON format, daily rotation
    let file_appender = rolling::daily(log_dir, "healthwatch.log");
    let file_layer = fmt::layer()
        .with_writer(file_appender)
        .with_ansi(false)
        .json();

    let stdout_layer = fmt::layer().with_writer(std::io::stdout);

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,sea_orm=warn,sqlx::query=warn"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(stdout_layer)
        .init();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();
    let mut config = ServerConfig::load(args.config.as_deref())?;
    if args.schedule.is_some() {
        config.monitor_schedule = args.schedule;
    }

    init_logging(&config.log_dir);
    info!(version = env!("CARGO_PKG_VERSION"), "Starting healthwatch...");

    let db = Database::connect(config.database_url()?).await?;
    let ctx = MonitorContext::new(Arc::new(SeaOrmStore::new(db)));

    let readiness = HostReadiness::new();
    let app_state = Arc::new(AppState::new(
        ctx.clone(),
        config.job_options(),
        Arc::new(readiness.provider()),
        config.monitor_schedule.clone(),
    ));

    // Still inside startup: hand the scheduler the context we already hold.
    if let Err(e) = app_state.scheduler.start(None, Some(&ctx)).await {
        error!(error = %e, "Failed to start monitoring scheduler.");
        return Err(e.into());
    }
    readiness.publish(ctx);

    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    info!(addr = %config.listen_addr, "HTTP server listening.");

    let scheduler = app_state.scheduler.clone();
    axum::serve(listener, create_axum_router(app_state))
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "Failed to listen for shutdown signal.");
            }
            info!("Shutdown signal received, stopping scheduler.");
            scheduler.stop().await;
        })
        .await?;

    Ok(())
}
