use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use pivot_core::store::{InMemoryJobStore, JobStore};
use pivot_pipeline::catalog;
use pivot_pipeline::config::{PipelineConfig, RemoteSettings};
use pivot_pipeline::orchestrator::JobOrchestrator;
use pivot_pipeline::remote::{LocalHost, RemoteHost, SshHost};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pivot_api::background::JobRegistry;
use pivot_api::config::ServerConfig;
use pivot_api::router::build_app_router;
use pivot_api::state::AppState;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "pivot_api=debug,pivot_pipeline=debug,tower_http=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // --- Configuration ---
    let pipeline = PipelineConfig::from_env().expect("Invalid pipeline configuration");
    tracing::info!(
        mode = ?pipeline.remote.mode(),
        staging_root = %pipeline.staging_root.display(),
        remote_root = %pipeline.remote_root,
        job_budget_secs = pipeline.timeouts.job_budget().as_secs(),
        "Loaded pipeline configuration",
    );

    let config = ServerConfig::from_env(pipeline.timeouts.job_budget())
        .expect("Invalid server configuration");
    tracing::info!(
        host = %config.host,
        port = %config.port,
        request_timeout_secs = config.request_timeout_secs,
        "Loaded server configuration",
    );

    // --- Job store ---
    let (pool, store): (Option<pivot_db::DbPool>, Arc<dyn JobStore>) =
        match std::env::var("DATABASE_URL") {
            Ok(database_url) => {
                let pool = pivot_db::create_pool(&database_url)
                    .await
                    .expect("Failed to connect to database");
                tracing::info!("Database connection pool created");

                pivot_db::health_check(&pool)
                    .await
                    .expect("Database health check failed");
                tracing::info!("Database health check passed");

                pivot_db::run_migrations(&pool)
                    .await
                    .expect("Failed to run database migrations");
                tracing::info!("Database migrations applied");

                let store: Arc<dyn JobStore> = Arc::new(pivot_db::PgJobStore::new(pool.clone()));
                (Some(pool), store)
            }
            Err(_) => {
                tracing::warn!("DATABASE_URL not set, job records are kept in memory");
                let store: Arc<dyn JobStore> = Arc::new(InMemoryJobStore::new());
                (None, store)
            }
        };

    match store.fail_interrupted().await {
        Ok(0) => {}
        Ok(count) => tracing::warn!(count, "Marked interrupted jobs as failed"),
        Err(e) => tracing::error!(error = %e, "Failed to mark interrupted jobs"),
    }

    // --- Remote host ---
    let host: Arc<dyn RemoteHost> = match &pipeline.remote {
        RemoteSettings::Ssh(ssh) => Arc::new(
            SshHost::new(ssh, pipeline.timeouts.probe).expect("Invalid SSH configuration"),
        ),
        RemoteSettings::Local => Arc::new(LocalHost::new()),
    };
    tracing::info!(host = %host.describe(), "Stitching host configured");

    // --- Source catalog ---
    let catalog = catalog::from_settings(&pipeline.catalog);
    match &catalog {
        Some(fetcher) => tracing::info!(catalog = fetcher.label(), "Source catalog configured"),
        None => tracing::info!("No source catalog configured, only uploads are accepted"),
    }

    // --- App state ---
    let orchestrator = Arc::new(JobOrchestrator::new(&pipeline, host, store));
    let jobs = Arc::new(JobRegistry::new());
    let shutdown = CancellationToken::new();

    let state = AppState {
        pool,
        config: Arc::new(config.clone()),
        orchestrator,
        catalog,
        jobs: Arc::clone(&jobs),
        shutdown: shutdown.clone(),
    };

    let app = build_app_router(state, &config);

    // --- Start server ---
    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .expect("Invalid HOST:PORT");

    tracing::info!(%addr, "Starting server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind address");

    // Jobs are cancelled as soon as the signal arrives so in-flight stitch
    // requests can answer before the server stops.
    let cancel_jobs = shutdown.clone();
    let running_jobs = Arc::clone(&jobs);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            tracing::info!(running = running_jobs.running_count(), "Cancelling jobs");
            cancel_jobs.cancel();
        })
        .await
        .expect("Server error");

    // --- Drain jobs ---
    if jobs
        .shutdown(Duration::from_secs(config.shutdown_timeout_secs))
        .await
    {
        tracing::info!("All jobs finished, server shut down");
    } else {
        tracing::warn!("Timed out waiting for jobs to clean up");
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
