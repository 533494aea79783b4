use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use modelops_api::background::idempotency_sweeper::IdempotencySweeper;
use modelops_api::config::{AppConfig, DeployMode, ExecutionMode};
use modelops_api::engine::deploy::DeployWorker;
use modelops_api::engine::dispatcher::Dispatcher;
use modelops_api::engine::scheduler::Scheduler;
use modelops_api::router::build_app_router;
use modelops_api::state::AppState;
use modelops_events::{EventBus, Subject};
use modelops_kube::executor_job::BatchClient;
use modelops_kube::inference::ServingClient;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "modelops_api=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // --- Configuration ---
    let config = Arc::new(AppConfig::from_env());
    tracing::info!(
        host = %config.server.host,
        port = config.server.port,
        execution_mode = ?config.dispatch.mode,
        deploy_mode = ?config.deploy.mode,
        "Loaded configuration",
    );

    // --- Database ---
    let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");

    let pool = modelops_db::create_pool(&database_url)
        .await
        .expect("Failed to connect to database");
    tracing::info!("Database connection pool created");

    modelops_db::health_check(&pool)
        .await
        .expect("Database health check failed");

    modelops_db::run_migrations(&pool)
        .await
        .expect("Failed to run database migrations");
    tracing::info!("Database migrations applied");

    // --- Event bus ---
    let bus = Arc::new(EventBus::new());

    // --- Orchestration plane (only when a mode needs it) ---
    let needs_kube = config.dispatch.mode == ExecutionMode::Ephemeral
        || config.deploy.mode == DeployMode::Reconcile;
    let kube_client = if needs_kube {
        let client = kube::Client::try_default()
            .await
            .expect("Failed to build Kubernetes client");
        Some(client)
    } else {
        None
    };

    let batch_client = match (config.dispatch.mode, &kube_client) {
        (ExecutionMode::Ephemeral, Some(client)) => {
            if config.dispatch.executor_image.is_empty() {
                panic!("GPU_EXECUTOR_IMAGE is required for GPU_EXECUTION_MODE=ephemeral");
            }
            Some(BatchClient::new(client.clone(), &config.dispatch.namespace))
        }
        _ => None,
    };
    let serving_client = match (config.deploy.mode, &kube_client) {
        (DeployMode::Reconcile, Some(client)) => {
            Some(ServingClient::new(client.clone(), &config.deploy.namespace))
        }
        _ => None,
    };

    // --- Engine + background tasks ---
    let cancel = CancellationToken::new();
    let mut engine_handles = Vec::new();

    let scheduler = Scheduler::new(pool.clone(), Arc::clone(&bus), config.scheduler.clone());
    {
        let cancel = cancel.clone();
        engine_handles.push(tokio::spawn(async move {
            scheduler.run(cancel).await;
        }));
    }

    let dispatch_config = Arc::new(config.dispatch.clone());
    for subject in [
        Subject::DispatchedT4Shared,
        Subject::DispatchedT4Exclusive,
        Subject::DispatchedMig,
    ] {
        let dispatcher = Dispatcher::new(
            pool.clone(),
            Arc::clone(&bus),
            subject,
            Arc::clone(&dispatch_config),
            batch_client.clone(),
        );
        let cancel = cancel.clone();
        engine_handles.push(tokio::spawn(async move {
            dispatcher.run(cancel).await;
        }));
    }

    let deploy_worker = DeployWorker::new(
        pool.clone(),
        Arc::clone(&bus),
        Arc::new(config.deploy.clone()),
        serving_client,
    );
    {
        let cancel = cancel.clone();
        engine_handles.push(tokio::spawn(async move {
            deploy_worker.run(cancel).await;
        }));
    }

    let sweeper = IdempotencySweeper::new(pool.clone(), config.idempotency.sweep_interval);
    {
        let cancel = cancel.clone();
        engine_handles.push(tokio::spawn(async move {
            sweeper.run(cancel).await;
        }));
    }

    tracing::info!("Engine started (scheduler, dispatchers, deploy worker, sweeper)");

    // --- App state + router ---
    let state = AppState {
        pool,
        config: Arc::clone(&config),
        bus,
    };
    let app = build_app_router(state);

    // --- Start server ---
    let addr = SocketAddr::new(
        config.server.host.parse().expect("Invalid HOST address"),
        config.server.port,
    );
    tracing::info!(%addr, "Starting server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind to address");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");

    // --- Post-shutdown cleanup ---
    tracing::info!("Server stopped accepting connections, cleaning up");

    cancel.cancel();
    for handle in engine_handles {
        let _ = tokio::time::timeout(Duration::from_secs(5), handle).await;
    }
    tracing::info!("Engine loops stopped");

    tracing::info!("Graceful shutdown complete");
}

/// Wait for a termination signal to initiate graceful shutdown.
///
/// Handles both SIGINT (Ctrl-C) and SIGTERM (on Unix) so the server shuts
/// down cleanly whether stopped interactively or by a process manager.
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
