use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use sync_manager::api::{create_router, ApiState};
use sync_manager::{SyncOrchestrator, SyncOutcome, UpstreamSource};
use teamsync::config::SyncConfig;
use teamsync::snapshot::{BackupStore, FileBackup, SnapshotStore};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sync_manager=info,teamsync=info".into()),
        )
        .init();

    info!("Sync Manager starting...");

    let config_path = PathBuf::from(
        std::env::var("TEAMSYNC_CONFIG").unwrap_or_else(|_| "teamsync.toml".to_string()),
    );
    let config = SyncConfig::load(&config_path)?;
    config.validate().context("Invalid configuration")?;

    info!(
        config = %config_path.display(),
        base_url = %config.upstream.base_url,
        team_id = config.upstream.team_id,
        interval_secs = config.sync.interval_secs,
        backup_enabled = config.backup.enabled,
        "Configuration loaded"
    );

    // Component graph
    let source = UpstreamSource::from_config(&config).await?;
    let throttles = source.throttles();
    let store = Arc::new(SnapshotStore::default());
    let backup: Option<Arc<dyn BackupStore>> = config
        .backup
        .enabled
        .then(|| Arc::new(FileBackup::new(config.backup.clone())) as Arc<dyn BackupStore>);
    let orchestrator = Arc::new(SyncOrchestrator::new(Arc::new(source), store, backup));

    // Serve the last durable snapshot until the first live sync lands
    orchestrator.bootstrap().await;

    if config.sync.run_on_start {
        match orchestrator.trigger_sync().await {
            SyncOutcome::Completed(as_of) => info!(as_of = %as_of, "Startup sync completed"),
            SyncOutcome::Rejected(_) => {}
            SyncOutcome::Failed(e) => warn!(error = %e, "Startup sync failed, serving previous snapshot"),
        }
    }

    let periodic_handle = tokio::spawn(Arc::clone(&orchestrator).run_periodic(config.sync.interval()));

    // Start HTTP API server
    let server_handle = if config.api.enabled {
        let router = create_router(ApiState {
            orchestrator: Arc::clone(&orchestrator),
            throttles: Some(throttles),
        });
        let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.api.port))
            .await
            .context("Failed to bind sync API port")?;
        info!(port = config.api.port, "Sync API listening");

        Some(tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router).await {
                tracing::error!(error = %e, "Sync API server error");
            }
        }))
    } else {
        None
    };

    // Wait for shutdown signal
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl_c signal")?;
    info!("Shutdown signal received");

    periodic_handle.abort();
    if let Some(handle) = server_handle {
        handle.abort();
    }
    info!("Sync manager stopped");

    Ok(())
}
