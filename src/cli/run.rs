use crate::cluster::{Cluster, ClusterError, KubeCluster};
use crate::config::{load_config, Config, ConfigError, WebConfig};
use crate::ingest::{PodLogsLoader, WorkerWatcher};
use crate::storage::{GenerationManager, StorageError};
use crate::web::run_server;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::signal;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{error, info};

/// Lower bound for the storage maintenance period.
const MIN_TICK: Duration = Duration::from_millis(100);

#[derive(Debug, Error)]
pub enum RunError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("cluster error: {0}")]
    Cluster(#[from] ClusterError),

    #[error("config has no 'cluster' section, nothing to collect from")]
    MissingCluster,

    #[error("task join error: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("web server error: {0}")]
    WebServer(#[from] std::io::Error),
}

pub async fn run(config_path: Option<PathBuf>) -> Result<(), Box<dyn std::error::Error>> {
    let config_path = match config_path {
        Some(path) => path,
        None => {
            eprintln!("Error: config not found");
            eprintln!("Searched locations:");
            eprintln!("  ~/.config/podlog/config.yml");
            eprintln!("  /etc/podlog/config.yml");
            eprintln!("\nUse --config <path> to specify a config file, or run 'podlog config init' to generate one.");
            return Err("config not found".into());
        }
    };

    run_collector(&config_path).await.map_err(|e| e.into())
}

async fn run_collector(config_path: &Path) -> Result<(), RunError> {
    info!(config_path = %config_path.display(), "Loading configuration");
    let config = load_config(config_path)?;
    let cluster_config = config.cluster.clone().ok_or(RunError::MissingCluster)?;

    let manager = open_storage(&config)?;

    info!(api_server = %cluster_config.api_server, namespace = %cluster_config.namespace, "Connecting to cluster");
    let cluster: Arc<dyn Cluster> = Arc::new(KubeCluster::new(&cluster_config)?);

    let loader = Arc::new(PodLogsLoader::new(
        Arc::clone(&cluster),
        config.ingest.clone(),
        manager.next_sid(),
    ));
    loader.start(manager.clone());

    let watcher = WorkerWatcher::new(cluster);
    let workers_loader = Arc::clone(&loader);
    watcher.start(
        cluster_config.namespace.clone(),
        cluster_config.ignore_prefixes.clone(),
        cluster_config.poll_interval,
        move |workers| {
            for worker in workers {
                if workers_loader.load_logs(worker.clone()) {
                    info!(run_id = %worker.run_id(), "Started reading worker log");
                }
            }
        },
    );

    info!("Collector started, press Ctrl+C to shutdown");
    let result = serve_until_interrupted(manager, config.web).await;

    watcher.stop();
    loader.shutdown();
    info!("Collector shutdown complete");
    result
}

/// Open the event store described by `config`.
pub(crate) fn open_storage(config: &Config) -> Result<Arc<GenerationManager>, StorageError> {
    info!(
        path = %config.storage.path.display(),
        clear_on_start = config.storage.clear_on_start,
        "Opening event store"
    );
    let manager = GenerationManager::open(&config.storage.path, config.storage.settings())?;
    info!(segments = manager.segments().len(), next_sid = manager.next_sid(), "Event store ready");
    Ok(manager)
}

/// Run the query API and the storage maintenance until Ctrl-C or until the
/// server stops on its own.
pub(crate) async fn serve_until_interrupted(
    manager: Arc<GenerationManager>,
    web_config: WebConfig,
) -> Result<(), RunError> {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let maintenance = spawn_maintenance(Arc::clone(&manager), shutdown_rx.clone());

    info!(listen = %web_config.listen, "Starting web server");
    let mut web_handle = tokio::spawn(run_server(manager, web_config, shutdown_rx));

    let result = tokio::select! {
        result = &mut web_handle => result,
        _ = signal::ctrl_c() => {
            info!("Shutdown signal received");
            let _ = shutdown_tx.send(true);
            web_handle.await
        }
    };
    let _ = shutdown_tx.send(true);
    maintenance.await?;

    match result? {
        Ok(()) => {
            info!("Web server stopped");
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "Web server failed");
            Err(e.into())
        }
    }
}

/// Periodically lets the manager flush retired generations, so they reach
/// disk even when no new events arrive.
fn spawn_maintenance(
    manager: Arc<GenerationManager>,
    mut shutdown_rx: watch::Receiver<bool>,
) -> JoinHandle<()> {
    let period = manager.settings().min_retirement.max(MIN_TICK);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = interval.tick() => manager.tick(),
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                }
            }
        }
    })
}
