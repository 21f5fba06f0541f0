use crate::cli::run::{open_storage, serve_until_interrupted, RunError};
use crate::cluster::{Cluster, FileCluster, WorkerHandle};
use crate::config::{load_config, Config};
use crate::ingest::PodLogsLoader;
use crate::source::record::WorkerInfo;
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

const IMPORT_NAMESPACE: &str = "local";

/// Load a saved pod log as the output of one worker and serve it.
pub async fn import(
    config_path: Option<PathBuf>,
    file: PathBuf,
    pod: Option<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    if !file.is_file() {
        return Err(format!("log file not found: {}", file.display()).into());
    }
    let config = match config_path {
        Some(path) => load_config(&path)?,
        None => Config::default(),
    };
    let name = pod.unwrap_or_else(|| pod_name_from_path(&file));

    run_import(config, file, name).await.map_err(|e| e.into())
}

async fn run_import(config: Config, file: PathBuf, name: String) -> Result<(), RunError> {
    let manager = open_storage(&config)?;

    let worker = WorkerHandle::new(WorkerInfo::new(name, Utc::now()), IMPORT_NAMESPACE);
    info!(file = %file.display(), run_id = %worker.run_id(), "Importing log file");
    let cluster: Arc<dyn Cluster> = Arc::new(FileCluster::new(file, worker.clone()));

    let loader = PodLogsLoader::new(cluster, config.ingest.clone(), manager.next_sid());
    loader.start(manager.clone());
    loader.load_logs(worker);

    let result = serve_until_interrupted(manager, config.web).await;
    loader.shutdown();
    result
}

/// `app-0.log` imports as worker `app-0`.
fn pod_name_from_path(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .filter(|stem| !stem.is_empty())
        .unwrap_or_else(|| "imported".to_string())
}
