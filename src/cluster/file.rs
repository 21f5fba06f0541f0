use crate::cluster::{Cluster, ClusterError, LogStream, WorkerHandle};
use async_trait::async_trait;
use std::path::PathBuf;
use tokio::fs::File;
use tokio::io::BufReader;

/// A single saved log file presented as the only worker of a cluster.
#[derive(Debug, Clone)]
pub struct FileCluster {
    path: PathBuf,
    worker: WorkerHandle,
}

impl FileCluster {
    pub fn new(path: impl Into<PathBuf>, worker: WorkerHandle) -> Self {
        Self {
            path: path.into(),
            worker,
        }
    }

    pub fn worker(&self) -> &WorkerHandle {
        &self.worker
    }
}

#[async_trait]
impl Cluster for FileCluster {
    async fn list_workers(&self, _namespace: &str) -> Result<Vec<WorkerHandle>, ClusterError> {
        Ok(vec![self.worker.clone()])
    }

    async fn stream_log(&self, worker: &WorkerHandle) -> Result<LogStream, ClusterError> {
        if worker != &self.worker {
            return Err(ClusterError::Api {
                status: 404,
                message: format!("unknown worker {}", worker.info),
            });
        }
        let file = File::open(&self.path).await?;
        Ok(Box::pin(BufReader::new(file)))
    }
}
