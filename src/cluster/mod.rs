pub mod file;
pub mod kube;

use crate::source::record::WorkerInfo;
use async_trait::async_trait;
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;
use tokio::io::AsyncBufRead;

pub use file::FileCluster;
pub use kube::KubeCluster;

#[derive(Debug, Error)]
pub enum ClusterError {
    /// The worker exists but its log can't be streamed yet.
    #[error("worker not ready: {0}")]
    NotReady(String),

    #[error("cluster API returned error status {status}: {message}")]
    Api { status: u16, message: String },

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON deserialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid bearer token: {0}")]
    InvalidToken(String),
}

/// Byte stream of one worker's log output.
pub type LogStream = Pin<Box<dyn AsyncBufRead + Send>>;

/// A worker process observed in the cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerHandle {
    pub info: Arc<WorkerInfo>,
    pub namespace: String,
}

impl WorkerHandle {
    pub fn new(info: WorkerInfo, namespace: impl Into<String>) -> Self {
        Self {
            info: Arc::new(info),
            namespace: namespace.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.info.name
    }

    pub fn run_id(&self) -> String {
        self.info.run_id()
    }
}

/// The part of the cluster API the log collector needs.
#[async_trait]
pub trait Cluster: Send + Sync {
    /// Workers that have started, in `namespace`.
    async fn list_workers(&self, namespace: &str) -> Result<Vec<WorkerHandle>, ClusterError>;

    /// Follow the log of `worker` from its beginning.
    async fn stream_log(&self, worker: &WorkerHandle) -> Result<LogStream, ClusterError>;
}
