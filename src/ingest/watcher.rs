use crate::cluster::{Cluster, WorkerHandle};
use crate::ingest::job::JobSlot;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Periodically lists the workers of a namespace and hands them to a consumer.
pub struct WorkerWatcher {
    cluster: Arc<dyn Cluster>,
    job: JobSlot,
}

impl WorkerWatcher {
    pub fn new(cluster: Arc<dyn Cluster>) -> Self {
        Self {
            cluster,
            job: JobSlot::new(),
        }
    }

    /// Start polling every `interval`. Workers whose name starts with one of
    /// `ignore_prefixes` are left out. Does nothing if already started.
    pub fn start<F>(
        &self,
        namespace: impl Into<String>,
        ignore_prefixes: Vec<String>,
        interval: Duration,
        consumer: F,
    ) -> bool
    where
        F: Fn(Vec<WorkerHandle>) + Send + Sync + 'static,
    {
        let namespace = namespace.into();
        let ignore_prefixes = Arc::new(ignore_prefixes);
        let consumer = Arc::new(consumer);
        self.job.ensure_started(|| {
            let cluster = Arc::clone(&self.cluster);
            let namespace = namespace.clone();
            let ignore_prefixes = Arc::clone(&ignore_prefixes);
            let consumer = Arc::clone(&consumer);
            async move {
                loop {
                    match cluster.list_workers(&namespace).await {
                        Ok(workers) => {
                            let workers: Vec<_> = workers
                                .into_iter()
                                .filter(|worker| !is_ignored(worker, &ignore_prefixes))
                                .collect();
                            debug!(namespace = %namespace, workers = workers.len(), "Workers listed");
                            consumer(workers);
                        }
                        Err(e) => warn!(namespace = %namespace, error = %e, "Failed to list workers"),
                    }
                    tokio::time::sleep(interval).await;
                }
            }
        })
    }

    pub fn is_running(&self) -> bool {
        self.job.is_active()
    }

    pub fn stop(&self) {
        self.job.cancel();
    }
}

impl Drop for WorkerWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

fn is_ignored(worker: &WorkerHandle, ignore_prefixes: &[String]) -> bool {
    ignore_prefixes
        .iter()
        .any(|prefix| worker.name().starts_with(prefix.as_str()))
}
