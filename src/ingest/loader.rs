use crate::cluster::{Cluster, ClusterError, LogStream, WorkerHandle};
use crate::config::types::IngestConfig;
use crate::ingest::job::{JobMap, JobSlot};
use crate::sequencer::TotalOrder;
use crate::source::reader::{PodLogReader, ReaderError};
use crate::source::record::RawRecord;
use crate::storage::EventSink;
use chrono::Utc;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

/// Follows the logs of all known worker runs and feeds their records, in one
/// total order, to an [`EventSink`].
///
/// Every run gets at most one reading task. All tasks send to one channel,
/// drained by a single dispatch task that assigns the sids.
pub struct PodLogsLoader {
    context: LoadContext,
    dispatch: Arc<Mutex<Dispatch>>,
    dispatch_job: JobSlot,
    loaders: JobMap<String>,
}

struct Dispatch {
    receiver: mpsc::UnboundedReceiver<RawRecord>,
    order: TotalOrder,
}

#[derive(Clone)]
struct LoadContext {
    cluster: Arc<dyn Cluster>,
    sender: mpsc::UnboundedSender<RawRecord>,
    /// Run id to the reason its log is not collected.
    ignored: Arc<DashMap<String, String>>,
    config: IngestConfig,
}

impl PodLogsLoader {
    /// `first_sid` is the sid given to the first record.
    pub fn new(cluster: Arc<dyn Cluster>, config: IngestConfig, first_sid: i64) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            context: LoadContext {
                cluster,
                sender,
                ignored: Arc::new(DashMap::new()),
                config,
            },
            dispatch: Arc::new(Mutex::new(Dispatch {
                receiver,
                order: TotalOrder::starting_at(first_sid),
            })),
            dispatch_job: JobSlot::new(),
            loaders: JobMap::new(),
        }
    }

    /// Start delivering records to `sink`. Does nothing if already started.
    pub fn start(&self, sink: Arc<dyn EventSink>) -> bool {
        self.dispatch_job.ensure_started(|| {
            let dispatch = Arc::clone(&self.dispatch);
            let sink = Arc::clone(&sink);
            async move {
                let mut dispatch = dispatch.lock().await;
                let Dispatch { receiver, order } = &mut *dispatch;
                while let Some(raw) = receiver.recv().await {
                    sink.receive_event(order.assign(raw));
                }
            }
        })
    }

    /// Make sure the log of `worker` is being read. Returns true if a new
    /// reading task was started.
    pub fn load_logs(&self, worker: WorkerHandle) -> bool {
        let run_id = worker.run_id();
        if self.context.ignored.contains_key(&run_id) {
            return false;
        }
        self.loaders.ensure_started(&run_id, || {
            run_load(self.context.clone(), worker.clone())
        })
    }

    pub fn is_ignored(&self, run_id: &str) -> bool {
        self.context.ignored.contains_key(run_id)
    }

    /// Ignored runs with the reason.
    pub fn ignored(&self) -> Vec<(String, String)> {
        self.context
            .ignored
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    pub fn is_loading(&self, run_id: &str) -> bool {
        self.loaders.is_running(&run_id.to_string())
    }

    /// Stop all reading tasks and the dispatch task.
    pub fn shutdown(&self) {
        self.loaders.cancel_all();
        self.dispatch_job.cancel();
    }
}

impl Drop for PodLogsLoader {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn run_load(context: LoadContext, worker: WorkerHandle) {
    let run_id = worker.run_id();
    loop {
        match context.cluster.stream_log(&worker).await {
            Ok(stream) => {
                info!(run_id = %run_id, "Receiving log");
                match forward_records(&worker, stream, &context.sender).await {
                    Ok(lines) => warn!(run_id = %run_id, lines, "Log finished"),
                    Err(e) => warn!(run_id = %run_id, error = %e, "Failed to read log"),
                }
            }
            Err(ClusterError::NotReady(reason)) => {
                let young = (Utc::now() - worker.info.started_at)
                    .to_std()
                    .map_or(true, |age| age < context.config.give_up_after);
                if young {
                    debug!(run_id = %run_id, reason = %reason, "Log not ready, retrying");
                    tokio::time::sleep(context.config.retry_delay).await;
                    continue;
                }
                warn!(run_id = %run_id, reason = %reason, "Ignoring logs");
                context.ignored.insert(run_id, reason);
            }
            Err(e) => warn!(run_id = %run_id, error = %e, "Failed to load logs"),
        }
        return;
    }
}

/// Returns the number of lines read.
async fn forward_records(
    worker: &WorkerHandle,
    stream: LogStream,
    sender: &mpsc::UnboundedSender<RawRecord>,
) -> Result<u64, ReaderError> {
    let mut reader = PodLogReader::new(Arc::clone(&worker.info), stream);
    while let Some(record) = reader.next_record().await? {
        if sender.send(record).is_err() {
            // Loader dropped
            break;
        }
    }
    Ok(reader.lines_read())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::record::{OrderedRecord, WorkerInfo};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::io::Cursor;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    enum Reply {
        NotReady,
        Fail,
        Log(&'static str),
        Bytes(&'static [u8]),
    }

    /// Answers `stream_log` from a per-pod script, repeating the last reply.
    #[derive(Default)]
    struct ScriptedCluster {
        scripts: std::sync::Mutex<HashMap<String, Vec<Reply>>>,
        calls: AtomicUsize,
    }

    impl ScriptedCluster {
        fn script(self, pod: &str, replies: Vec<Reply>) -> Self {
            self.scripts.lock().unwrap().insert(pod.to_string(), replies);
            self
        }
    }

    #[async_trait]
    impl Cluster for ScriptedCluster {
        async fn list_workers(&self, _namespace: &str) -> Result<Vec<WorkerHandle>, ClusterError> {
            Ok(Vec::new())
        }

        async fn stream_log(&self, worker: &WorkerHandle) -> Result<LogStream, ClusterError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut scripts = self.scripts.lock().unwrap();
            let replies = scripts.get_mut(worker.name()).expect("unscripted pod");
            let reply = if replies.len() > 1 {
                replies.remove(0)
            } else {
                match &replies[0] {
                    Reply::NotReady => Reply::NotReady,
                    Reply::Fail => Reply::Fail,
                    Reply::Log(text) => Reply::Log(*text),
                    Reply::Bytes(bytes) => Reply::Bytes(*bytes),
                }
            };
            match reply {
                Reply::NotReady => Err(ClusterError::NotReady("container is creating".into())),
                Reply::Fail => Err(ClusterError::Api {
                    status: 500,
                    message: "boom".into(),
                }),
                Reply::Log(text) => Ok(Box::pin(Cursor::new(text.as_bytes().to_vec()))),
                Reply::Bytes(bytes) => Ok(Box::pin(Cursor::new(bytes.to_vec()))),
            }
        }
    }

    #[derive(Default)]
    struct CollectingSink(std::sync::Mutex<Vec<OrderedRecord>>);

    impl EventSink for CollectingSink {
        fn receive_event(&self, record: OrderedRecord) {
            self.0.lock().unwrap().push(record);
        }
    }

    impl CollectingSink {
        fn len(&self) -> usize {
            self.0.lock().unwrap().len()
        }
    }

    fn config() -> IngestConfig {
        IngestConfig {
            retry_delay: Duration::from_millis(10),
            give_up_after: Duration::from_secs(300),
        }
    }

    fn worker(name: &str, age: chrono::Duration) -> WorkerHandle {
        WorkerHandle::new(WorkerInfo::new(name, Utc::now() - age), "default")
    }

    async fn wait_until(condition: impl Fn() -> bool) {
        for _ in 0..400 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test]
    async fn test_records_from_all_workers_get_one_order() {
        let cluster = ScriptedCluster::default()
            .script("front-0", vec![Reply::Log("{\"@timestamp\":\"2024-01-01T00:00:00Z\",\"n\":1}\nplain\n")])
            .script("back-0", vec![Reply::Log("a\nb\nc\n")]);
        let loader = PodLogsLoader::new(Arc::new(cluster), config(), 0);
        let sink = Arc::new(CollectingSink::default());
        assert!(loader.start(sink.clone()));
        assert!(!loader.start(sink.clone()));

        let front = worker("front-0", chrono::Duration::seconds(1));
        let back = worker("back-0", chrono::Duration::seconds(1));
        assert!(loader.load_logs(front.clone()));
        assert!(loader.load_logs(back.clone()));
        wait_until(|| sink.len() == 5).await;

        let records = sink.0.lock().unwrap();
        let mut sids: Vec<i64> = records.iter().map(|r| r.sid()).collect();
        sids.sort();
        assert_eq!(sids, vec![0, 1, 2, 3, 4]);

        let back_lines: Vec<&str> = records
            .iter()
            .filter_map(|r| match r {
                OrderedRecord::Raw { pod, text, .. } if pod.name == "back-0" => Some(text.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(back_lines, vec!["a", "b", "c"]);
        assert_eq!(
            records.iter().filter(|r| matches!(r, OrderedRecord::Parsed(_))).count(),
            1
        );
    }

    #[tokio::test]
    async fn test_invalid_utf8_keeps_reading_the_log() {
        let cluster = ScriptedCluster::default()
            .script("front-0", vec![Reply::Bytes(b"first\nbad \xff byte\nlast\n")]);
        let loader = PodLogsLoader::new(Arc::new(cluster), config(), 0);
        let sink = Arc::new(CollectingSink::default());
        loader.start(sink.clone());
        loader.load_logs(worker("front-0", chrono::Duration::seconds(1)));
        wait_until(|| sink.len() == 3).await;

        let records = sink.0.lock().unwrap();
        let texts: Vec<&str> = records
            .iter()
            .filter_map(|r| match r {
                OrderedRecord::Raw { text, .. } => Some(text.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(texts, vec!["first", "bad \u{FFFD} byte", "last"]);
    }

    #[tokio::test]
    async fn test_first_sid_continues_numbering() {
        let cluster = ScriptedCluster::default().script("front-0", vec![Reply::Log("x\n")]);
        let loader = PodLogsLoader::new(Arc::new(cluster), config(), 43);
        let sink = Arc::new(CollectingSink::default());
        loader.start(sink.clone());
        loader.load_logs(worker("front-0", chrono::Duration::seconds(1)));
        wait_until(|| sink.len() == 1).await;
        assert_eq!(sink.0.lock().unwrap()[0].sid(), 43);
    }

    #[tokio::test]
    async fn test_not_ready_young_worker_is_retried() {
        let cluster = Arc::new(ScriptedCluster::default().script(
            "front-0",
            vec![Reply::NotReady, Reply::NotReady, Reply::Log("ready\n")],
        ));
        let loader = PodLogsLoader::new(cluster.clone(), config(), 0);
        let sink = Arc::new(CollectingSink::default());
        loader.start(sink.clone());

        let front = worker("front-0", chrono::Duration::seconds(10));
        loader.load_logs(front.clone());
        wait_until(|| sink.len() == 1).await;
        assert_eq!(cluster.calls.load(Ordering::SeqCst), 3);
        assert!(!loader.is_ignored(&front.run_id()));
    }

    #[tokio::test]
    async fn test_not_ready_old_worker_is_ignored_for_good() {
        let cluster = Arc::new(ScriptedCluster::default().script("front-0", vec![Reply::NotReady]));
        let loader = PodLogsLoader::new(cluster.clone(), config(), 0);

        let front = worker("front-0", chrono::Duration::minutes(10));
        assert!(loader.load_logs(front.clone()));
        wait_until(|| loader.is_ignored(&front.run_id())).await;

        assert!(!loader.load_logs(front.clone()));
        assert_eq!(cluster.calls.load(Ordering::SeqCst), 1);
        assert_eq!(loader.ignored()[0].1, "container is creating");
    }

    #[tokio::test]
    async fn test_other_failure_is_abandoned_not_ignored() {
        let cluster = Arc::new(ScriptedCluster::default().script("front-0", vec![Reply::Fail]));
        let loader = PodLogsLoader::new(cluster.clone(), config(), 0);

        let front = worker("front-0", chrono::Duration::minutes(10));
        assert!(loader.load_logs(front.clone()));
        wait_until(|| !loader.is_loading(&front.run_id())).await;
        assert!(!loader.is_ignored(&front.run_id()));

        // Abandoned runs may be picked up again by the next discovery round
        assert!(loader.load_logs(front));
        wait_until(|| cluster.calls.load(Ordering::SeqCst) == 2).await;
    }

    #[tokio::test]
    async fn test_running_reader_is_not_duplicated() {
        let cluster = Arc::new(ScriptedCluster::default().script(
            "front-0",
            vec![Reply::NotReady],
        ));
        let config = IngestConfig {
            retry_delay: Duration::from_secs(60),
            give_up_after: Duration::from_secs(300),
        };
        let loader = PodLogsLoader::new(cluster.clone(), config, 0);

        let front = worker("front-0", chrono::Duration::seconds(1));
        assert!(loader.load_logs(front.clone()));
        assert!(!loader.load_logs(front.clone()));
        assert!(loader.is_loading(&front.run_id()));

        // Restarted pod: same name, new run
        let restarted = worker("front-0", chrono::Duration::zero());
        assert!(loader.load_logs(restarted));
        loader.shutdown();
        assert!(!loader.is_loading(&front.run_id()));
    }
}
