use arc_swap::ArcSwapOption;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Arc, Mutex, PoisonError, Weak};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// A spawned task that does not run until [`Job::start`] is called.
///
/// Dropping or cancelling a job that was never started means its body never
/// runs.
pub struct Job {
    start: Mutex<Option<oneshot::Sender<()>>>,
    handle: JoinHandle<()>,
}

impl Job {
    /// `make` receives a weak handle to the job being built, so the body can
    /// tell whether it is still the installed job when it finishes.
    fn lazy<F, Fut>(make: F) -> Arc<Self>
    where
        F: FnOnce(Weak<Job>) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Arc::new_cyclic(|me| {
            let task = make(me.clone());
            let (start_tx, start_rx) = oneshot::channel::<()>();
            let handle = tokio::spawn(async move {
                if start_rx.await.is_ok() {
                    task.await;
                }
            });
            Self {
                start: Mutex::new(Some(start_tx)),
                handle,
            }
        })
    }

    fn start(&self) {
        let sender = self
            .start
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(sender) = sender {
            let _ = sender.send(());
        }
    }

    pub fn cancel(&self) {
        self.handle.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

fn is_job(installed: &Arc<Job>, job: &Weak<Job>) -> bool {
    std::ptr::eq(Arc::as_ptr(installed), job.as_ptr())
}

/// Holds at most one running job.
#[derive(Clone, Default)]
pub struct JobSlot {
    current: Arc<ArcSwapOption<Job>>,
}

impl JobSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a job built by `make` unless one is already running.
    ///
    /// Returns true if this call started the job. `make` may be called more
    /// than once when racing with other callers; only one of the built jobs
    /// ever runs.
    pub fn ensure_started<F, Fut>(&self, mut make: F) -> bool
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        loop {
            let current = self.current.load_full();
            if let Some(job) = &current {
                if !job.is_finished() {
                    return false;
                }
                self.current.compare_and_swap(&current, None::<Arc<Job>>);
                continue;
            }

            let slot = Arc::clone(&self.current);
            let task = make();
            let job = Job::lazy(|me| async move {
                task.await;
                let installed = slot.load_full();
                if installed.as_ref().is_some_and(|job| is_job(job, &me)) {
                    slot.compare_and_swap(&installed, None::<Arc<Job>>);
                }
            });

            let previous = self.current.compare_and_swap(&current, Some(Arc::clone(&job)));
            if same_job(&previous, &current) {
                job.start();
                return true;
            }
            job.cancel();
        }
    }

    /// True while a started job is still running.
    pub fn is_active(&self) -> bool {
        self.current
            .load_full()
            .is_some_and(|job| !job.is_finished())
    }

    pub fn cancel(&self) {
        if let Some(job) = self.current.swap(None) {
            job.cancel();
        }
    }
}

fn same_job(a: &Option<Arc<Job>>, b: &Option<Arc<Job>>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => Arc::ptr_eq(a, b),
        (None, None) => true,
        _ => false,
    }
}

/// Holds at most one running job per key.
pub struct JobMap<K> {
    jobs: Arc<DashMap<K, Arc<Job>>>,
}

impl<K> Clone for JobMap<K> {
    fn clone(&self) -> Self {
        Self {
            jobs: Arc::clone(&self.jobs),
        }
    }
}

impl<K: Eq + Hash> Default for JobMap<K> {
    fn default() -> Self {
        Self {
            jobs: Arc::new(DashMap::new()),
        }
    }
}

impl<K> JobMap<K>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Keyed version of [`JobSlot::ensure_started`].
    pub fn ensure_started<F, Fut>(&self, key: &K, mut make: F) -> bool
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        loop {
            let existing = self.jobs.get(key).map(|entry| Arc::clone(entry.value()));
            if let Some(job) = existing {
                if !job.is_finished() {
                    return false;
                }
                self.remove_job(key, &Arc::downgrade(&job));
                continue;
            }

            let jobs = self.clone();
            let owned_key = key.clone();
            let task = make();
            let job = Job::lazy(|me| async move {
                task.await;
                jobs.remove_job(&owned_key, &me);
            });

            let installed = match self.jobs.entry(key.clone()) {
                Entry::Occupied(_) => false,
                Entry::Vacant(vacant) => {
                    vacant.insert(Arc::clone(&job));
                    true
                }
            };
            if installed {
                job.start();
                return true;
            }
            job.cancel();
        }
    }

    /// Remove `job` from `key`, leaving any newer job under the same key.
    fn remove_job(&self, key: &K, job: &Weak<Job>) -> bool {
        self.jobs
            .remove_if(key, |_, installed| is_job(installed, job))
            .is_some()
    }

    pub fn is_running(&self, key: &K) -> bool {
        self.jobs
            .get(key)
            .is_some_and(|entry| !entry.value().is_finished())
    }

    /// Number of installed jobs, including finished ones not yet removed.
    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    pub fn cancel_all(&self) {
        self.jobs.retain(|_, job| {
            job.cancel();
            false
        });
    }
}
