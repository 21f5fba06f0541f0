use crate::source::record::{OrderedRecord, ParsedEvent};
use crate::storage::traits::{Collector, EventSearch, Generation, StorageError};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError, RwLock};
use std::time::Instant;

/// Sorted view of the generation's events by one key.
///
/// New events go to `pending` under a short lock. They are merged into `data`
/// by the first reader that finds them there.
struct Index {
    pending: Mutex<Vec<Arc<ParsedEvent>>>,
    data: RwLock<Vec<Arc<ParsedEvent>>>,
    key: fn(&ParsedEvent) -> i64,
}

impl Index {
    fn by_sid() -> Self {
        Self::new(|event| event.sid)
    }

    fn by_time() -> Self {
        Self::new(|event| event.time)
    }

    fn new(key: fn(&ParsedEvent) -> i64) -> Self {
        Self {
            pending: Mutex::new(Vec::new()),
            data: RwLock::new(Vec::new()),
            key,
        }
    }

    fn push(&self, event: Arc<ParsedEvent>) {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }

    fn merge_pending(&self) {
        let has_pending = !self
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_empty();
        if !has_pending {
            return;
        }

        // Drain under the write lock so that two mergers can't append their
        // chunks in the opposite order.
        let mut data = self.data.write().unwrap_or_else(PoisonError::into_inner);
        let mut arrived = std::mem::take(&mut *self.pending.lock().unwrap_or_else(PoisonError::into_inner));
        let key = self.key;
        arrived.sort_by_key(|event| key(event));
        let Some(first) = arrived.first() else {
            return;
        };
        // Sids usually arrive in order, times only roughly.
        let in_order = data.last().map_or(true, |last| key(last) <= key(first));
        data.extend(arrived);
        if !in_order {
            data.sort_by_key(|event| key(event));
        }
    }

    /// Events with key `>= from`, in key order.
    fn tail_from(&self, from: i64) -> Vec<Arc<ParsedEvent>> {
        self.merge_pending();
        let data = self.data.read().unwrap_or_else(PoisonError::into_inner);
        let key = self.key;
        let start = data.partition_point(|event| key(event) < from);
        data[start..].to_vec()
    }
}

/// The mutable in-memory generation.
///
/// Lifecycle: active, then deactivated (still queryable, rejects new events),
/// then terminated once a write has taken it over.
pub struct MemoryGeneration {
    by_sid: Index,
    by_time: Index,
    size: AtomicUsize,
    /// Held shared while receiving, exclusively by lifecycle transitions.
    gate: RwLock<()>,
    active: AtomicBool,
    terminated: AtomicBool,
    retired_at: OnceLock<Instant>,
}

impl Default for MemoryGeneration {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryGeneration {
    pub fn new() -> Self {
        Self {
            by_sid: Index::by_sid(),
            by_time: Index::by_time(),
            size: AtomicUsize::new(0),
            gate: RwLock::new(()),
            active: AtomicBool::new(true),
            terminated: AtomicBool::new(false),
            retired_at: OnceLock::new(),
        }
    }

    /// Store a record.
    ///
    /// Returns the size after storing, or `None` if the generation no longer
    /// accepts records and the caller has to use a newer one. Raw records
    /// are not stored.
    pub fn receive_event(&self, record: &OrderedRecord) -> Result<Option<usize>, StorageError> {
        let _gate = self.gate.read().unwrap_or_else(PoisonError::into_inner);
        if !self.active.load(Ordering::Acquire) {
            return Ok(None);
        }
        if self.terminated.load(Ordering::Acquire) {
            return Err(StorageError::Terminated);
        }

        match record {
            OrderedRecord::Raw { .. } => Ok(Some(self.len())),
            OrderedRecord::Parsed(event) => {
                self.by_sid.push(Arc::clone(event));
                self.by_time.push(Arc::clone(event));
                Ok(Some(self.size.fetch_add(1, Ordering::AcqRel) + 1))
            }
        }
    }

    /// Stop accepting records. Once this returns no concurrent
    /// [`receive_event`](Self::receive_event) can still add one.
    pub fn deactivate(&self) {
        let _gate = self.gate.write().unwrap_or_else(PoisonError::into_inner);
        self.active.store(false, Ordering::Release);
        self.retired_at.get_or_init(Instant::now);
    }

    pub fn terminate(&self) {
        let _gate = self.gate.write().unwrap_or_else(PoisonError::into_inner);
        self.terminated.store(true, Ordering::Release);
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::Acquire)
    }

    pub fn retired_at(&self) -> Option<Instant> {
        self.retired_at.get().copied()
    }

    /// True if the generation was deactivated at or before `deadline`.
    pub fn retired_before(&self, deadline: Instant) -> bool {
        self.retired_at().is_some_and(|at| at <= deadline)
    }

    pub fn len(&self) -> usize {
        self.size.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Generation for MemoryGeneration {
    fn search_event(
        &self,
        query: &EventSearch,
        collector: &mut Collector<'_>,
    ) -> Result<(), StorageError> {
        let candidates = match (query.from_sid, query.from_time) {
            (Some(sid), _) => self.by_sid.tail_from(sid),
            (None, None) => self.by_sid.tail_from(i64::MIN),
            (None, Some(time)) => self.by_time.tail_from(time),
        };
        for event in candidates.iter().filter(|event| query.matches(event)) {
            collector(event)?;
        }
        Ok(())
    }
}
