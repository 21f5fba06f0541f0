use crate::source::record::OrderedRecord;
use crate::storage::disk::{DiskGeneration, SegmentInfo};
use crate::storage::memory::MemoryGeneration;
use crate::storage::traits::{Collector, EventSearch, EventSink, Generation, StorageError};
use crate::storage::write::{WriteCallback, WriteGeneration};
use arc_swap::ArcSwap;
use serde::Serialize;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageSettings {
    /// The active generation is retired when it holds this many events.
    pub max_memory_generation: usize,
    /// Minimal time a retired generation stays in memory before it is written.
    pub min_retirement: Duration,
    /// Remove all files from the root on open.
    pub clear_on_start: bool,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            max_memory_generation: 7000,
            min_retirement: Duration::from_secs(1),
            clear_on_start: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StorageStats {
    pub active_events: usize,
    pub just_retired_events: usize,
    pub retired_generations: usize,
    pub retired_events: usize,
    /// Events of the in-flight write, if any.
    pub writing_events: Option<usize>,
    pub segments: usize,
}

/// One consistent view of all generations. Never mutated, every transition
/// installs a new snapshot.
#[derive(Clone)]
struct Generations {
    active: Arc<MemoryGeneration>,
    just_retired: Option<Arc<MemoryGeneration>>,
    /// Oldest first.
    retired: Vec<Arc<MemoryGeneration>>,
    write: Option<Arc<WriteGeneration>>,
    disk: Arc<DiskGeneration>,
}

impl Generations {
    fn new(disk: DiskGeneration) -> Self {
        Self {
            active: Arc::new(MemoryGeneration::new()),
            just_retired: None,
            retired: Vec::new(),
            write: None,
            disk: Arc::new(disk),
        }
    }

    /// Fresh active generation, the active one becomes just retired.
    fn retire_active(&self) -> Self {
        let mut retired = self.retired.clone();
        if let Some(just_retired) = self.just_retired.as_ref().filter(|g| !g.is_empty()) {
            retired.push(Arc::clone(just_retired));
        }
        Self {
            active: Arc::new(MemoryGeneration::new()),
            just_retired: Some(Arc::clone(&self.active)),
            retired,
            write: self.write.clone(),
            disk: Arc::clone(&self.disk),
        }
    }

    /// Hand the generations wrapped by `write` over from `retired`.
    fn begin_write(&self, write: Arc<WriteGeneration>) -> Self {
        Self {
            retired: self
                .retired
                .iter()
                .filter(|g| !write.contains(g))
                .cloned()
                .collect(),
            write: Some(write),
            ..self.clone()
        }
    }

    /// Clear the write slot. A written segment joins the catalog, the
    /// generations of a failed write go back to the head of `retired`.
    fn end_write(&self, result: &Result<PathBuf, StorageError>) -> Self {
        let mut update = Self {
            write: None,
            ..self.clone()
        };
        match result {
            Ok(path) => update.disk = Arc::new(self.disk.with_file(path)),
            Err(StorageError::EmptyWrite) => {}
            Err(_) => {
                if let Some(write) = &self.write {
                    update.retired = write
                        .generations()
                        .iter()
                        .chain(self.retired.iter())
                        .cloned()
                        .collect();
                }
            }
        }
        update
    }

    fn stats(&self) -> StorageStats {
        StorageStats {
            active_events: self.active.len(),
            just_retired_events: self.just_retired.as_ref().map_or(0, |g| g.len()),
            retired_generations: self.retired.len(),
            retired_events: self.retired.iter().map(|g| g.len()).sum(),
            writing_events: self.write.as_ref().map(|w| w.total_events()),
            segments: self.disk.file_count(),
        }
    }
}

impl Generation for Generations {
    fn search_event(
        &self,
        query: &EventSearch,
        collector: &mut Collector<'_>,
    ) -> Result<(), StorageError> {
        self.active.search_event(query, collector)?;
        if let Some(just_retired) = &self.just_retired {
            just_retired.search_event(query, collector)?;
        }
        for retired in &self.retired {
            retired.search_event(query, collector)?;
        }
        if let Some(write) = &self.write {
            write.search_event(query, collector)?;
        }
        self.disk.search_event(query, collector)
    }
}

impl fmt::Display for Generations {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stats = self.stats();
        write!(
            f,
            "[active: {}, justRetired: {}, totalRetired: {}/{}, write: ",
            stats.active_events,
            stats.just_retired_events,
            stats.retired_events,
            stats.retired_generations
        )?;
        match stats.writing_events {
            Some(events) => write!(f, "{}", events)?,
            None => f.write_str("none")?,
        }
        write!(f, ", files: {}]", stats.segments)
    }
}

/// Routes incoming events and queries across all generations.
///
/// The generations snapshot is replaced with compare-and-swap only; losing a
/// race means retrying against the newer snapshot.
pub struct GenerationManager {
    root: PathBuf,
    settings: StorageSettings,
    state: ArcSwap<Generations>,
    this: Weak<GenerationManager>,
}

impl GenerationManager {
    /// Open the store in `root`, creating the directory if needed.
    pub fn open(root: impl Into<PathBuf>, settings: StorageSettings) -> Result<Arc<Self>, StorageError> {
        let root = root.into();
        if !root.exists() {
            fs::create_dir_all(&root)?;
        }
        if !root.is_dir() {
            return Err(StorageError::NotADirectory(root));
        }
        if settings.clear_on_start {
            clear_directory(&root)?;
        }

        let disk = DiskGeneration::load(&root)?;
        info!(
            root = %root.display(),
            segments = disk.file_count(),
            max_memory_generation = settings.max_memory_generation,
            "Storage opened"
        );

        Ok(Arc::new_cyclic(|this| Self {
            root,
            settings,
            state: ArcSwap::from_pointee(Generations::new(disk)),
            this: this.clone(),
        }))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn settings(&self) -> &StorageSettings {
        &self.settings
    }

    /// Store a sequenced record. Raw records are dropped.
    pub fn receive_event(&self, record: &OrderedRecord) {
        if let OrderedRecord::Raw { pod, sid, text } = record {
            debug!(pod = %pod, sid, text = %text, "Dropping raw record");
            return;
        }

        loop {
            let current = self.state.load_full();
            match current.active.receive_event(record) {
                // Retired under our feet, try the new active generation
                Ok(None) => continue,
                Ok(Some(size)) => {
                    if size >= self.settings.max_memory_generation {
                        self.retire_generation(&current.active);
                    }
                    return;
                }
                Err(e) => {
                    error!(sid = record.sid(), error = %e, "Active generation rejected event");
                    return;
                }
            }
        }
    }

    /// Retire `generation` if it is still the active one.
    pub fn retire_generation(&self, generation: &Arc<MemoryGeneration>) {
        loop {
            let current = self.state.load_full();
            if !Arc::ptr_eq(&current.active, generation) {
                return;
            }
            let update = Arc::new(current.retire_active());
            let previous = self.state.compare_and_swap(&current, Arc::clone(&update));
            if Arc::ptr_eq(&*previous, &current) {
                generation.deactivate();
                info!(generations = %update, "Memory generation retired");
                break;
            }
        }
        self.maybe_write_to_disk();
    }

    /// Start writing the retired generations whose cooldown has passed,
    /// unless a write is already running.
    pub fn maybe_write_to_disk(&self) {
        loop {
            let current = self.state.load_full();
            if current.write.is_some() {
                return;
            }
            let Some(deadline) = Instant::now().checked_sub(self.settings.min_retirement) else {
                return;
            };
            let ready: Vec<_> = current
                .retired
                .iter()
                .filter(|g| g.retired_before(deadline))
                .cloned()
                .collect();
            if ready.is_empty() {
                return;
            }

            let write = WriteGeneration::new(&self.root, ready);
            let update = Arc::new(current.begin_write(Arc::clone(&write)));
            let previous = self.state.compare_and_swap(&current, Arc::clone(&update));
            if Arc::ptr_eq(&*previous, &current) {
                info!(generations = %update, "Write started");
                write.start_write(self.write_callback(&write));
                return;
            }
        }
    }

    fn write_callback(&self, write: &Arc<WriteGeneration>) -> Arc<WriteCallback> {
        let manager = self.this.clone();
        let write = Arc::clone(write);
        Arc::new(move |result| {
            if let Some(manager) = manager.upgrade() {
                manager.finish_write(&write, result);
            }
        })
    }

    fn finish_write(&self, write: &Arc<WriteGeneration>, result: Result<PathBuf, StorageError>) {
        match &result {
            Ok(_) => {}
            Err(StorageError::EmptyWrite) => {
                error!("Write generation had no events, retired generations were empty")
            }
            Err(e) => error!(error = %e, "Write failed, will retry"),
        }

        loop {
            let current = self.state.load_full();
            let is_current = current
                .write
                .as_ref()
                .is_some_and(|installed| Arc::ptr_eq(installed, write));
            if !is_current {
                warn!("Completed write is not the installed one");
                return;
            }
            let update = Arc::new(current.end_write(&result));
            let previous = self.state.compare_and_swap(&current, Arc::clone(&update));
            if Arc::ptr_eq(&*previous, &current) {
                info!(generations = %update, "Write finished");
                break;
            }
        }

        if result.is_ok() {
            self.maybe_write_to_disk();
        }
    }

    /// Periodic maintenance: flush retired generations even when no new
    /// events arrive.
    pub fn tick(&self) {
        self.maybe_write_to_disk();
    }

    /// Run `query` against every generation, newest first. Failures are
    /// logged and end the search.
    pub fn search_event(&self, query: &EventSearch, collector: &mut Collector<'_>) {
        let current = self.state.load_full();
        if let Err(e) = current.search_event(query, collector) {
            warn!(error = %e, ?query, "Search failed");
        }
    }

    pub fn stats(&self) -> StorageStats {
        self.state.load().stats()
    }

    pub fn segments(&self) -> Vec<SegmentInfo> {
        self.state.load().disk.segments().to_vec()
    }

    /// First sid not used by any stored segment.
    pub fn next_sid(&self) -> i64 {
        self.state.load().disk.last_sid().map_or(0, |sid| sid + 1)
    }
}

impl EventSink for GenerationManager {
    fn receive_event(&self, record: OrderedRecord) {
        GenerationManager::receive_event(self, &record);
    }
}

fn clear_directory(root: &Path) -> Result<(), StorageError> {
    for entry in fs::read_dir(root)? {
        let path = entry?.path();
        if path.is_dir() {
            warn!(path = %path.display(), "Leaving directory in storage root");
            continue;
        }
        fs::remove_file(&path)?;
    }
    Ok(())
}
