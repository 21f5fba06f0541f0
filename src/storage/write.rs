use crate::ingest::job::JobSlot;
use crate::source::timestamp::from_epoch_millis;
use crate::storage::disk::segment_file_name;
use crate::storage::memory::MemoryGeneration;
use crate::storage::traits::{Collector, EventSearch, Generation, StorageError};
use crate::wire::EventWriter;
use std::fs::{self, File};
use std::io::{self, BufWriter};
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use tracing::{debug, warn};

/// Called once the write job is done, with the path of the new segment.
pub type WriteCallback = dyn Fn(Result<PathBuf, StorageError>) + Send + Sync;

/// Flushes a fixed set of retired memory generations into one segment file.
///
/// Until the owner replaces it with the written segment, the write generation
/// keeps answering queries from the wrapped memory generations.
pub struct WriteGeneration {
    memory: Vec<Arc<MemoryGeneration>>,
    root: PathBuf,
    written: OnceLock<PathBuf>,
    job: JobSlot,
}

impl WriteGeneration {
    pub fn new(root: impl Into<PathBuf>, memory: Vec<Arc<MemoryGeneration>>) -> Arc<Self> {
        Arc::new(Self {
            memory,
            root: root.into(),
            written: OnceLock::new(),
            job: JobSlot::new(),
        })
    }

    pub fn generations(&self) -> &[Arc<MemoryGeneration>] {
        &self.memory
    }

    pub fn contains(&self, generation: &Arc<MemoryGeneration>) -> bool {
        self.memory.iter().any(|g| Arc::ptr_eq(g, generation))
    }

    pub fn total_events(&self) -> usize {
        self.memory.iter().map(|g| g.len()).sum()
    }

    pub fn written_file(&self) -> Option<&Path> {
        self.written.get().map(PathBuf::as_path)
    }

    /// Terminate the wrapped generations and write them in the background.
    /// Calling it again while the write is running does nothing.
    pub fn start_write(self: &Arc<Self>, on_complete: Arc<WriteCallback>) {
        for generation in &self.memory {
            generation.terminate();
        }

        let this = Arc::clone(self);
        self.job.ensure_started(move || {
            let this = Arc::clone(&this);
            let on_complete = Arc::clone(&on_complete);
            async move {
                let writer = Arc::clone(&this);
                let result = match tokio::task::spawn_blocking(move || writer.do_write()).await {
                    Ok(result) => result,
                    Err(e) => Err(StorageError::Io(io::Error::new(io::ErrorKind::Other, e))),
                };
                on_complete(result);
            }
        });
    }

    fn do_write(&self) -> Result<PathBuf, StorageError> {
        let mut last: Option<(i64, i64)> = None;
        self.for_each_event(&mut |event| {
            last = Some(match last {
                Some((sid, time)) => (sid.max(event.sid), time.max(event.time)),
                None => (event.sid, event.time),
            });
            Ok(())
        })?;
        let Some((last_sid, last_time)) = last else {
            return Err(StorageError::EmptyWrite);
        };

        let name = segment_file_name(&from_epoch_millis(last_time)?, last_sid);
        let path = self.root.join(&name);
        let tmp_path = self.root.join(format!("{}.tmp", name));

        if let Err(e) = self.write_segment(&tmp_path) {
            if let Err(cleanup) = fs::remove_file(&tmp_path) {
                warn!(path = %tmp_path.display(), error = %cleanup, "Failed to remove partial segment");
            }
            return Err(e);
        }
        fs::rename(&tmp_path, &path)?;
        debug!(path = %path.display(), events = self.total_events(), "Segment written");

        let _ = self.written.set(path.clone());
        Ok(path)
    }

    fn write_segment(&self, path: &Path) -> Result<(), StorageError> {
        let mut writer = EventWriter::new(BufWriter::new(File::create(path)?))?;
        self.for_each_event(&mut |event| Ok(writer.send(event)?))?;
        let file = writer
            .finish()?
            .into_inner()
            .map_err(|e| e.into_error())?;
        file.sync_all()?;
        Ok(())
    }

    fn for_each_event(&self, collector: &mut Collector<'_>) -> Result<(), StorageError> {
        for generation in &self.memory {
            generation.search_event(&EventSearch::EVERYTHING, collector)?;
        }
        Ok(())
    }
}

impl Generation for WriteGeneration {
    fn search_event(
        &self,
        query: &EventSearch,
        collector: &mut Collector<'_>,
    ) -> Result<(), StorageError> {
        for generation in &self.memory {
            generation.search_event(query, collector)?;
        }
        Ok(())
    }
}
