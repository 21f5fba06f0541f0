//! Generation based event store.
//!
//! Events land in the active [`MemoryGeneration`]. Once it is full it is
//! retired, and after a short cooldown the retired generations are merged into
//! one immutable segment file by a [`WriteGeneration`]. Written segments are
//! catalogued by the [`DiskGeneration`]. The [`GenerationManager`] owns the
//! current set of generations and routes writes and queries.

pub mod disk;
pub mod manager;
pub mod memory;
pub mod traits;
pub mod write;

pub use disk::{segment_file_name, DiskGeneration, SegmentInfo};
pub use manager::{GenerationManager, StorageSettings, StorageStats};
pub use memory::MemoryGeneration;
pub use traits::{Collector, EventSearch, EventSink, Generation, StorageError};
pub use write::WriteGeneration;
