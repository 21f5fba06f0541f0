//! Per worker log collection: one reading task per worker run, a discovery
//! loop over the cluster, and the job primitives both are built on.

pub mod job;
pub mod loader;
pub mod watcher;

pub use job::{JobMap, JobSlot};
pub use loader::PodLogsLoader;
pub use watcher::WorkerWatcher;
