pub mod reader;
pub mod record;
pub mod timestamp;

pub use reader::{parse_line, PodLogReader, ReaderError};
pub use record::{OrderedRecord, ParsedEvent, RawRecord, WorkerInfo};
