use crate::source::record::{OrderedRecord, ParsedEvent};
use crate::source::timestamp::TimestampError;
use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("segment codec error: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("invalid event time: {0}")]
    Timestamp(#[from] TimestampError),

    #[error("generation terminated while still active")]
    Terminated,

    #[error("no events to write")]
    EmptyWrite,

    #[error("not a directory: {}", .0.display())]
    NotADirectory(PathBuf),
}

/// Lower bounds of an event query. Both bounds are inclusive, an absent bound
/// matches everything.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EventSearch {
    pub from_sid: Option<i64>,
    /// Epoch millis.
    pub from_time: Option<i64>,
}

impl EventSearch {
    pub const EVERYTHING: EventSearch = EventSearch {
        from_sid: None,
        from_time: None,
    };

    pub fn new(from_sid: Option<i64>, from_time: Option<i64>) -> Self {
        Self {
            from_sid,
            from_time,
        }
    }

    pub fn from_sid(sid: i64) -> Self {
        Self::new(Some(sid), None)
    }

    pub fn from_time(time: i64) -> Self {
        Self::new(None, Some(time))
    }

    pub fn matches(&self, event: &ParsedEvent) -> bool {
        if self.from_sid.is_some_and(|sid| event.sid < sid) {
            return false;
        }
        if self.from_time.is_some_and(|time| event.time < time) {
            return false;
        }
        true
    }
}

/// Receives every matching event of a search. Returning an error stops the
/// search.
pub type Collector<'a> = dyn FnMut(&ParsedEvent) -> Result<(), StorageError> + 'a;

/// A queryable batch of stored events at one lifecycle stage.
pub trait Generation: Send + Sync {
    fn search_event(&self, query: &EventSearch, collector: &mut Collector<'_>)
        -> Result<(), StorageError>;
}

/// Destination of sequenced records.
pub trait EventSink: Send + Sync {
    fn receive_event(&self, record: OrderedRecord);
}
