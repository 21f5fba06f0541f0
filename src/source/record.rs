use crate::source::timestamp::format_instant;
use chrono::{DateTime, SubsecRound, Utc};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;

/// Basic info about one lifetime of a worker process (pod).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WorkerInfo {
    pub name: String,
    pub started_at: DateTime<Utc>,
}

impl WorkerInfo {
    /// `started_at` is kept at millisecond precision, the precision stored
    /// in segment files.
    pub fn new(name: impl Into<String>, started_at: DateTime<Utc>) -> Self {
        Self {
            name: name.into(),
            started_at: started_at.trunc_subsecs(3),
        }
    }

    /// Identifies one run of the process. A restarted pod with the same name
    /// gets a different run id.
    pub fn run_id(&self) -> String {
        format!("{}={}", self.name, format_instant(&self.started_at))
    }
}

impl fmt::Display for WorkerInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.name, format_instant(&self.started_at))
    }
}

/// A log line as it arrives from a worker's log stream, before ordering.
#[derive(Debug, Clone)]
pub enum RawRecord {
    /// Unparsed text. This is also the fallback when a JSON line fails to parse.
    Raw { pod: Arc<WorkerInfo>, text: String },
    /// A JSON object line together with its original text.
    Parsed {
        pod: Arc<WorkerInfo>,
        data: Map<String, Value>,
        original: String,
    },
}

impl RawRecord {
    pub fn pod(&self) -> &Arc<WorkerInfo> {
        match self {
            RawRecord::Raw { pod, .. } | RawRecord::Parsed { pod, .. } => pod,
        }
    }
}

/// A record stored in the event database: it has a sid and an extracted time.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedEvent {
    pub pod: Arc<WorkerInfo>,
    /// Sequential id. Every record regardless of its source pod gets a unique
    /// sid, and a record received later always has a greater one. Note that
    /// a "newer" record may carry an earlier timestamp than one from another pod.
    pub sid: i64,
    /// Event time in epoch millis, taken from the `@timestamp` field.
    pub time: i64,
    pub data: Map<String, Value>,
}

/// A received record with its sid assigned.
#[derive(Debug, Clone, PartialEq)]
pub enum OrderedRecord {
    Raw {
        pod: Arc<WorkerInfo>,
        sid: i64,
        text: String,
    },
    Parsed(Arc<ParsedEvent>),
}

impl OrderedRecord {
    pub fn sid(&self) -> i64 {
        match self {
            OrderedRecord::Raw { sid, .. } => *sid,
            OrderedRecord::Parsed(event) => event.sid,
        }
    }

    pub fn pod(&self) -> &Arc<WorkerInfo> {
        match self {
            OrderedRecord::Raw { pod, .. } => pod,
            OrderedRecord::Parsed(event) => &event.pod,
        }
    }
}
