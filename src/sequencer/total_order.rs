use crate::source::record::{OrderedRecord, ParsedEvent, RawRecord};
use crate::source::timestamp::{parse_timestamp, TIMESTAMP_FIELD};
use serde_json::Value;
use std::sync::Arc;

/// Converts [`RawRecord`]s into [`OrderedRecord`]s.
///
/// The important part is the sid assignment, which establishes the total order
/// over all records from all pods. The `@timestamp` field is also moved out of
/// the record data into [`ParsedEvent::time`].
///
/// Assignment takes `&mut self`: the sequence is owned by the single dispatch
/// task and never shared.
#[derive(Debug, Default)]
pub struct TotalOrder {
    next_sid: i64,
}

impl TotalOrder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Continue a sequence, e.g. after segments written by a previous run.
    pub fn starting_at(next_sid: i64) -> Self {
        Self { next_sid }
    }

    pub fn next_sid(&self) -> i64 {
        self.next_sid
    }

    pub fn assign(&mut self, raw: RawRecord) -> OrderedRecord {
        let sid = self.next_sid;
        self.next_sid += 1;

        match raw {
            RawRecord::Raw { pod, text } => OrderedRecord::Raw { pod, sid, text },
            RawRecord::Parsed {
                pod,
                mut data,
                original,
            } => {
                let time = match data.get(TIMESTAMP_FIELD) {
                    Some(Value::String(value)) => parse_timestamp(value).ok(),
                    _ => None,
                };
                match time {
                    Some(time) => {
                        data.remove(TIMESTAMP_FIELD);
                        OrderedRecord::Parsed(Arc::new(ParsedEvent {
                            pod,
                            sid,
                            time: time.timestamp_millis(),
                            data,
                        }))
                    }
                    None => OrderedRecord::Raw {
                        pod,
                        sid,
                        text: original,
                    },
                }
            }
        }
    }
}
