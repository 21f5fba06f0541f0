use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One element of the wire array, as written.
///
/// Pod elements come before the events referencing them; events carry the
/// compact pod id instead of the full pod info.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub(crate) enum OutElement<'a> {
    Pod {
        id: u32,
        name: &'a str,
        #[serde(rename = "startedAt")]
        started_at: i64,
    },
    Event {
        sid: i64,
        pod: u32,
        time: i64,
        data: &'a Map<String, Value>,
    },
}

/// One element of the wire array, as read back.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub(crate) enum InElement {
    Pod {
        id: u32,
        name: String,
        #[serde(rename = "startedAt")]
        started_at: i64,
    },
    Event {
        sid: i64,
        pod: u32,
        time: i64,
        data: Map<String, Value>,
    },
}
