//! The event transmission format shared by query responses and disk segments.
//!
//! The stream is a single JSON array of objects, each either a pod record or
//! an event record:
//!
//! ```text
//! {"type":"pod","id":0,"name":"front-0","startedAt":1704067200000}
//! {"type":"event","sid":42,"pod":0,"time":1704067201500,"data":{...}}
//! ```
//!
//! Pod records come before the events that reference them by id.

pub mod reader;
mod schema;
pub mod writer;

pub use reader::{decode_events, read_events};
pub use writer::EventWriter;
