use crate::source::record::{ParsedEvent, WorkerInfo};
use crate::source::timestamp::from_epoch_millis;
use crate::wire::schema::InElement;
use serde::de::{self, Deserializer as _, SeqAccess, Visitor};
use std::collections::HashMap;
use std::fmt;
use std::io::Read;
use std::marker::PhantomData;
use std::sync::Arc;

/// Decode a wire stream element by element, handing each event to `collect`.
///
/// The array is never materialized. Decoding fails on an event referencing a
/// pod id that has not been seen yet. An error returned by `collect` stops
/// decoding and is returned as is.
pub fn read_events<R, F, E>(reader: R, collect: F) -> Result<(), E>
where
    R: Read,
    F: FnMut(ParsedEvent) -> Result<(), E>,
    E: From<serde_json::Error>,
{
    let mut failure = None;
    let mut deserializer = serde_json::Deserializer::from_reader(reader);
    let result = (&mut deserializer).deserialize_seq(EventsVisitor {
        collect,
        failure: &mut failure,
        marker: PhantomData,
    });
    if let Some(e) = failure {
        return Err(e);
    }
    result?;
    deserializer.end()?;
    Ok(())
}

/// Decode a whole wire stream into memory.
pub fn decode_events<R: Read>(reader: R) -> Result<Vec<ParsedEvent>, serde_json::Error> {
    let mut events = Vec::new();
    read_events(reader, |event| {
        events.push(event);
        Ok::<(), serde_json::Error>(())
    })?;
    Ok(events)
}

struct EventsVisitor<'a, F, E> {
    collect: F,
    failure: &'a mut Option<E>,
    marker: PhantomData<fn() -> E>,
}

impl<'de, 'a, F, E> Visitor<'de> for EventsVisitor<'a, F, E>
where
    F: FnMut(ParsedEvent) -> Result<(), E>,
{
    type Value = ();

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("an array of pod and event records")
    }

    fn visit_seq<A>(mut self, mut seq: A) -> Result<(), A::Error>
    where
        A: SeqAccess<'de>,
    {
        let mut pods: HashMap<u32, Arc<WorkerInfo>> = HashMap::new();
        while let Some(element) = seq.next_element::<InElement>()? {
            match element {
                InElement::Pod {
                    id,
                    name,
                    started_at,
                } => {
                    let started_at = from_epoch_millis(started_at)
                        .map_err(<A::Error as de::Error>::custom)?;
                    pods.insert(id, Arc::new(WorkerInfo::new(name, started_at)));
                }
                InElement::Event {
                    sid,
                    pod,
                    time,
                    data,
                } => {
                    let pod = pods
                        .get(&pod)
                        .cloned()
                        .ok_or_else(|| {
                            <A::Error as de::Error>::custom(format!("unknown pod id {}", pod))
                        })?;
                    if let Err(e) = (self.collect)(ParsedEvent {
                        pod,
                        sid,
                        time,
                        data,
                    }) {
                        *self.failure = Some(e);
                        return Err(de::Error::custom("event collector failed"));
                    }
                }
            }
        }
        Ok(())
    }
}
