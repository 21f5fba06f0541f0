use crate::source::record::ParsedEvent;
use crate::wire::schema::OutElement;
use std::collections::HashMap;
use std::io::{self, Write};

/// Streams events into the wire format.
///
/// The opening bracket is written on construction and the closing one by
/// [`EventWriter::finish`]. Pod ids are assigned per distinct run id, in first
/// seen order within this stream.
pub struct EventWriter<W: Write> {
    out: W,
    pods: HashMap<String, u32>,
    elements: usize,
    events: usize,
}

impl<W: Write> EventWriter<W> {
    pub fn new(mut out: W) -> io::Result<Self> {
        out.write_all(b"[")?;
        Ok(Self {
            out,
            pods: HashMap::new(),
            elements: 0,
            events: 0,
        })
    }

    pub fn send(&mut self, event: &ParsedEvent) -> io::Result<()> {
        let run_id = event.pod.run_id();
        let pod_id = match self.pods.get(&run_id) {
            Some(id) => *id,
            None => {
                let id = self.pods.len() as u32;
                self.write_element(&OutElement::Pod {
                    id,
                    name: &event.pod.name,
                    started_at: event.pod.started_at.timestamp_millis(),
                })?;
                self.pods.insert(run_id, id);
                id
            }
        };

        self.write_element(&OutElement::Event {
            sid: event.sid,
            pod: pod_id,
            time: event.time,
            data: &event.data,
        })?;
        self.events += 1;
        Ok(())
    }

    /// Number of events sent so far.
    pub fn events_written(&self) -> usize {
        self.events
    }

    /// Close the array and flush. Returns the underlying writer.
    pub fn finish(mut self) -> io::Result<W> {
        self.out.write_all(b"\n]")?;
        self.out.flush()?;
        Ok(self.out)
    }

    fn write_element(&mut self, element: &OutElement<'_>) -> io::Result<()> {
        if self.elements > 0 {
            self.out.write_all(b",")?;
        }
        self.out.write_all(b"\n")?;
        serde_json::to_writer(&mut self.out, element)?;
        self.elements += 1;
        Ok(())
    }
}
