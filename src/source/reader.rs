use crate::source::record::{RawRecord, WorkerInfo};
use serde_json::{Map, Value};
use std::sync::Arc;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

#[derive(Debug, Error)]
pub enum ReaderError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Decodes one pod's log stream into [`RawRecord`]s, line by line.
pub struct PodLogReader<R> {
    pod: Arc<WorkerInfo>,
    reader: R,
    buf: Vec<u8>,
    lines_read: u64,
}

impl<R: AsyncBufRead + Unpin> PodLogReader<R> {
    pub fn new(pod: Arc<WorkerInfo>, reader: R) -> Self {
        Self {
            pod,
            reader,
            buf: Vec::new(),
            lines_read: 0,
        }
    }

    pub fn pod(&self) -> &Arc<WorkerInfo> {
        &self.pod
    }

    /// Read the next record, `None` at end of stream. Invalid UTF-8 is
    /// replaced with U+FFFD rather than ending the stream.
    pub async fn next_record(&mut self) -> Result<Option<RawRecord>, ReaderError> {
        self.buf.clear();
        if self.reader.read_until(b'\n', &mut self.buf).await? == 0 {
            return Ok(None);
        }
        let mut end = self.buf.len();
        if self.buf[..end].ends_with(b"\n") {
            end -= 1;
            if self.buf[..end].ends_with(b"\r") {
                end -= 1;
            }
        }
        self.lines_read += 1;
        let line = String::from_utf8_lossy(&self.buf[..end]).into_owned();
        Ok(Some(parse_line(&self.pod, line)))
    }

    pub fn lines_read(&self) -> u64 {
        self.lines_read
    }
}

/// Lines that look like a JSON object become [`RawRecord::Parsed`], everything
/// else (including JSON that fails to parse) stays raw text.
pub fn parse_line(pod: &Arc<WorkerInfo>, line: String) -> RawRecord {
    if line.starts_with('{') {
        match serde_json::from_str::<Map<String, Value>>(&line) {
            Ok(data) => {
                return RawRecord::Parsed {
                    pod: Arc::clone(pod),
                    data,
                    original: line,
                }
            }
            Err(e) => {
                tracing::trace!(pod = %pod, error = %e, "JSON-looking line kept as raw text");
            }
        }
    }
    RawRecord::Raw {
        pod: Arc::clone(pod),
        text: line,
    }
}
