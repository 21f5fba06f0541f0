use crate::storage::{EventSearch, GenerationManager, StorageStats};
use crate::wire::EventWriter;
use axum::{
    body::Body,
    extract::{Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::io::{self, Write};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::debug;

/// Response body chunks handed from the blocking search to the HTTP body.
const CHUNK_SIZE: usize = 16 * 1024;
const CHUNKS_IN_FLIGHT: usize = 16;

/// Shared state for the query API
pub struct AppState {
    pub manager: Arc<GenerationManager>,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(manager: Arc<GenerationManager>) -> Self {
        Self {
            manager,
            start_time: Instant::now(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct EventsParams {
    pub sid: Option<String>,
    pub time: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub version: String,
    pub uptime_seconds: u64,
    pub storage: StorageStats,
}

/// GET /api/events?sid=N&time=MILLIS
///
/// Streams every stored event with `sid >= N` and `time >= MILLIS` in the
/// wire format. Both parameters are optional.
pub async fn get_events(
    State(state): State<Arc<AppState>>,
    Query(params): Query<EventsParams>,
) -> Result<Response, ApiError> {
    let query = EventSearch::new(
        parse_param("sid", params.sid.as_deref())?,
        parse_param("time", params.time.as_deref())?,
    );

    let (sender, receiver) = mpsc::channel(CHUNKS_IN_FLIGHT);
    let manager = Arc::clone(&state.manager);
    tokio::task::spawn_blocking(move || stream_events(&manager, &query, ChunkSender::new(sender)));

    let body = Body::from_stream(futures::stream::unfold(receiver, |mut receiver| async move {
        receiver.recv().await.map(|chunk| (chunk, receiver))
    }));
    Ok((
        [(header::CONTENT_TYPE, "application/json; charset=utf-8")],
        body,
    )
        .into_response())
}

/// GET /api/status
pub async fn get_status(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    Json(StatusResponse {
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        storage: state.manager.stats(),
    })
}

/// GET /health
pub async fn health_check() -> &'static str {
    "OK"
}

fn parse_param(name: &str, value: Option<&str>) -> Result<Option<i64>, ApiError> {
    value
        .map(|raw| {
            raw.trim().parse::<i64>().map_err(|e| {
                ApiError::BadRequest(format!("Invalid '{}' parameter '{}': {}", name, raw, e))
            })
        })
        .transpose()
}

fn stream_events(manager: &GenerationManager, query: &EventSearch, out: ChunkSender) {
    let mut writer = match EventWriter::new(out) {
        Ok(writer) => writer,
        Err(e) => {
            debug!(error = %e, "Client went away before the response started");
            return;
        }
    };
    manager.search_event(query, &mut |event| Ok(writer.send(event)?));
    let sent = writer.events_written();
    match writer.finish() {
        Ok(_) => debug!(?query, events = sent, "Events sent"),
        Err(e) => debug!(?query, error = %e, "Client went away"),
    }
}

/// Buffers the encoded response and passes it on in chunks. Blocks while the
/// channel is full, so a slow client slows the search down.
struct ChunkSender {
    buffer: Vec<u8>,
    sender: mpsc::Sender<io::Result<Vec<u8>>>,
}

impl ChunkSender {
    fn new(sender: mpsc::Sender<io::Result<Vec<u8>>>) -> Self {
        Self {
            buffer: Vec::with_capacity(CHUNK_SIZE),
            sender,
        }
    }

    fn send_chunk(&mut self) -> io::Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        let chunk = std::mem::replace(&mut self.buffer, Vec::with_capacity(CHUNK_SIZE));
        self.sender
            .blocking_send(Ok(chunk))
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "response body dropped"))
    }
}

impl Write for ChunkSender {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer.extend_from_slice(buf);
        if self.buffer.len() >= CHUNK_SIZE {
            self.send_chunk()?;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.send_chunk()
    }
}

// Error handling
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::BadRequest(message) => (
                StatusCode::BAD_REQUEST,
                [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
                message,
            )
                .into_response(),
        }
    }
}
