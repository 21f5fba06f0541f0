//! HTTP query API over the event store.

pub mod api;
pub mod server;

pub use api::AppState;
pub use server::{router, run_server, serve};
