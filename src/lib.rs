pub mod cli;
pub mod cluster;
pub mod config;
pub mod ingest;
pub mod sequencer;
pub mod source;
pub mod storage;
pub mod web;
pub mod wire;
