//! Typed client for the engine's HTTP API

mod client;
mod logs;
mod stats;
mod wire;

pub use client::{EngineClient, StatsStream, API_VERSION};
pub use logs::demux_log_stream;
