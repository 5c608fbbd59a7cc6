//! HTTP/SSE shell for the broadcast engine.
//!
//! Accepts uploaded media over multipart, runs one broadcast at a time and
//! streams every progress event back as server-sent events.

pub mod routes;
pub mod server;
pub mod upload;

pub use server::{build_router, serve, AppState};
