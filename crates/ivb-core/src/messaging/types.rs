use std::{path::PathBuf, time::Duration};

use serde::Serialize;

/// Kind of a sendable media asset.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Photo,
    Video,
}

/// A photo or video on local disk, ready to be sent.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MediaFile {
    pub path: PathBuf,
    pub kind: MediaKind,
    /// Display name (the original file name).
    pub name: String,
}

/// Classified failure of a single outbound send.
///
/// Messenger adapters are responsible for mapping their transport errors into
/// one of these classes; the retry engine decides what to do with each.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum SendError {
    /// The destination permanently refuses delivery (bot blocked, chat gone).
    #[error("{0}")]
    Blocked(String),

    /// Flood control; the transport asks us to wait before retrying.
    #[error("rate limited, retry after {}s", retry_after.as_secs_f64())]
    RateLimited { retry_after: Duration },

    /// The message itself is unacceptable (bad markup, bad file). Every
    /// recipient would fail the same way, so it is not retried.
    #[error("{0}")]
    Rejected(String),

    /// Anything else: network failures, timeouts, unexpected API errors.
    #[error("{0}")]
    Transient(String),
}
