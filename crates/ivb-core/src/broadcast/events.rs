use serde::Serialize;

use crate::domain::ChatId;

/// Outcome of sending to one recipient.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SendResult {
    pub success: bool,
    pub error: Option<String>,
    /// Terminal classification: the destination refuses delivery.
    pub blocked: bool,
}

impl SendResult {
    pub fn ok() -> Self {
        Self {
            success: true,
            ..Default::default()
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            blocked: false,
        }
    }

    pub fn blocked(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            blocked: true,
        }
    }
}

/// Aggregate counters for a broadcast run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct BroadcastStats {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    pub blocked: usize,
}

impl BroadcastStats {
    pub fn record(&mut self, result: &SendResult) {
        self.total += 1;
        if result.success {
            self.successful += 1;
        } else {
            self.failed += 1;
            if result.blocked {
                self.blocked += 1;
            }
        }
    }
}

/// Progress events emitted by a broadcast run, in order:
/// one `Start`, one `Result` per recipient, one `Done`.
///
/// Serialized with a `type` tag so shells can forward them as-is.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum BroadcastEvent {
    #[serde(rename_all = "camelCase")]
    Start {
        total: usize,
        media_count: usize,
        has_caption: bool,
    },
    #[serde(rename_all = "camelCase")]
    Result {
        chat_id: ChatId,
        /// 1-based position in the recipient list.
        index: usize,
        total: usize,
        success: bool,
        error: Option<String>,
        blocked: bool,
    },
    Done {
        stats: BroadcastStats,
        #[serde(skip_serializing_if = "std::ops::Not::not")]
        cancelled: bool,
    },
    /// Setup failure reported by a shell; the run never started.
    Error { message: String },
}
