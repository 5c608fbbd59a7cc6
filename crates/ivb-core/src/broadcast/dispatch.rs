//! Sequential broadcast dispatcher.
//!
//! Recipients are processed one at a time, in input order. Throughput is capped
//! by the pacing delay between recipients rather than by parallelism, which
//! keeps the outbound rate predictable under Telegram's flood limits.

use std::{sync::Arc, time::Duration};

use tokio::{sync::mpsc, task::JoinHandle, time::sleep};
use tokio_util::sync::CancellationToken;

use crate::{
    broadcast::{
        events::{BroadcastEvent, BroadcastStats, SendResult},
        retry::RetryPolicy,
    },
    domain::ChatId,
    errors::Error,
    messaging::{port::BroadcastMessenger, types::MediaFile},
};

pub const DEFAULT_MESSAGE_DELAY: Duration = Duration::from_millis(200);
pub const NO_CONTENT_ERROR: &str = "No media and no caption";

/// Telegram accepts at most this many items in one media group.
pub const MAX_ALBUM_ITEMS: usize = 10;

const EVENT_BUFFER: usize = 32;

/// What to send to every recipient.
#[derive(Clone, Debug, Default)]
pub struct BroadcastPayload {
    pub media: Vec<MediaFile>,
    pub caption: Option<String>,
}

impl BroadcastPayload {
    pub fn new(media: Vec<MediaFile>, caption: Option<String>) -> Self {
        Self { media, caption }
    }

    fn caption(&self) -> Option<&str> {
        self.caption.as_deref().filter(|c| !c.trim().is_empty())
    }

    pub fn has_caption(&self) -> bool {
        self.caption().is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.media.is_empty() && !self.has_caption()
    }

    /// Reject payloads that would fail identically for every recipient.
    pub fn validate(&self) -> crate::Result<()> {
        if self.is_empty() {
            return Err(Error::Setup(NO_CONTENT_ERROR.to_string()));
        }
        if self.media.len() > MAX_ALBUM_ITEMS {
            return Err(Error::Setup(format!(
                "Too many media files ({}); an album holds at most {MAX_ALBUM_ITEMS}",
                self.media.len()
            )));
        }
        Ok(())
    }
}

/// A broadcast running on its own task.
///
/// `events` yields `Start`, one `Result` per recipient and a final `Done`;
/// `handle` resolves to the same stats carried by `Done`.
pub struct BroadcastRun {
    pub events: mpsc::Receiver<BroadcastEvent>,
    pub handle: JoinHandle<BroadcastStats>,
}

#[derive(Clone)]
pub struct Broadcaster {
    messenger: Arc<dyn BroadcastMessenger>,
    retry: RetryPolicy,
    message_delay: Duration,
}

impl Broadcaster {
    pub fn new(
        messenger: Arc<dyn BroadcastMessenger>,
        retry: RetryPolicy,
        message_delay: Duration,
    ) -> Self {
        Self {
            messenger,
            retry,
            message_delay,
        }
    }

    /// Spawn a broadcast and return its event stream.
    ///
    /// Not resumable: a new call starts over from the first recipient.
    pub fn broadcast_to_all(
        &self,
        chat_ids: Vec<ChatId>,
        payload: BroadcastPayload,
        cancel: CancellationToken,
    ) -> BroadcastRun {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let this = self.clone();
        let handle =
            tokio::spawn(async move { this.run(&chat_ids, &payload, &cancel, &tx).await });
        BroadcastRun { events: rx, handle }
    }

    /// Run a broadcast in place, pushing events into `events`.
    ///
    /// A dropped receiver does not stop the run.
    pub async fn run(
        &self,
        chat_ids: &[ChatId],
        payload: &BroadcastPayload,
        cancel: &CancellationToken,
        events: &mpsc::Sender<BroadcastEvent>,
    ) -> BroadcastStats {
        let total = chat_ids.len();
        let mut sink = EventSink::new(events);

        sink.emit(BroadcastEvent::Start {
            total,
            media_count: payload.media.len(),
            has_caption: payload.has_caption(),
        })
        .await;

        tracing::info!(
            total,
            media = payload.media.len(),
            has_caption = payload.has_caption(),
            "broadcast started"
        );

        let mut stats = BroadcastStats::default();
        let mut cancelled = false;

        for (i, chat_id) in chat_ids.iter().enumerate() {
            if cancel.is_cancelled() {
                cancelled = true;
                break;
            }

            let result = self.send_to_chat(chat_id, payload).await;
            stats.record(&result);

            sink.emit(BroadcastEvent::Result {
                chat_id: chat_id.clone(),
                index: i + 1,
                total,
                success: result.success,
                error: result.error,
                blocked: result.blocked,
            })
            .await;

            if i + 1 < total {
                tokio::select! {
                    _ = sleep(self.message_delay) => {}
                    _ = cancel.cancelled() => {}
                }
            }
        }

        if cancelled {
            tracing::warn!(processed = stats.total, total, "broadcast cancelled");
        } else {
            tracing::info!(
                total = stats.total,
                successful = stats.successful,
                failed = stats.failed,
                blocked = stats.blocked,
                "broadcast finished"
            );
        }

        sink.emit(BroadcastEvent::Done { stats, cancelled }).await;
        stats
    }

    /// Send the payload to one chat, picking text, single media or album by
    /// media count. Every send goes through the retry policy.
    pub async fn send_to_chat(&self, chat_id: &ChatId, payload: &BroadcastPayload) -> SendResult {
        let caption = payload.caption();
        let messenger = &self.messenger;

        match payload.media.as_slice() {
            [] => match caption {
                Some(text) => {
                    self.retry
                        .send_with_retry(chat_id, move || messenger.send_text(chat_id, text))
                        .await
                }
                None => SendResult::failed(NO_CONTENT_ERROR),
            },
            [single] => {
                self.retry
                    .send_with_retry(chat_id, move || messenger.send_media(chat_id, single, caption))
                    .await
            }
            album => {
                self.retry
                    .send_with_retry(chat_id, move || {
                        messenger.send_media_album(chat_id, album, caption)
                    })
                    .await
            }
        }
    }
}

struct EventSink<'a> {
    tx: &'a mpsc::Sender<BroadcastEvent>,
    closed: bool,
}

impl<'a> EventSink<'a> {
    fn new(tx: &'a mpsc::Sender<BroadcastEvent>) -> Self {
        Self { tx, closed: false }
    }

    async fn emit(&mut self, event: BroadcastEvent) {
        if self.closed {
            return;
        }
        if self.tx.send(event).await.is_err() {
            self.closed = true;
            tracing::warn!("broadcast observer went away; continuing without progress events");
        }
    }
}
