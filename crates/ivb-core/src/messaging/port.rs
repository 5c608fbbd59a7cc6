use async_trait::async_trait;

use crate::{
    domain::ChatId,
    messaging::types::{MediaFile, SendError},
};

/// Send-only messaging port used by the broadcast dispatcher.
///
/// Implementations must never subscribe to inbound updates: a separate bot
/// process may be polling with the same credential.
#[async_trait]
pub trait BroadcastMessenger: Send + Sync {
    async fn send_text(&self, chat_id: &ChatId, text: &str) -> Result<(), SendError>;

    async fn send_media(
        &self,
        chat_id: &ChatId,
        media: &MediaFile,
        caption: Option<&str>,
    ) -> Result<(), SendError>;

    /// Send several media items as one album. The caption goes on the first
    /// item only.
    async fn send_media_album(
        &self,
        chat_id: &ChatId,
        media: &[MediaFile],
        caption: Option<&str>,
    ) -> Result<(), SendError>;
}
