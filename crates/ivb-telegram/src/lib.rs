//! Telegram adapter (teloxide).
//!
//! Implements the `ivb-core` [`BroadcastMessenger`] port over the Telegram Bot
//! API. Send-only: this crate never polls for updates, so it can share a token
//! with a separately running command bot.

use std::path::Path;

use async_trait::async_trait;

use teloxide::{
    prelude::*,
    types::{InputFile, InputMedia, InputMediaPhoto, InputMediaVideo, ParseMode, Recipient},
    ApiError, RequestError,
};

use ivb_core::{
    config::Config,
    domain::ChatId,
    errors::Error,
    messaging::{
        port::BroadcastMessenger,
        types::{MediaFile, MediaKind, SendError},
    },
    Result,
};

const BLOCKED_MESSAGE: &str = "Bot blocked or removed from chat";
const NOT_FOUND_MESSAGE: &str = "Chat not found or invalid";

#[derive(Clone)]
pub struct TelegramMessenger {
    bot: Bot,
}

impl TelegramMessenger {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }

    /// Build the messenger from config, failing fast without a token.
    ///
    /// Every request is bounded by `telegram_request_timeout`; a timeout is
    /// reported as a transient send failure.
    pub fn from_config(cfg: &Config) -> Result<Self> {
        let token = cfg.require_bot_token()?;
        let client = teloxide::net::default_reqwest_settings()
            .timeout(cfg.telegram_request_timeout)
            .build()
            .map_err(|e| Error::Config(format!("cannot build Telegram HTTP client: {e}")))?;
        Ok(Self::new(Bot::with_client(token, client)))
    }

    fn recipient(chat_id: &ChatId) -> Recipient {
        match chat_id {
            ChatId::Id(id) => Recipient::Id(teloxide::types::ChatId(*id)),
            ChatId::Username(name) => Recipient::ChannelUsername(name.clone()),
        }
    }

    fn input_media(media: &MediaFile, caption: Option<&str>) -> InputMedia {
        let file = InputFile::file(media.path.clone());
        match media.kind {
            MediaKind::Photo => {
                let mut item = InputMediaPhoto::new(file);
                if let Some(c) = caption {
                    item = item.caption(c.to_string()).parse_mode(caption_mode());
                }
                InputMedia::Photo(item)
            }
            MediaKind::Video => {
                let mut item = InputMediaVideo::new(file);
                if let Some(c) = caption {
                    item = item.caption(c.to_string()).parse_mode(caption_mode());
                }
                InputMedia::Video(item)
            }
        }
    }

    async fn send_photo(
        &self,
        chat_id: &ChatId,
        path: &Path,
        caption: Option<&str>,
    ) -> std::result::Result<Message, RequestError> {
        let mut req = self
            .bot
            .send_photo(Self::recipient(chat_id), InputFile::file(path.to_path_buf()));
        if let Some(c) = caption {
            req = req.caption(c.to_string()).parse_mode(caption_mode());
        }
        req.await
    }

    async fn send_video(
        &self,
        chat_id: &ChatId,
        path: &Path,
        caption: Option<&str>,
    ) -> std::result::Result<Message, RequestError> {
        let mut req = self
            .bot
            .send_video(Self::recipient(chat_id), InputFile::file(path.to_path_buf()));
        if let Some(c) = caption {
            req = req.caption(c.to_string()).parse_mode(caption_mode());
        }
        req.await
    }
}

/// Captions are operator-written Markdown.
#[allow(deprecated)]
fn caption_mode() -> ParseMode {
    ParseMode::Markdown
}

/// Map a Telegram request failure onto the broadcast retry classes.
pub fn classify(err: RequestError) -> SendError {
    tracing::debug!(error = %err, "telegram request failed");
    match err {
        RequestError::RetryAfter(retry_after) => SendError::RateLimited { retry_after },
        RequestError::Api(api) => classify_api(api),
        // The group was upgraded to a supergroup; this id no longer works.
        RequestError::MigrateToChatId(_) => SendError::Blocked(NOT_FOUND_MESSAGE.to_string()),
        other => SendError::Transient(format!("telegram error: {other}")),
    }
}

fn classify_api(api: ApiError) -> SendError {
    match api {
        ApiError::BotBlocked
        | ApiError::BotKicked
        | ApiError::BotKickedFromSupergroup
        | ApiError::UserDeactivated
        | ApiError::CantInitiateConversation
        | ApiError::CantTalkWithBots => SendError::Blocked(BLOCKED_MESSAGE.to_string()),
        ApiError::ChatNotFound | ApiError::GroupDeactivated => {
            SendError::Blocked(NOT_FOUND_MESSAGE.to_string())
        }
        ApiError::Unknown(msg) if msg.starts_with("Forbidden") => {
            SendError::Blocked(format!("{BLOCKED_MESSAGE}: {msg}"))
        }
        // Problems with the message itself fail the same way for every chat.
        rejected @ (ApiError::CantParseEntities
        | ApiError::MessageTextIsEmpty
        | ApiError::MessageIsTooLong
        | ApiError::WrongFileId
        | ApiError::WrongFileIdOrUrl
        | ApiError::PhotoAsInputFileRequired
        | ApiError::ImageProcessFailed) => {
            SendError::Rejected(format!("telegram error: {rejected}"))
        }
        other => SendError::Transient(format!("telegram error: {other}")),
    }
}

#[async_trait]
impl BroadcastMessenger for TelegramMessenger {
    async fn send_text(&self, chat_id: &ChatId, text: &str) -> std::result::Result<(), SendError> {
        self.bot
            .send_message(Self::recipient(chat_id), text.to_string())
            .parse_mode(caption_mode())
            .await
            .map(|_| ())
            .map_err(classify)
    }

    async fn send_media(
        &self,
        chat_id: &ChatId,
        media: &MediaFile,
        caption: Option<&str>,
    ) -> std::result::Result<(), SendError> {
        let res = match media.kind {
            MediaKind::Photo => self.send_photo(chat_id, &media.path, caption).await,
            MediaKind::Video => self.send_video(chat_id, &media.path, caption).await,
        };
        res.map(|_| ()).map_err(classify)
    }

    async fn send_media_album(
        &self,
        chat_id: &ChatId,
        media: &[MediaFile],
        caption: Option<&str>,
    ) -> std::result::Result<(), SendError> {
        let items: Vec<InputMedia> = media
            .iter()
            .enumerate()
            .map(|(i, m)| Self::input_media(m, if i == 0 { caption } else { None }))
            .collect();

        self.bot
            .send_media_group(Self::recipient(chat_id), items)
            .await
            .map(|_| ())
            .map_err(classify)
    }
}
