//! Chat platform seam.
//!
//! The moderation core talks to Telegram through the [`ChatApi`] trait so
//! managers can be exercised against a mock in tests. [`TelegramApi`] is the
//! production implementation over the throttled teloxide bot; it classifies
//! errors into the taxonomy the managers act on and retries transient
//! failures once at this boundary. State transitions are never retried
//! blindly; the managers' idempotence covers redelivery instead.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use teloxide::RequestError;
use teloxide::adaptors::Throttle;
use teloxide::prelude::*;
use teloxide::types::{
    ChatId, ChatMemberKind, ChatPermissions, InlineKeyboardButton, InlineKeyboardMarkup,
    MessageId, ParseMode, UserId,
};
use thiserror::Error;

use crate::permissions::Permissions;

/// Bot type with Throttle adaptor for automatic rate limiting.
pub type ThrottledBot = Throttle<Bot>;

/// Delay before the single transient-error retry.
const TRANSIENT_RETRY_DELAY: Duration = Duration::from_secs(2);

/// Chat API error taxonomy.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The bot lacks the rights for the call. Not retryable; surfaced to the
    /// invoking admin, no state mutation happens.
    #[error("insufficient rights: {0}")]
    Forbidden(String),

    /// Rate limiting or network trouble. Retried once at this boundary.
    #[error("transient platform error: {0}")]
    Transient(String),

    #[error("chat API error: {0}")]
    Other(String),
}

impl ApiError {
    fn classify(err: RequestError) -> Self {
        match err {
            RequestError::RetryAfter(_) | RequestError::Network(_) | RequestError::Io(_) => {
                Self::Transient(err.to_string())
            }
            RequestError::Api(ref api) => {
                let text = api.to_string().to_lowercase();
                if text.contains("not enough rights")
                    || text.contains("chat_admin_required")
                    || text.contains("administrator")
                {
                    Self::Forbidden(err.to_string())
                } else {
                    Self::Other(err.to_string())
                }
            }
            other => Self::Other(other.to_string()),
        }
    }
}

/// Operations the moderation core needs from the chat platform.
#[async_trait]
pub trait ChatApi: Send + Sync {
    /// Revoke the user's send permissions, optionally until a deadline.
    async fn restrict(
        &self,
        chat_id: ChatId,
        user_id: UserId,
        until: Option<DateTime<Utc>>,
    ) -> Result<(), ApiError>;

    /// Restore the user's full send permissions.
    async fn unrestrict(&self, chat_id: ChatId, user_id: UserId) -> Result<(), ApiError>;

    /// Remove the user from the chat without banning (they may rejoin).
    async fn kick(&self, chat_id: ChatId, user_id: UserId) -> Result<(), ApiError>;

    /// Send an HTML-formatted message, returning its id.
    async fn send_text(&self, chat_id: ChatId, text: String) -> Result<MessageId, ApiError>;

    /// Send an HTML message with an inline keyboard of (label, callback data)
    /// buttons, returning its id.
    async fn send_challenge(
        &self,
        chat_id: ChatId,
        text: String,
        buttons: Vec<(String, String)>,
    ) -> Result<MessageId, ApiError>;

    async fn delete_message(&self, chat_id: ChatId, message_id: MessageId)
    -> Result<(), ApiError>;

    /// Whether the user is a chat admin (or bot owner).
    async fn is_admin(&self, chat_id: ChatId, user_id: UserId) -> Result<bool, ApiError>;

    /// Whether the user currently lacks send permission in the chat.
    async fn is_restricted(&self, chat_id: ChatId, user_id: UserId) -> Result<bool, ApiError>;
}

/// Full member permissions, applied on unmute.
fn full_permissions() -> ChatPermissions {
    ChatPermissions::empty()
        | ChatPermissions::SEND_MESSAGES
        | ChatPermissions::SEND_AUDIOS
        | ChatPermissions::SEND_DOCUMENTS
        | ChatPermissions::SEND_PHOTOS
        | ChatPermissions::SEND_VIDEOS
        | ChatPermissions::SEND_VIDEO_NOTES
        | ChatPermissions::SEND_VOICE_NOTES
        | ChatPermissions::SEND_POLLS
        | ChatPermissions::SEND_OTHER_MESSAGES
        | ChatPermissions::ADD_WEB_PAGE_PREVIEWS
        | ChatPermissions::CHANGE_INFO
        | ChatPermissions::INVITE_USERS
        | ChatPermissions::PIN_MESSAGES
        | ChatPermissions::MANAGE_TOPICS
}

/// Teloxide-backed implementation of [`ChatApi`].
#[derive(Clone)]
pub struct TelegramApi {
    bot: ThrottledBot,
    permissions: Permissions,
}

impl TelegramApi {
    pub fn new(bot: ThrottledBot, permissions: Permissions) -> Self {
        Self { bot, permissions }
    }

    async fn try_restrict(
        &self,
        chat_id: ChatId,
        user_id: UserId,
        until: Option<DateTime<Utc>>,
    ) -> Result<(), ApiError> {
        let req = self
            .bot
            .restrict_chat_member(chat_id, user_id, ChatPermissions::empty());
        let result = match until {
            Some(dt) => req.until_date(dt).await,
            None => req.await,
        };
        result.map(|_| ()).map_err(ApiError::classify)
    }
}

#[async_trait]
impl ChatApi for TelegramApi {
    async fn restrict(
        &self,
        chat_id: ChatId,
        user_id: UserId,
        until: Option<DateTime<Utc>>,
    ) -> Result<(), ApiError> {
        let mut attempt = self.try_restrict(chat_id, user_id, until).await;
        if matches!(attempt, Err(ApiError::Transient(_))) {
            tokio::time::sleep(TRANSIENT_RETRY_DELAY).await;
            attempt = self.try_restrict(chat_id, user_id, until).await;
        }
        attempt
    }

    async fn unrestrict(&self, chat_id: ChatId, user_id: UserId) -> Result<(), ApiError> {
        let mut attempt = self
            .bot
            .restrict_chat_member(chat_id, user_id, full_permissions())
            .await
            .map(|_| ())
            .map_err(ApiError::classify);
        if matches!(attempt, Err(ApiError::Transient(_))) {
            tokio::time::sleep(TRANSIENT_RETRY_DELAY).await;
            attempt = self
                .bot
                .restrict_chat_member(chat_id, user_id, full_permissions())
                .await
                .map(|_| ())
                .map_err(ApiError::classify);
        }
        attempt
    }

    async fn kick(&self, chat_id: ChatId, user_id: UserId) -> Result<(), ApiError> {
        self.bot
            .ban_chat_member(chat_id, user_id)
            .await
            .map_err(ApiError::classify)?;
        // Unban immediately so they can rejoin
        self.bot
            .unban_chat_member(chat_id, user_id)
            .await
            .map_err(ApiError::classify)?;
        Ok(())
    }

    async fn send_text(&self, chat_id: ChatId, text: String) -> Result<MessageId, ApiError> {
        self.bot
            .send_message(chat_id, text)
            .parse_mode(ParseMode::Html)
            .await
            .map(|msg| msg.id)
            .map_err(ApiError::classify)
    }

    async fn send_challenge(
        &self,
        chat_id: ChatId,
        text: String,
        buttons: Vec<(String, String)>,
    ) -> Result<MessageId, ApiError> {
        let rows: Vec<Vec<InlineKeyboardButton>> = buttons
            .chunks(2)
            .map(|row| {
                row.iter()
                    .map(|(label, data)| {
                        InlineKeyboardButton::callback(label.clone(), data.clone())
                    })
                    .collect()
            })
            .collect();

        self.bot
            .send_message(chat_id, text)
            .parse_mode(ParseMode::Html)
            .reply_markup(InlineKeyboardMarkup::new(rows))
            .await
            .map(|msg| msg.id)
            .map_err(ApiError::classify)
    }

    async fn delete_message(
        &self,
        chat_id: ChatId,
        message_id: MessageId,
    ) -> Result<(), ApiError> {
        self.bot
            .delete_message(chat_id, message_id)
            .await
            .map(|_| ())
            .map_err(ApiError::classify)
    }

    async fn is_admin(&self, chat_id: ChatId, user_id: UserId) -> Result<bool, ApiError> {
        self.permissions
            .is_admin(chat_id, user_id)
            .await
            .map_err(|e| ApiError::Other(e.to_string()))
    }

    async fn is_restricted(&self, chat_id: ChatId, user_id: UserId) -> Result<bool, ApiError> {
        let member = self
            .bot
            .get_chat_member(chat_id, user_id)
            .await
            .map_err(ApiError::classify)?;

        match member.kind {
            ChatMemberKind::Restricted(r) => Ok(!r.can_send_messages),
            _ => Ok(false),
        }
    }
}
