//! Repositories and the store traits the moderation core depends on.
//!
//! The managers only see the traits; MongoDB-backed implementations live
//! here, in-memory test doubles live in `moderation::testing`.

mod captcha_repository;
mod chat_config_repository;
mod mute_repository;

use anyhow::Result;
use async_trait::async_trait;

use super::models::{CaptchaChallenge, ChatModerationConfig, MuteRecord};

pub use captcha_repository::CaptchaRepository;
pub use chat_config_repository::ChatConfigRepository;
pub use mute_repository::MuteRepository;

/// Persistence for mute records, keyed by (chat_id, user_id).
#[async_trait]
pub trait MuteStore: Send + Sync {
    /// Insert or replace the record for the key.
    async fn upsert(&self, record: &MuteRecord) -> Result<()>;

    /// Fetch the active record for the key, if any.
    async fn get_active(&self, chat_id: i64, user_id: i64) -> Result<Option<MuteRecord>>;

    /// Mark the active record inactive. Returns whether an active record was
    /// actually flipped, so duplicate calls are detectable as no-ops.
    async fn deactivate(&self, chat_id: i64, user_id: i64, unmuted_at: i64) -> Result<bool>;

    /// All active records with an expiry deadline, for startup recovery.
    async fn active_timed(&self) -> Result<Vec<MuteRecord>>;
}

/// Persistence for pending captcha challenges, keyed by (chat_id, user_id).
#[async_trait]
pub trait CaptchaStore: Send + Sync {
    /// Insert or replace the challenge for the key.
    async fn put(&self, challenge: &CaptchaChallenge) -> Result<()>;

    /// Fetch the pending challenge for the key, if any.
    async fn get(&self, chat_id: i64, user_id: i64) -> Result<Option<CaptchaChallenge>>;

    /// Remove the challenge. Returns whether it still existed, which is
    /// what racing solve/timeout/override paths arbitrate on.
    async fn remove(&self, chat_id: i64, user_id: i64) -> Result<bool>;

    /// All pending challenges, for startup recovery.
    async fn pending(&self) -> Result<Vec<CaptchaChallenge>>;
}

/// Persistence for per-chat moderation settings.
#[async_trait]
pub trait ConfigStore: Send + Sync {
    /// Fetch the chat's settings, or defaults if none are stored.
    async fn get_or_default(&self, chat_id: i64) -> Result<ChatModerationConfig>;

    /// Save settings (upsert).
    async fn save(&self, config: &ChatModerationConfig) -> Result<()>;
}
