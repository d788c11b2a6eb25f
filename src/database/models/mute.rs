//! Mute record model.

use serde::{Deserialize, Serialize};

/// An active or historical restriction for one (chat, user) pair.
///
/// At most one record exists per key; applying a new mute replaces the
/// previous one. Timestamps are unix seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MuteRecord {
    pub chat_id: i64,
    pub user_id: i64,

    /// When the mute was applied.
    pub muted_at: i64,

    /// Expiry deadline. `None` means permanent.
    pub muted_until: Option<i64>,

    /// False once the mute has been lifted (manually or by timer).
    pub active: bool,

    pub reason: Option<String>,

    /// Requested duration, kept for display. `None` for permanent mutes.
    pub duration_minutes: Option<i64>,

    /// When the mute was lifted, if it has been.
    #[serde(default)]
    pub unmuted_at: Option<i64>,
}

impl MuteRecord {
    /// Create an active record starting at `muted_at`.
    pub fn new(
        chat_id: i64,
        user_id: i64,
        muted_at: i64,
        muted_until: Option<i64>,
        reason: Option<String>,
    ) -> Self {
        let duration_minutes = muted_until.map(|until| (until - muted_at).max(0) / 60);
        Self {
            chat_id,
            user_id,
            muted_at,
            muted_until,
            active: true,
            reason,
            duration_minutes,
            unmuted_at: None,
        }
    }

    /// Whether the expiry deadline has passed at `now` (unix seconds).
    /// Permanent mutes never expire.
    pub fn is_expired(&self, now: i64) -> bool {
        matches!(self.muted_until, Some(until) if until <= now)
    }
}
