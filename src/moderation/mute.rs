//! Mute lifecycle manager.
//!
//! Owns applying restrictions, scheduling their expiry, cancelling on manual
//! unmute, and the idempotent timer-fired auto-unmute. All mutations for one
//! (chat, user) key are serialized through a keyed lock; the persisted
//! record is the source of truth and the scheduled timer is derived from it.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use teloxide::types::{ChatId, UserId};
use tracing::{debug, info, warn};

use crate::database::{ConfigStore, MuteRecord, MuteStore};
use crate::i18n::get_text;
use crate::scheduler::{Scheduler, TimerJob};
use crate::telegram::{ApiError, ChatApi};
use crate::utils::mention;

use super::locks::KeyedLocks;

pub struct MuteManager {
    api: Arc<dyn ChatApi>,
    store: Arc<dyn MuteStore>,
    config: Arc<dyn ConfigStore>,
    scheduler: Arc<Scheduler>,
    locks: KeyedLocks,
}

impl MuteManager {
    pub fn new(
        api: Arc<dyn ChatApi>,
        store: Arc<dyn MuteStore>,
        config: Arc<dyn ConfigStore>,
        scheduler: Arc<Scheduler>,
    ) -> Self {
        Self {
            api,
            store,
            config,
            scheduler,
            locks: KeyedLocks::new(),
        }
    }

    async fn locale(&self, chat_id: ChatId) -> String {
        self.config
            .get_or_default(chat_id.0)
            .await
            .map(|c| c.lang)
            .unwrap_or_else(|_| "en".to_string())
    }

    /// Restrict a user, persist the record, and arm the expiry timer.
    ///
    /// `duration` of `None` (or zero) restricts permanently: no timer, and a
    /// pending unmute timer from an earlier timed mute is cancelled. A timed
    /// mute replaces any existing one; the job-id replacement in the
    /// scheduler guarantees the fresh deadline wins.
    ///
    /// Returns `Ok(false)` when the bot lacks restrict rights; nothing is
    /// persisted or scheduled in that case.
    pub async fn apply_mute(
        &self,
        chat_id: ChatId,
        user_id: UserId,
        duration: Option<Duration>,
        reason: Option<String>,
    ) -> anyhow::Result<bool> {
        let _guard = self.locks.acquire(chat_id.0, user_id.0 as i64).await;

        let duration = duration.filter(|d| !d.is_zero());
        let until = duration.map(|d| Utc::now() + chrono::Duration::seconds(d.as_secs() as i64));

        match self.api.restrict(chat_id, user_id, until).await {
            Ok(()) => {}
            Err(ApiError::Forbidden(e)) => {
                warn!(%chat_id, %user_id, error = %e, "cannot mute: missing rights");
                return Ok(false);
            }
            Err(e) => return Err(e.into()),
        }

        let now = Utc::now().timestamp();
        let record = MuteRecord::new(
            chat_id.0,
            user_id.0 as i64,
            now,
            until.map(|dt| dt.timestamp()),
            reason,
        );
        self.store.upsert(&record).await?;

        match until {
            Some(at) => {
                self.scheduler.schedule(
                    at,
                    TimerJob::Unmute {
                        chat_id: chat_id.0,
                        user_id: user_id.0 as i64,
                    },
                );
            }
            None => {
                // A permanent mute supersedes any pending expiry.
                self.scheduler
                    .cancel(&TimerJob::unmute_job_id(chat_id.0, user_id.0 as i64));
            }
        }

        info!(
            %chat_id, %user_id,
            until = ?record.muted_until,
            "mute applied"
        );
        Ok(true)
    }

    /// Lift a mute on admin request.
    ///
    /// Safe to call when no active mute exists (no-op success). Returns
    /// `Ok(false)` when the bot lacks rights; state is untouched then.
    pub async fn manual_unmute(&self, chat_id: ChatId, user_id: UserId) -> anyhow::Result<bool> {
        let _guard = self.locks.acquire(chat_id.0, user_id.0 as i64).await;

        match self.api.unrestrict(chat_id, user_id).await {
            Ok(()) => {}
            Err(ApiError::Forbidden(e)) => {
                warn!(%chat_id, %user_id, error = %e, "cannot unmute: missing rights");
                return Ok(false);
            }
            Err(e) => return Err(e.into()),
        }

        self.scheduler
            .cancel(&TimerJob::unmute_job_id(chat_id.0, user_id.0 as i64));

        let was_active = self
            .store
            .deactivate(chat_id.0, user_id.0 as i64, Utc::now().timestamp())
            .await?;
        if !was_active {
            debug!(%chat_id, %user_id, "manual unmute with no active record");
        }

        info!(%chat_id, %user_id, "mute lifted manually");
        Ok(true)
    }

    /// Timer-fired expiry. Idempotent: the active record is the guard, so a
    /// duplicate fire (at-least-once delivery) or a lost race against a
    /// manual unmute is a benign no-op.
    pub async fn auto_unmute(&self, chat_id: ChatId, user_id: UserId) -> anyhow::Result<()> {
        let _guard = self.locks.acquire(chat_id.0, user_id.0 as i64).await;

        let Some(record) = self
            .store
            .get_active(chat_id.0, user_id.0 as i64)
            .await?
        else {
            debug!(%chat_id, %user_id, "auto-unmute fired with no active record");
            return Ok(());
        };

        // A manual unmute may have raced ahead of the cancel; only touch the
        // member if they are still restricted.
        let still_restricted = self
            .api
            .is_restricted(chat_id, user_id)
            .await
            .unwrap_or(true);
        if still_restricted {
            // Errors propagate so the timer loop can retry the fire once.
            self.api.unrestrict(chat_id, user_id).await?;
        }

        self.store
            .deactivate(chat_id.0, user_id.0 as i64, Utc::now().timestamp())
            .await?;

        let lang = self.locale(chat_id).await;
        let text = get_text(&lang, "mute.auto_unmuted").replace(
            "{mention}",
            &mention(user_id.0, &format!("User {}", user_id.0)),
        );
        if let Err(e) = self.api.send_text(chat_id, text).await {
            warn!(%chat_id, %user_id, error = %e, "failed to send unmute notice");
        }

        info!(%chat_id, %user_id, since = record.muted_at, "mute expired");
        Ok(())
    }

    /// Re-derive pending unmute timers from persisted records at startup.
    ///
    /// Records whose deadline already passed while the process was down are
    /// unmuted immediately. Returns the number of timers re-armed.
    pub async fn recover(&self) -> anyhow::Result<usize> {
        let records = self.store.active_timed().await?;
        let now = Utc::now();
        let mut rearmed = 0usize;

        for record in records {
            let chat_id = ChatId(record.chat_id);
            let user_id = UserId(record.user_id as u64);

            if record.is_expired(now.timestamp()) {
                if let Err(e) = self.auto_unmute(chat_id, user_id).await {
                    warn!(%chat_id, %user_id, error = %e, "recovery unmute failed");
                }
                continue;
            }

            if let Some(until) = record.muted_until {
                let at = chrono::DateTime::from_timestamp(until, 0).unwrap_or(now);
                self.scheduler.schedule(
                    at,
                    TimerJob::Unmute {
                        chat_id: record.chat_id,
                        user_id: record.user_id,
                    },
                );
                rearmed += 1;
            }
        }

        info!(rearmed, "mute timers recovered");
        Ok(rearmed)
    }

    /// Periodic maintenance: drop per-key locks nobody holds.
    pub fn sweep_locks(&self) -> usize {
        self.locks.sweep()
    }
}
