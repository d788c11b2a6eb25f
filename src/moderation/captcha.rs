//! Captcha challenge manager.
//!
//! New members are restricted on join and must answer a small arithmetic
//! question via inline buttons before they may speak. A challenge resolves
//! exactly once: whichever of solve, timeout or admin override removes the
//! stored record first wins, and the others become no-ops.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::Utc;
use teloxide::types::{ChatId, MessageId, UserId};
use tracing::{debug, info, warn};

use crate::database::{CaptchaChallenge, CaptchaStore, ConfigStore};
use crate::i18n::get_text;
use crate::scheduler::{Scheduler, TimerJob};
use crate::telegram::ChatApi;
use crate::utils::{format_duration, mention};

use super::locks::KeyedLocks;
use super::mute::MuteManager;

/// Outcome of a button press on a challenge prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnswerOutcome {
    /// Correct answer by the challenged user; restrictions lifted.
    Solved,
    /// Wrong answer; the challenge stays pending.
    Wrong,
    /// Someone other than the challenged user pressed a button.
    NotOwner,
    /// No pending challenge for this key (already solved, timed out, or
    /// overridden).
    NoChallenge,
}

pub struct CaptchaManager {
    api: Arc<dyn ChatApi>,
    store: Arc<dyn CaptchaStore>,
    config: Arc<dyn ConfigStore>,
    mutes: Arc<MuteManager>,
    scheduler: Arc<Scheduler>,
    locks: KeyedLocks,
}

/// An arithmetic question with four answer options.
struct Question {
    a: i64,
    b: i64,
    options: Vec<i64>,
    correct_index: i64,
}

fn generate_question() -> Question {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos() as i64)
        .unwrap_or(0);

    let a = 2 + nanos % 9;
    let b = 2 + (nanos / 100) % 9;
    let answer = a + b;
    let correct_index = (nanos / 10_000) % 4;

    // Wrong options are fixed offsets from the answer, so they never collide
    // with it or each other. Minimum answer is 4, so nothing goes below 1.
    let mut offsets = [-3i64, -1, 2].into_iter();
    let options = (0..4)
        .map(|i| {
            if i == correct_index {
                answer
            } else {
                answer + offsets.next().unwrap_or(5)
            }
        })
        .collect();

    Question {
        a,
        b,
        options,
        correct_index,
    }
}

impl CaptchaManager {
    pub fn new(
        api: Arc<dyn ChatApi>,
        store: Arc<dyn CaptchaStore>,
        config: Arc<dyn ConfigStore>,
        mutes: Arc<MuteManager>,
        scheduler: Arc<Scheduler>,
    ) -> Self {
        Self {
            api,
            store,
            config,
            mutes,
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

    /// Challenge a newly joined member. Admins are never challenged.
    ///
    /// The restriction is applied before anything is persisted or scheduled;
    /// if it fails, no challenge exists and the error surfaces to the caller.
    /// A member with a pending challenge (rejoin during one) is not
    /// re-challenged.
    pub async fn on_member_joined(
        &self,
        chat_id: ChatId,
        user_id: UserId,
        display_name: &str,
    ) -> anyhow::Result<()> {
        let cfg = self.config.get_or_default(chat_id.0).await?;
        if !cfg.captcha.enabled {
            return Ok(());
        }
        if self.api.is_admin(chat_id, user_id).await.unwrap_or(false) {
            return Ok(());
        }

        let _guard = self.locks.acquire(chat_id.0, user_id.0 as i64).await;

        if self.store.get(chat_id.0, user_id.0 as i64).await?.is_some() {
            debug!(%chat_id, %user_id, "member rejoined with a pending challenge");
            return Ok(());
        }

        self.api.restrict(chat_id, user_id, None).await?;

        let question = generate_question();
        let text = get_text(&cfg.lang, "captcha.prompt")
            .replace("{mention}", &mention(user_id.0, display_name))
            .replace(
                "{timeout}",
                &format_duration(cfg.captcha.timeout_secs as u64),
            )
            .replace("{question}", &format!("{} + {} = ?", question.a, question.b));

        let buttons = question
            .options
            .iter()
            .enumerate()
            .map(|(i, value)| {
                (
                    value.to_string(),
                    format!("captcha:{}:{}:{}", chat_id.0, user_id.0, i),
                )
            })
            .collect();

        let message_id = self.api.send_challenge(chat_id, text, buttons).await?;

        let now = Utc::now();
        let challenge = CaptchaChallenge {
            chat_id: chat_id.0,
            user_id: user_id.0 as i64,
            message_id: message_id.0,
            options: question.options,
            correct_option_index: question.correct_index,
            created_at: now.timestamp(),
            timeout_secs: cfg.captcha.timeout_secs,
        };
        self.store.put(&challenge).await?;

        self.scheduler.schedule(
            now + chrono::Duration::seconds(cfg.captcha.timeout_secs as i64),
            TimerJob::CaptchaTimeout {
                chat_id: chat_id.0,
                user_id: user_id.0 as i64,
            },
        );

        info!(%chat_id, %user_id, timeout_secs = cfg.captcha.timeout_secs, "captcha issued");
        Ok(())
    }

    /// Handle a button press on a challenge prompt.
    pub async fn on_answer(
        &self,
        chat_id: ChatId,
        owner_id: UserId,
        presser_id: UserId,
        option_index: i64,
    ) -> anyhow::Result<AnswerOutcome> {
        if presser_id != owner_id {
            return Ok(AnswerOutcome::NotOwner);
        }

        let _guard = self.locks.acquire(chat_id.0, owner_id.0 as i64).await;

        let Some(challenge) = self.store.get(chat_id.0, owner_id.0 as i64).await? else {
            return Ok(AnswerOutcome::NoChallenge);
        };

        if !challenge.is_correct(option_index) {
            debug!(%chat_id, %owner_id, option_index, "wrong captcha answer");
            return Ok(AnswerOutcome::Wrong);
        }

        // The remove is the resolution point; losing it means the timeout
        // (or an override) got there first.
        if !self.store.remove(chat_id.0, owner_id.0 as i64).await? {
            return Ok(AnswerOutcome::NoChallenge);
        }

        self.scheduler
            .cancel(&TimerJob::captcha_job_id(chat_id.0, owner_id.0 as i64));

        if let Err(e) = self.api.unrestrict(chat_id, owner_id).await {
            warn!(%chat_id, %owner_id, error = %e, "failed to lift captcha restriction");
        }
        if let Err(e) = self
            .api
            .delete_message(chat_id, MessageId(challenge.message_id))
            .await
        {
            debug!(%chat_id, error = %e, "failed to delete captcha prompt");
        }

        let lang = self.locale(chat_id).await;
        let text = get_text(&lang, "captcha.verified").replace(
            "{mention}",
            &mention(owner_id.0, &format!("User {}", owner_id.0)),
        );
        if let Err(e) = self.api.send_text(chat_id, text).await {
            warn!(%chat_id, error = %e, "failed to send verification notice");
        }

        info!(%chat_id, %owner_id, "captcha solved");
        Ok(AnswerOutcome::Solved)
    }

    /// Timer-fired expiry: the member never answered, so the join-time
    /// restriction is made permanent. A no-op when the challenge has already
    /// been resolved.
    pub async fn on_timeout(&self, chat_id: ChatId, user_id: UserId) -> anyhow::Result<()> {
        let challenge = {
            let _guard = self.locks.acquire(chat_id.0, user_id.0 as i64).await;

            let Some(challenge) = self.store.get(chat_id.0, user_id.0 as i64).await? else {
                debug!(%chat_id, %user_id, "captcha timeout with no pending challenge");
                return Ok(());
            };
            if !self.store.remove(chat_id.0, user_id.0 as i64).await? {
                return Ok(());
            }
            challenge
        };

        if let Err(e) = self
            .api
            .delete_message(chat_id, MessageId(challenge.message_id))
            .await
        {
            debug!(%chat_id, error = %e, "failed to delete captcha prompt");
        }

        // The member is already restricted from join; this records the mute
        // so it survives restarts and admins can /unmute it.
        let muted = self
            .mutes
            .apply_mute(chat_id, user_id, None, Some("captcha timeout".to_string()))
            .await?;
        if !muted {
            warn!(%chat_id, %user_id, "captcha timeout but cannot restrict");
        }

        let lang = self.locale(chat_id).await;
        let text = get_text(&lang, "captcha.timeout_mute").replace(
            "{mention}",
            &mention(user_id.0, &format!("User {}", user_id.0)),
        );
        if let Err(e) = self.api.send_text(chat_id, text).await {
            warn!(%chat_id, error = %e, "failed to send captcha timeout notice");
        }

        info!(%chat_id, %user_id, "captcha timed out");
        Ok(())
    }

    /// Admin override: resolve the pending challenge and lift restrictions
    /// without an answer. Returns whether a challenge existed.
    pub async fn override_challenge(
        &self,
        chat_id: ChatId,
        user_id: UserId,
    ) -> anyhow::Result<bool> {
        let _guard = self.locks.acquire(chat_id.0, user_id.0 as i64).await;

        let Some(challenge) = self.store.get(chat_id.0, user_id.0 as i64).await? else {
            return Ok(false);
        };
        if !self.store.remove(chat_id.0, user_id.0 as i64).await? {
            return Ok(false);
        }

        self.scheduler
            .cancel(&TimerJob::captcha_job_id(chat_id.0, user_id.0 as i64));

        if let Err(e) = self.api.unrestrict(chat_id, user_id).await {
            warn!(%chat_id, %user_id, error = %e, "failed to lift captcha restriction");
        }
        if let Err(e) = self
            .api
            .delete_message(chat_id, MessageId(challenge.message_id))
            .await
        {
            debug!(%chat_id, error = %e, "failed to delete captcha prompt");
        }

        info!(%chat_id, %user_id, "captcha overridden");
        Ok(true)
    }

    /// Re-arm timeout timers from persisted challenges at startup. Deadlines
    /// that passed while the process was down expire immediately.
    pub async fn recover(&self) -> anyhow::Result<usize> {
        let challenges = self.store.pending().await?;
        let now = Utc::now();
        let mut rearmed = 0usize;

        for challenge in challenges {
            let chat_id = ChatId(challenge.chat_id);
            let user_id = UserId(challenge.user_id as u64);

            if challenge.deadline() <= now.timestamp() {
                if let Err(e) = self.on_timeout(chat_id, user_id).await {
                    warn!(%chat_id, %user_id, error = %e, "recovery captcha expiry failed");
                }
                continue;
            }

            let at = chrono::DateTime::from_timestamp(challenge.deadline(), 0).unwrap_or(now);
            self.scheduler.schedule(
                at,
                TimerJob::CaptchaTimeout {
                    chat_id: challenge.chat_id,
                    user_id: challenge.user_id,
                },
            );
            rearmed += 1;
        }

        info!(rearmed, "captcha timers recovered");
        Ok(rearmed)
    }

    /// Periodic maintenance: drop per-key locks nobody holds.
    pub fn sweep_locks(&self) -> usize {
        self.locks.sweep()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::MuteStore;
    use crate::moderation::testing::{Harness, advance};
    use std::time::Duration;

    const CHAT: ChatId = ChatId(-1001);
    const USER: UserId = UserId(42);
    const OTHER: UserId = UserId(99);

    #[tokio::test(start_paused = true)]
    async fn test_join_restricts_and_issues_challenge() {
        let h = Harness::new();
        h.enable_captcha(CHAT).await;

        h.captcha.on_member_joined(CHAT, USER, "Alice").await.unwrap();

        assert!(h.api.restricted(CHAT, USER));
        let challenge = h.captcha_store.get(CHAT.0, USER.0 as i64).await.unwrap();
        assert!(challenge.is_some());
        assert_eq!(challenge.unwrap().options.len(), 4);
        assert!(h.scheduler.is_scheduled(&TimerJob::captcha_job_id(CHAT.0, USER.0 as i64)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_correct_answer_lifts_restriction() {
        let h = Harness::new();
        h.enable_captcha(CHAT).await;

        h.captcha.on_member_joined(CHAT, USER, "Alice").await.unwrap();
        let challenge = h
            .captcha_store
            .get(CHAT.0, USER.0 as i64)
            .await
            .unwrap()
            .unwrap();

        let outcome = h
            .captcha
            .on_answer(CHAT, USER, USER, challenge.correct_option_index)
            .await
            .unwrap();

        assert_eq!(outcome, AnswerOutcome::Solved);
        assert!(!h.api.restricted(CHAT, USER));
        assert!(h.captcha_store.get(CHAT.0, USER.0 as i64).await.unwrap().is_none());
        assert!(h.api.was_deleted(CHAT, MessageId(challenge.message_id)));

        // The dead timer never fires a permanent mute
        advance(Duration::from_secs(400)).await;
        assert!(!h.api.restricted(CHAT, USER));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wrong_answer_keeps_challenge_pending() {
        let h = Harness::new();
        h.enable_captcha(CHAT).await;

        h.captcha.on_member_joined(CHAT, USER, "Alice").await.unwrap();
        let challenge = h
            .captcha_store
            .get(CHAT.0, USER.0 as i64)
            .await
            .unwrap()
            .unwrap();
        let wrong = (challenge.correct_option_index + 1) % 4;

        let outcome = h.captcha.on_answer(CHAT, USER, USER, wrong).await.unwrap();

        assert_eq!(outcome, AnswerOutcome::Wrong);
        assert!(h.api.restricted(CHAT, USER));
        assert!(h.captcha_store.get(CHAT.0, USER.0 as i64).await.unwrap().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_other_users_cannot_answer() {
        let h = Harness::new();
        h.enable_captcha(CHAT).await;

        h.captcha.on_member_joined(CHAT, USER, "Alice").await.unwrap();
        let challenge = h
            .captcha_store
            .get(CHAT.0, USER.0 as i64)
            .await
            .unwrap()
            .unwrap();

        let outcome = h
            .captcha
            .on_answer(CHAT, USER, OTHER, challenge.correct_option_index)
            .await
            .unwrap();

        assert_eq!(outcome, AnswerOutcome::NotOwner);
        assert!(h.api.restricted(CHAT, USER));
        assert!(h.captcha_store.get(CHAT.0, USER.0 as i64).await.unwrap().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_makes_restriction_permanent() {
        let h = Harness::new();
        h.enable_captcha(CHAT).await;

        h.captcha.on_member_joined(CHAT, USER, "Alice").await.unwrap();

        // Default timeout is 300s
        advance(Duration::from_secs(301)).await;

        assert!(h.api.restricted(CHAT, USER));
        assert!(h.captcha_store.get(CHAT.0, USER.0 as i64).await.unwrap().is_none());
        assert!(h.store.get_active(CHAT.0, USER.0 as i64).await.unwrap().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_answer_after_timeout_sees_no_challenge() {
        let h = Harness::new();
        h.enable_captcha(CHAT).await;

        h.captcha.on_member_joined(CHAT, USER, "Alice").await.unwrap();
        let challenge = h
            .captcha_store
            .get(CHAT.0, USER.0 as i64)
            .await
            .unwrap()
            .unwrap();

        advance(Duration::from_secs(301)).await;

        let outcome = h
            .captcha
            .on_answer(CHAT, USER, USER, challenge.correct_option_index)
            .await
            .unwrap();
        assert_eq!(outcome, AnswerOutcome::NoChallenge);
        assert!(h.api.restricted(CHAT, USER));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_restriction_aborts_challenge() {
        let h = Harness::new();
        h.enable_captcha(CHAT).await;
        h.api.deny_restrict();

        let result = h.captcha.on_member_joined(CHAT, USER, "Alice").await;

        assert!(result.is_err());
        assert!(h.captcha_store.get(CHAT.0, USER.0 as i64).await.unwrap().is_none());
        assert_eq!(h.scheduler.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disabled_captcha_ignores_joins() {
        let h = Harness::new();

        // Captcha is off by default
        h.captcha.on_member_joined(CHAT, USER, "Alice").await.unwrap();

        assert!(!h.api.restricted(CHAT, USER));
        assert!(h.captcha_store.get(CHAT.0, USER.0 as i64).await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_admins_are_not_challenged() {
        let h = Harness::new();
        h.enable_captcha(CHAT).await;
        h.api.make_admin(CHAT, USER);

        h.captcha.on_member_joined(CHAT, USER, "Alice").await.unwrap();

        assert!(!h.api.restricted(CHAT, USER));
        assert!(h.captcha_store.get(CHAT.0, USER.0 as i64).await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_override_resolves_pending_challenge() {
        let h = Harness::new();
        h.enable_captcha(CHAT).await;

        h.captcha.on_member_joined(CHAT, USER, "Alice").await.unwrap();
        assert!(h.captcha.override_challenge(CHAT, USER).await.unwrap());

        assert!(!h.api.restricted(CHAT, USER));
        assert!(!h.captcha.override_challenge(CHAT, USER).await.unwrap());

        advance(Duration::from_secs(400)).await;
        assert!(!h.api.restricted(CHAT, USER));
    }

    #[test]
    fn test_generated_question_is_consistent() {
        for _ in 0..50 {
            let q = generate_question();
            let answer = q.a + q.b;
            assert_eq!(q.options[q.correct_index as usize], answer);
            let unique: std::collections::HashSet<_> = q.options.iter().collect();
            assert_eq!(unique.len(), 4);
            assert!(q.options.iter().all(|&v| v > 0));
        }
    }
}
