//! Moderation core: mute lifecycle, flood tracking, captcha challenges, and
//! the dispatcher that routes inbound chat events through them.

pub mod captcha;
pub mod flood;
pub mod locks;
pub mod mute;

#[cfg(test)]
pub mod testing;

use std::sync::Arc;
use std::time::{Duration, Instant};

use teloxide::types::{ChatId, MessageId, UserId};
use tracing::{debug, error, info, warn};

use crate::database::{ChatModerationConfig, ConfigStore, FloodAction};
use crate::i18n::get_text;
use crate::scheduler::TimerJob;
use crate::telegram::ChatApi;
use crate::utils::{format_duration, mention};

use captcha::{AnswerOutcome, CaptchaManager};
use flood::FloodTracker;
use mute::MuteManager;

/// Delay before the single retry of a failed timer fire.
const FIRE_RETRY_DELAY: Duration = Duration::from_secs(5);

/// A message check in the moderation chain.
#[derive(Debug, Clone, Copy)]
enum MessageCheck {
    Flood,
    SpamLinks,
    Profanity,
}

/// Checks run in this order; the first one that consumes the message stops
/// the chain.
const MESSAGE_CHAIN: &[MessageCheck] = &[
    MessageCheck::Flood,
    MessageCheck::SpamLinks,
    MessageCheck::Profanity,
];

enum Verdict {
    Continue,
    Consumed,
}

/// The slice of an inbound group message the checks need.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub chat_id: ChatId,
    pub user_id: UserId,
    pub message_id: MessageId,
    pub text: String,
    pub display_name: String,
    pub from_bot: bool,
}

/// Routes chat events through the moderation chain and the managers.
pub struct ModerationDispatcher {
    api: Arc<dyn ChatApi>,
    config: Arc<dyn ConfigStore>,
    flood: Arc<FloodTracker>,
    mutes: Arc<MuteManager>,
    captcha: Arc<CaptchaManager>,
    owner_ids: Vec<u64>,
}

impl ModerationDispatcher {
    pub fn new(
        api: Arc<dyn ChatApi>,
        config: Arc<dyn ConfigStore>,
        flood: Arc<FloodTracker>,
        mutes: Arc<MuteManager>,
        captcha: Arc<CaptchaManager>,
        owner_ids: Vec<u64>,
    ) -> Self {
        Self {
            api,
            config,
            flood,
            mutes,
            captcha,
            owner_ids,
        }
    }

    /// Run an inbound message through the check chain.
    ///
    /// Bots, bot owners and chat admins are exempt from every check. A check
    /// that errors is skipped so one broken step never blocks the rest of
    /// the chain.
    pub async fn handle_message(&self, msg: &InboundMessage) -> anyhow::Result<()> {
        if msg.from_bot || self.owner_ids.contains(&msg.user_id.0) {
            return Ok(());
        }

        let cfg = self.config.get_or_default(msg.chat_id.0).await?;
        if !cfg.flood.enabled && !cfg.spam_links.enabled && !cfg.profanity.enabled {
            return Ok(());
        }

        let is_admin = self
            .api
            .is_admin(msg.chat_id, msg.user_id)
            .await
            .unwrap_or(false);
        if is_admin {
            return Ok(());
        }

        for check in MESSAGE_CHAIN {
            let verdict = match check {
                MessageCheck::Flood => self.check_flood(&cfg, msg).await,
                MessageCheck::SpamLinks => self.check_spam_links(&cfg, msg).await,
                MessageCheck::Profanity => self.check_profanity(&cfg, msg).await,
            };
            match verdict {
                Ok(Verdict::Consumed) => break,
                Ok(Verdict::Continue) => {}
                Err(e) => {
                    warn!(chat_id = %msg.chat_id, ?check, error = %e, "moderation check failed");
                }
            }
        }
        Ok(())
    }

    async fn check_flood(
        &self,
        cfg: &ChatModerationConfig,
        msg: &InboundMessage,
    ) -> anyhow::Result<Verdict> {
        if !cfg.flood.enabled {
            return Ok(Verdict::Continue);
        }

        let obs = self.flood.observe(
            msg.chat_id.0,
            msg.user_id.0 as i64,
            Instant::now(),
            cfg.flood.max_messages,
            Duration::from_secs(cfg.flood.window_secs as u64),
        );
        if !obs.over_limit {
            return Ok(Verdict::Continue);
        }

        info!(
            chat_id = %msg.chat_id,
            user_id = %msg.user_id,
            count = obs.count,
            action = cfg.flood.action.as_str(),
            "flood limit exceeded"
        );

        let user_mention = mention(msg.user_id.0, &msg.display_name);
        match cfg.flood.action {
            FloodAction::Delete => {
                self.api.delete_message(msg.chat_id, msg.message_id).await?;
            }
            FloodAction::Warn => {
                let text =
                    get_text(&cfg.lang, "antiflood.flood_warning").replace("{mention}", &user_mention);
                self.api.send_text(msg.chat_id, text).await?;
            }
            FloodAction::Mute => {
                let duration = Duration::from_secs(cfg.flood.mute_duration_secs);
                let muted = self
                    .mutes
                    .apply_mute(msg.chat_id, msg.user_id, Some(duration), Some("flood".into()))
                    .await?;
                if muted {
                    let text = get_text(&cfg.lang, "antiflood.flood_muted")
                        .replace("{mention}", &user_mention)
                        .replace("{duration}", &format_duration(cfg.flood.mute_duration_secs));
                    self.api.send_text(msg.chat_id, text).await?;
                }
            }
            FloodAction::Kick => {
                self.api.kick(msg.chat_id, msg.user_id).await?;
                let text =
                    get_text(&cfg.lang, "antiflood.flood_kicked").replace("{mention}", &user_mention);
                self.api.send_text(msg.chat_id, text).await?;
            }
        }

        // Start the next window fresh so the following message does not
        // re-trigger the penalty.
        self.flood.reset(msg.chat_id.0, msg.user_id.0 as i64);
        Ok(Verdict::Consumed)
    }

    async fn check_spam_links(
        &self,
        cfg: &ChatModerationConfig,
        msg: &InboundMessage,
    ) -> anyhow::Result<Verdict> {
        if !cfg.spam_links.enabled || !contains_link(&msg.text) {
            return Ok(Verdict::Continue);
        }

        self.api.delete_message(msg.chat_id, msg.message_id).await?;
        let text = get_text(&cfg.lang, "filters.link_removed")
            .replace("{mention}", &mention(msg.user_id.0, &msg.display_name));
        self.api.send_text(msg.chat_id, text).await?;

        debug!(chat_id = %msg.chat_id, user_id = %msg.user_id, "link removed");
        Ok(Verdict::Consumed)
    }

    async fn check_profanity(
        &self,
        cfg: &ChatModerationConfig,
        msg: &InboundMessage,
    ) -> anyhow::Result<Verdict> {
        if !cfg.profanity.enabled || cfg.profanity.words.is_empty() {
            return Ok(Verdict::Continue);
        }

        let lowered = msg.text.to_lowercase();
        let hit = lowered
            .split(|c: char| !c.is_alphanumeric())
            .any(|word| !word.is_empty() && cfg.profanity.words.iter().any(|w| w == word));
        if !hit {
            return Ok(Verdict::Continue);
        }

        self.api.delete_message(msg.chat_id, msg.message_id).await?;
        let text = get_text(&cfg.lang, "filters.profanity_removed")
            .replace("{mention}", &mention(msg.user_id.0, &msg.display_name));
        self.api.send_text(msg.chat_id, text).await?;

        debug!(chat_id = %msg.chat_id, user_id = %msg.user_id, "profane message removed");
        Ok(Verdict::Consumed)
    }

    /// Route a new member to the captcha manager. A setup failure is reported
    /// into the chat so admins notice the missing rights.
    pub async fn handle_member_joined(
        &self,
        chat_id: ChatId,
        user_id: UserId,
        display_name: &str,
    ) {
        if let Err(e) = self
            .captcha
            .on_member_joined(chat_id, user_id, display_name)
            .await
        {
            warn!(%chat_id, %user_id, error = %e, "captcha setup failed");
            let lang = self
                .config
                .get_or_default(chat_id.0)
                .await
                .map(|c| c.lang)
                .unwrap_or_else(|_| "en".to_string());
            if let Err(e) = self
                .api
                .send_text(chat_id, get_text(&lang, "captcha.setup_failed"))
                .await
            {
                debug!(%chat_id, error = %e, "failed to report captcha setup failure");
            }
        }
    }

    /// Route a captcha button press to the captcha manager.
    pub async fn handle_captcha_answer(
        &self,
        chat_id: ChatId,
        owner_id: UserId,
        presser_id: UserId,
        option_index: i64,
    ) -> anyhow::Result<AnswerOutcome> {
        self.captcha
            .on_answer(chat_id, owner_id, presser_id, option_index)
            .await
    }
}

fn contains_link(text: &str) -> bool {
    let lowered = text.to_lowercase();
    ["http://", "https://", "t.me/", "www."]
        .iter()
        .any(|marker| lowered.contains(marker))
}

/// Consume fired timers and dispatch them to the managers.
///
/// Each fire runs in its own task so a slow handler never delays other
/// deliveries. A failed fire is retried once after a fixed delay and then
/// dropped with an error; persisted state is re-derived on the next restart,
/// so a dropped fire is degraded service, not corruption.
pub async fn run_timer_loop(
    mut rx: tokio::sync::mpsc::UnboundedReceiver<TimerJob>,
    mutes: Arc<MuteManager>,
    captcha: Arc<CaptchaManager>,
) {
    while let Some(job) = rx.recv().await {
        let mutes = Arc::clone(&mutes);
        let captcha = Arc::clone(&captcha);
        tokio::spawn(async move {
            if let Err(first) = fire(job, &mutes, &captcha).await {
                warn!(?job, error = %first, "timer fire failed, retrying");
                tokio::time::sleep(FIRE_RETRY_DELAY).await;
                if let Err(second) = fire(job, &mutes, &captcha).await {
                    error!(?job, error = %second, "timer fire failed twice, dropping");
                }
            }
        });
    }
    debug!("timer loop stopped");
}

async fn fire(
    job: TimerJob,
    mutes: &MuteManager,
    captcha: &CaptchaManager,
) -> anyhow::Result<()> {
    match job {
        TimerJob::Unmute { chat_id, user_id } => {
            mutes
                .auto_unmute(ChatId(chat_id), UserId(user_id as u64))
                .await
        }
        TimerJob::CaptchaTimeout { chat_id, user_id } => {
            captcha
                .on_timeout(ChatId(chat_id), UserId(user_id as u64))
                .await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::testing::{Harness, advance};

    const CHAT: ChatId = ChatId(-1001);
    const USER: UserId = UserId(42);

    fn message(text: &str) -> InboundMessage {
        InboundMessage {
            chat_id: CHAT,
            user_id: USER,
            message_id: MessageId(1000),
            text: text.to_string(),
            display_name: "Alice".to_string(),
            from_bot: false,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_flood_mute_after_burst() {
        let h = Harness::new();
        h.enable_flood(CHAT, FloodAction::Mute).await;

        for _ in 0..6 {
            h.dispatcher.handle_message(&message("hi")).await.unwrap();
        }

        assert!(h.api.restricted(CHAT, USER));
        // Window reset after the penalty: one more message does not re-trigger
        h.dispatcher.handle_message(&message("hi")).await.unwrap();
        assert_eq!(h.flood.tracked_keys(), 1);

        // Default flood mute is 300s
        advance(Duration::from_secs(301)).await;
        assert!(!h.api.restricted(CHAT, USER));
    }

    #[tokio::test(start_paused = true)]
    async fn test_flood_delete_action() {
        let h = Harness::new();
        h.enable_flood(CHAT, FloodAction::Delete).await;

        for _ in 0..6 {
            h.dispatcher.handle_message(&message("hi")).await.unwrap();
        }

        assert!(h.api.was_deleted(CHAT, MessageId(1000)));
        assert!(!h.api.restricted(CHAT, USER));
    }

    #[tokio::test(start_paused = true)]
    async fn test_flood_kick_action() {
        let h = Harness::new();
        h.enable_flood(CHAT, FloodAction::Kick).await;

        for _ in 0..6 {
            h.dispatcher.handle_message(&message("hi")).await.unwrap();
        }

        assert!(h.api.was_kicked(CHAT, USER));
    }

    #[tokio::test(start_paused = true)]
    async fn test_admins_are_exempt() {
        let h = Harness::new();
        h.enable_flood(CHAT, FloodAction::Mute).await;
        h.api.make_admin(CHAT, USER);

        for _ in 0..10 {
            h.dispatcher.handle_message(&message("hi")).await.unwrap();
        }

        assert!(!h.api.restricted(CHAT, USER));
        assert_eq!(h.flood.tracked_keys(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_bot_owner_is_exempt() {
        let h = Harness::new();
        h.enable_flood(CHAT, FloodAction::Mute).await;

        let mut msg = message("hi");
        msg.user_id = UserId(7); // harness owner id
        for _ in 0..10 {
            h.dispatcher.handle_message(&msg).await.unwrap();
        }

        assert!(!h.api.restricted(CHAT, UserId(7)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_link_filter_removes_message() {
        let h = Harness::new();
        let mut cfg = h.config.get_or_default(CHAT.0).await.unwrap();
        cfg.spam_links.enabled = true;
        h.config.save(&cfg).await.unwrap();

        h.dispatcher
            .handle_message(&message("check out https://spam.example"))
            .await
            .unwrap();

        assert!(h.api.was_deleted(CHAT, MessageId(1000)));
        h.dispatcher.handle_message(&message("no links here")).await.unwrap();
        assert_eq!(h.api.deleted_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_profanity_filter_matches_words() {
        let h = Harness::new();
        let mut cfg = h.config.get_or_default(CHAT.0).await.unwrap();
        cfg.profanity.enabled = true;
        cfg.profanity.words = vec!["darn".to_string()];
        h.config.save(&cfg).await.unwrap();

        h.dispatcher
            .handle_message(&message("well DARN, that failed"))
            .await
            .unwrap();
        assert!(h.api.was_deleted(CHAT, MessageId(1000)));

        // Substrings of larger words do not match
        h.dispatcher.handle_message(&message("darning socks")).await.unwrap();
        assert_eq!(h.api.deleted_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_disabled_is_a_noop() {
        let h = Harness::new();

        for _ in 0..20 {
            h.dispatcher
                .handle_message(&message("https://spam.example"))
                .await
                .unwrap();
        }

        assert!(!h.api.restricted(CHAT, USER));
        assert_eq!(h.api.deleted_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_flood_consumes_before_link_filter() {
        let h = Harness::new();
        h.enable_flood(CHAT, FloodAction::Mute).await;
        let mut cfg = h.config.get_or_default(CHAT.0).await.unwrap();
        cfg.spam_links.enabled = true;
        h.config.save(&cfg).await.unwrap();

        for _ in 0..6 {
            h.dispatcher
                .handle_message(&message("https://spam.example"))
                .await
                .unwrap();
        }

        // First five consumed by the link filter, sixth by the flood check
        // before the link filter ran.
        assert!(h.api.restricted(CHAT, USER));
        assert_eq!(h.api.deleted_count(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_setup_failure_is_reported_in_chat() {
        let h = Harness::new();
        h.enable_captcha(CHAT).await;
        h.api.deny_restrict();

        h.dispatcher.handle_member_joined(CHAT, USER, "Alice").await;

        let texts = h.api.sent_texts(CHAT);
        assert_eq!(texts.len(), 1);
        assert!(texts[0].contains("permission to restrict"));
    }

    #[test]
    fn test_link_detection() {
        assert!(contains_link("see https://example.com"));
        assert!(contains_link("see HTTP://EXAMPLE.COM"));
        assert!(contains_link("join t.me/somegroup"));
        assert!(contains_link("www.example.com"));
        assert!(!contains_link("just words"));
        assert!(!contains_link("time.me is not a link marker"));
    }
}
