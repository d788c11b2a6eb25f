//! Captcha settings commands and the challenge button handler.

use teloxide::prelude::*;
use teloxide::types::{ChatId, UserId};
use tracing::debug;

use crate::bot::dispatcher::AppState;
use crate::i18n::get_text;
use crate::moderation::captcha::AnswerOutcome;
use crate::telegram::ThrottledBot;
use crate::utils::format_duration;

use super::{chat_lang, reply_html};

/// /captcha - show status, or "on"/"off" to toggle.
pub async fn captcha_command(
    bot: ThrottledBot,
    msg: Message,
    state: AppState,
) -> anyhow::Result<()> {
    let chat_id = msg.chat.id;
    let lang = chat_lang(&state, chat_id).await;

    if !msg.chat.is_group() && !msg.chat.is_supergroup() {
        return reply_html(&bot, &msg, get_text(&lang, "common.error_group_only")).await;
    }
    if !can_change_settings(&state, &msg).await {
        return reply_html(&bot, &msg, get_text(&lang, "common.error_permission")).await;
    }

    let arg = msg
        .text()
        .and_then(|t| t.split_whitespace().nth(1))
        .map(|s| s.to_lowercase());
    let mut cfg = state.configs.get_or_default(chat_id.0).await?;

    match arg.as_deref() {
        None => {
            let text = if cfg.captcha.enabled {
                get_text(&lang, "captcha.status_enabled").replace(
                    "{timeout}",
                    &format_duration(cfg.captcha.timeout_secs as u64),
                )
            } else {
                get_text(&lang, "captcha.status_disabled")
            };
            reply_html(&bot, &msg, text).await
        }
        Some("on") => {
            cfg.captcha.enabled = true;
            state.configs.save(&cfg).await?;
            reply_html(&bot, &msg, get_text(&lang, "captcha.enabled")).await
        }
        Some("off") => {
            cfg.captcha.enabled = false;
            state.configs.save(&cfg).await?;
            reply_html(&bot, &msg, get_text(&lang, "captcha.disabled")).await
        }
        Some(_) => reply_html(&bot, &msg, get_text(&lang, "captcha.usage")).await,
    }
}

/// /captchatimeout <seconds>
pub async fn captchatimeout_command(
    bot: ThrottledBot,
    msg: Message,
    state: AppState,
) -> anyhow::Result<()> {
    let chat_id = msg.chat.id;
    let lang = chat_lang(&state, chat_id).await;

    if !msg.chat.is_group() && !msg.chat.is_supergroup() {
        return reply_html(&bot, &msg, get_text(&lang, "common.error_group_only")).await;
    }
    if !can_change_settings(&state, &msg).await {
        return reply_html(&bot, &msg, get_text(&lang, "common.error_permission")).await;
    }

    let timeout = msg
        .text()
        .and_then(|t| t.split_whitespace().nth(1))
        .and_then(|p| p.parse::<u32>().ok());
    let Some(timeout) = timeout.filter(|t| (30..=3600).contains(t)) else {
        return reply_html(&bot, &msg, get_text(&lang, "captcha.timeout_usage")).await;
    };

    let mut cfg = state.configs.get_or_default(chat_id.0).await?;
    cfg.captcha.timeout_secs = timeout;
    state.configs.save(&cfg).await?;

    let text = get_text(&lang, "captcha.timeout_set")
        .replace("{timeout}", &format_duration(timeout as u64));
    reply_html(&bot, &msg, text).await
}

/// Handle a press on a captcha answer button.
///
/// Callback data: `captcha:{chat_id}:{owner_id}:{option_index}`.
pub async fn captcha_callback_handler(
    bot: ThrottledBot,
    q: CallbackQuery,
    state: AppState,
) -> anyhow::Result<()> {
    let Some((chat_id, owner_id, option_index)) = q.data.as_deref().and_then(parse_callback_data)
    else {
        debug!(data = ?q.data, "malformed captcha callback data");
        bot.answer_callback_query(q.id).await?;
        return Ok(());
    };

    let outcome = state
        .moderation
        .handle_captcha_answer(chat_id, owner_id, q.from.id, option_index)
        .await?;

    let lang = chat_lang(&state, chat_id).await;
    let answer = bot.answer_callback_query(q.id);
    match outcome {
        AnswerOutcome::Solved => answer.await?,
        AnswerOutcome::Wrong => {
            answer
                .text(get_text(&lang, "captcha.wrong_answer"))
                .await?
        }
        AnswerOutcome::NotOwner => {
            answer
                .text(get_text(&lang, "captcha.not_your_challenge"))
                .show_alert(true)
                .await?
        }
        AnswerOutcome::NoChallenge => {
            answer.text(get_text(&lang, "captcha.already_done")).await?
        }
    };

    Ok(())
}

fn parse_callback_data(data: &str) -> Option<(ChatId, UserId, i64)> {
    let mut parts = data.strip_prefix("captcha:")?.splitn(3, ':');
    let chat_id = parts.next()?.parse::<i64>().ok()?;
    let owner_id = parts.next()?.parse::<u64>().ok()?;
    let option_index = parts.next()?.parse::<i64>().ok()?;
    Some((ChatId(chat_id), UserId(owner_id), option_index))
}

async fn can_change_settings(state: &AppState, msg: &Message) -> bool {
    let user_id = msg.from.as_ref().map(|u| u.id).unwrap_or(UserId(0));
    state
        .permissions
        .can_change_info(msg.chat.id, user_id)
        .await
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_callback_data() {
        assert_eq!(
            parse_callback_data("captcha:-1001:42:3"),
            Some((ChatId(-1001), UserId(42), 3))
        );
        assert_eq!(parse_callback_data("captcha:-1001:42"), None);
        assert_eq!(parse_callback_data("warn:-1001:42:3"), None);
        assert_eq!(parse_callback_data("captcha:x:42:3"), None);
    }
}
