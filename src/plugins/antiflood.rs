//! Antiflood settings commands.

use teloxide::prelude::*;
use teloxide::types::UserId;

use crate::bot::dispatcher::AppState;
use crate::database::FloodAction;
use crate::i18n::get_text;
use crate::telegram::ThrottledBot;
use crate::utils::format_duration;

use super::{chat_lang, reply_html};

/// /antiflood - show status, or "on"/"off" to toggle.
pub async fn antiflood_command(
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

    let arg = first_arg(&msg);
    let mut cfg = state.configs.get_or_default(chat_id.0).await?;

    match arg.as_deref() {
        None => {
            let text = if cfg.flood.enabled {
                get_text(&lang, "antiflood.status_enabled")
                    .replace("{limit}", &cfg.flood.max_messages.to_string())
                    .replace("{seconds}", &cfg.flood.window_secs.to_string())
                    .replace("{action}", cfg.flood.action.as_str())
                    .replace("{duration}", &format_duration(cfg.flood.mute_duration_secs))
            } else {
                get_text(&lang, "antiflood.status_disabled")
            };
            reply_html(&bot, &msg, text).await
        }
        Some("on") => {
            cfg.flood.enabled = true;
            state.configs.save(&cfg).await?;
            reply_html(&bot, &msg, get_text(&lang, "antiflood.enabled")).await
        }
        Some("off") => {
            cfg.flood.enabled = false;
            state.configs.save(&cfg).await?;
            reply_html(&bot, &msg, get_text(&lang, "antiflood.disabled")).await
        }
        Some(_) => reply_html(&bot, &msg, get_text(&lang, "antiflood.usage")).await,
    }
}

/// /setflood <max messages> <window seconds>
pub async fn setflood_command(
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

    let text = msg.text().unwrap_or("");
    let parts: Vec<&str> = text.split_whitespace().skip(1).collect();
    let (Some(limit), Some(window)) = (
        parts.first().and_then(|p| p.parse::<u32>().ok()),
        parts.get(1).and_then(|p| p.parse::<u32>().ok()),
    ) else {
        return reply_html(&bot, &msg, get_text(&lang, "antiflood.setflood_usage")).await;
    };

    if !(2..=100).contains(&limit) {
        return reply_html(&bot, &msg, get_text(&lang, "antiflood.error_limit_count")).await;
    }
    if !(3..=600).contains(&window) {
        return reply_html(&bot, &msg, get_text(&lang, "antiflood.error_window")).await;
    }

    let mut cfg = state.configs.get_or_default(chat_id.0).await?;
    cfg.flood.max_messages = limit;
    cfg.flood.window_secs = window;
    state.configs.save(&cfg).await?;

    let text = get_text(&lang, "antiflood.limits_set")
        .replace("{limit}", &limit.to_string())
        .replace("{seconds}", &window.to_string());
    reply_html(&bot, &msg, text).await
}

/// /setfloodaction delete|warn|mute|kick
pub async fn setfloodaction_command(
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

    let Some(action) = first_arg(&msg).as_deref().and_then(FloodAction::parse) else {
        return reply_html(&bot, &msg, get_text(&lang, "antiflood.setfloodaction_usage")).await;
    };

    let mut cfg = state.configs.get_or_default(chat_id.0).await?;
    cfg.flood.action = action;
    state.configs.save(&cfg).await?;

    let text = get_text(&lang, "antiflood.action_set").replace("{action}", action.as_str());
    reply_html(&bot, &msg, text).await
}

async fn can_change_settings(state: &AppState, msg: &Message) -> bool {
    let user_id = msg.from.as_ref().map(|u| u.id).unwrap_or(UserId(0));
    state
        .permissions
        .can_change_info(msg.chat.id, user_id)
        .await
        .unwrap_or(false)
}

fn first_arg(msg: &Message) -> Option<String> {
    msg.text()
        .and_then(|t| t.split_whitespace().nth(1))
        .map(|s| s.to_lowercase())
}
