//! Mute management commands.
//!
//! /mute supports an optional duration (forever without one), /tmute requires
//! one, /unmute lifts the restriction and resolves a pending captcha if the
//! target still has one.

use teloxide::prelude::*;
use teloxide::types::UserId;

use crate::bot::dispatcher::AppState;
use crate::i18n::get_text;
use crate::telegram::ThrottledBot;
use crate::utils::{format_duration, mention, parse_duration};

use super::{chat_lang, reply_html};

pub async fn mute_command(bot: ThrottledBot, msg: Message, state: AppState) -> anyhow::Result<()> {
    mute_action(bot, msg, state, MuteMode::Normal).await
}

pub async fn tmute_command(bot: ThrottledBot, msg: Message, state: AppState) -> anyhow::Result<()> {
    mute_action(bot, msg, state, MuteMode::Temporary).await
}

pub async fn unmute_command(
    bot: ThrottledBot,
    msg: Message,
    state: AppState,
) -> anyhow::Result<()> {
    mute_action(bot, msg, state, MuteMode::Unmute).await
}

#[derive(PartialEq, Clone, Copy)]
enum MuteMode {
    Normal,    // /mute - optional duration (default forever)
    Temporary, // /tmute - requires duration
    Unmute,
}

async fn mute_action(
    bot: ThrottledBot,
    msg: Message,
    state: AppState,
    mode: MuteMode,
) -> anyhow::Result<()> {
    let chat_id = msg.chat.id;
    let user_id = msg.from.as_ref().map(|u| u.id).unwrap_or(UserId(0));
    let lang = chat_lang(&state, chat_id).await;

    if !msg.chat.is_group() && !msg.chat.is_supergroup() {
        return reply_html(&bot, &msg, get_text(&lang, "common.error_group_only")).await;
    }

    if !state
        .permissions
        .can_restrict_members(chat_id, user_id)
        .await
        .unwrap_or(false)
    {
        return reply_html(&bot, &msg, get_text(&lang, "common.error_permission")).await;
    }

    let text = msg.text().unwrap_or("");
    let parts: Vec<&str> = text.split_whitespace().skip(1).collect();

    // Target from the replied-to message or a numeric id argument
    let (target_id, target_name, args_start) = if let Some(reply) = msg.reply_to_message() {
        match &reply.from {
            Some(user) => (Some(user.id), user.first_name.clone(), 0),
            None => (None, String::new(), 0),
        }
    } else if let Some(id) = parts.first().and_then(|p| p.parse::<u64>().ok()) {
        (Some(UserId(id)), format!("User {}", id), 1)
    } else {
        (None, String::new(), 0)
    };

    let Some(target_id) = target_id else {
        return reply_html(&bot, &msg, get_text(&lang, "common.error_no_target")).await;
    };

    if mode != MuteMode::Unmute
        && state
            .permissions
            .is_admin(chat_id, target_id)
            .await
            .unwrap_or(false)
    {
        return reply_html(&bot, &msg, get_text(&lang, "mute.error_admin_target")).await;
    }

    let target_mention = mention(target_id.0, &target_name);

    if mode == MuteMode::Unmute {
        // A pending captcha is resolved by the same command
        state.captcha.override_challenge(chat_id, target_id).await?;
        if !state.mutes.manual_unmute(chat_id, target_id).await? {
            return reply_html(&bot, &msg, get_text(&lang, "mute.error_restrict_failed")).await;
        }
        let text = get_text(&lang, "mute.unmuted").replace("{mention}", &target_mention);
        return reply_html(&bot, &msg, text).await;
    }

    // Optional duration, then the rest is the reason
    let (duration, reason_start) = match parts.get(args_start) {
        Some(arg) => match parse_duration(arg) {
            Some(d) => (Some(d), args_start + 1),
            None if mode == MuteMode::Temporary => {
                return reply_html(&bot, &msg, get_text(&lang, "mute.error_duration")).await;
            }
            None => (None, args_start),
        },
        None if mode == MuteMode::Temporary => {
            return reply_html(&bot, &msg, get_text(&lang, "mute.tmute_usage")).await;
        }
        None => (None, args_start),
    };

    let reason = match parts.get(reason_start..) {
        Some(rest) if !rest.is_empty() => Some(rest.join(" ")),
        _ => None,
    };

    if !state
        .mutes
        .apply_mute(chat_id, target_id, duration, reason)
        .await?
    {
        return reply_html(&bot, &msg, get_text(&lang, "mute.error_restrict_failed")).await;
    }

    let text = match duration {
        Some(d) => get_text(&lang, "mute.muted_for")
            .replace("{mention}", &target_mention)
            .replace("{duration}", &format_duration(d.as_secs())),
        None => get_text(&lang, "mute.muted_permanent").replace("{mention}", &target_mention),
    };
    reply_html(&bot, &msg, text).await
}
