//! /start and /help.

use teloxide::prelude::*;

use crate::bot::dispatcher::AppState;
use crate::i18n::get_text;
use crate::telegram::ThrottledBot;

use super::{chat_lang, reply_html};

pub async fn start_command(
    bot: ThrottledBot,
    msg: Message,
    state: AppState,
) -> anyhow::Result<()> {
    let lang = chat_lang(&state, msg.chat.id).await;
    reply_html(&bot, &msg, get_text(&lang, "start.greeting")).await
}

pub async fn help_command(bot: ThrottledBot, msg: Message, state: AppState) -> anyhow::Result<()> {
    let lang = chat_lang(&state, msg.chat.id).await;
    reply_html(&bot, &msg, get_text(&lang, "start.help")).await
}
