//! Command handlers.
//!
//! Add new commands by:
//! 1. Creating a new file in this directory
//! 2. Adding `pub mod your_plugin;` below
//! 3. Adding the handler to `command_handler()`

pub mod antiflood;
pub mod captcha;
pub mod mute;
pub mod start;

use teloxide::dispatching::UpdateHandler;
use teloxide::prelude::*;
use teloxide::types::{ChatId, ParseMode, ReplyParameters};
use teloxide::utils::command::BotCommands;

use crate::bot::dispatcher::AppState;
use crate::telegram::ThrottledBot;

/// All bot commands.
#[derive(BotCommands, Clone)]
#[command(rename_rule = "lowercase", description = "Available commands:")]
pub enum Command {
    #[command(description = "Start the bot")]
    Start,

    #[command(description = "Show help")]
    Help,

    // Mute commands
    #[command(description = "Mute a user (no duration = forever)")]
    Mute,

    #[command(description = "Temporarily mute a user (duration required)")]
    Tmute,

    #[command(description = "Unmute a user")]
    Unmute,

    // Antiflood commands
    #[command(description = "Antiflood settings")]
    Antiflood,

    #[command(description = "Set flood limit and window")]
    Setflood,

    #[command(description = "Set the action on flood")]
    Setfloodaction,

    // Captcha commands
    #[command(description = "Captcha settings")]
    Captcha,

    #[command(description = "Set captcha timeout")]
    Captchatimeout,
}

/// Build the combined command handler.
pub fn command_handler() -> UpdateHandler<anyhow::Error> {
    use dptree::case;

    teloxide::filter_command::<Command, _>()
        .branch(case![Command::Start].endpoint(start::start_command))
        .branch(case![Command::Help].endpoint(start::help_command))
        // Mute
        .branch(case![Command::Mute].endpoint(mute::mute_command))
        .branch(case![Command::Tmute].endpoint(mute::tmute_command))
        .branch(case![Command::Unmute].endpoint(mute::unmute_command))
        // Antiflood
        .branch(case![Command::Antiflood].endpoint(antiflood::antiflood_command))
        .branch(case![Command::Setflood].endpoint(antiflood::setflood_command))
        .branch(case![Command::Setfloodaction].endpoint(antiflood::setfloodaction_command))
        // Captcha
        .branch(case![Command::Captcha].endpoint(captcha::captcha_command))
        .branch(case![Command::Captchatimeout].endpoint(captcha::captchatimeout_command))
}

/// Build the callback query handler.
pub fn callback_handler() -> UpdateHandler<anyhow::Error> {
    Update::filter_callback_query().branch(
        dptree::filter(|q: CallbackQuery| {
            q.data
                .as_ref()
                .map(|d| d.starts_with("captcha:"))
                .unwrap_or(false)
        })
        .endpoint(captcha::captcha_callback_handler),
    )
}

/// Reply language for a chat; falls back to English when the lookup fails.
pub(crate) async fn chat_lang(state: &AppState, chat_id: ChatId) -> String {
    state
        .configs
        .get_or_default(chat_id.0)
        .await
        .map(|c| c.lang)
        .unwrap_or_else(|_| "en".to_string())
}

/// Send an HTML reply to the command message.
pub(crate) async fn reply_html(
    bot: &ThrottledBot,
    msg: &Message,
    text: String,
) -> anyhow::Result<()> {
    bot.send_message(msg.chat.id, text)
        .parse_mode(ParseMode::Html)
        .reply_parameters(ReplyParameters::new(msg.id))
        .await?;
    Ok(())
}
