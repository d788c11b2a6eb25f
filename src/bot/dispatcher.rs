//! Dispatcher setup.
//!
//! Builds the shared application state and the update handler tree: commands,
//! the moderation chain for plain group messages, member-join events, and
//! captcha callbacks.

use std::sync::Arc;

use teloxide::dispatching::UpdateHandler;
use teloxide::prelude::*;
use teloxide::types::ChatMemberUpdated;
use tokio::sync::mpsc::UnboundedReceiver;

use crate::database::{
    CaptchaRepository, CaptchaStore, ChatConfigRepository, ConfigStore, Database, MuteRepository,
    MuteStore,
};
use crate::moderation::captcha::CaptchaManager;
use crate::moderation::flood::FloodTracker;
use crate::moderation::mute::MuteManager;
use crate::moderation::{InboundMessage, ModerationDispatcher};
use crate::permissions::Permissions;
use crate::plugins;
use crate::scheduler::{Scheduler, TimerJob};
use crate::telegram::{ChatApi, TelegramApi, ThrottledBot};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Permission checker with admin caching.
    pub permissions: Permissions,

    /// Per-chat moderation settings.
    pub configs: Arc<dyn ConfigStore>,

    /// In-memory flood windows.
    pub flood: Arc<FloodTracker>,

    /// Mute lifecycle manager.
    pub mutes: Arc<MuteManager>,

    /// Captcha challenge manager.
    pub captcha: Arc<CaptchaManager>,

    /// Moderation chain for inbound messages and events.
    pub moderation: Arc<ModerationDispatcher>,

    /// Timer scheduler.
    pub scheduler: Arc<Scheduler>,
}

impl AppState {
    /// Build the full moderation stack over the given bot and database.
    ///
    /// Returns the state plus the receiving end of the timer channel, which
    /// the caller feeds into `moderation::run_timer_loop`.
    pub fn new(
        bot: ThrottledBot,
        db: Arc<Database>,
        owner_ids: Vec<u64>,
    ) -> (Self, UnboundedReceiver<TimerJob>) {
        // Permissions needs the inner Bot for API calls
        let permissions = Permissions::with_owners(bot.inner().clone(), owner_ids.clone());
        let api: Arc<dyn ChatApi> = Arc::new(TelegramApi::new(bot, permissions.clone()));

        let configs: Arc<dyn ConfigStore> = Arc::new(ChatConfigRepository::new(&db));
        let mute_store: Arc<dyn MuteStore> = Arc::new(MuteRepository::new(&db));
        let captcha_store: Arc<dyn CaptchaStore> = Arc::new(CaptchaRepository::new(&db));

        let (scheduler, timer_rx) = Scheduler::new();
        let flood = Arc::new(FloodTracker::new());

        let mutes = Arc::new(MuteManager::new(
            api.clone(),
            mute_store,
            configs.clone(),
            scheduler.clone(),
        ));
        let captcha = Arc::new(CaptchaManager::new(
            api.clone(),
            captcha_store,
            configs.clone(),
            mutes.clone(),
            scheduler.clone(),
        ));
        let moderation = Arc::new(ModerationDispatcher::new(
            api,
            configs.clone(),
            flood.clone(),
            mutes.clone(),
            captcha.clone(),
            owner_ids,
        ));

        let state = Self {
            permissions,
            configs,
            flood,
            mutes,
            captcha,
            moderation,
            scheduler,
        };
        (state, timer_rx)
    }
}

/// Build the dispatcher with all handlers.
pub fn build_dispatcher(
    bot: ThrottledBot,
    state: AppState,
) -> Dispatcher<ThrottledBot, anyhow::Error, teloxide::dispatching::DefaultKey> {
    Dispatcher::builder(bot, schema())
        .dependencies(dptree::deps![state])
        .enable_ctrlc_handler()
        .build()
}

/// Build the handler schema.
fn schema() -> UpdateHandler<anyhow::Error> {
    use teloxide::dispatching::UpdateFilterExt;

    // Commands first; anything else in a group runs the moderation chain
    let message_handler = Update::filter_message()
        .branch(plugins::command_handler())
        .branch(moderation_handler());

    let member_handler = Update::filter_chat_member().branch(
        dptree::filter(|upd: ChatMemberUpdated| {
            !upd.old_chat_member.is_present() && upd.new_chat_member.is_present()
        })
        .endpoint(member_joined),
    );

    dptree::entry()
        .branch(message_handler)
        .branch(member_handler)
        .branch(plugins::callback_handler())
}

fn moderation_handler() -> UpdateHandler<anyhow::Error> {
    dptree::filter(|msg: Message| msg.chat.is_group() || msg.chat.is_supergroup())
        .endpoint(moderate_message)
}

async fn moderate_message(msg: Message, state: AppState) -> anyhow::Result<()> {
    let Some(from) = msg.from.as_ref() else {
        return Ok(());
    };
    let Some(text) = msg.text().or_else(|| msg.caption()) else {
        return Ok(());
    };
    // Unknown commands fall through the command branch; never moderate them
    if text.starts_with('/') {
        return Ok(());
    }

    let inbound = InboundMessage {
        chat_id: msg.chat.id,
        user_id: from.id,
        message_id: msg.id,
        text: text.to_string(),
        display_name: from.first_name.clone(),
        from_bot: from.is_bot,
    };
    state.moderation.handle_message(&inbound).await
}

async fn member_joined(upd: ChatMemberUpdated, state: AppState) -> anyhow::Result<()> {
    let user = &upd.new_chat_member.user;
    if user.is_bot {
        return Ok(());
    }
    state
        .moderation
        .handle_member_joined(upd.chat.id, user.id, &user.first_name)
        .await;
    Ok(())
}
