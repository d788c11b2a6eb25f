//! Vigil - Telegram group moderation bot
//!
//! Time-bounded moderation for group chats: timed mutes, sliding-window
//! antiflood, and join captchas, all backed by MongoDB so pending timers
//! survive restarts.
//!
//! ## Architecture
//!
//! - `config` - Environment configuration
//! - `database` - MongoDB models, repositories and the store traits
//! - `cache` - LRU-based caching with Moka
//! - `permissions` - Admin checking with caching
//! - `scheduler` - Wall-clock timers with replace-on-reschedule
//! - `moderation` - Mute/flood/captcha managers and the dispatcher chain
//! - `telegram` - The `ChatApi` seam over the throttled teloxide bot
//! - `plugins` - Command handlers (extensible)
//! - `bot` - State wiring and the update dispatcher

mod bot;
mod cache;
mod config;
mod database;
mod i18n;
mod moderation;
mod permissions;
mod plugins;
mod scheduler;
mod telegram;
mod utils;

use std::sync::Arc;
use std::time::{Duration, Instant};

use teloxide::adaptors::throttle::Limits;
use teloxide::prelude::*;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use bot::AppState;
use config::Config;
use database::Database;

/// How often idle flood windows and per-key locks are swept.
const MAINTENANCE_INTERVAL: Duration = Duration::from_secs(300);

/// Flood windows idle for this long are evicted.
const FLOOD_IDLE_EVICT: Duration = Duration::from_secs(600);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file first (before anything else)
    dotenvy::dotenv().ok();

    // If RUST_LOG is not set, default to "info" level for our crate
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("vigil=info,teloxide=warn"));

    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("Starting Vigil...");

    let config = Config::from_env();
    info!("Configuration loaded");

    i18n::init();

    info!("Connecting to MongoDB...");
    let db = Database::connect(&config.mongodb_uri, &config.mongodb_database).await?;
    db.ensure_indexes().await?;
    let db = Arc::new(db);
    info!("Database connected");

    // Throttle respects Telegram's rate limits:
    // - 30 messages per second globally
    // - 1 message per second to the same chat
    // - 20 messages per minute to the same group
    let bot = Bot::new(&config.bot_token).throttle(Limits::default());

    let me = bot.get_me().await?;
    info!("Bot username: @{}", me.username());

    if config.owner_ids.is_empty() {
        info!("No owner IDs configured (OWNER_IDS is empty)");
    } else {
        info!("Bot owners: {:?}", config.owner_ids);
    }

    let (state, timer_rx) = AppState::new(bot.clone(), db, config.owner_ids.clone());

    // Re-arm timers from persisted state before taking updates
    match state.mutes.recover().await {
        Ok(count) => info!(count, "mute timers re-armed"),
        Err(e) => warn!(error = %e, "mute recovery failed"),
    }
    match state.captcha.recover().await {
        Ok(count) => info!(count, "captcha timers re-armed"),
        Err(e) => warn!(error = %e, "captcha recovery failed"),
    }

    tokio::spawn(moderation::run_timer_loop(
        timer_rx,
        state.mutes.clone(),
        state.captcha.clone(),
    ));

    tokio::spawn(maintenance_loop(state.clone()));

    let mut dispatcher = bot::build_dispatcher(bot, state);
    dispatcher.dispatch().await;

    Ok(())
}

/// Periodically evict idle flood windows and unheld per-key locks.
async fn maintenance_loop(state: AppState) {
    let mut interval = tokio::time::interval(MAINTENANCE_INTERVAL);
    loop {
        interval.tick().await;
        state.flood.sweep(Instant::now(), FLOOD_IDLE_EVICT);
        state.mutes.sweep_locks();
        state.captcha.sweep_locks();
        debug!(
            flood_windows = state.flood.tracked_keys(),
            pending_timers = state.scheduler.pending_count(),
            "maintenance sweep"
        );
    }
}
