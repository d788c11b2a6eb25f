//! Configuration module for the Vigil bot.
//!
//! Loads configuration from environment variables.

use std::env;

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    // Telegram
    pub bot_token: String,

    /// Owner user IDs (comma-separated)
    /// These users have full access to all bot features.
    pub owner_ids: Vec<u64>,

    // MongoDB
    pub mongodb_uri: String,
    pub mongodb_database: String,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Panics
    /// Panics if required environment variables are not set.
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let owner_ids = env::var("OWNER_IDS")
            .unwrap_or_default()
            .split(',')
            .filter_map(|s| s.trim().parse::<u64>().ok())
            .collect();

        Self {
            bot_token: env::var("BOT_TOKEN").expect("BOT_TOKEN must be set"),
            owner_ids,
            mongodb_uri: env::var("MONGODB_URI").expect("MONGODB_URI must be set"),
            mongodb_database: env::var("MONGODB_DATABASE")
                .unwrap_or_else(|_| "vigil".to_string()),
        }
    }
}
