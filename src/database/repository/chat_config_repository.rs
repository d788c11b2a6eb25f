//! Per-chat moderation config repository with hot caching.
//!
//! Read on every group message, so aggressively cached.

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use mongodb::Collection;
use mongodb::bson::doc;

use crate::cache::{CacheConfig, TypedCache};
use crate::database::Database;
use crate::database::models::ChatModerationConfig;

use super::ConfigStore;

/// Repository for chat moderation settings.
pub struct ChatConfigRepository {
    collection: Collection<ChatModerationConfig>,
    cache: TypedCache<i64, ChatModerationConfig>,
}

impl ChatConfigRepository {
    pub fn new(db: &Database) -> Self {
        let cache = TypedCache::new(
            "chat_config",
            CacheConfig::with_capacity(10_000).ttl(Duration::from_secs(600)),
        );

        Self {
            collection: db.collection("chat_config"),
            cache,
        }
    }
}

#[async_trait]
impl ConfigStore for ChatConfigRepository {
    async fn get_or_default(&self, chat_id: i64) -> Result<ChatModerationConfig> {
        if let Some(config) = self.cache.get(&chat_id) {
            return Ok(config);
        }

        let filter = doc! { "chat_id": chat_id };
        let result = self.collection.find_one(filter).await?;

        let config = result.unwrap_or_else(|| ChatModerationConfig::new(chat_id));
        self.cache.insert(chat_id, config.clone());

        Ok(config)
    }

    async fn save(&self, config: &ChatModerationConfig) -> Result<()> {
        let filter = doc! { "chat_id": config.chat_id };
        let options = mongodb::options::ReplaceOptions::builder()
            .upsert(true)
            .build();

        self.collection
            .replace_one(filter, config)
            .with_options(options)
            .await?;

        self.cache.insert(config.chat_id, config.clone());
        Ok(())
    }
}
