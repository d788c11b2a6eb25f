//! MongoDB-backed mute record repository.

use anyhow::Result;
use async_trait::async_trait;
use futures::TryStreamExt;
use mongodb::Collection;
use mongodb::bson::doc;

use crate::database::Database;
use crate::database::models::MuteRecord;

use super::MuteStore;

/// Repository for mute records. Not cached: every read feeds a state
/// transition, so it always goes to the source of truth.
pub struct MuteRepository {
    collection: Collection<MuteRecord>,
}

impl MuteRepository {
    pub fn new(db: &Database) -> Self {
        Self {
            collection: db.collection("mute_records"),
        }
    }
}

#[async_trait]
impl MuteStore for MuteRepository {
    async fn upsert(&self, record: &MuteRecord) -> Result<()> {
        let filter = doc! { "chat_id": record.chat_id, "user_id": record.user_id };
        let options = mongodb::options::ReplaceOptions::builder()
            .upsert(true)
            .build();

        self.collection
            .replace_one(filter, record)
            .with_options(options)
            .await?;

        Ok(())
    }

    async fn get_active(&self, chat_id: i64, user_id: i64) -> Result<Option<MuteRecord>> {
        let filter = doc! { "chat_id": chat_id, "user_id": user_id, "active": true };
        Ok(self.collection.find_one(filter).await?)
    }

    async fn deactivate(&self, chat_id: i64, user_id: i64, unmuted_at: i64) -> Result<bool> {
        let filter = doc! { "chat_id": chat_id, "user_id": user_id, "active": true };
        let update = doc! { "$set": { "active": false, "unmuted_at": unmuted_at } };

        let result = self.collection.update_one(filter, update).await?;
        Ok(result.matched_count > 0)
    }

    async fn active_timed(&self) -> Result<Vec<MuteRecord>> {
        let filter = doc! { "active": true, "muted_until": { "$ne": null } };
        let mut cursor = self.collection.find(filter).await?;

        let mut records = Vec::new();
        while let Some(record) = cursor.try_next().await? {
            records.push(record);
        }

        Ok(records)
    }
}
