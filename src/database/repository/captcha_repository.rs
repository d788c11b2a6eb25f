//! MongoDB-backed captcha challenge repository.

use anyhow::Result;
use async_trait::async_trait;
use futures::TryStreamExt;
use mongodb::Collection;
use mongodb::bson::doc;

use crate::database::Database;
use crate::database::models::CaptchaChallenge;

use super::CaptchaStore;

/// Repository for pending captcha challenges.
///
/// `remove` maps to a single delete so that concurrent solve/timeout paths
/// observe exactly one winner.
pub struct CaptchaRepository {
    collection: Collection<CaptchaChallenge>,
}

impl CaptchaRepository {
    pub fn new(db: &Database) -> Self {
        Self {
            collection: db.collection("captcha_challenges"),
        }
    }
}

#[async_trait]
impl CaptchaStore for CaptchaRepository {
    async fn put(&self, challenge: &CaptchaChallenge) -> Result<()> {
        let filter = doc! { "chat_id": challenge.chat_id, "user_id": challenge.user_id };
        let options = mongodb::options::ReplaceOptions::builder()
            .upsert(true)
            .build();

        self.collection
            .replace_one(filter, challenge)
            .with_options(options)
            .await?;

        Ok(())
    }

    async fn get(&self, chat_id: i64, user_id: i64) -> Result<Option<CaptchaChallenge>> {
        let filter = doc! { "chat_id": chat_id, "user_id": user_id };
        Ok(self.collection.find_one(filter).await?)
    }

    async fn remove(&self, chat_id: i64, user_id: i64) -> Result<bool> {
        let filter = doc! { "chat_id": chat_id, "user_id": user_id };
        let result = self.collection.delete_one(filter).await?;
        Ok(result.deleted_count > 0)
    }

    async fn pending(&self) -> Result<Vec<CaptchaChallenge>> {
        let mut cursor = self.collection.find(doc! {}).await?;

        let mut challenges = Vec::new();
        while let Some(challenge) = cursor.try_next().await? {
            challenges.push(challenge);
        }

        Ok(challenges)
    }
}
