//! MongoDB database wrapper.

use mongodb::bson::doc;
use mongodb::options::{ClientOptions, IndexOptions};
use mongodb::{Client, Collection, IndexModel};
use tracing::info;

use super::models::{CaptchaChallenge, MuteRecord};

/// Database wrapper for MongoDB operations.
#[derive(Debug, Clone)]
pub struct Database {
    db: mongodb::Database,
}

impl Database {
    /// Connect to MongoDB with the given URI and database name.
    ///
    /// # Errors
    /// Returns error if connection fails.
    pub async fn connect(uri: &str, db_name: &str) -> anyhow::Result<Self> {
        let options = ClientOptions::parse(uri).await?;
        let client = Client::with_options(options)?;

        // Ping the database to verify connection
        client
            .database("admin")
            .run_command(doc! { "ping": 1 })
            .await?;

        info!("Successfully connected to MongoDB");

        let db = client.database(db_name);

        Ok(Self { db })
    }

    /// Get a typed collection from the database.
    pub fn collection<T: Send + Sync>(&self, name: &str) -> Collection<T> {
        self.db.collection(name)
    }

    /// Create the indexes the moderation core queries against.
    ///
    /// Unique (chat_id, user_id) keys enforce the one-record-per-key
    /// invariant; the active/muted_until index backs startup recovery.
    pub async fn ensure_indexes(&self) -> anyhow::Result<()> {
        let unique = IndexOptions::builder().unique(true).build();

        self.collection::<MuteRecord>("mute_records")
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "chat_id": 1, "user_id": 1 })
                    .options(unique.clone())
                    .build(),
            )
            .await?;

        self.collection::<MuteRecord>("mute_records")
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "active": 1, "muted_until": 1 })
                    .build(),
            )
            .await?;

        self.collection::<CaptchaChallenge>("captcha_challenges")
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "chat_id": 1, "user_id": 1 })
                    .options(unique)
                    .build(),
            )
            .await?;

        info!("Database indexes ensured");
        Ok(())
    }
}
