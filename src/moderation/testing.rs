//! In-memory doubles and a wired-up harness for moderation tests.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use teloxide::types::{ChatId, MessageId, UserId};

use crate::database::{
    CaptchaChallenge, CaptchaStore, ChatModerationConfig, ConfigStore, FloodAction, MuteRecord,
    MuteStore,
};
use crate::scheduler::Scheduler;
use crate::telegram::{ApiError, ChatApi};

use super::captcha::CaptchaManager;
use super::flood::FloodTracker;
use super::mute::MuteManager;
use super::{ModerationDispatcher, run_timer_loop};

/// Sleep through `d` on the paused clock, then let delivered timer jobs run.
pub async fn advance(d: Duration) {
    tokio::time::sleep(d).await;
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
}

/// Recording fake of the chat platform.
#[derive(Default)]
pub struct MockApi {
    restricted: Mutex<HashSet<(i64, u64)>>,
    admins: Mutex<HashSet<(i64, u64)>>,
    sent: Mutex<Vec<(i64, String)>>,
    deleted: Mutex<Vec<(i64, i32)>>,
    kicked: Mutex<Vec<(i64, u64)>>,
    deny_restrict: AtomicBool,
    next_message_id: AtomicI32,
}

impl MockApi {
    pub fn new() -> Self {
        Self {
            next_message_id: AtomicI32::new(1),
            ..Self::default()
        }
    }

    /// Make every restrict/unrestrict call fail with `Forbidden`.
    pub fn deny_restrict(&self) {
        self.deny_restrict.store(true, Ordering::SeqCst);
    }

    pub fn make_admin(&self, chat_id: ChatId, user_id: UserId) {
        self.admins.lock().unwrap().insert((chat_id.0, user_id.0));
    }

    /// Seed a restriction as if applied by a previous process.
    pub fn force_restricted(&self, chat_id: ChatId, user_id: UserId) {
        self.restricted
            .lock()
            .unwrap()
            .insert((chat_id.0, user_id.0));
    }

    pub fn restricted(&self, chat_id: ChatId, user_id: UserId) -> bool {
        self.restricted
            .lock()
            .unwrap()
            .contains(&(chat_id.0, user_id.0))
    }

    pub fn sent_texts(&self, chat_id: ChatId) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|(chat, _)| *chat == chat_id.0)
            .map(|(_, text)| text.clone())
            .collect()
    }

    pub fn sent_count(&self, chat_id: ChatId) -> usize {
        self.sent_texts(chat_id).len()
    }

    pub fn was_deleted(&self, chat_id: ChatId, message_id: MessageId) -> bool {
        self.deleted
            .lock()
            .unwrap()
            .contains(&(chat_id.0, message_id.0))
    }

    pub fn deleted_count(&self) -> usize {
        self.deleted.lock().unwrap().len()
    }

    pub fn was_kicked(&self, chat_id: ChatId, user_id: UserId) -> bool {
        self.kicked
            .lock()
            .unwrap()
            .contains(&(chat_id.0, user_id.0))
    }

    fn next_id(&self) -> MessageId {
        MessageId(self.next_message_id.fetch_add(1, Ordering::SeqCst))
    }
}

#[async_trait]
impl ChatApi for MockApi {
    async fn restrict(
        &self,
        chat_id: ChatId,
        user_id: UserId,
        _until: Option<DateTime<Utc>>,
    ) -> Result<(), ApiError> {
        if self.deny_restrict.load(Ordering::SeqCst) {
            return Err(ApiError::Forbidden("not enough rights".to_string()));
        }
        self.restricted
            .lock()
            .unwrap()
            .insert((chat_id.0, user_id.0));
        Ok(())
    }

    async fn unrestrict(&self, chat_id: ChatId, user_id: UserId) -> Result<(), ApiError> {
        if self.deny_restrict.load(Ordering::SeqCst) {
            return Err(ApiError::Forbidden("not enough rights".to_string()));
        }
        self.restricted
            .lock()
            .unwrap()
            .remove(&(chat_id.0, user_id.0));
        Ok(())
    }

    async fn kick(&self, chat_id: ChatId, user_id: UserId) -> Result<(), ApiError> {
        self.kicked.lock().unwrap().push((chat_id.0, user_id.0));
        Ok(())
    }

    async fn send_text(&self, chat_id: ChatId, text: String) -> Result<MessageId, ApiError> {
        self.sent.lock().unwrap().push((chat_id.0, text));
        Ok(self.next_id())
    }

    async fn send_challenge(
        &self,
        chat_id: ChatId,
        text: String,
        _buttons: Vec<(String, String)>,
    ) -> Result<MessageId, ApiError> {
        self.sent.lock().unwrap().push((chat_id.0, text));
        Ok(self.next_id())
    }

    async fn delete_message(
        &self,
        chat_id: ChatId,
        message_id: MessageId,
    ) -> Result<(), ApiError> {
        self.deleted.lock().unwrap().push((chat_id.0, message_id.0));
        Ok(())
    }

    async fn is_admin(&self, chat_id: ChatId, user_id: UserId) -> Result<bool, ApiError> {
        Ok(self.admins.lock().unwrap().contains(&(chat_id.0, user_id.0)))
    }

    async fn is_restricted(&self, chat_id: ChatId, user_id: UserId) -> Result<bool, ApiError> {
        Ok(self.restricted(chat_id, user_id))
    }
}

#[derive(Default)]
pub struct MemoryMuteStore {
    records: Mutex<HashMap<(i64, i64), MuteRecord>>,
}

#[async_trait]
impl MuteStore for MemoryMuteStore {
    async fn upsert(&self, record: &MuteRecord) -> anyhow::Result<()> {
        self.records
            .lock()
            .unwrap()
            .insert((record.chat_id, record.user_id), record.clone());
        Ok(())
    }

    async fn get_active(&self, chat_id: i64, user_id: i64) -> anyhow::Result<Option<MuteRecord>> {
        Ok(self
            .records
            .lock()
            .unwrap()
            .get(&(chat_id, user_id))
            .filter(|r| r.active)
            .cloned())
    }

    async fn deactivate(&self, chat_id: i64, user_id: i64, unmuted_at: i64) -> anyhow::Result<bool> {
        let mut records = self.records.lock().unwrap();
        match records.get_mut(&(chat_id, user_id)) {
            Some(record) if record.active => {
                record.active = false;
                record.unmuted_at = Some(unmuted_at);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn active_timed(&self) -> anyhow::Result<Vec<MuteRecord>> {
        Ok(self
            .records
            .lock()
            .unwrap()
            .values()
            .filter(|r| r.active && r.muted_until.is_some())
            .cloned()
            .collect())
    }
}

#[derive(Default)]
pub struct MemoryCaptchaStore {
    challenges: Mutex<HashMap<(i64, i64), CaptchaChallenge>>,
}

#[async_trait]
impl CaptchaStore for MemoryCaptchaStore {
    async fn put(&self, challenge: &CaptchaChallenge) -> anyhow::Result<()> {
        self.challenges
            .lock()
            .unwrap()
            .insert((challenge.chat_id, challenge.user_id), challenge.clone());
        Ok(())
    }

    async fn get(&self, chat_id: i64, user_id: i64) -> anyhow::Result<Option<CaptchaChallenge>> {
        Ok(self
            .challenges
            .lock()
            .unwrap()
            .get(&(chat_id, user_id))
            .cloned())
    }

    async fn remove(&self, chat_id: i64, user_id: i64) -> anyhow::Result<bool> {
        Ok(self
            .challenges
            .lock()
            .unwrap()
            .remove(&(chat_id, user_id))
            .is_some())
    }

    async fn pending(&self) -> anyhow::Result<Vec<CaptchaChallenge>> {
        Ok(self.challenges.lock().unwrap().values().cloned().collect())
    }
}

#[derive(Default)]
pub struct MemoryConfigStore {
    configs: Mutex<HashMap<i64, ChatModerationConfig>>,
}

#[async_trait]
impl ConfigStore for MemoryConfigStore {
    async fn get_or_default(&self, chat_id: i64) -> anyhow::Result<ChatModerationConfig> {
        Ok(self
            .configs
            .lock()
            .unwrap()
            .get(&chat_id)
            .cloned()
            .unwrap_or_else(|| ChatModerationConfig::new(chat_id)))
    }

    async fn save(&self, config: &ChatModerationConfig) -> anyhow::Result<()> {
        self.configs
            .lock()
            .unwrap()
            .insert(config.chat_id, config.clone());
        Ok(())
    }
}

/// Fully wired moderation stack over in-memory doubles, with the timer loop
/// running. Owner id 7 is registered as a bot owner.
pub struct Harness {
    pub api: Arc<MockApi>,
    pub store: Arc<MemoryMuteStore>,
    pub captcha_store: Arc<MemoryCaptchaStore>,
    pub config: Arc<MemoryConfigStore>,
    pub scheduler: Arc<Scheduler>,
    pub flood: Arc<FloodTracker>,
    pub mutes: Arc<MuteManager>,
    pub captcha: Arc<CaptchaManager>,
    pub dispatcher: ModerationDispatcher,
}

impl Harness {
    pub fn new() -> Self {
        crate::i18n::init();

        let api = Arc::new(MockApi::new());
        let store = Arc::new(MemoryMuteStore::default());
        let captcha_store = Arc::new(MemoryCaptchaStore::default());
        let config = Arc::new(MemoryConfigStore::default());
        let (scheduler, rx) = Scheduler::new();
        let flood = Arc::new(FloodTracker::new());

        let mutes = Arc::new(MuteManager::new(
            api.clone() as Arc<dyn ChatApi>,
            store.clone() as Arc<dyn MuteStore>,
            config.clone() as Arc<dyn ConfigStore>,
            scheduler.clone(),
        ));
        let captcha = Arc::new(CaptchaManager::new(
            api.clone() as Arc<dyn ChatApi>,
            captcha_store.clone() as Arc<dyn CaptchaStore>,
            config.clone() as Arc<dyn ConfigStore>,
            mutes.clone(),
            scheduler.clone(),
        ));
        let dispatcher = ModerationDispatcher::new(
            api.clone() as Arc<dyn ChatApi>,
            config.clone() as Arc<dyn ConfigStore>,
            flood.clone(),
            mutes.clone(),
            captcha.clone(),
            vec![7],
        );

        tokio::spawn(run_timer_loop(rx, mutes.clone(), captcha.clone()));

        Self {
            api,
            store,
            captcha_store,
            config,
            scheduler,
            flood,
            mutes,
            captcha,
            dispatcher,
        }
    }

    pub async fn enable_captcha(&self, chat_id: ChatId) {
        let mut cfg = self.config.get_or_default(chat_id.0).await.unwrap();
        cfg.captcha.enabled = true;
        self.config.save(&cfg).await.unwrap();
    }

    pub async fn enable_flood(&self, chat_id: ChatId, action: FloodAction) {
        let mut cfg = self.config.get_or_default(chat_id.0).await.unwrap();
        cfg.flood.enabled = true;
        cfg.flood.action = action;
        self.config.save(&cfg).await.unwrap();
    }
}
