//! Per-chat moderation configuration.

use serde::{Deserialize, Serialize};

/// Action taken when a user exceeds the flood limit.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FloodAction {
    /// Delete the offending message.
    Delete,
    /// Warn the user (message only).
    Warn,
    /// Mute the user for the configured duration.
    Mute,
    /// Kick the user (can rejoin).
    Kick,
}

impl Default for FloodAction {
    fn default() -> Self {
        Self::Mute
    }
}

impl FloodAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Delete => "delete",
            Self::Warn => "warn",
            Self::Mute => "mute",
            Self::Kick => "kick",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "delete" => Some(Self::Delete),
            "warn" => Some(Self::Warn),
            "mute" => Some(Self::Mute),
            "kick" => Some(Self::Kick),
            _ => None,
        }
    }
}

/// Antiflood configuration for a group.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FloodSettings {
    #[serde(default)]
    pub enabled: bool,

    /// Maximum messages allowed in the time window.
    #[serde(default = "default_max_messages")]
    pub max_messages: u32,

    /// Time window in seconds.
    #[serde(default = "default_window_secs")]
    pub window_secs: u32,

    #[serde(default)]
    pub action: FloodAction,

    /// Mute duration in seconds when `action` is `Mute`.
    #[serde(default = "default_flood_mute_secs")]
    pub mute_duration_secs: u64,
}

fn default_max_messages() -> u32 {
    5
}

fn default_window_secs() -> u32 {
    10
}

fn default_flood_mute_secs() -> u64 {
    300
}

impl Default for FloodSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            max_messages: default_max_messages(),
            window_secs: default_window_secs(),
            action: FloodAction::Mute,
            mute_duration_secs: default_flood_mute_secs(),
        }
    }
}

/// Join captcha configuration for a group.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptchaSettings {
    #[serde(default)]
    pub enabled: bool,

    /// Seconds a new member has to solve the challenge.
    #[serde(default = "default_captcha_timeout")]
    pub timeout_secs: u32,
}

fn default_captcha_timeout() -> u32 {
    300
}

impl Default for CaptchaSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            timeout_secs: default_captcha_timeout(),
        }
    }
}

/// Spam-link filter configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LinkFilterSettings {
    #[serde(default)]
    pub enabled: bool,
}

/// Profanity filter configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProfanityFilterSettings {
    #[serde(default)]
    pub enabled: bool,

    /// Lowercased words to match against message text.
    #[serde(default)]
    pub words: Vec<String>,
}

/// Moderation settings for a chat. Read-mostly; handlers treat a fetched
/// value as an immutable snapshot for the duration of one event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatModerationConfig {
    pub chat_id: i64,

    /// Language code for bot replies in this chat.
    #[serde(default = "default_lang")]
    pub lang: String,

    #[serde(default)]
    pub flood: FloodSettings,

    #[serde(default)]
    pub captcha: CaptchaSettings,

    #[serde(default)]
    pub spam_links: LinkFilterSettings,

    #[serde(default)]
    pub profanity: ProfanityFilterSettings,
}

fn default_lang() -> String {
    "en".to_string()
}

impl ChatModerationConfig {
    pub fn new(chat_id: i64) -> Self {
        Self {
            chat_id,
            lang: default_lang(),
            flood: FloodSettings::default(),
            captcha: CaptchaSettings::default(),
            spam_links: LinkFilterSettings::default(),
            profanity: ProfanityFilterSettings::default(),
        }
    }
}
