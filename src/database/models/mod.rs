//! Database model exports.

mod captcha;
mod chat_config;
mod mute;

pub use captcha::CaptchaChallenge;
pub use chat_config::{
    CaptchaSettings, ChatModerationConfig, FloodAction, FloodSettings, LinkFilterSettings,
    ProfanityFilterSettings,
};
pub use mute::MuteRecord;
