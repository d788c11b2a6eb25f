//! Captcha challenge model.

use serde::{Deserialize, Serialize};

/// One pending verification for a newly joined member.
///
/// Record existence in the store is the authority for challenge resolution:
/// whichever outcome (solve, timeout, admin override) removes the record
/// first wins, and the loser sees nothing to act on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptchaChallenge {
    pub chat_id: i64,
    pub user_id: i64,

    /// The challenge prompt message, for later edit/delete.
    pub message_id: i32,

    /// Answer options as presented to the user.
    pub options: Vec<i64>,

    /// Index into `options` of the correct answer.
    pub correct_option_index: i64,

    /// Unix seconds when the challenge was created.
    pub created_at: i64,

    /// Seconds the user has to answer.
    pub timeout_secs: u32,
}

impl CaptchaChallenge {
    /// Absolute deadline (unix seconds) for this challenge.
    pub fn deadline(&self) -> i64 {
        self.created_at + self.timeout_secs as i64
    }

    /// Whether `option_index` selects the correct answer.
    pub fn is_correct(&self, option_index: i64) -> bool {
        option_index == self.correct_option_index
    }
}
