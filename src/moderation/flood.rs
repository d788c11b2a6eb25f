//! Flood window tracker.
//!
//! Per-(chat, user) sliding window over recent message times. In-memory
//! only: losing it on restart costs at most one free window per user.
//! The caller is responsible for exemptions (admins, owners) and for taking
//! the configured action plus `reset` when the limit is exceeded.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tracing::debug;

/// Result of observing one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FloodObservation {
    /// Count strictly exceeded the limit.
    pub over_limit: bool,
    /// Messages inside the window, including this one.
    pub count: usize,
}

struct Window {
    times: VecDeque<Instant>,
    last_seen: Instant,
}

/// Sliding-window flood tracker.
pub struct FloodTracker {
    windows: DashMap<(i64, i64), Window>,
}

impl FloodTracker {
    pub fn new() -> Self {
        Self {
            windows: DashMap::new(),
        }
    }

    /// Record a message at `now` and decide whether the user is flooding.
    ///
    /// The window is trimmed on every observation, so memory per user is
    /// bounded by the message rate times the window length. The comparison
    /// is strict: the count must exceed `max_messages`, not merely reach it.
    pub fn observe(
        &self,
        chat_id: i64,
        user_id: i64,
        now: Instant,
        max_messages: u32,
        window: Duration,
    ) -> FloodObservation {
        let mut entry = self.windows.entry((chat_id, user_id)).or_insert_with(|| Window {
            times: VecDeque::new(),
            last_seen: now,
        });

        entry.last_seen = now;

        while let Some(&oldest) = entry.times.front() {
            if now.duration_since(oldest) > window {
                entry.times.pop_front();
            } else {
                break;
            }
        }

        entry.times.push_back(now);

        let count = entry.times.len();
        FloodObservation {
            over_limit: count > max_messages as usize,
            count,
        }
    }

    /// Clear the window for a key. Called after a penalty so the very next
    /// message does not immediately re-trigger.
    pub fn reset(&self, chat_id: i64, user_id: i64) {
        self.windows.remove(&(chat_id, user_id));
    }

    /// Evict windows idle for longer than `idle_for`. Returns the number
    /// evicted.
    pub fn sweep(&self, now: Instant, idle_for: Duration) -> usize {
        let before = self.windows.len();
        self.windows
            .retain(|_, w| now.duration_since(w.last_seen) < idle_for);
        let evicted = before - self.windows.len();
        if evicted > 0 {
            debug!(evicted, "evicted idle flood windows");
        }
        evicted
    }

    pub fn tracked_keys(&self) -> usize {
        self.windows.len()
    }
}

impl Default for FloodTracker {
    fn default() -> Self {
        Self::new()
    }
}
