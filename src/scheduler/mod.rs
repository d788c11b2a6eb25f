//! Timer service.
//!
//! Schedules jobs to fire at an absolute wall-clock time. Each job carries a
//! stable id derived from its payload; scheduling under an id that already
//! exists atomically replaces the prior job (cancel-then-add), which is what
//! gives a fresh mute precedence over a pending auto-unmute.
//!
//! Fired jobs are delivered at-least-once over a channel to a consumer loop
//! (`moderation::run_timer_loop`). The in-memory schedule is a derived cache:
//! it is not persisted, and on restart the managers recompute pending timers
//! from their stores and re-schedule here.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::AbortHandle;
use tracing::{debug, warn};

/// Payload of a scheduled timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerJob {
    /// Lift a timed mute.
    Unmute { chat_id: i64, user_id: i64 },
    /// Expire an unanswered captcha challenge.
    CaptchaTimeout { chat_id: i64, user_id: i64 },
}

impl TimerJob {
    /// Stable id used to detect and replace superseding schedules.
    pub fn job_id(&self) -> String {
        match self {
            Self::Unmute { chat_id, user_id } => Self::unmute_job_id(*chat_id, *user_id),
            Self::CaptchaTimeout { chat_id, user_id } => {
                Self::captcha_job_id(*chat_id, *user_id)
            }
        }
    }

    pub fn unmute_job_id(chat_id: i64, user_id: i64) -> String {
        format!("unmute:{}:{}", chat_id, user_id)
    }

    pub fn captcha_job_id(chat_id: i64, user_id: i64) -> String {
        format!("captcha:{}:{}", chat_id, user_id)
    }
}

struct JobEntry {
    generation: u64,
    handle: AbortHandle,
}

/// Timer scheduler with replace-on-reschedule semantics.
pub struct Scheduler {
    jobs: DashMap<String, JobEntry>,
    tx: UnboundedSender<TimerJob>,
    generation: AtomicU64,
}

impl Scheduler {
    /// Create a scheduler and the receiving end of its fire channel.
    pub fn new() -> (Arc<Self>, UnboundedReceiver<TimerJob>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let scheduler = Arc::new(Self {
            jobs: DashMap::new(),
            tx,
            generation: AtomicU64::new(0),
        });
        (scheduler, rx)
    }

    /// Schedule `job` to fire at `at`. A job with the same id is replaced.
    pub fn schedule(self: &Arc<Self>, at: DateTime<Utc>, job: TimerJob) {
        let job_id = job.job_id();
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        // Deadline is absolute; a past deadline fires immediately.
        let delay = (at - Utc::now()).to_std().unwrap_or(Duration::ZERO);

        debug!(job_id = %job_id, delay_secs = delay.as_secs(), "scheduling timer");

        // The entry guard makes replacement atomic: abort the old task and
        // install the new one without a window where neither is registered.
        match self.jobs.entry(job_id.clone()) {
            Entry::Occupied(mut occupied) => {
                occupied.get().handle.abort();
                let handle = self.spawn_fire(job_id, generation, delay, job);
                occupied.insert(JobEntry { generation, handle });
            }
            Entry::Vacant(vacant) => {
                let handle = self.spawn_fire(job_id, generation, delay, job);
                vacant.insert(JobEntry { generation, handle });
            }
        }
    }

    fn spawn_fire(
        self: &Arc<Self>,
        job_id: String,
        generation: u64,
        delay: Duration,
        job: TimerJob,
    ) -> AbortHandle {
        let scheduler = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;

            // Only the current generation may fire: a replaced task that
            // slipped past its abort finds a newer entry and backs off.
            let current = scheduler
                .jobs
                .remove_if(&job_id, |_, entry| entry.generation == generation)
                .is_some();

            if current && scheduler.tx.send(job).is_err() {
                warn!(job_id = %job_id, "timer fired but the receiver is gone");
            }
        })
        .abort_handle()
    }

    /// Cancel a pending job. Returns whether one existed; cancelling a job
    /// whose fire is already in flight is a safe no-op (the idempotent
    /// handlers absorb the delivery).
    pub fn cancel(&self, job_id: &str) -> bool {
        if let Some((_, entry)) = self.jobs.remove(job_id) {
            entry.handle.abort();
            debug!(job_id = %job_id, "cancelled timer");
            true
        } else {
            false
        }
    }

    /// Whether a job with this id is pending.
    pub fn is_scheduled(&self, job_id: &str) -> bool {
        self.jobs.contains_key(job_id)
    }

    /// Number of pending jobs.
    pub fn pending_count(&self) -> usize {
        self.jobs.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn in_secs(secs: i64) -> DateTime<Utc> {
        Utc::now() + chrono::Duration::seconds(secs)
    }

    #[tokio::test(start_paused = true)]
    async fn test_fire_delivers_job() {
        let (scheduler, mut rx) = Scheduler::new();
        let job = TimerJob::Unmute {
            chat_id: -100,
            user_id: 42,
        };

        scheduler.schedule(in_secs(5), job);
        assert!(scheduler.is_scheduled("unmute:-100:42"));

        let fired = rx.recv().await.unwrap();
        assert_eq!(fired, job);
        assert!(!scheduler.is_scheduled("unmute:-100:42"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_prevents_fire() {
        let (scheduler, mut rx) = Scheduler::new();
        scheduler.schedule(
            in_secs(5),
            TimerJob::Unmute {
                chat_id: 1,
                user_id: 2,
            },
        );

        assert!(scheduler.cancel("unmute:1:2"));
        assert!(!scheduler.cancel("unmute:1:2"));

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reschedule_replaces_prior_job() {
        let (scheduler, mut rx) = Scheduler::new();
        let job = TimerJob::Unmute {
            chat_id: 1,
            user_id: 2,
        };

        scheduler.schedule(in_secs(5), job);
        scheduler.schedule(in_secs(60), job);
        assert_eq!(scheduler.pending_count(), 1);

        // Old deadline passes without a fire
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(rx.try_recv().is_err());

        // New deadline fires exactly once
        tokio::time::sleep(Duration::from_secs(55)).await;
        assert_eq!(rx.try_recv().unwrap(), job);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_past_deadline_fires_immediately() {
        let (scheduler, mut rx) = Scheduler::new();
        let job = TimerJob::CaptchaTimeout {
            chat_id: 7,
            user_id: 8,
        };

        scheduler.schedule(in_secs(-60), job);
        assert_eq!(rx.recv().await.unwrap(), job);
    }

    #[tokio::test(start_paused = true)]
    async fn test_independent_keys_both_fire() {
        let (scheduler, mut rx) = Scheduler::new();
        scheduler.schedule(
            in_secs(5),
            TimerJob::Unmute {
                chat_id: 1,
                user_id: 2,
            },
        );
        scheduler.schedule(
            in_secs(5),
            TimerJob::CaptchaTimeout {
                chat_id: 1,
                user_id: 2,
            },
        );
        assert_eq!(scheduler.pending_count(), 2);

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_ok());
    }
}
