//! Shared consecutive-failure accounting for the per-job auto-disable
//! circuit breaker. Both the Status Tracker (Failed/TimedOut from a
//! worker-reported status update) and the Zombie Detector
//! (ZombieDetection, a worker that never reported back at all) terminate
//! occurrences and must feed the same counter — see SPEC_FULL.md §4.4.

use std::sync::Arc;

use chrono::Utc;
use scheduler_core::model::{AutoDisableSettings, JobOccurrence, OccurrenceStatus};
use scheduler_core::repository::ScheduledJobRepositoryTrait;
use scheduler_core::Result;
use tracing::{info, warn};

pub struct AutoDisableTracker {
    jobs: Arc<dyn ScheduledJobRepositoryTrait>,
    auto_disable_threshold: u32,
    failure_window_minutes: i64,
    auto_re_enable_cooldown_minutes: Option<i64>,
}

impl AutoDisableTracker {
    pub fn new(
        jobs: Arc<dyn ScheduledJobRepositoryTrait>,
        auto_disable_threshold: u32,
        failure_window_minutes: i64,
        auto_re_enable_cooldown_minutes: Option<i64>,
    ) -> Self {
        Self { jobs, auto_disable_threshold, failure_window_minutes, auto_re_enable_cooldown_minutes }
    }

    /// Sliding-window circuit breaker: disables a job once it accumulates
    /// `threshold` consecutive failures inside `failureWindowMinutes`.
    /// `occurrence.status` must already be the terminal status being
    /// recorded (Completed resets the streak; Failed/TimedOut, including
    /// a zombie-detected failure, extends it).
    pub async fn apply(&self, occurrence: &JobOccurrence) -> Result<()> {
        let job = match self.jobs.get(occurrence.job_id).await? {
            Some(job) => job,
            None => return Ok(()),
        };

        if !job.auto_disable_settings.enabled {
            return Ok(());
        }

        let mut settings = job.auto_disable_settings.clone();
        let now = Utc::now();
        let window_expired = settings
            .last_failure_time
            .map(|last| now.signed_duration_since(last) > chrono::Duration::minutes(self.failure_window_minutes))
            .unwrap_or(false);

        if window_expired {
            settings.consecutive_failure_count = 0;
        }

        match occurrence.status {
            OccurrenceStatus::Completed => {
                settings.consecutive_failure_count = 0;
            }
            OccurrenceStatus::Failed | OccurrenceStatus::TimedOut => {
                settings.consecutive_failure_count += 1;
                settings.last_failure_time = Some(now);
            }
            _ => {}
        }

        let threshold = settings.threshold.unwrap_or(self.auto_disable_threshold);
        let mut is_active = job.is_active;

        if settings.consecutive_failure_count >= threshold && job.is_active {
            is_active = false;
            settings.disabled_at = Some(now);
            settings.disable_reason =
                Some(format!("auto-disabled after {} consecutive failures", settings.consecutive_failure_count));
            warn!(job_id = %job.id, "job auto-disabled by circuit breaker");
        } else if let (false, Some(disabled_at), Some(cooldown)) =
            (job.is_active, settings.disabled_at, self.reenable_cooldown(&settings))
        {
            if now.signed_duration_since(disabled_at) >= chrono::Duration::minutes(cooldown) {
                is_active = true;
                settings.disabled_at = None;
                settings.disable_reason = None;
                settings.consecutive_failure_count = 0;
                info!(job_id = %job.id, "job auto-re-enabled after cooldown");
            }
        }

        if is_active != job.is_active || self.settings_changed(&job.auto_disable_settings, &settings) {
            self.jobs.apply_auto_disable(job.id, &settings, is_active).await?;
        }

        Ok(())
    }

    fn reenable_cooldown(&self, settings: &AutoDisableSettings) -> Option<i64> {
        settings.auto_re_enable_cooldown_minutes.or(self.auto_re_enable_cooldown_minutes)
    }

    fn settings_changed(&self, before: &AutoDisableSettings, after: &AutoDisableSettings) -> bool {
        before.consecutive_failure_count != after.consecutive_failure_count
            || before.last_failure_time != after.last_failure_time
            || before.disabled_at != after.disabled_at
    }
}
