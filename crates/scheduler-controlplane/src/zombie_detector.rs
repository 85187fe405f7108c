//! Zombie Detector: finds occurrences stuck in Queued/Running past their
//! zombie threshold — almost always a crashed worker — and moves them to
//! a terminal Failed state, then hands them to the Failed-Occurrence
//! Handler.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use scheduler_core::coordination::{CoordinationStore, KeyPrefix};
use scheduler_core::model::{LogLevel, OccurrenceStatus};
use scheduler_core::model::FailureType;
use scheduler_core::repository::JobOccurrenceRepositoryTrait;
use scheduler_core::{config::ZombieDetectorConfig, Result};
use tracing::{info, warn};

use crate::auto_disable::AutoDisableTracker;
use crate::failed_occurrence_handler::FailedOccurrenceHandler;

pub struct ZombieDetector {
    coordination: Arc<dyn CoordinationStore>,
    occurrences: Arc<dyn JobOccurrenceRepositoryTrait>,
    failed_occurrence_handler: Arc<FailedOccurrenceHandler>,
    auto_disable: Arc<AutoDisableTracker>,
    keys: KeyPrefix,
    config: ZombieDetectorConfig,
}

impl ZombieDetector {
    pub fn new(
        coordination: Arc<dyn CoordinationStore>,
        occurrences: Arc<dyn JobOccurrenceRepositoryTrait>,
        failed_occurrence_handler: Arc<FailedOccurrenceHandler>,
        auto_disable: Arc<AutoDisableTracker>,
        keys: KeyPrefix,
        config: ZombieDetectorConfig,
    ) -> Self {
        Self { coordination, occurrences, failed_occurrence_handler, auto_disable, keys, config }
    }

    pub async fn run(&self) -> Result<()> {
        let mut ticker = tokio::time::interval(Duration::from_secs(self.config.check_interval_seconds));
        loop {
            ticker.tick().await;
            if let Err(err) = self.sweep().await {
                warn!(error = %err, "zombie detector sweep failed");
            }
        }
    }

    async fn sweep(&self) -> Result<()> {
        let now = Utc::now();
        let stuck = self
            .occurrences
            .find_zombies(now, self.config.default_zombie_timeout_minutes, self.config.batch_size)
            .await?;

        if stuck.is_empty() {
            return Ok(());
        }

        info!(count = stuck.len(), "zombie detector found stuck occurrences");

        for mut occurrence in stuck {
            if !matches!(occurrence.status, OccurrenceStatus::Queued | OccurrenceStatus::Running) {
                continue;
            }

            occurrence.zombie_override_to_failed(now);
            occurrence.append_log(
                LogLevel::Error,
                "occurrence abandoned past its zombie timeout, marked Failed by the zombie detector",
                Some("zombie-detector".to_string()),
                None,
            );
            occurrence.is_permanent_failure = true;

            self.occurrences.save(&occurrence).await?;

            self.coordination.del(&self.keys.job_lock(&occurrence.job_id.to_string())).await?;
            self.coordination.srem(&self.keys.running_set(), &occurrence.job_id.to_string()).await?;
            self.auto_disable.apply(&occurrence).await?;

            self.failed_occurrence_handler.handle_with_failure_type(&occurrence, FailureType::ZombieDetection).await?;
        }

        Ok(())
    }
}
