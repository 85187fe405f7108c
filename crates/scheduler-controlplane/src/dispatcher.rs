//! The dispatcher loop: selects due jobs from the scheduled-time index,
//! enforces concurrency policy, and publishes dispatch messages onto the
//! bus. Leadership is held via a lease on `dispatcher:leader` so exactly
//! one instance in the cluster is active at a time.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use scheduler_core::bus::{DispatchMessage, MessageBus};
use scheduler_core::coordination::{CoordinationStore, KeyPrefix};
use scheduler_core::model::{ConcurrencyPolicy, JobOccurrence, ScheduledJob};
use scheduler_core::repository::{JobOccurrenceRepositoryTrait, ScheduledJobRepositoryTrait};
use scheduler_core::retry::next_dispatch_retry_at;
use scheduler_core::{config::DispatcherConfig, Error, Result};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

pub struct Dispatcher {
    coordination: Arc<dyn CoordinationStore>,
    bus: Arc<dyn MessageBus>,
    jobs: Arc<dyn ScheduledJobRepositoryTrait>,
    occurrences: Arc<dyn JobOccurrenceRepositoryTrait>,
    keys: KeyPrefix,
    config: DispatcherConfig,
    instance_id: String,
}

impl Dispatcher {
    pub fn new(
        coordination: Arc<dyn CoordinationStore>,
        bus: Arc<dyn MessageBus>,
        jobs: Arc<dyn ScheduledJobRepositoryTrait>,
        occurrences: Arc<dyn JobOccurrenceRepositoryTrait>,
        keys: KeyPrefix,
        config: DispatcherConfig,
    ) -> Self {
        Self { coordination, bus, jobs, occurrences, keys, config, instance_id: Uuid::new_v4().to_string() }
    }

    /// Runs forever, polling at `config.polling_interval_seconds` while
    /// holding the leadership lease, and yielding to other instances
    /// whenever it loses or never acquires it.
    pub async fn run(&self) -> Result<()> {
        if self.config.startup_recovery_enabled {
            if let Err(err) = self.recover_on_startup().await {
                warn!(error = %err, "startup recovery failed, continuing");
            }
        }

        let mut ticker = tokio::time::interval(Duration::from_secs(self.config.polling_interval_seconds));
        loop {
            ticker.tick().await;

            if !self.acquire_or_renew_leadership().await? {
                debug!("not the leader this tick, skipping");
                continue;
            }

            if let Err(err) = self.tick().await {
                error!(error = %err, "dispatcher tick failed");
            }

            if let Err(err) = self.retry_due_dispatches().await {
                error!(error = %err, "dispatch retry scan failed");
            }
        }
    }

    async fn acquire_or_renew_leadership(&self) -> Result<bool> {
        let ttl = Duration::from_secs(self.config.lock_ttl_seconds);
        let key = self.keys.dispatcher_leader();
        if self.coordination.setnx(&key, &self.instance_id, Some(ttl)).await? {
            return Ok(true);
        }
        // Someone holds the lease. Only renew and proceed if it's us.
        match self.coordination.get(&key).await? {
            Some(holder) if holder == self.instance_id => {
                self.coordination.expire(&key, ttl).await?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// One polling tick of the algorithm from the dispatcher contract.
    async fn tick(&self) -> Result<()> {
        let now = Utc::now();
        let due_ids = self
            .coordination
            .zrangebyscore(&self.keys.scheduled_index(), f64::MIN, now.timestamp() as f64, self.config.batch_size)
            .await?;

        if due_ids.is_empty() {
            return Ok(());
        }

        info!(count = due_ids.len(), "found due jobs");

        for id_str in due_ids {
            let job_id = match Uuid::parse_str(&id_str) {
                Ok(id) => id,
                Err(_) => {
                    warn!(id = %id_str, "malformed job id in scheduled index, removing");
                    self.coordination.zrem(&self.keys.scheduled_index(), &id_str).await?;
                    continue;
                }
            };

            if let Err(err) = self.dispatch_one(job_id).await {
                error!(job_id = %job_id, error = %err, "failed to dispatch job");
            }
        }

        Ok(())
    }

    async fn fetch_job(&self, job_id: Uuid) -> Result<Option<ScheduledJob>> {
        let cache_key = self.keys.job_cache(&job_id.to_string());
        if let Ok(values) = self.coordination.hmget(&cache_key, &["data"]).await {
            if let Some(Some(raw)) = values.into_iter().next() {
                if let Ok(job) = serde_json::from_str::<ScheduledJob>(&raw) {
                    return Ok(Some(job));
                }
            }
        }

        let job = self.jobs.get(job_id).await?;
        if let Some(job) = &job {
            if let Ok(raw) = serde_json::to_string(job) {
                let _ = self.coordination.hset(&cache_key, "data", &raw).await;
                let _ = self.coordination.expire(&cache_key, Duration::from_secs(86_400)).await;
            }
        }
        Ok(job)
    }

    async fn dispatch_one(&self, job_id: Uuid) -> Result<()> {
        let job = match self.fetch_job(job_id).await? {
            Some(job) => job,
            None => {
                warn!(job_id = %job_id, "job no longer exists, removing from index");
                self.coordination.zrem(&self.keys.scheduled_index(), &job_id.to_string()).await?;
                return Ok(());
            }
        };

        if !job.is_active {
            self.advance_execute_at(&job).await?;
            return Ok(());
        }

        let id_str = job_id.to_string();
        match job.concurrent_execution_policy {
            ConcurrencyPolicy::Skip => {
                if self.coordination.sismember(&self.keys.running_set(), &id_str).await? {
                    debug!(job_id = %job_id, "skip policy: already running, dropping fire");
                    self.advance_execute_at(&job).await?;
                    return Ok(());
                }

                let ttl = job.execution_timeout_seconds.map(|s| Duration::from_secs(s.max(0) as u64));
                if !self.coordination.setnx(&self.keys.job_lock(&id_str), &self.instance_id, ttl).await? {
                    debug!(job_id = %job_id, "skip policy: lost the mark-running race, dropping fire");
                    self.advance_execute_at(&job).await?;
                    return Ok(());
                }
                self.coordination.sadd(&self.keys.running_set(), &id_str).await?;

                if let Err(err) = self.create_and_publish(&job).await {
                    // Compensating delete: don't leave the job marked running
                    // if we failed to persist/publish the occurrence.
                    self.coordination.del(&self.keys.job_lock(&id_str)).await?;
                    self.coordination.srem(&self.keys.running_set(), &id_str).await?;
                    return Err(err);
                }
            }
            ConcurrencyPolicy::Queue => {
                self.create_and_publish(&job).await?;
            }
        }

        self.advance_execute_at(&job).await
    }

    async fn create_and_publish(&self, job: &ScheduledJob) -> Result<()> {
        let occurrence = JobOccurrence::new_queued(
            job.id,
            job.job_name_in_worker.clone(),
            job.version,
            job.worker_id.clone(),
            job.zombie_timeout_minutes,
            job.execution_timeout_seconds,
        );

        self.occurrences.create(&occurrence).await?;

        let message = DispatchMessage {
            correlation_id: occurrence.correlation_id,
            job_id: job.id,
            job_name: job.job_name_in_worker.clone(),
            job_data: job.job_data.clone(),
            execute_at: job.execute_at,
            execution_timeout_seconds: job.execution_timeout_seconds,
            zombie_timeout_minutes: job.zombie_timeout_minutes,
        };

        let routing_key = job.routing_key_for(occurrence.correlation_id);
        if let Err(err) = self.bus.publish_dispatch(&routing_key, &message).await {
            self.mark_dispatch_retry(occurrence).await?;
            return Err(err);
        }

        Ok(())
    }

    async fn mark_dispatch_retry(&self, mut occurrence: JobOccurrence) -> Result<()> {
        occurrence.dispatch_retry_count += 1;
        occurrence.next_dispatch_retry_at = Some(next_dispatch_retry_at(occurrence.dispatch_retry_count, Utc::now()));
        self.occurrences.save(&occurrence).await
    }

    async fn advance_execute_at(&self, job: &ScheduledJob) -> Result<()> {
        let id_str = job.id.to_string();
        match &job.cron_expression {
            Some(expression) => {
                let next = scheduler_core::cron_util::next_fire_after(expression, Utc::now())
                    .map_err(|err| Error::dispatch(format!("job {}: {}", job.id, err)))?;
                self.coordination.zadd(&self.keys.scheduled_index(), &id_str, next.timestamp() as f64).await?;
            }
            None => {
                self.coordination.zrem(&self.keys.scheduled_index(), &id_str).await?;
            }
        }
        Ok(())
    }

    /// Secondary scan: Queued occurrences whose publish previously failed
    /// and whose backoff window has elapsed.
    async fn retry_due_dispatches(&self) -> Result<()> {
        let due = self.occurrences.find_due_dispatch_retries(Utc::now(), self.config.batch_size).await?;
        for occurrence in due {
            let job = match self.fetch_job(occurrence.job_id).await? {
                Some(job) => job,
                None => continue,
            };

            let message = DispatchMessage {
                correlation_id: occurrence.correlation_id,
                job_id: job.id,
                job_name: job.job_name_in_worker.clone(),
                job_data: job.job_data.clone(),
                execute_at: job.execute_at,
                execution_timeout_seconds: occurrence.execution_timeout_seconds,
                zombie_timeout_minutes: occurrence.zombie_timeout_minutes,
            };
            let routing_key = job.routing_key_for(occurrence.correlation_id);

            if let Err(err) = self.bus.publish_dispatch(&routing_key, &message).await {
                warn!(correlation_id = %occurrence.correlation_id, error = %err, "dispatch retry failed again");
                self.mark_dispatch_retry(occurrence).await?;
            }
        }
        Ok(())
    }

    /// On start, find Queued occurrences with no live worker ack and
    /// Running occurrences whose heartbeat has gone stale. They're left
    /// exactly as they are — still `Queued`/`Running`, which is what
    /// `find_zombies` selects on — so the Zombie Detector's own sweep
    /// picks them up and drives them to a terminal `Failed` status on its
    /// next tick. This just logs so an operator can see recovery found
    /// something without waiting for that tick.
    async fn recover_on_startup(&self) -> Result<()> {
        let stale = self
            .occurrences
            .find_zombies(Utc::now(), self.config.lock_ttl_seconds as i64 / 60, self.config.batch_size)
            .await?;

        for occurrence in &stale {
            info!(correlation_id = %occurrence.correlation_id, "found stale occurrence on startup, deferring to zombie detector");
        }
        Ok(())
    }
}
