use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{error, info};

use cartwatch_core::config::AppConfig;
use cartwatch_db::DbPool;

use crate::{detector, reminders, scoring};

/// Interval-driven job runner: hourly detection, daily reminders,
/// periodic bulk rescoring, each on its own cadence. No job holds a
/// lock across its batch, so overlapping cadences stay safe.
pub struct JobScheduler {
    pool: DbPool,
    config: AppConfig,
}

impl JobScheduler {
    pub fn new(pool: DbPool, config: AppConfig) -> Self {
        Self { pool, config }
    }

    /// Runs until the shutdown channel flips to true (or closes). Each
    /// cadence first fires one period after startup.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut detect_tick = cadence(self.config.detector.interval_secs);
        let mut remind_tick = cadence(self.config.reminder.interval_secs);
        let mut score_tick = cadence(self.config.scoring.interval_secs);

        info!(
            event_name = "jobs.scheduler.started",
            detector_interval_secs = self.config.detector.interval_secs,
            reminder_interval_secs = self.config.reminder.interval_secs,
            scoring_interval_secs = self.config.scoring.interval_secs,
            "job scheduler started"
        );

        loop {
            tokio::select! {
                _ = detect_tick.tick() => {
                    if let Err(job_error) =
                        detector::detect_abandoned_carts(&self.pool, &self.config.detector, Utc::now()).await
                    {
                        error!(
                            event_name = "jobs.scheduler.detector_failed",
                            error = %job_error,
                            "scheduled abandonment sweep failed"
                        );
                    }
                }
                _ = remind_tick.tick() => {
                    if let Err(job_error) =
                        reminders::send_abandonment_reminders(&self.pool, &self.config.reminder, Utc::now()).await
                    {
                        error!(
                            event_name = "jobs.scheduler.reminders_failed",
                            error = %job_error,
                            "scheduled reminder sweep failed"
                        );
                    }
                }
                _ = score_tick.tick() => {
                    if let Err(job_error) =
                        scoring::calculate_user_scores_bulk(&self.pool, &self.config.scoring, Utc::now()).await
                    {
                        error!(
                            event_name = "jobs.scheduler.scoring_failed",
                            error = %job_error,
                            "scheduled bulk score run failed"
                        );
                    }
                }
                changed = shutdown.changed() => {
                    let stop = changed.is_err() || *shutdown.borrow();
                    if stop {
                        break;
                    }
                }
            }
        }

        info!(event_name = "jobs.scheduler.stopped", "job scheduler stopped");
    }
}

fn cadence(period_secs: u64) -> tokio::time::Interval {
    let period = Duration::from_secs(period_secs.max(1));
    let mut tick = interval_at(Instant::now() + period, period);
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    tick
}
