use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{error, info};
use uuid::Uuid;

use cartwatch_core::config::ReminderConfig;
use cartwatch_db::repositories::{
    AbandonmentRepository, ReminderOutboxRepository, SqlAbandonmentRepository,
    SqlReminderOutboxRepository,
};
use cartwatch_db::DbPool;

use crate::JobError;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ReminderSummary {
    pub marked: u64,
    pub queued: u64,
}

impl std::fmt::Display for ReminderSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "marked {} abandonment reminders ({} queued for delivery)", self.marked, self.queued)
    }
}

/// Daily sweep: mark every eligible abandonment episode as reminder-sent
/// in one bulk UPDATE, then queue the delivery work.
///
/// Eligible means unrecovered, not yet reminded, detected at least the
/// threshold ago, and owned by a user with a known email. Marking
/// commits before the outbox enqueue runs, so a delivery-queue failure
/// can never unmark a record or re-send a reminder.
pub async fn send_abandonment_reminders(
    pool: &DbPool,
    config: &ReminderConfig,
    now: DateTime<Utc>,
) -> Result<ReminderSummary, JobError> {
    let correlation_id = Uuid::new_v4().to_string();
    let detected_before = now - Duration::hours(config.threshold_hours as i64);

    let abandonments = SqlAbandonmentRepository::new(pool.clone());
    let marked = abandonments.mark_reminders_sent(detected_before, now).await?;

    if marked == 0 {
        info!(
            event_name = "jobs.reminders.nothing_due",
            correlation_id = %correlation_id,
            threshold_hours = config.threshold_hours,
            "no abandonment records due for a reminder"
        );
        return Ok(ReminderSummary::default());
    }

    let targets = abandonments.reminders_marked_at(now).await?;
    let outbox = SqlReminderOutboxRepository::new(pool.clone());
    let queued = match outbox.enqueue(&targets, now).await {
        Ok(queued) => queued,
        Err(enqueue_error) => {
            // The marks are already committed; the next outbox drain is
            // the retry path, not this sweep.
            error!(
                event_name = "jobs.reminders.enqueue_failed",
                correlation_id = %correlation_id,
                marked,
                error = %enqueue_error,
                "reminder outbox enqueue failed after marking"
            );
            0
        }
    };

    info!(
        event_name = "jobs.reminders.sweep_completed",
        correlation_id = %correlation_id,
        marked,
        queued,
        "reminder sweep completed"
    );

    Ok(ReminderSummary { marked, queued })
}
