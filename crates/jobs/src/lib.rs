pub mod analytics;
pub mod detector;
pub mod reminders;
pub mod scheduler;
pub mod scoring;

use thiserror::Error;

use cartwatch_db::repositories::RepositoryError;

pub use analytics::{score_summary, BandCounts, ComponentAverages, ScoreSummary};
pub use detector::{detect_abandoned_carts, SweepSummary};
pub use reminders::{send_abandonment_reminders, ReminderSummary};
pub use scheduler::JobScheduler;
pub use scoring::{calculate_user_score, calculate_user_scores_bulk, ScoreRunSummary};

#[derive(Debug, Error)]
pub enum JobError {
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}
