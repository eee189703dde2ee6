use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use cartwatch_core::domain::cart::UserId;
use cartwatch_core::domain::score::UserScore;
use cartwatch_core::scoring::{ScoreCalculator, UserActivity};
use cartwatch_core::config::ScoringConfig;
use cartwatch_db::repositories::{
    AbandonmentRepository, CartEventRepository, CartRepository, RepositoryError,
    ScoreRepository, SqlAbandonmentRepository, SqlCartEventRepository, SqlCartRepository,
    SqlScoreRepository,
};
use cartwatch_db::DbPool;

use crate::JobError;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ScoreRunSummary {
    pub created: u64,
    pub updated: u64,
    pub errors: u64,
    /// Users left unscored because the wall-clock budget ran out. The
    /// next run picks them up; re-running is idempotent.
    pub skipped_budget: u64,
    pub budget_exhausted: bool,
}

impl std::fmt::Display for ScoreRunSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "scored users: {} created, {} updated, {} errors",
            self.created, self.updated, self.errors
        )?;
        if self.budget_exhausted {
            write!(f, " ({} deferred to the next run)", self.skipped_budget)?;
        }
        Ok(())
    }
}

struct ActivityReader {
    carts: SqlCartRepository,
    events: SqlCartEventRepository,
    abandonments: SqlAbandonmentRepository,
}

impl ActivityReader {
    fn new(pool: &DbPool) -> Self {
        Self {
            carts: SqlCartRepository::new(pool.clone()),
            events: SqlCartEventRepository::new(pool.clone()),
            abandonments: SqlAbandonmentRepository::new(pool.clone()),
        }
    }

    async fn gather(&self, user_id: &UserId) -> Result<UserActivity, RepositoryError> {
        let carts_with_items = self.carts.carts_with_items_count(user_id).await?;
        let stats = self.abandonments.user_stats(user_id).await?;
        let counts = self.events.counts_for_user(user_id).await?;

        Ok(UserActivity {
            carts_with_items,
            abandoned_carts: stats.total,
            recovered_carts: stats.recovered,
            avg_abandoned_value: stats.avg_value,
            avg_hours_to_abandon: stats.avg_hours_to_abandon,
            items_added: counts.items_added,
            items_saved_for_later: counts.items_saved_for_later,
        })
    }
}

/// Full recompute for every user with any cart or abandonment history.
///
/// Per-user failures are logged and counted without aborting the batch.
/// Writes are partitioned into one multi-row insert plus one
/// transactional update pass; a failed batch insert falls back to
/// per-row inserts so one bad row costs only itself.
pub async fn calculate_user_scores_bulk(
    pool: &DbPool,
    config: &ScoringConfig,
    now: DateTime<Utc>,
) -> Result<ScoreRunSummary, JobError> {
    let correlation_id = Uuid::new_v4().to_string();
    let started = Instant::now();
    let budget = Duration::from_secs(config.max_runtime_secs);

    let scores = SqlScoreRepository::new(pool.clone());
    let reader = ActivityReader::new(pool);
    let calculator = ScoreCalculator::new();

    let users = scores.users_with_history().await?;
    let existing = scores.scored_user_ids().await?;
    info!(
        event_name = "jobs.scoring.run_started",
        correlation_id = %correlation_id,
        eligible_users = users.len(),
        already_scored = existing.len(),
        "bulk score run started"
    );

    let mut summary = ScoreRunSummary::default();
    let mut to_insert: Vec<UserScore> = Vec::new();
    let mut to_update: Vec<UserScore> = Vec::new();

    for (index, user_id) in users.iter().enumerate() {
        if started.elapsed() >= budget {
            summary.budget_exhausted = true;
            summary.skipped_budget = (users.len() - index) as u64;
            warn!(
                event_name = "jobs.scoring.budget_exhausted",
                correlation_id = %correlation_id,
                scored = index,
                remaining = summary.skipped_budget,
                max_runtime_secs = config.max_runtime_secs,
                "wall-clock budget exhausted; deferring remainder to the next run"
            );
            break;
        }

        match reader.gather(user_id).await {
            Ok(activity) => {
                let breakdown = calculator.score(&activity);
                let score = UserScore::from_breakdown(user_id.clone(), &breakdown, now);
                if existing.contains(&user_id.0) {
                    to_update.push(score);
                } else {
                    to_insert.push(score);
                }
            }
            Err(error) => {
                summary.errors += 1;
                warn!(
                    event_name = "jobs.scoring.user_failed",
                    correlation_id = %correlation_id,
                    user_id = %user_id.0,
                    error = %error,
                    "failed to score user; run continues"
                );
            }
        }
    }

    match scores.insert_batch(&to_insert).await {
        Ok(()) => summary.created = to_insert.len() as u64,
        Err(batch_error) => {
            warn!(
                event_name = "jobs.scoring.batch_insert_failed",
                correlation_id = %correlation_id,
                rows = to_insert.len(),
                error = %batch_error,
                "batch insert failed; retrying row by row"
            );
            for score in &to_insert {
                match scores.insert_one(score).await {
                    Ok(()) => summary.created += 1,
                    Err(row_error) => {
                        summary.errors += 1;
                        warn!(
                            event_name = "jobs.scoring.insert_failed",
                            correlation_id = %correlation_id,
                            user_id = %score.user_id.0,
                            error = %row_error,
                            "per-row insert failed"
                        );
                    }
                }
            }
        }
    }

    match scores.update_batch(&to_update).await {
        Ok(()) => summary.updated = to_update.len() as u64,
        Err(batch_error) => {
            warn!(
                event_name = "jobs.scoring.batch_update_failed",
                correlation_id = %correlation_id,
                rows = to_update.len(),
                error = %batch_error,
                "batch update failed; retrying row by row"
            );
            for score in &to_update {
                match scores.update_batch(std::slice::from_ref(score)).await {
                    Ok(()) => summary.updated += 1,
                    Err(row_error) => {
                        summary.errors += 1;
                        warn!(
                            event_name = "jobs.scoring.update_failed",
                            correlation_id = %correlation_id,
                            user_id = %score.user_id.0,
                            error = %row_error,
                            "per-row update failed"
                        );
                    }
                }
            }
        }
    }

    info!(
        event_name = "jobs.scoring.run_completed",
        correlation_id = %correlation_id,
        created = summary.created,
        updated = summary.updated,
        errors = summary.errors,
        budget_exhausted = summary.budget_exhausted,
        "bulk score run completed"
    );

    Ok(summary)
}

/// Ad-hoc recompute of a single user, for diagnostics.
pub async fn calculate_user_score(
    pool: &DbPool,
    user_id: &UserId,
    now: DateTime<Utc>,
) -> Result<UserScore, JobError> {
    let reader = ActivityReader::new(pool);
    let activity = reader.gather(user_id).await?;
    let breakdown = ScoreCalculator::new().score(&activity);
    let score = UserScore::from_breakdown(user_id.clone(), &breakdown, now);

    let scores = SqlScoreRepository::new(pool.clone());
    if scores.find(user_id).await?.is_some() {
        scores.update_batch(std::slice::from_ref(&score)).await?;
    } else {
        scores.insert_one(&score).await?;
    }

    info!(
        event_name = "jobs.scoring.user_scored",
        user_id = %user_id.0,
        composite = %score.composite_score,
        "single-user score recomputed"
    );

    Ok(score)
}
