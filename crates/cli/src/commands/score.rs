use chrono::Utc;

use crate::commands::{run_db_command, CommandResult};
use cartwatch_core::domain::cart::UserId;
use cartwatch_jobs::{calculate_user_score, calculate_user_scores_bulk};

pub fn run(user: Option<String>) -> CommandResult {
    run_db_command("score", |config, pool| async move {
        match user {
            Some(user_id) => {
                let score = calculate_user_score(&pool, &UserId(user_id), Utc::now())
                    .await
                    .map_err(|error| ("scoring", error.to_string(), 5u8))?;
                Ok(format!(
                    "user {}: composite {} (abandonment {}, value {}, conversion {}, hesitation {}), \
                     discount eligible: {}",
                    score.user_id.0,
                    score.composite_score,
                    score.abandonment_score,
                    score.value_score,
                    score.conversion_score,
                    score.hesitation_score,
                    score.discount_eligible,
                ))
            }
            None => {
                let summary = calculate_user_scores_bulk(&pool, &config.scoring, Utc::now())
                    .await
                    .map_err(|error| ("scoring", error.to_string(), 5u8))?;
                Ok(summary.to_string())
            }
        }
    })
}
