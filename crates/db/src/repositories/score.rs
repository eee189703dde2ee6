use std::collections::HashSet;

use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row};

use cartwatch_core::domain::cart::UserId;
use cartwatch_core::domain::score::UserScore;

use super::{RepositoryError, ScoreRepository};
use crate::DbPool;

const SCORE_COLUMNS: &str = "user_id, \
     CAST(abandonment_score AS TEXT) AS abandonment_text, \
     CAST(value_score AS TEXT) AS value_text, \
     CAST(conversion_score AS TEXT) AS conversion_text, \
     CAST(hesitation_score AS TEXT) AS hesitation_text, \
     CAST(composite_score AS TEXT) AS composite_text, \
     discount_eligible, \
     CAST(recommended_discount AS TEXT) AS recommended_discount_text, \
     promo_code, calculated_at";

pub struct SqlScoreRepository {
    pool: DbPool,
}

impl SqlScoreRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl ScoreRepository for SqlScoreRepository {
    async fn find(&self, user_id: &UserId) -> Result<Option<UserScore>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {SCORE_COLUMNS} FROM user_scores WHERE user_id = ?"
        ))
        .bind(&user_id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.map(score_from_row).transpose()
    }

    async fn scored_user_ids(&self) -> Result<HashSet<String>, RepositoryError> {
        let rows = sqlx::query("SELECT user_id FROM user_scores")
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter()
            .map(|row| row.try_get::<String, _>("user_id").map_err(RepositoryError::from))
            .collect()
    }

    async fn users_with_history(&self) -> Result<Vec<UserId>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT DISTINCT user_id FROM ( \
                 SELECT user_id FROM carts WHERE user_id IS NOT NULL \
                 UNION \
                 SELECT user_id FROM cart_abandonments WHERE user_id IS NOT NULL \
             ) ORDER BY user_id ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                row.try_get::<String, _>("user_id").map(UserId).map_err(RepositoryError::from)
            })
            .collect()
    }

    async fn insert_one(&self, score: &UserScore) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO user_scores \
             (user_id, abandonment_score, value_score, conversion_score, hesitation_score, \
              composite_score, discount_eligible, recommended_discount, promo_code, calculated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&score.user_id.0)
        .bind(score.abandonment_score.to_string())
        .bind(score.value_score.to_string())
        .bind(score.conversion_score.to_string())
        .bind(score.hesitation_score.to_string())
        .bind(score.composite_score.to_string())
        .bind(score.discount_eligible)
        .bind(score.recommended_discount.to_string())
        .bind(score.promo_code.clone())
        .bind(score.calculated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn insert_batch(&self, scores: &[UserScore]) -> Result<(), RepositoryError> {
        if scores.is_empty() {
            return Ok(());
        }

        let mut builder: QueryBuilder<'_, sqlx::Sqlite> = QueryBuilder::new(
            "INSERT INTO user_scores \
             (user_id, abandonment_score, value_score, conversion_score, hesitation_score, \
              composite_score, discount_eligible, recommended_discount, promo_code, calculated_at) ",
        );
        builder.push_values(scores, |mut values, score| {
            values
                .push_bind(score.user_id.0.clone())
                .push_bind(score.abandonment_score.to_string())
                .push_bind(score.value_score.to_string())
                .push_bind(score.conversion_score.to_string())
                .push_bind(score.hesitation_score.to_string())
                .push_bind(score.composite_score.to_string())
                .push_bind(score.discount_eligible)
                .push_bind(score.recommended_discount.to_string())
                .push_bind(score.promo_code.clone())
                .push_bind(score.calculated_at);
        });

        builder.build().execute(&self.pool).await?;
        Ok(())
    }

    async fn update_batch(&self, scores: &[UserScore]) -> Result<(), RepositoryError> {
        if scores.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;
        for score in scores {
            sqlx::query(
                "UPDATE user_scores SET \
                     abandonment_score = ?, value_score = ?, conversion_score = ?, \
                     hesitation_score = ?, composite_score = ?, discount_eligible = ?, \
                     recommended_discount = ?, promo_code = ?, calculated_at = ? \
                 WHERE user_id = ?",
            )
            .bind(score.abandonment_score.to_string())
            .bind(score.value_score.to_string())
            .bind(score.conversion_score.to_string())
            .bind(score.hesitation_score.to_string())
            .bind(score.composite_score.to_string())
            .bind(score.discount_eligible)
            .bind(score.recommended_discount.to_string())
            .bind(score.promo_code.clone())
            .bind(score.calculated_at)
            .bind(&score.user_id.0)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        Ok(())
    }

    async fn all_scores(&self) -> Result<Vec<UserScore>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {SCORE_COLUMNS} FROM user_scores ORDER BY user_id ASC"
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(score_from_row).collect()
    }
}

fn score_from_row(row: SqliteRow) -> Result<UserScore, RepositoryError> {
    let abandonment_text: String = row.try_get("abandonment_text")?;
    let value_text: String = row.try_get("value_text")?;
    let conversion_text: String = row.try_get("conversion_text")?;
    let hesitation_text: String = row.try_get("hesitation_text")?;
    let composite_text: String = row.try_get("composite_text")?;
    let recommended_discount_text: String = row.try_get("recommended_discount_text")?;

    Ok(UserScore {
        user_id: UserId(row.try_get("user_id")?),
        abandonment_score: super::parse_decimal("abandonment_score", &abandonment_text)?,
        value_score: super::parse_decimal("value_score", &value_text)?,
        conversion_score: super::parse_decimal("conversion_score", &conversion_text)?,
        hesitation_score: super::parse_decimal("hesitation_score", &hesitation_text)?,
        composite_score: super::parse_decimal("composite_score", &composite_text)?,
        discount_eligible: row.try_get("discount_eligible")?,
        recommended_discount: super::parse_decimal(
            "recommended_discount",
            &recommended_discount_text,
        )?,
        promo_code: row.try_get("promo_code")?,
        calculated_at: row.try_get("calculated_at")?,
    })
}
