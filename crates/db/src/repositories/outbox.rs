use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::{ReminderOutboxRepository, ReminderTarget, RepositoryError};
use crate::DbPool;

/// Queue of reminder emails awaiting delivery. The notification
/// collaborator drains it out of band; this subsystem only enqueues.
pub struct SqlReminderOutboxRepository {
    pool: DbPool,
}

impl SqlReminderOutboxRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl ReminderOutboxRepository for SqlReminderOutboxRepository {
    async fn enqueue(
        &self,
        targets: &[ReminderTarget],
        now: DateTime<Utc>,
    ) -> Result<u64, RepositoryError> {
        if targets.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;
        for target in targets {
            sqlx::query(
                "INSERT INTO reminder_outbox (id, abandonment_id, user_id, email, status, queued_at) \
                 VALUES (?, ?, ?, ?, 'queued', ?)",
            )
            .bind(Uuid::new_v4().to_string())
            .bind(&target.abandonment_id)
            .bind(&target.user_id.0)
            .bind(&target.email)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        Ok(targets.len() as u64)
    }

    async fn queued_count(&self) -> Result<u64, RepositoryError> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM reminder_outbox WHERE status = 'queued'")
                .fetch_one(&self.pool)
                .await?;
        Ok(count.max(0) as u64)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};
    use rust_decimal::Decimal;

    use cartwatch_core::domain::cart::UserId;

    use super::SqlReminderOutboxRepository;
    use crate::fixtures;
    use crate::repositories::{ReminderOutboxRepository, ReminderTarget};

    #[tokio::test]
    async fn enqueue_creates_one_row_per_target() {
        let pool = fixtures::test_pool().await;
        let now = Utc::now();
        fixtures::insert_user(&pool, "user-1", Some("user-1@example.test"))
            .await
            .expect("user");
        fixtures::insert_cart(&pool, "cart-1", Some("user-1"), now - Duration::hours(80))
            .await
            .expect("cart");
        fixtures::insert_abandonment(
            &pool,
            "abn-1",
            "cart-1",
            Some("user-1"),
            Decimal::new(6_000_00, 2),
            now - Duration::hours(72),
            false,
        )
        .await
        .expect("abandonment");

        let repo = SqlReminderOutboxRepository::new(pool);
        let queued = repo
            .enqueue(
                &[ReminderTarget {
                    abandonment_id: "abn-1".to_string(),
                    user_id: UserId("user-1".to_string()),
                    email: "user-1@example.test".to_string(),
                }],
                now,
            )
            .await
            .expect("enqueue");

        assert_eq!(queued, 1);
        assert_eq!(repo.queued_count().await.expect("count"), 1);
    }
}
