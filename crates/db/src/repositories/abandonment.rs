use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use uuid::Uuid;

use cartwatch_core::domain::abandonment::{AbandonmentId, CartAbandonment};
use cartwatch_core::domain::cart::{CartId, CartSnapshot, UserId};

use super::{
    AbandonmentRepository, AbandonmentStats, AbandonmentTotals, ReminderTarget, RepositoryError,
    StaleCart,
};
use crate::DbPool;

pub struct SqlAbandonmentRepository {
    pool: DbPool,
}

impl SqlAbandonmentRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl AbandonmentRepository for SqlAbandonmentRepository {
    async fn flag_cart(
        &self,
        cart: &StaleCart,
        snapshot: &CartSnapshot,
        window_start: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Option<CartAbandonment>, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        // Re-checked inside the transaction so two overlapping sweeps
        // cannot both flag the same cart.
        let open_count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM cart_abandonments \
             WHERE cart_id = ? AND recovered = 0 AND detected_at >= ?",
        )
        .bind(&cart.cart_id.0)
        .bind(window_start)
        .fetch_one(&mut *tx)
        .await?;

        if open_count > 0 {
            tx.rollback().await?;
            return Ok(None);
        }

        let abandonment = CartAbandonment {
            id: AbandonmentId(Uuid::new_v4().to_string()),
            cart_id: cart.cart_id.clone(),
            user_id: cart.user_id.clone(),
            item_count: snapshot.item_count,
            total_value: snapshot.total_value,
            recovered: false,
            recovered_at: None,
            reminder_sent: false,
            reminder_sent_at: None,
            detected_at: now,
        };

        sqlx::query(
            "INSERT INTO cart_abandonments \
             (id, cart_id, user_id, item_count, total_value, recovered, recovered_at, \
              reminder_sent, reminder_sent_at, detected_at) \
             VALUES (?, ?, ?, ?, ?, 0, NULL, 0, NULL, ?)",
        )
        .bind(&abandonment.id.0)
        .bind(&abandonment.cart_id.0)
        .bind(abandonment.user_id.as_ref().map(|id| id.0.clone()))
        .bind(i64::from(abandonment.item_count))
        .bind(abandonment.total_value.to_string())
        .bind(abandonment.detected_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(Some(abandonment))
    }

    async fn list_for_cart(
        &self,
        cart_id: &CartId,
    ) -> Result<Vec<CartAbandonment>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, cart_id, user_id, item_count, \
                    CAST(total_value AS TEXT) AS total_value_text, \
                    recovered, recovered_at, reminder_sent, reminder_sent_at, detected_at \
             FROM cart_abandonments WHERE cart_id = ? ORDER BY detected_at ASC",
        )
        .bind(&cart_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(abandonment_from_row).collect()
    }

    async fn mark_reminders_sent(
        &self,
        detected_before: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<u64, RepositoryError> {
        let marked = sqlx::query(
            "UPDATE cart_abandonments SET reminder_sent = 1, reminder_sent_at = ? \
             WHERE recovered = 0 \
               AND reminder_sent = 0 \
               AND detected_at <= ? \
               AND user_id IN (SELECT id FROM users WHERE email IS NOT NULL AND email != '')",
        )
        .bind(now)
        .bind(detected_before)
        .execute(&self.pool)
        .await?
        .rows_affected();

        Ok(marked)
    }

    async fn reminders_marked_at(
        &self,
        marked_at: DateTime<Utc>,
    ) -> Result<Vec<ReminderTarget>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT a.id, a.user_id, u.email FROM cart_abandonments a \
             JOIN users u ON u.id = a.user_id \
             WHERE a.reminder_sent_at = ? \
             ORDER BY a.detected_at ASC",
        )
        .bind(marked_at)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                Ok(ReminderTarget {
                    abandonment_id: row.try_get("id")?,
                    user_id: UserId(row.try_get("user_id")?),
                    email: row.try_get("email")?,
                })
            })
            .collect()
    }

    async fn user_stats(&self, user_id: &UserId) -> Result<AbandonmentStats, RepositoryError> {
        let rows = sqlx::query(
            "SELECT CAST(a.total_value AS TEXT) AS total_value_text, a.recovered, \
                    a.detected_at, c.created_at AS cart_created_at \
             FROM cart_abandonments a \
             JOIN carts c ON c.id = a.cart_id \
             WHERE a.user_id = ?",
        )
        .bind(&user_id.0)
        .fetch_all(&self.pool)
        .await?;

        if rows.is_empty() {
            return Ok(AbandonmentStats::default());
        }

        let total = rows.len() as u64;
        let mut recovered = 0u64;
        let mut value_sum = Decimal::ZERO;
        let mut hours_sum = Decimal::ZERO;

        for row in &rows {
            if row.try_get::<bool, _>("recovered")? {
                recovered += 1;
            }

            let value_text: String = row.try_get("total_value_text")?;
            value_sum += super::parse_decimal("total_value", &value_text)?;

            let detected_at: DateTime<Utc> = row.try_get("detected_at")?;
            let cart_created_at: DateTime<Utc> = row.try_get("cart_created_at")?;
            let seconds = (detected_at - cart_created_at).num_seconds().max(0);
            hours_sum += Decimal::from(seconds) / Decimal::from(3_600u32);
        }

        let divisor = Decimal::from(total);
        Ok(AbandonmentStats {
            total,
            recovered,
            avg_value: Some(value_sum / divisor),
            avg_hours_to_abandon: Some(hours_sum / divisor),
        })
    }

    async fn totals(&self) -> Result<AbandonmentTotals, RepositoryError> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS total, \
                    COALESCE(SUM(recovered), 0) AS recovered, \
                    COALESCE(SUM(reminder_sent), 0) AS reminders_sent \
             FROM cart_abandonments",
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(AbandonmentTotals {
            total: row.try_get::<i64, _>("total")?.max(0) as u64,
            recovered: row.try_get::<i64, _>("recovered")?.max(0) as u64,
            reminders_sent: row.try_get::<i64, _>("reminders_sent")?.max(0) as u64,
        })
    }
}

fn abandonment_from_row(row: SqliteRow) -> Result<CartAbandonment, RepositoryError> {
    let item_count_raw: i64 = row.try_get("item_count")?;
    let item_count = u32::try_from(item_count_raw).map_err(|_| {
        RepositoryError::Decode(format!("item_count `{item_count_raw}` does not fit in u32"))
    })?;
    let total_value_text: String = row.try_get("total_value_text")?;

    Ok(CartAbandonment {
        id: AbandonmentId(row.try_get("id")?),
        cart_id: CartId(row.try_get("cart_id")?),
        user_id: row.try_get::<Option<String>, _>("user_id")?.map(UserId),
        item_count,
        total_value: super::parse_decimal("total_value", &total_value_text)?,
        recovered: row.try_get("recovered")?,
        recovered_at: row.try_get("recovered_at")?,
        reminder_sent: row.try_get("reminder_sent")?,
        reminder_sent_at: row.try_get("reminder_sent_at")?,
        detected_at: row.try_get("detected_at")?,
    })
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};
    use rust_decimal::Decimal;

    use cartwatch_core::domain::cart::{CartId, CartSnapshot, UserId};

    use super::SqlAbandonmentRepository;
    use crate::fixtures;
    use crate::repositories::{AbandonmentRepository, StaleCart};

    fn snapshot(value: Decimal) -> CartSnapshot {
        CartSnapshot { item_count: 2, total_value: value }
    }

    async fn setup() -> (crate::DbPool, SqlAbandonmentRepository, StaleCart) {
        let pool = fixtures::test_pool().await;
        fixtures::insert_user(&pool, "user-1", Some("user-1@example.test"))
            .await
            .expect("insert user");
        fixtures::insert_cart(&pool, "cart-1", Some("user-1"), Utc::now() - Duration::hours(30))
            .await
            .expect("insert cart");

        let stale = StaleCart {
            cart_id: CartId("cart-1".to_string()),
            user_id: Some(UserId("user-1".to_string())),
        };
        (pool.clone(), SqlAbandonmentRepository::new(pool), stale)
    }

    #[tokio::test]
    async fn flagging_twice_in_one_window_creates_one_episode() {
        let (_pool, repo, stale) = setup().await;
        let now = Utc::now();
        let window_start = now - Duration::hours(24);

        let first = repo
            .flag_cart(&stale, &snapshot(Decimal::new(9_000_00, 2)), window_start, now)
            .await
            .expect("first flag");
        assert!(first.is_some());

        let second = repo
            .flag_cart(&stale, &snapshot(Decimal::new(9_000_00, 2)), window_start, now)
            .await
            .expect("second flag");
        assert!(second.is_none(), "open episode must not be duplicated");

        let episodes = repo.list_for_cart(&stale.cart_id).await.expect("list");
        assert_eq!(episodes.len(), 1);
    }

    #[tokio::test]
    async fn an_expired_episode_does_not_block_a_new_flag() {
        let (_pool, repo, stale) = setup().await;
        let now = Utc::now();
        let window_start = now - Duration::hours(24);

        // Old episode from three days ago, outside the current window.
        repo.flag_cart(
            &stale,
            &snapshot(Decimal::new(4_000_00, 2)),
            now - Duration::hours(96),
            now - Duration::hours(72),
        )
        .await
        .expect("old flag");

        let fresh = repo
            .flag_cart(&stale, &snapshot(Decimal::new(4_000_00, 2)), window_start, now)
            .await
            .expect("fresh flag");
        assert!(fresh.is_some(), "expired episode must not suppress a new one");
    }

    #[tokio::test]
    async fn reminder_marking_is_bulk_and_once_only() {
        let (pool, repo, stale) = setup().await;
        let now = Utc::now();

        // Abandoned three days ago, eligible for a reminder.
        repo.flag_cart(
            &stale,
            &snapshot(Decimal::new(9_000_00, 2)),
            now - Duration::hours(96),
            now - Duration::hours(72),
        )
        .await
        .expect("flag");

        // A second user without email must never be marked.
        fixtures::insert_user(&pool, "user-2", None).await.expect("insert user");
        fixtures::insert_cart(&pool, "cart-2", Some("user-2"), now - Duration::hours(80))
            .await
            .expect("insert cart");
        repo.flag_cart(
            &StaleCart {
                cart_id: CartId("cart-2".to_string()),
                user_id: Some(UserId("user-2".to_string())),
            },
            &snapshot(Decimal::new(2_000_00, 2)),
            now - Duration::hours(96),
            now - Duration::hours(72),
        )
        .await
        .expect("flag no-email user");

        let cutoff = now - Duration::hours(48);
        let marked = repo.mark_reminders_sent(cutoff, now).await.expect("mark");
        assert_eq!(marked, 1, "only the user with an email is marked");

        let targets = repo.reminders_marked_at(now).await.expect("targets");
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].email, "user-1@example.test");

        let again = repo.mark_reminders_sent(cutoff, now + Duration::minutes(1)).await.expect("re-mark");
        assert_eq!(again, 0, "a marked episode is never marked twice");
    }

    #[tokio::test]
    async fn user_stats_average_value_and_hours() {
        let (pool, repo, stale) = setup().await;
        let now = Utc::now();

        // cart-1 was created 30 hours ago (see setup); detected now
        // means 30 hours to abandon.
        repo.flag_cart(&stale, &snapshot(Decimal::new(10_000_00, 2)), now - Duration::hours(24), now)
            .await
            .expect("flag");

        fixtures::insert_cart(&pool, "cart-3", Some("user-1"), now - Duration::hours(10))
            .await
            .expect("insert cart");
        repo.flag_cart(
            &StaleCart {
                cart_id: CartId("cart-3".to_string()),
                user_id: Some(UserId("user-1".to_string())),
            },
            &snapshot(Decimal::new(20_000_00, 2)),
            now - Duration::hours(24),
            now,
        )
        .await
        .expect("flag second");

        let stats =
            repo.user_stats(&UserId("user-1".to_string())).await.expect("stats");
        assert_eq!(stats.total, 2);
        assert_eq!(stats.recovered, 0);
        assert_eq!(stats.avg_value, Some(Decimal::new(15_000_00, 2)));

        let avg_hours = stats.avg_hours_to_abandon.expect("hours present");
        assert!(avg_hours > Decimal::from(19) && avg_hours < Decimal::from(21));
    }

    #[tokio::test]
    async fn stats_for_a_user_without_history_are_empty() {
        let (_pool, repo, _stale) = setup().await;
        let stats =
            repo.user_stats(&UserId("user-unknown".to_string())).await.expect("stats");
        assert_eq!(stats.total, 0);
        assert!(stats.avg_value.is_none());
        assert!(stats.avg_hours_to_abandon.is_none());
    }
}
