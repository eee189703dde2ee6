use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use cartwatch_core::config::DetectorConfig;
use cartwatch_core::domain::cart::CartSnapshot;
use cartwatch_db::repositories::{
    AbandonmentRepository, CartRepository, RepositoryError, SqlAbandonmentRepository,
    SqlCartRepository, StaleCart,
};
use cartwatch_db::DbPool;

use crate::JobError;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SweepSummary {
    pub flagged: u64,
    pub skipped_open: u64,
    pub errors: u64,
}

impl std::fmt::Display for SweepSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "flagged {} abandoned carts ({} skipped with open episodes, {} errors)",
            self.flagged, self.skipped_open, self.errors
        )
    }
}

/// Hourly sweep: flag every cart with at least one item whose
/// abandonment clock predates the threshold, once per open episode.
///
/// Each cart is flagged inside its own transaction; one cart failing is
/// logged and counted without aborting the sweep, and an immediate
/// re-run creates nothing new.
pub async fn detect_abandoned_carts(
    pool: &DbPool,
    config: &DetectorConfig,
    now: DateTime<Utc>,
) -> Result<SweepSummary, JobError> {
    let correlation_id = Uuid::new_v4().to_string();
    let cutoff = now - Duration::hours(config.threshold_hours as i64);

    let carts = SqlCartRepository::new(pool.clone());
    let abandonments = SqlAbandonmentRepository::new(pool.clone());

    let candidates = carts.stale_carts(cutoff).await?;
    info!(
        event_name = "jobs.detector.sweep_started",
        correlation_id = %correlation_id,
        candidates = candidates.len(),
        threshold_hours = config.threshold_hours,
        "abandonment sweep started"
    );

    let mut summary = SweepSummary::default();
    for cart in &candidates {
        match flag_one(&carts, &abandonments, cart, cutoff, now).await {
            Ok(Some(snapshot)) => {
                summary.flagged += 1;
                info!(
                    event_name = "jobs.detector.cart_flagged",
                    correlation_id = %correlation_id,
                    cart_id = %cart.cart_id.0,
                    item_count = snapshot.item_count,
                    total_value = %snapshot.total_value,
                    "cart flagged as abandoned"
                );
            }
            Ok(None) => summary.skipped_open += 1,
            Err(error) => {
                summary.errors += 1;
                warn!(
                    event_name = "jobs.detector.cart_failed",
                    correlation_id = %correlation_id,
                    cart_id = %cart.cart_id.0,
                    error = %error,
                    "failed to flag cart; sweep continues"
                );
            }
        }
    }

    info!(
        event_name = "jobs.detector.sweep_completed",
        correlation_id = %correlation_id,
        flagged = summary.flagged,
        skipped_open = summary.skipped_open,
        errors = summary.errors,
        "abandonment sweep completed"
    );

    Ok(summary)
}

async fn flag_one(
    carts: &SqlCartRepository,
    abandonments: &SqlAbandonmentRepository,
    cart: &StaleCart,
    window_start: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<Option<CartSnapshot>, RepositoryError> {
    let items = carts.list_items(&cart.cart_id).await?;
    if items.is_empty() {
        // The scan already excludes empty carts; an item deleted between
        // scan and flag just means there is nothing to record.
        return Ok(None);
    }

    let snapshot = CartSnapshot::from_items(&items);
    let created = abandonments.flag_cart(cart, &snapshot, window_start, now).await?;
    Ok(created.map(|_| snapshot))
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};
    use rust_decimal::Decimal;

    use cartwatch_core::config::DetectorConfig;
    use cartwatch_core::domain::cart::{CartId, CartOwner, ProductId, UserId};
    use cartwatch_db::fixtures;
    use cartwatch_db::repositories::{
        AbandonmentRepository, CartRepository, SqlAbandonmentRepository, SqlCartRepository,
    };

    use super::detect_abandoned_carts;

    fn config() -> DetectorConfig {
        DetectorConfig { threshold_hours: 24, interval_secs: 3_600 }
    }

    #[tokio::test]
    async fn sweep_flags_stale_carts_and_is_idempotent() {
        let pool = fixtures::test_pool().await;
        let now = Utc::now();
        fixtures::insert_user(&pool, "user-1", Some("user-1@example.test"))
            .await
            .expect("user");

        let carts = SqlCartRepository::new(pool.clone());
        let stale = carts
            .create_cart(CartOwner::User(UserId("user-1".to_string())), now - Duration::hours(30))
            .await
            .expect("cart");
        carts
            .add_item(
                &stale.id,
                &ProductId("prod-1".to_string()),
                2,
                Decimal::new(7_500_00, 2),
                now - Duration::hours(30),
            )
            .await
            .expect("item");

        let first = detect_abandoned_carts(&pool, &config(), now).await.expect("first sweep");
        assert_eq!(first.flagged, 1);
        assert_eq!(first.errors, 0);

        let second = detect_abandoned_carts(&pool, &config(), now).await.expect("second sweep");
        assert_eq!(second.flagged, 0, "immediate re-run must create nothing");
        assert_eq!(second.skipped_open, 1);

        let episodes = SqlAbandonmentRepository::new(pool)
            .list_for_cart(&stale.id)
            .await
            .expect("episodes");
        assert_eq!(episodes.len(), 1);
        assert_eq!(episodes[0].item_count, 1);
        assert_eq!(episodes[0].total_value, Decimal::new(15_000_00, 2));
    }

    #[tokio::test]
    async fn empty_and_fresh_carts_are_never_flagged() {
        let pool = fixtures::test_pool().await;
        let now = Utc::now();
        fixtures::insert_user(&pool, "user-1", None).await.expect("user");

        // Stale but empty.
        fixtures::insert_cart(&pool, "cart-empty", Some("user-1"), now - Duration::hours(48))
            .await
            .expect("empty cart");

        // Fresh with items.
        let carts = SqlCartRepository::new(pool.clone());
        let fresh = carts
            .create_cart(CartOwner::User(UserId("user-1".to_string())), now - Duration::hours(2))
            .await
            .expect("fresh cart");
        carts
            .add_item(
                &fresh.id,
                &ProductId("prod-1".to_string()),
                1,
                Decimal::new(1_000_00, 2),
                now - Duration::hours(2),
            )
            .await
            .expect("item");

        let summary = detect_abandoned_carts(&pool, &config(), now).await.expect("sweep");
        assert_eq!(summary.flagged, 0);
        assert_eq!(summary.skipped_open, 0);

        let episodes = SqlAbandonmentRepository::new(pool)
            .list_for_cart(&CartId("cart-empty".to_string()))
            .await
            .expect("episodes");
        assert!(episodes.is_empty());
    }

    #[tokio::test]
    async fn guest_carts_are_flagged_without_a_user() {
        let pool = fixtures::test_pool().await;
        let now = Utc::now();
        fixtures::insert_cart(&pool, "cart-guest", None, now - Duration::hours(26))
            .await
            .expect("guest cart");
        sqlx::query(
            "INSERT INTO cart_items \
             (id, cart_id, product_id, quantity, price_at_addition, saved_for_later, added_at, updated_at) \
             VALUES ('item-1', 'cart-guest', 'prod-1', 1, '2500.00', 0, ?, ?)",
        )
        .bind(now - Duration::hours(26))
        .bind(now - Duration::hours(26))
        .execute(&pool)
        .await
        .expect("item");

        let summary = detect_abandoned_carts(&pool, &config(), now).await.expect("sweep");
        assert_eq!(summary.flagged, 1);

        let episodes = SqlAbandonmentRepository::new(pool)
            .list_for_cart(&CartId("cart-guest".to_string()))
            .await
            .expect("episodes");
        assert_eq!(episodes[0].user_id, None);
    }
}
