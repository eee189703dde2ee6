//! Deterministic demo dataset and raw insert helpers shared by the seed
//! command and the test suites.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;

use cartwatch_core::domain::cart::{CartId, CartOwner, ProductId, SessionId, UserId};

use crate::repositories::{CartRepository, RepositoryError, SqlCartRepository};
use crate::DbPool;

/// Canonical demo accounts. One engaged buyer, one serial abandoner with
/// reminder-eligible history, one guest session, one user with no email.
const SEED_USERS: &[(&str, Option<&str>)] = &[
    ("user-amara", Some("amara@example.test")),
    ("user-bakari", Some("bakari@example.test")),
    ("user-chike", None),
];

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SeedResult {
    pub users: u64,
    pub carts: u64,
    pub items: u64,
    pub events: u64,
    pub abandonments: u64,
}

/// Deterministic seed dataset anchored at a caller-supplied timestamp so
/// repeated seeding is reproducible in tests.
#[derive(Clone, Copy, Debug)]
pub struct SeedDataset {
    pub anchor: DateTime<Utc>,
}

impl SeedDataset {
    pub fn new(anchor: DateTime<Utc>) -> Self {
        Self { anchor }
    }

    pub async fn apply(&self, pool: &DbPool) -> Result<SeedResult, RepositoryError> {
        let mut result = SeedResult::default();
        let carts = SqlCartRepository::new(pool.clone());

        for (user_id, email) in SEED_USERS {
            insert_user(pool, user_id, *email).await?;
            result.users += 1;
        }

        // Amara: an active cart, touched recently. Not abandonment bait.
        let amara = UserId("user-amara".to_string());
        let amara_cart = carts
            .create_cart(CartOwner::User(amara.clone()), self.anchor - Duration::hours(2))
            .await?;
        carts
            .add_item(
                &amara_cart.id,
                &ProductId("prod-espresso-grinder".to_string()),
                1,
                Decimal::new(18_500_00, 2),
                self.anchor - Duration::hours(2),
            )
            .await?;
        carts
            .add_item(
                &amara_cart.id,
                &ProductId("prod-filter-papers".to_string()),
                3,
                Decimal::new(1_200_00, 2),
                self.anchor - Duration::hours(1),
            )
            .await?;
        result.carts += 1;
        result.items += 2;
        result.events += 2;

        // Bakari: a stale two-item cart (detector bait) plus an old
        // abandonment that already aged past the reminder threshold and
        // a recovered episode for the conversion component.
        let bakari = UserId("user-bakari".to_string());
        let stale_cart = carts
            .create_cart(CartOwner::User(bakari.clone()), self.anchor - Duration::hours(30))
            .await?;
        carts
            .add_item(
                &stale_cart.id,
                &ProductId("prod-standing-desk".to_string()),
                1,
                Decimal::new(42_000_00, 2),
                self.anchor - Duration::hours(30),
            )
            .await?;
        carts
            .add_item(
                &stale_cart.id,
                &ProductId("prod-monitor-arm".to_string()),
                2,
                Decimal::new(6_500_00, 2),
                self.anchor - Duration::hours(29),
            )
            .await?;
        carts
            .save_item_for_later(
                &stale_cart.id,
                &ProductId("prod-monitor-arm".to_string()),
                self.anchor - Duration::hours(28),
            )
            .await?;
        backdate_cart(pool, &stale_cart.id, self.anchor - Duration::hours(30)).await?;
        result.carts += 1;
        result.items += 2;
        result.events += 3;

        let old_cart = carts
            .create_cart(CartOwner::User(bakari.clone()), self.anchor - Duration::hours(80))
            .await?;
        carts
            .add_item(
                &old_cart.id,
                &ProductId("prod-office-chair".to_string()),
                1,
                Decimal::new(35_000_00, 2),
                self.anchor - Duration::hours(80),
            )
            .await?;
        backdate_cart(pool, &old_cart.id, self.anchor - Duration::hours(80)).await?;
        insert_abandonment(
            pool,
            "seed-abn-bakari-old",
            &old_cart.id.0,
            Some("user-bakari"),
            Decimal::new(35_000_00, 2),
            self.anchor - Duration::hours(72),
            false,
        )
        .await?;
        result.carts += 1;
        result.items += 1;
        result.events += 1;
        result.abandonments += 1;

        let recovered_cart = carts
            .create_cart(CartOwner::User(bakari), self.anchor - Duration::hours(200))
            .await?;
        carts
            .add_item(
                &recovered_cart.id,
                &ProductId("prod-bookshelf".to_string()),
                1,
                Decimal::new(12_000_00, 2),
                self.anchor - Duration::hours(200),
            )
            .await?;
        backdate_cart(pool, &recovered_cart.id, self.anchor - Duration::hours(200)).await?;
        insert_abandonment(
            pool,
            "seed-abn-bakari-recovered",
            &recovered_cart.id.0,
            Some("user-bakari"),
            Decimal::new(12_000_00, 2),
            self.anchor - Duration::hours(190),
            true,
        )
        .await?;
        result.carts += 1;
        result.items += 1;
        result.events += 1;
        result.abandonments += 1;

        // Chike has no email: reminder dispatch must skip them even with
        // an aged abandonment on file.
        let chike_cart = carts
            .create_cart(
                CartOwner::User(UserId("user-chike".to_string())),
                self.anchor - Duration::hours(90),
            )
            .await?;
        carts
            .add_item(
                &chike_cart.id,
                &ProductId("prod-reading-lamp".to_string()),
                2,
                Decimal::new(3_000_00, 2),
                self.anchor - Duration::hours(90),
            )
            .await?;
        backdate_cart(pool, &chike_cart.id, self.anchor - Duration::hours(90)).await?;
        insert_abandonment(
            pool,
            "seed-abn-chike",
            &chike_cart.id.0,
            Some("user-chike"),
            Decimal::new(6_000_00, 2),
            self.anchor - Duration::hours(80),
            false,
        )
        .await?;
        result.carts += 1;
        result.items += 1;
        result.events += 1;
        result.abandonments += 1;

        // An anonymous browser with a guest cart; owns events without a
        // user id.
        let guest_cart = carts
            .create_cart(
                CartOwner::Guest(SessionId("session-f3a9".to_string())),
                self.anchor - Duration::minutes(30),
            )
            .await?;
        carts
            .add_item(
                &guest_cart.id,
                &ProductId("prod-filter-papers".to_string()),
                1,
                Decimal::new(1_200_00, 2),
                self.anchor - Duration::minutes(30),
            )
            .await?;
        result.carts += 1;
        result.items += 1;
        result.events += 1;

        Ok(result)
    }

    /// Counts the seeded tables back, for the seed command's status
    /// output and the contract test.
    pub async fn verify(&self, pool: &DbPool) -> Result<SeedResult, RepositoryError> {
        async fn count(pool: &DbPool, sql: &str) -> Result<u64, RepositoryError> {
            let value: i64 = sqlx::query_scalar(sql).fetch_one(pool).await?;
            Ok(value.max(0) as u64)
        }

        Ok(SeedResult {
            users: count(pool, "SELECT COUNT(*) FROM users").await?,
            carts: count(pool, "SELECT COUNT(*) FROM carts").await?,
            items: count(pool, "SELECT COUNT(*) FROM cart_items").await?,
            events: count(pool, "SELECT COUNT(*) FROM cart_events").await?,
            abandonments: count(pool, "SELECT COUNT(*) FROM cart_abandonments").await?,
        })
    }
}

/// Fresh in-memory pool with migrations applied.
pub async fn test_pool() -> DbPool {
    let pool = crate::connect_with_settings("sqlite::memory:", 1, 30)
        .await
        .expect("connect to in-memory sqlite");
    crate::migrations::run_pending(&pool).await.expect("apply migrations");
    pool
}

pub async fn insert_user(
    pool: &DbPool,
    user_id: &str,
    email: Option<&str>,
) -> Result<(), RepositoryError> {
    sqlx::query("INSERT INTO users (id, email, created_at) VALUES (?, ?, ?)")
        .bind(user_id)
        .bind(email)
        .bind(Utc::now())
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn insert_cart(
    pool: &DbPool,
    cart_id: &str,
    user_id: Option<&str>,
    created_at: DateTime<Utc>,
) -> Result<(), RepositoryError> {
    let session_id = user_id.is_none().then(|| format!("session-{cart_id}"));
    sqlx::query(
        "INSERT INTO carts (id, user_id, session_id, created_at, updated_at) \
         VALUES (?, ?, ?, ?, ?)",
    )
    .bind(cart_id)
    .bind(user_id)
    .bind(session_id)
    .bind(created_at)
    .bind(created_at)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn insert_abandonment(
    pool: &DbPool,
    abandonment_id: &str,
    cart_id: &str,
    user_id: Option<&str>,
    total_value: Decimal,
    detected_at: DateTime<Utc>,
    recovered: bool,
) -> Result<(), RepositoryError> {
    sqlx::query(
        "INSERT INTO cart_abandonments \
         (id, cart_id, user_id, item_count, total_value, recovered, recovered_at, \
          reminder_sent, reminder_sent_at, detected_at) \
         VALUES (?, ?, ?, 1, ?, ?, NULL, 0, NULL, ?)",
    )
    .bind(abandonment_id)
    .bind(cart_id)
    .bind(user_id)
    .bind(total_value.to_string())
    .bind(recovered)
    .bind(detected_at)
    .execute(pool)
    .await?;
    Ok(())
}

async fn backdate_cart(
    pool: &DbPool,
    cart_id: &CartId,
    updated_at: DateTime<Utc>,
) -> Result<(), RepositoryError> {
    sqlx::query("UPDATE carts SET updated_at = ? WHERE id = ?")
        .bind(updated_at)
        .bind(&cart_id.0)
        .execute(pool)
        .await?;
    Ok(())
}
