use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use uuid::Uuid;

use cartwatch_core::domain::cart::{
    validate_quantity, Cart, CartId, CartItem, CartItemId, CartOwner, ProductId, SessionId, UserId,
};
use cartwatch_core::domain::event::CartEventKind;

use super::{CartRepository, RepositoryError, StaleCart};
use crate::DbPool;

pub struct SqlCartRepository {
    pool: DbPool,
}

impl SqlCartRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn load_cart(
        tx: &mut sqlx::SqliteConnection,
        cart_id: &CartId,
    ) -> Result<Cart, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, user_id, session_id, created_at, updated_at FROM carts WHERE id = ?",
        )
        .bind(&cart_id.0)
        .fetch_optional(&mut *tx)
        .await?;

        row.map(cart_from_row).transpose()?.ok_or_else(|| RepositoryError::NotFound {
            entity: "cart",
            id: cart_id.0.clone(),
        })
    }

    async fn touch_cart(
        tx: &mut sqlx::SqliteConnection,
        cart_id: &CartId,
        now: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        sqlx::query("UPDATE carts SET updated_at = ? WHERE id = ?")
            .bind(now)
            .bind(&cart_id.0)
            .execute(&mut *tx)
            .await?;
        Ok(())
    }

    async fn append_event(
        tx: &mut sqlx::SqliteConnection,
        user_id: Option<&UserId>,
        cart_id: &CartId,
        kind: &CartEventKind,
        now: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        let payload = serde_json::to_string(kind)
            .map_err(|error| RepositoryError::Decode(format!("event payload encode: {error}")))?;

        sqlx::query(
            "INSERT INTO cart_events (id, user_id, cart_id, event_type, payload, created_at) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(user_id.map(|id| id.0.clone()))
        .bind(&cart_id.0)
        .bind(kind.event_type())
        .bind(payload)
        .bind(now)
        .execute(&mut *tx)
        .await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl CartRepository for SqlCartRepository {
    async fn create_cart(
        &self,
        owner: CartOwner,
        now: DateTime<Utc>,
    ) -> Result<Cart, RepositoryError> {
        let cart = Cart {
            id: CartId(Uuid::new_v4().to_string()),
            owner,
            created_at: now,
            updated_at: now,
        };

        sqlx::query(
            "INSERT INTO carts (id, user_id, session_id, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&cart.id.0)
        .bind(cart.owner.user_id().map(|id| id.0.clone()))
        .bind(cart.owner.session_id().map(|id| id.0.clone()))
        .bind(cart.created_at)
        .bind(cart.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(cart)
    }

    async fn find_cart(&self, id: &CartId) -> Result<Option<Cart>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, user_id, session_id, created_at, updated_at FROM carts WHERE id = ?",
        )
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.map(cart_from_row).transpose()
    }

    async fn add_item(
        &self,
        cart_id: &CartId,
        product_id: &ProductId,
        quantity: u32,
        unit_price: Decimal,
        now: DateTime<Utc>,
    ) -> Result<CartItem, RepositoryError> {
        validate_quantity(quantity)?;

        let mut tx = self.pool.begin().await?;
        let cart = Self::load_cart(&mut tx, cart_id).await?;

        let existing = sqlx::query(
            "SELECT id, cart_id, product_id, quantity, \
                    CAST(price_at_addition AS TEXT) AS price_text, \
                    saved_for_later, added_at, updated_at \
             FROM cart_items WHERE cart_id = ? AND product_id = ?",
        )
        .bind(&cart_id.0)
        .bind(&product_id.0)
        .fetch_optional(&mut *tx)
        .await?
        .map(item_from_row)
        .transpose()?;

        let item = match existing {
            Some(mut item) => {
                // Same product again: one row per (cart, product), so the
                // quantity grows and the original price snapshot stands.
                item.quantity += quantity;
                item.updated_at = now;
                sqlx::query(
                    "UPDATE cart_items SET quantity = ?, updated_at = ? \
                     WHERE cart_id = ? AND product_id = ?",
                )
                .bind(i64::from(item.quantity))
                .bind(now)
                .bind(&cart_id.0)
                .bind(&product_id.0)
                .execute(&mut *tx)
                .await?;
                item
            }
            None => {
                let item = CartItem {
                    id: CartItemId(Uuid::new_v4().to_string()),
                    cart_id: cart_id.clone(),
                    product_id: product_id.clone(),
                    quantity,
                    price_at_addition: unit_price,
                    saved_for_later: false,
                    added_at: now,
                    updated_at: now,
                };
                sqlx::query(
                    "INSERT INTO cart_items \
                     (id, cart_id, product_id, quantity, price_at_addition, saved_for_later, \
                      added_at, updated_at) \
                     VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
                )
                .bind(&item.id.0)
                .bind(&item.cart_id.0)
                .bind(&item.product_id.0)
                .bind(i64::from(item.quantity))
                .bind(item.price_at_addition.to_string())
                .bind(item.saved_for_later)
                .bind(item.added_at)
                .bind(item.updated_at)
                .execute(&mut *tx)
                .await?;
                item
            }
        };

        Self::touch_cart(&mut tx, cart_id, now).await?;
        Self::append_event(
            &mut tx,
            cart.owner.user_id(),
            cart_id,
            &CartEventKind::ItemAdded {
                product_id: product_id.clone(),
                quantity,
                unit_price: item.price_at_addition,
            },
            now,
        )
        .await?;
        tx.commit().await?;

        Ok(item)
    }

    async fn update_item_quantity(
        &self,
        cart_id: &CartId,
        product_id: &ProductId,
        quantity: u32,
        now: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        validate_quantity(quantity)?;

        let mut tx = self.pool.begin().await?;
        let cart = Self::load_cart(&mut tx, cart_id).await?;

        let updated = sqlx::query(
            "UPDATE cart_items SET quantity = ?, updated_at = ? \
             WHERE cart_id = ? AND product_id = ?",
        )
        .bind(i64::from(quantity))
        .bind(now)
        .bind(&cart_id.0)
        .bind(&product_id.0)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if updated == 0 {
            return Err(RepositoryError::NotFound {
                entity: "cart item",
                id: format!("{}/{}", cart_id.0, product_id.0),
            });
        }

        Self::touch_cart(&mut tx, cart_id, now).await?;
        Self::append_event(
            &mut tx,
            cart.owner.user_id(),
            cart_id,
            &CartEventKind::ItemUpdated { product_id: product_id.clone(), quantity },
            now,
        )
        .await?;
        tx.commit().await?;

        Ok(())
    }

    async fn remove_item(
        &self,
        cart_id: &CartId,
        product_id: &ProductId,
        now: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;
        let cart = Self::load_cart(&mut tx, cart_id).await?;

        let removed = sqlx::query("DELETE FROM cart_items WHERE cart_id = ? AND product_id = ?")
            .bind(&cart_id.0)
            .bind(&product_id.0)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        if removed == 0 {
            return Err(RepositoryError::NotFound {
                entity: "cart item",
                id: format!("{}/{}", cart_id.0, product_id.0),
            });
        }

        Self::touch_cart(&mut tx, cart_id, now).await?;
        Self::append_event(
            &mut tx,
            cart.owner.user_id(),
            cart_id,
            &CartEventKind::ItemRemoved { product_id: product_id.clone() },
            now,
        )
        .await?;
        tx.commit().await?;

        Ok(())
    }

    async fn save_item_for_later(
        &self,
        cart_id: &CartId,
        product_id: &ProductId,
        now: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;
        let cart = Self::load_cart(&mut tx, cart_id).await?;

        let updated = sqlx::query(
            "UPDATE cart_items SET saved_for_later = 1, updated_at = ? \
             WHERE cart_id = ? AND product_id = ?",
        )
        .bind(now)
        .bind(&cart_id.0)
        .bind(&product_id.0)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if updated == 0 {
            return Err(RepositoryError::NotFound {
                entity: "cart item",
                id: format!("{}/{}", cart_id.0, product_id.0),
            });
        }

        Self::touch_cart(&mut tx, cart_id, now).await?;
        Self::append_event(
            &mut tx,
            cart.owner.user_id(),
            cart_id,
            &CartEventKind::ItemSavedForLater { product_id: product_id.clone() },
            now,
        )
        .await?;
        tx.commit().await?;

        Ok(())
    }

    async fn list_items(&self, cart_id: &CartId) -> Result<Vec<CartItem>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, cart_id, product_id, quantity, \
                    CAST(price_at_addition AS TEXT) AS price_text, \
                    saved_for_later, added_at, updated_at \
             FROM cart_items WHERE cart_id = ? ORDER BY added_at ASC, id ASC",
        )
        .bind(&cart_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(item_from_row).collect()
    }

    async fn stale_carts(&self, cutoff: DateTime<Utc>) -> Result<Vec<StaleCart>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT c.id, c.user_id FROM carts c \
             WHERE c.updated_at < ? \
               AND EXISTS (SELECT 1 FROM cart_items i WHERE i.cart_id = c.id) \
             ORDER BY c.updated_at ASC",
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                Ok(StaleCart {
                    cart_id: CartId(row.try_get("id")?),
                    user_id: row.try_get::<Option<String>, _>("user_id")?.map(UserId),
                })
            })
            .collect()
    }

    async fn carts_with_items_count(&self, user_id: &UserId) -> Result<u64, RepositoryError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM carts c \
             WHERE c.user_id = ? \
               AND EXISTS (SELECT 1 FROM cart_items i WHERE i.cart_id = c.id)",
        )
        .bind(&user_id.0)
        .fetch_one(&self.pool)
        .await?;

        Ok(count.max(0) as u64)
    }
}

fn cart_from_row(row: SqliteRow) -> Result<Cart, RepositoryError> {
    let id: String = row.try_get("id")?;
    let user_id: Option<String> = row.try_get("user_id")?;
    let session_id: Option<String> = row.try_get("session_id")?;

    let owner = match (user_id, session_id) {
        (Some(user_id), None) => CartOwner::User(UserId(user_id)),
        (None, Some(session_id)) => CartOwner::Guest(SessionId(session_id)),
        _ => {
            return Err(RepositoryError::Decode(format!(
                "cart `{id}` does not have exactly one principal"
            )));
        }
    };

    Ok(Cart {
        id: CartId(id),
        owner,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn item_from_row(row: SqliteRow) -> Result<CartItem, RepositoryError> {
    let quantity_raw: i64 = row.try_get("quantity")?;
    let quantity = u32::try_from(quantity_raw).map_err(|_| {
        RepositoryError::Decode(format!("cart item quantity `{quantity_raw}` does not fit in u32"))
    })?;
    let price_text: String = row.try_get("price_text")?;

    Ok(CartItem {
        id: CartItemId(row.try_get("id")?),
        cart_id: CartId(row.try_get("cart_id")?),
        product_id: ProductId(row.try_get("product_id")?),
        quantity,
        price_at_addition: super::parse_decimal("price_at_addition", &price_text)?,
        saved_for_later: row.try_get("saved_for_later")?,
        added_at: row.try_get("added_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};
    use rust_decimal::Decimal;

    use cartwatch_core::domain::cart::{CartOwner, ProductId, SessionId, UserId};

    use super::SqlCartRepository;
    use crate::fixtures;
    use crate::repositories::{CartEventRepository, CartRepository, RepositoryError};

    async fn repo_with_user() -> (crate::DbPool, SqlCartRepository, UserId) {
        let pool = fixtures::test_pool().await;
        let user_id = UserId("user-1".to_string());
        fixtures::insert_user(&pool, &user_id.0, Some("user-1@example.test"))
            .await
            .expect("insert user");
        (pool.clone(), SqlCartRepository::new(pool), user_id)
    }

    #[tokio::test]
    async fn guest_and_user_carts_round_trip_their_principal() {
        let (_pool, repo, user_id) = repo_with_user().await;
        let now = Utc::now();

        let user_cart =
            repo.create_cart(CartOwner::User(user_id.clone()), now).await.expect("user cart");
        let guest_cart = repo
            .create_cart(CartOwner::Guest(SessionId("session-9".to_string())), now)
            .await
            .expect("guest cart");

        let found = repo.find_cart(&user_cart.id).await.expect("find").expect("cart exists");
        assert_eq!(found.owner.user_id(), Some(&user_id));
        assert!(found.owner.session_id().is_none());

        let found = repo.find_cart(&guest_cart.id).await.expect("find").expect("cart exists");
        assert!(found.owner.user_id().is_none());
    }

    #[tokio::test]
    async fn adding_an_existing_product_bumps_quantity_and_keeps_price() {
        let (_pool, repo, user_id) = repo_with_user().await;
        let now = Utc::now();
        let cart = repo.create_cart(CartOwner::User(user_id), now).await.expect("cart");
        let product = ProductId("prod-1".to_string());

        repo.add_item(&cart.id, &product, 1, Decimal::new(2_500_00, 2), now)
            .await
            .expect("first add");
        let item = repo
            .add_item(&cart.id, &product, 2, Decimal::new(9_999_00, 2), now + Duration::minutes(5))
            .await
            .expect("second add");

        assert_eq!(item.quantity, 3);
        assert_eq!(item.price_at_addition, Decimal::new(2_500_00, 2));

        let items = repo.list_items(&cart.id).await.expect("list items");
        assert_eq!(items.len(), 1, "duplicate product must not create a second row");
    }

    #[tokio::test]
    async fn every_mutation_appends_exactly_one_event_and_touches_the_clock() {
        let (pool, repo, user_id) = repo_with_user().await;
        let created = Utc::now() - Duration::hours(2);
        let cart = repo.create_cart(CartOwner::User(user_id), created).await.expect("cart");
        let product = ProductId("prod-1".to_string());

        let t1 = created + Duration::minutes(1);
        let t2 = created + Duration::minutes(2);
        let t3 = created + Duration::minutes(3);
        let t4 = created + Duration::minutes(4);

        repo.add_item(&cart.id, &product, 2, Decimal::new(1_000_00, 2), t1).await.expect("add");
        repo.update_item_quantity(&cart.id, &product, 5, t2).await.expect("update");
        repo.save_item_for_later(&cart.id, &product, t3).await.expect("save");
        repo.remove_item(&cart.id, &product, t4).await.expect("remove");

        let events = crate::repositories::SqlCartEventRepository::new(pool)
            .list_for_cart(&cart.id)
            .await
            .expect("events");
        let types: Vec<&str> = events.iter().map(|event| event.kind.event_type()).collect();
        assert_eq!(types, ["item_added", "item_updated", "item_saved_for_later", "item_removed"]);

        let refreshed = repo.find_cart(&cart.id).await.expect("find").expect("cart exists");
        assert_eq!(refreshed.updated_at, t4);
    }

    #[tokio::test]
    async fn mutating_a_missing_item_is_not_found() {
        let (_pool, repo, user_id) = repo_with_user().await;
        let now = Utc::now();
        let cart = repo.create_cart(CartOwner::User(user_id), now).await.expect("cart");

        let error = repo
            .update_item_quantity(&cart.id, &ProductId("ghost".to_string()), 2, now)
            .await
            .expect_err("missing item");
        assert!(matches!(error, RepositoryError::NotFound { .. }));
    }

    #[tokio::test]
    async fn stale_scan_skips_empty_and_fresh_carts() {
        let (_pool, repo, user_id) = repo_with_user().await;
        let now = Utc::now();
        let cutoff = now - Duration::hours(24);

        // Stale with items: flagged.
        let stale = repo.create_cart(CartOwner::User(user_id.clone()), now - Duration::hours(30))
            .await
            .expect("stale cart");
        repo.add_item(
            &stale.id,
            &ProductId("prod-1".to_string()),
            1,
            Decimal::new(5_000_00, 2),
            now - Duration::hours(30),
        )
        .await
        .expect("add");

        // Stale but empty: never flagged.
        repo.create_cart(
            CartOwner::Guest(SessionId("session-1".to_string())),
            now - Duration::hours(40),
        )
        .await
        .expect("empty cart");

        // Fresh with items: not flagged.
        let fresh =
            repo.create_cart(CartOwner::User(user_id), now - Duration::hours(1)).await.expect("fresh");
        repo.add_item(
            &fresh.id,
            &ProductId("prod-2".to_string()),
            1,
            Decimal::new(1_000_00, 2),
            now - Duration::hours(1),
        )
        .await
        .expect("add");

        let stale_carts = repo.stale_carts(cutoff).await.expect("scan");
        assert_eq!(stale_carts.len(), 1);
        assert_eq!(stale_carts[0].cart_id, stale.id);
    }
}
