use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use uuid::Uuid;

use cartwatch_core::domain::cart::{CartId, UserId};
use cartwatch_core::domain::event::{CartEvent, CartEventId, CartEventKind};

use super::{CartEventRepository, EventCounts, RepositoryError};
use crate::DbPool;

pub struct SqlCartEventRepository {
    pool: DbPool,
}

impl SqlCartEventRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl CartEventRepository for SqlCartEventRepository {
    async fn append(
        &self,
        user_id: Option<&UserId>,
        cart_id: &CartId,
        kind: &CartEventKind,
        now: DateTime<Utc>,
    ) -> Result<CartEvent, RepositoryError> {
        let event = CartEvent {
            id: CartEventId(Uuid::new_v4().to_string()),
            user_id: user_id.cloned(),
            cart_id: cart_id.clone(),
            kind: kind.clone(),
            created_at: now,
        };

        let payload = serde_json::to_string(&event.kind)
            .map_err(|error| RepositoryError::Decode(format!("event payload encode: {error}")))?;

        sqlx::query(
            "INSERT INTO cart_events (id, user_id, cart_id, event_type, payload, created_at) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&event.id.0)
        .bind(event.user_id.as_ref().map(|id| id.0.clone()))
        .bind(&event.cart_id.0)
        .bind(event.kind.event_type())
        .bind(payload)
        .bind(event.created_at)
        .execute(&self.pool)
        .await?;

        Ok(event)
    }

    async fn counts_for_user(&self, user_id: &UserId) -> Result<EventCounts, RepositoryError> {
        let rows = sqlx::query(
            "SELECT event_type, COUNT(*) AS count FROM cart_events \
             WHERE user_id = ? AND event_type IN ('item_added', 'item_saved_for_later') \
             GROUP BY event_type",
        )
        .bind(&user_id.0)
        .fetch_all(&self.pool)
        .await?;

        let mut counts = EventCounts::default();
        for row in rows {
            let event_type: String = row.try_get("event_type")?;
            let count: i64 = row.try_get("count")?;
            match event_type.as_str() {
                "item_added" => counts.items_added = count.max(0) as u64,
                "item_saved_for_later" => counts.items_saved_for_later = count.max(0) as u64,
                _ => {}
            }
        }

        Ok(counts)
    }

    async fn list_for_cart(&self, cart_id: &CartId) -> Result<Vec<CartEvent>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, user_id, cart_id, payload, created_at FROM cart_events \
             WHERE cart_id = ? ORDER BY created_at ASC, id ASC",
        )
        .bind(&cart_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(event_from_row).collect()
    }
}

fn event_from_row(row: SqliteRow) -> Result<CartEvent, RepositoryError> {
    let payload: String = row.try_get("payload")?;
    let kind: CartEventKind = serde_json::from_str(&payload)
        .map_err(|error| RepositoryError::Decode(format!("event payload decode: {error}")))?;

    Ok(CartEvent {
        id: CartEventId(row.try_get("id")?),
        user_id: row.try_get::<Option<String>, _>("user_id")?.map(UserId),
        cart_id: CartId(row.try_get("cart_id")?),
        kind,
        created_at: row.try_get("created_at")?,
    })
}
