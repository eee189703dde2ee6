use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use thiserror::Error;

use cartwatch_core::domain::abandonment::CartAbandonment;
use cartwatch_core::domain::cart::{
    Cart, CartId, CartItem, CartOwner, CartSnapshot, ProductId, UserId,
};
use cartwatch_core::domain::event::{CartEvent, CartEventKind};
use cartwatch_core::domain::score::UserScore;
use cartwatch_core::errors::DomainError;

pub mod abandonment;
pub mod cart;
pub mod event;
pub mod outbox;
pub mod score;

pub use abandonment::SqlAbandonmentRepository;
pub use cart::SqlCartRepository;
pub use event::SqlCartEventRepository;
pub use outbox::SqlReminderOutboxRepository;
pub use score::SqlScoreRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },
}

/// A stale cart surfaced by the detector scan.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StaleCart {
    pub cart_id: CartId,
    pub user_id: Option<UserId>,
}

/// An abandonment row the reminder dispatcher just marked, joined with
/// the email it should be delivered to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReminderTarget {
    pub abandonment_id: String,
    pub user_id: UserId,
    pub email: String,
}

/// Per-user abandonment aggregates feeding the scoring engine.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AbandonmentStats {
    pub total: u64,
    pub recovered: u64,
    pub avg_value: Option<Decimal>,
    pub avg_hours_to_abandon: Option<Decimal>,
}

/// Whole-table abandonment counts for the analytics summary.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AbandonmentTotals {
    pub total: u64,
    pub recovered: u64,
    pub reminders_sent: u64,
}

/// Per-user event-log counts feeding the scoring engine.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EventCounts {
    pub items_added: u64,
    pub items_saved_for_later: u64,
}

#[async_trait]
pub trait CartRepository: Send + Sync {
    async fn create_cart(&self, owner: CartOwner, now: DateTime<Utc>)
        -> Result<Cart, RepositoryError>;

    async fn find_cart(&self, id: &CartId) -> Result<Option<Cart>, RepositoryError>;

    /// Adds a product to the cart, or bumps its quantity when the
    /// (cart, product) pair already exists. The price snapshot from the
    /// first addition is kept. Touches the abandonment clock and appends
    /// an `item_added` event in the same transaction.
    async fn add_item(
        &self,
        cart_id: &CartId,
        product_id: &ProductId,
        quantity: u32,
        unit_price: Decimal,
        now: DateTime<Utc>,
    ) -> Result<CartItem, RepositoryError>;

    async fn update_item_quantity(
        &self,
        cart_id: &CartId,
        product_id: &ProductId,
        quantity: u32,
        now: DateTime<Utc>,
    ) -> Result<(), RepositoryError>;

    async fn remove_item(
        &self,
        cart_id: &CartId,
        product_id: &ProductId,
        now: DateTime<Utc>,
    ) -> Result<(), RepositoryError>;

    async fn save_item_for_later(
        &self,
        cart_id: &CartId,
        product_id: &ProductId,
        now: DateTime<Utc>,
    ) -> Result<(), RepositoryError>;

    async fn list_items(&self, cart_id: &CartId) -> Result<Vec<CartItem>, RepositoryError>;

    /// Carts whose abandonment clock predates the cutoff and which hold
    /// at least one item. Open-episode filtering happens at flag time.
    async fn stale_carts(&self, cutoff: DateTime<Utc>) -> Result<Vec<StaleCart>, RepositoryError>;

    /// Distinct carts owned by the user that contain items.
    async fn carts_with_items_count(&self, user_id: &UserId) -> Result<u64, RepositoryError>;
}

#[async_trait]
pub trait CartEventRepository: Send + Sync {
    async fn append(
        &self,
        user_id: Option<&UserId>,
        cart_id: &CartId,
        kind: &CartEventKind,
        now: DateTime<Utc>,
    ) -> Result<CartEvent, RepositoryError>;

    async fn counts_for_user(&self, user_id: &UserId) -> Result<EventCounts, RepositoryError>;

    async fn list_for_cart(&self, cart_id: &CartId) -> Result<Vec<CartEvent>, RepositoryError>;
}

#[async_trait]
pub trait AbandonmentRepository: Send + Sync {
    /// Creates one abandonment episode for the cart inside its own
    /// transaction, unless an open episode (unrecovered, detected at or
    /// after `window_start`) already exists. Returns `None` when skipped.
    async fn flag_cart(
        &self,
        cart: &StaleCart,
        snapshot: &CartSnapshot,
        window_start: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Option<CartAbandonment>, RepositoryError>;

    async fn list_for_cart(
        &self,
        cart_id: &CartId,
    ) -> Result<Vec<CartAbandonment>, RepositoryError>;

    /// Marks every eligible row (unrecovered, unreminded, detected at or
    /// before `detected_before`, user has an email) as reminder-sent in
    /// one bulk UPDATE. Returns the number of rows marked.
    async fn mark_reminders_sent(
        &self,
        detected_before: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<u64, RepositoryError>;

    /// The rows stamped with exactly the given reminder timestamp, i.e.
    /// the rows one `mark_reminders_sent` call just marked.
    async fn reminders_marked_at(
        &self,
        marked_at: DateTime<Utc>,
    ) -> Result<Vec<ReminderTarget>, RepositoryError>;

    async fn user_stats(&self, user_id: &UserId) -> Result<AbandonmentStats, RepositoryError>;

    async fn totals(&self) -> Result<AbandonmentTotals, RepositoryError>;
}

#[async_trait]
pub trait ScoreRepository: Send + Sync {
    async fn find(&self, user_id: &UserId) -> Result<Option<UserScore>, RepositoryError>;

    /// Every user id that currently has a persisted score row. Drives
    /// the create-vs-update partition of a bulk run.
    async fn scored_user_ids(&self) -> Result<HashSet<String>, RepositoryError>;

    /// Distinct users with any cart or any abandonment history.
    async fn users_with_history(&self) -> Result<Vec<UserId>, RepositoryError>;

    async fn insert_one(&self, score: &UserScore) -> Result<(), RepositoryError>;

    /// One multi-row INSERT for the whole batch.
    async fn insert_batch(&self, scores: &[UserScore]) -> Result<(), RepositoryError>;

    /// Per-row UPDATEs inside a single transaction.
    async fn update_batch(&self, scores: &[UserScore]) -> Result<(), RepositoryError>;

    /// Persisted component rows for the analytics summary.
    async fn all_scores(&self) -> Result<Vec<UserScore>, RepositoryError>;
}

#[async_trait]
pub trait ReminderOutboxRepository: Send + Sync {
    /// Queues one outbox row per target. Delivery is consumed out of
    /// band by the notification collaborator.
    async fn enqueue(
        &self,
        targets: &[ReminderTarget],
        now: DateTime<Utc>,
    ) -> Result<u64, RepositoryError>;

    async fn queued_count(&self) -> Result<u64, RepositoryError>;
}

pub(crate) fn parse_decimal(field: &str, raw: &str) -> Result<Decimal, RepositoryError> {
    use std::str::FromStr;
    Decimal::from_str(raw)
        .map_err(|error| RepositoryError::Decode(format!("invalid decimal in `{field}`: {error}")))
}
