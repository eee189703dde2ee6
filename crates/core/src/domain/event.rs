use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::cart::{CartId, ProductId, UserId};

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CartEventId(pub String);

/// Typed payload for one cart lifecycle event. Each variant carries the
/// fields that event actually produces, so a malformed payload is a
/// compile- or decode-time failure rather than a missing dict key.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum CartEventKind {
    ItemAdded { product_id: ProductId, quantity: u32, unit_price: Decimal },
    ItemUpdated { product_id: ProductId, quantity: u32 },
    ItemRemoved { product_id: ProductId },
    ItemSavedForLater { product_id: ProductId },
}

impl CartEventKind {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::ItemAdded { .. } => "item_added",
            Self::ItemUpdated { .. } => "item_updated",
            Self::ItemRemoved { .. } => "item_removed",
            Self::ItemSavedForLater { .. } => "item_saved_for_later",
        }
    }
}

/// Append-only log entry. Created once by cart mutation handlers, never
/// updated or deleted; consumed only by the scoring engine.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CartEvent {
    pub id: CartEventId,
    /// None for guest carts.
    pub user_id: Option<UserId>,
    pub cart_id: CartId,
    pub kind: CartEventKind,
    pub created_at: DateTime<Utc>,
}
