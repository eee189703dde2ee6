use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::cart::{CartId, UserId};

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AbandonmentId(pub String);

/// One record per detected abandonment episode for a cart.
///
/// The recovered flag is flipped by the order subsystem when the cart
/// later checks out; this crate only reads it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CartAbandonment {
    pub id: AbandonmentId,
    pub cart_id: CartId,
    /// Nulled rather than cascaded when the user is deleted, so the
    /// episode survives for analytics.
    pub user_id: Option<UserId>,
    pub item_count: u32,
    pub total_value: Decimal,
    pub recovered: bool,
    pub recovered_at: Option<DateTime<Utc>>,
    pub reminder_sent: bool,
    pub reminder_sent_at: Option<DateTime<Utc>>,
    pub detected_at: DateTime<Utc>,
}

impl CartAbandonment {
    /// An episode is open while it is unrecovered and was detected inside
    /// the current threshold window. The detector must not stack a second
    /// record on a cart with an open episode.
    pub fn is_open(&self, window_start: DateTime<Utc>) -> bool {
        !self.recovered && self.detected_at >= window_start
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};
    use rust_decimal::Decimal;

    use super::{AbandonmentId, CartAbandonment};
    use crate::domain::cart::{CartId, UserId};

    fn abandonment(hours_ago: i64, recovered: bool) -> CartAbandonment {
        let now = Utc::now();
        CartAbandonment {
            id: AbandonmentId("abn-1".to_string()),
            cart_id: CartId("cart-1".to_string()),
            user_id: Some(UserId("user-1".to_string())),
            item_count: 2,
            total_value: Decimal::new(8_000_00, 2),
            recovered,
            recovered_at: None,
            reminder_sent: false,
            reminder_sent_at: None,
            detected_at: now - Duration::hours(hours_ago),
        }
    }

    #[test]
    fn unrecovered_episode_inside_window_is_open() {
        let window_start = Utc::now() - Duration::hours(24);
        assert!(abandonment(3, false).is_open(window_start));
    }

    #[test]
    fn recovered_episode_is_never_open() {
        let window_start = Utc::now() - Duration::hours(24);
        assert!(!abandonment(3, true).is_open(window_start));
    }

    #[test]
    fn episode_older_than_window_is_not_open() {
        let window_start = Utc::now() - Duration::hours(24);
        assert!(!abandonment(30, false).is_open(window_start));
    }
}
