use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::cart::UserId;
use crate::scoring::tiers::DiscountTier;
use crate::scoring::ScoreBreakdown;

/// The persisted engagement score row. Exactly one per user, overwritten
/// on every scoring run, never versioned.
///
/// The price-sensitivity component feeds the composite but is not stored
/// as its own column. The persisted eligibility and discount fields may
/// go stale between runs; [`DiscountTier`] applied to the composite is
/// the on-demand source of truth.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UserScore {
    pub user_id: UserId,
    pub abandonment_score: Decimal,
    pub value_score: Decimal,
    pub conversion_score: Decimal,
    pub hesitation_score: Decimal,
    pub composite_score: Decimal,
    pub discount_eligible: bool,
    pub recommended_discount: Decimal,
    pub promo_code: Option<String>,
    pub calculated_at: DateTime<Utc>,
}

impl UserScore {
    /// Rounds to two decimal places at this persistence boundary; the
    /// breakdown itself stays unrounded so chained arithmetic does not
    /// compound rounding error.
    pub fn from_breakdown(
        user_id: UserId,
        breakdown: &ScoreBreakdown,
        calculated_at: DateTime<Utc>,
    ) -> Self {
        let composite = breakdown.composite.round_dp(2);
        let tier = DiscountTier::for_composite(composite);

        let promo_code = tier.promo_prefix().map(|prefix| {
            let fragment: String = user_id
                .0
                .chars()
                .filter(char::is_ascii_alphanumeric)
                .take(6)
                .collect::<String>()
                .to_ascii_uppercase();
            format!("{prefix}-{fragment}")
        });

        Self {
            user_id,
            abandonment_score: breakdown.components.abandonment.round_dp(2),
            value_score: breakdown.components.value.round_dp(2),
            conversion_score: breakdown.components.conversion.round_dp(2),
            hesitation_score: breakdown.components.hesitation.round_dp(2),
            composite_score: composite,
            discount_eligible: tier.is_eligible(),
            recommended_discount: tier.discount_pct(),
            promo_code,
            calculated_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use rust_decimal::Decimal;

    use super::UserScore;
    use crate::domain::cart::UserId;
    use crate::scoring::{ComponentScores, ScoreBreakdown};

    fn breakdown(composite: Decimal) -> ScoreBreakdown {
        ScoreBreakdown {
            components: ComponentScores {
                abandonment: Decimal::from(80),
                value: Decimal::from(70),
                conversion: Decimal::from(60),
                hesitation: Decimal::from(50),
                price_sensitivity: Decimal::from(55),
            },
            composite,
        }
    }

    #[test]
    fn eligible_user_gets_deterministic_promo_code() {
        let user_id = UserId("user-1234".to_string());
        let first = UserScore::from_breakdown(
            user_id.clone(),
            &breakdown(Decimal::from(85)),
            Utc::now(),
        );
        let second =
            UserScore::from_breakdown(user_id, &breakdown(Decimal::from(85)), Utc::now());

        assert_eq!(first.promo_code.as_deref(), Some("SAVE10-USER12"));
        assert_eq!(first.promo_code, second.promo_code);
    }

    #[test]
    fn standard_tier_carries_no_promo_code() {
        let score = UserScore::from_breakdown(
            UserId("user-1".to_string()),
            &breakdown(Decimal::new(39_99, 2)),
            Utc::now(),
        );

        assert!(!score.discount_eligible);
        assert_eq!(score.recommended_discount, Decimal::new(0, 2));
        assert!(score.promo_code.is_none());
    }

    #[test]
    fn components_are_rounded_to_two_places_on_persist() {
        let mut raw = breakdown(Decimal::from(50));
        raw.components.abandonment = Decimal::new(66_6666, 4);
        let score =
            UserScore::from_breakdown(UserId("user-1".to_string()), &raw, Utc::now());

        assert_eq!(score.abandonment_score, Decimal::new(66_67, 2));
    }
}
