use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Discount tier derived from the composite score. Evaluated on demand;
/// the persisted eligibility fields on a score row may lag behind it
/// between scoring runs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscountTier {
    Premium,
    Gold,
    Silver,
    Standard,
}

impl DiscountTier {
    /// Tier boundaries are inclusive on the lower edge: a composite of
    /// exactly 40 lands in silver, exactly 80 in premium.
    pub fn for_composite(composite: Decimal) -> Self {
        if composite >= Decimal::from(80u32) {
            Self::Premium
        } else if composite >= Decimal::from(60u32) {
            Self::Gold
        } else if composite >= Decimal::from(40u32) {
            Self::Silver
        } else {
            Self::Standard
        }
    }

    pub fn discount_pct(&self) -> Decimal {
        match self {
            Self::Premium => Decimal::new(10_00, 2),
            Self::Gold => Decimal::new(7_50, 2),
            Self::Silver => Decimal::new(5_00, 2),
            Self::Standard => Decimal::new(0, 2),
        }
    }

    pub fn is_eligible(&self) -> bool {
        !matches!(self, Self::Standard)
    }

    pub fn promo_prefix(&self) -> Option<&'static str> {
        match self {
            Self::Premium => Some("SAVE10"),
            Self::Gold => Some("SAVE7"),
            Self::Silver => Some("SAVE5"),
            Self::Standard => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Premium => "premium",
            Self::Gold => "gold",
            Self::Silver => "silver",
            Self::Standard => "standard",
        }
    }
}

/// Display bucketing for analytics and dashboards. Distinct cut points
/// from the discount tiers; the two schemes serve different purposes and
/// must not be unified.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreBand {
    HighValue,
    MediumValue,
    LowValue,
    AtRisk,
}

impl ScoreBand {
    pub fn for_composite(composite: Decimal) -> Self {
        if composite >= Decimal::from(75u32) {
            Self::HighValue
        } else if composite >= Decimal::from(50u32) {
            Self::MediumValue
        } else if composite >= Decimal::from(25u32) {
            Self::LowValue
        } else {
            Self::AtRisk
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::HighValue => "high_value",
            Self::MediumValue => "medium_value",
            Self::LowValue => "low_value",
            Self::AtRisk => "at_risk",
        }
    }
}
