//! Behavioral scoring over cart and abandonment history.
//!
//! Five independent component scores, each normalized to [0, 100], are
//! combined into one weighted composite. Missing history never raises an
//! error: every component falls back to a neutral default, and every
//! ratio that can leave [0, 1] is clamped.

pub mod tiers;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Default component weights, in whole percentage points.
pub const DEFAULT_WEIGHTS: ScoringWeights = ScoringWeights {
    abandonment: 30,
    value: 25,
    conversion: 20,
    hesitation: 15,
    price_sensitivity: 10,
};

/// Score assigned when a component has no data to work with.
const NEUTRAL_SCORE: u32 = 50;

/// Average abandoned-cart value at or below this maps to the floor score.
const VALUE_LOW_BENCHMARK: u32 = 5_000;
/// Average abandoned-cart value at or above this maps to the cap score.
const VALUE_HIGH_BENCHMARK: u32 = 50_000;
const VALUE_FLOOR_SCORE: u32 = 20;
const VALUE_CAP_SCORE: u32 = 100;

/// Single benchmark for the price-sensitivity component.
const PRICE_SENSITIVITY_BENCHMARK: u32 = 30_000;
const PRICE_SENSITIVITY_CAP: u32 = 80;

/// Time-to-abandon at or under one hour scores 100; at or over 48 hours
/// it scores 20, linearly interpolated in between.
const FAST_ABANDON_HOURS: u32 = 1;
const SLOW_ABANDON_HOURS: u32 = 48;

/// Weights for scoring components, in whole percentage points summing
/// to 100.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoringWeights {
    pub abandonment: u32,
    pub value: u32,
    pub conversion: u32,
    pub hesitation: u32,
    pub price_sensitivity: u32,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        DEFAULT_WEIGHTS
    }
}

/// Aggregated per-user inputs read from the event log and abandonment
/// history. `None` averages mean the user has no abandonment history.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct UserActivity {
    /// Distinct carts ever owned by the user that contain items.
    pub carts_with_items: u64,
    pub abandoned_carts: u64,
    pub recovered_carts: u64,
    pub avg_abandoned_value: Option<Decimal>,
    pub avg_hours_to_abandon: Option<Decimal>,
    pub items_added: u64,
    pub items_saved_for_later: u64,
}

/// The five unrounded component scores, each in [0, 100].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ComponentScores {
    pub abandonment: Decimal,
    pub value: Decimal,
    pub conversion: Decimal,
    pub hesitation: Decimal,
    pub price_sensitivity: Decimal,
}

/// Components plus their weighted composite, all unrounded. Rounding
/// happens only where a score is persisted or displayed.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub components: ComponentScores,
    pub composite: Decimal,
}

/// Score calculator for user engagement behavior.
#[derive(Clone, Copy, Debug, Default)]
pub struct ScoreCalculator {
    weights: ScoringWeights,
}

impl ScoreCalculator {
    pub fn new() -> Self {
        Self { weights: ScoringWeights::default() }
    }

    pub fn with_weights(weights: ScoringWeights) -> Self {
        Self { weights }
    }

    pub fn weights(&self) -> ScoringWeights {
        self.weights
    }

    /// Compute all five components and the weighted composite.
    pub fn score(&self, activity: &UserActivity) -> ScoreBreakdown {
        let components = self.component_scores(activity);
        let composite = self.composite(&components);
        ScoreBreakdown { components, composite }
    }

    pub fn component_scores(&self, activity: &UserActivity) -> ComponentScores {
        ComponentScores {
            abandonment: abandonment_score(activity.carts_with_items, activity.abandoned_carts),
            value: value_score(activity.avg_abandoned_value),
            conversion: conversion_score(activity.recovered_carts, activity.abandoned_carts),
            hesitation: hesitation_score(
                activity.avg_hours_to_abandon,
                activity.items_saved_for_later,
                activity.items_added,
            ),
            price_sensitivity: price_sensitivity_score(activity.avg_abandoned_value),
        }
    }

    /// Weighted sum of the components, clamped to [0, 100].
    pub fn composite(&self, components: &ComponentScores) -> Decimal {
        let hundred = Decimal::from(100u32);
        let weighted = components.abandonment * Decimal::from(self.weights.abandonment)
            + components.value * Decimal::from(self.weights.value)
            + components.conversion * Decimal::from(self.weights.conversion)
            + components.hesitation * Decimal::from(self.weights.hesitation)
            + components.price_sensitivity * Decimal::from(self.weights.price_sensitivity);
        clamp_score(weighted / hundred)
    }
}

fn clamp_score(score: Decimal) -> Decimal {
    score.clamp(Decimal::ZERO, Decimal::from(100u32))
}

fn neutral() -> Decimal {
    Decimal::from(NEUTRAL_SCORE)
}

/// How rarely the user abandons carts. A user can carry more abandonment
/// records than carts-with-items (an episode may reference a cart
/// recreated or emptied since), so the ratio can exceed 1.0 and the
/// clamp is load-bearing, not defensive.
fn abandonment_score(carts_with_items: u64, abandoned_carts: u64) -> Decimal {
    if carts_with_items == 0 {
        return neutral();
    }
    if abandoned_carts == 0 {
        return Decimal::from(100u32);
    }

    let ratio = Decimal::from(abandoned_carts) / Decimal::from(carts_with_items);
    clamp_score(Decimal::from(100u32) - ratio * Decimal::from(100u32))
}

/// Average abandoned-cart value, interpolated between the low benchmark
/// (floor score 20) and the high benchmark (cap score 100), both edges
/// inclusive.
fn value_score(avg_abandoned_value: Option<Decimal>) -> Decimal {
    let Some(avg) = avg_abandoned_value else {
        return neutral();
    };

    let low = Decimal::from(VALUE_LOW_BENCHMARK);
    let high = Decimal::from(VALUE_HIGH_BENCHMARK);
    let floor = Decimal::from(VALUE_FLOOR_SCORE);
    let cap = Decimal::from(VALUE_CAP_SCORE);

    if avg <= low {
        return floor;
    }
    if avg >= high {
        return cap;
    }

    floor + (avg - low) / (high - low) * (cap - floor)
}

/// Share of abandonment episodes that later recovered to checkout.
fn conversion_score(recovered_carts: u64, abandoned_carts: u64) -> Decimal {
    if abandoned_carts == 0 {
        return neutral();
    }

    clamp_score(
        Decimal::from(recovered_carts) / Decimal::from(abandoned_carts) * Decimal::from(100u32),
    )
}

/// Purchase-indecision proxy: 70% time-to-abandon speed, 30% how little
/// the user parks items in saved-for-later.
fn hesitation_score(
    avg_hours_to_abandon: Option<Decimal>,
    items_saved_for_later: u64,
    items_added: u64,
) -> Decimal {
    let time = time_to_abandon_subscore(avg_hours_to_abandon);
    let save = save_ratio_subscore(items_saved_for_later, items_added);
    time * Decimal::new(7, 1) + save * Decimal::new(3, 1)
}

fn time_to_abandon_subscore(avg_hours_to_abandon: Option<Decimal>) -> Decimal {
    let Some(hours) = avg_hours_to_abandon else {
        return neutral();
    };

    let fast = Decimal::from(FAST_ABANDON_HOURS);
    let slow = Decimal::from(SLOW_ABANDON_HOURS);

    if hours <= fast {
        return Decimal::from(100u32);
    }
    if hours >= slow {
        return Decimal::from(20u32);
    }

    Decimal::from(100u32) - (hours - fast) / (slow - fast) * Decimal::from(80u32)
}

fn save_ratio_subscore(items_saved_for_later: u64, items_added: u64) -> Decimal {
    if items_added == 0 {
        return neutral();
    }

    let ratio = Decimal::from(items_saved_for_later) / Decimal::from(items_added);
    clamp_score(Decimal::from(100u32) - ratio * Decimal::from(100u32))
}

/// Single-benchmark scale: at or above the benchmark the user shops
/// high-value carts and scores the cap; below it, scaled from 50 toward
/// the cap in proportion to value/benchmark.
fn price_sensitivity_score(avg_abandoned_value: Option<Decimal>) -> Decimal {
    let Some(avg) = avg_abandoned_value else {
        return neutral();
    };

    let benchmark = Decimal::from(PRICE_SENSITIVITY_BENCHMARK);
    let cap = Decimal::from(PRICE_SENSITIVITY_CAP);

    if avg >= benchmark {
        return cap;
    }

    neutral() + avg / benchmark * (cap - neutral())
}
