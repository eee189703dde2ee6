use rust_decimal::Decimal;
use serde::Serialize;

use cartwatch_core::scoring::tiers::ScoreBand;
use cartwatch_db::repositories::{
    AbandonmentRepository, AbandonmentTotals, ReminderOutboxRepository, ScoreRepository,
    SqlAbandonmentRepository, SqlReminderOutboxRepository, SqlScoreRepository,
};
use cartwatch_db::DbPool;

use crate::JobError;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct BandCounts {
    pub high_value: u64,
    pub medium_value: u64,
    pub low_value: u64,
    pub at_risk: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct ComponentAverages {
    pub abandonment: Decimal,
    pub value: Decimal,
    pub conversion: Decimal,
    pub hesitation: Decimal,
    pub composite: Decimal,
}

/// Read-only rollup for dashboards and the `summary` command. Values
/// are rounded to two places here, at the presentation boundary.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct ScoreSummary {
    pub scored_users: u64,
    pub bands: BandCounts,
    pub averages: Option<ComponentAverages>,
    pub abandonments: u64,
    pub recovered: u64,
    pub recovery_rate_pct: Option<Decimal>,
    pub reminders_sent: u64,
    pub reminders_queued: u64,
}

impl Default for ComponentAverages {
    fn default() -> Self {
        Self {
            abandonment: Decimal::ZERO,
            value: Decimal::ZERO,
            conversion: Decimal::ZERO,
            hesitation: Decimal::ZERO,
            composite: Decimal::ZERO,
        }
    }
}

/// Aggregates persisted scores and abandonment history. Tolerates rows
/// written by a concurrently running score job; the view is eventually
/// consistent.
pub async fn score_summary(pool: &DbPool) -> Result<ScoreSummary, JobError> {
    let scores = SqlScoreRepository::new(pool.clone()).all_scores().await?;
    let totals: AbandonmentTotals =
        SqlAbandonmentRepository::new(pool.clone()).totals().await?;
    let queued = SqlReminderOutboxRepository::new(pool.clone()).queued_count().await?;

    let mut summary = ScoreSummary {
        scored_users: scores.len() as u64,
        abandonments: totals.total,
        recovered: totals.recovered,
        reminders_sent: totals.reminders_sent,
        reminders_queued: queued,
        ..ScoreSummary::default()
    };

    if totals.total > 0 {
        let rate = Decimal::from(totals.recovered) / Decimal::from(totals.total)
            * Decimal::from(100u32);
        summary.recovery_rate_pct = Some(rate.round_dp(2));
    }

    if scores.is_empty() {
        return Ok(summary);
    }

    let mut sums = ComponentAverages::default();
    for score in &scores {
        match ScoreBand::for_composite(score.composite_score) {
            ScoreBand::HighValue => summary.bands.high_value += 1,
            ScoreBand::MediumValue => summary.bands.medium_value += 1,
            ScoreBand::LowValue => summary.bands.low_value += 1,
            ScoreBand::AtRisk => summary.bands.at_risk += 1,
        }

        sums.abandonment += score.abandonment_score;
        sums.value += score.value_score;
        sums.conversion += score.conversion_score;
        sums.hesitation += score.hesitation_score;
        sums.composite += score.composite_score;
    }

    let divisor = Decimal::from(scores.len() as u64);
    summary.averages = Some(ComponentAverages {
        abandonment: (sums.abandonment / divisor).round_dp(2),
        value: (sums.value / divisor).round_dp(2),
        conversion: (sums.conversion / divisor).round_dp(2),
        hesitation: (sums.hesitation / divisor).round_dp(2),
        composite: (sums.composite / divisor).round_dp(2),
    });

    Ok(summary)
}
