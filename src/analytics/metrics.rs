//! Percentage and ranking helpers

use chrono::{DateTime, Datelike, TimeZone, Utc};
use rust_decimal::{Decimal, RoundingStrategy};

use crate::error::{AppError, AppResult};
use crate::store::{EntityTotal, MonthlyTotal};

const HUNDRED: Decimal = Decimal::ONE_HUNDRED;

/// Round to two places, halves away from zero
pub fn round_percentage(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// `(current - previous) / previous * 100`; 0 when there is no previous
/// period to compare against
pub fn growth_percentage(current: Decimal, previous: Decimal) -> Decimal {
    if previous <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    round_percentage((current - previous) / previous * HUNDRED)
}

/// Share of the goal collected, capped at 100. A non-positive goal is 0.
pub fn completion_percentage(collected: Decimal, goal: Decimal) -> Decimal {
    if goal <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    round_percentage(collected / goal * HUNDRED).min(HUNDRED)
}

/// Order by total descending, then id ascending
pub fn rank_totals(mut totals: Vec<EntityTotal>) -> Vec<EntityTotal> {
    totals.sort_by(|a, b| b.total.cmp(&a.total).then_with(|| a.id.cmp(&b.id)));
    totals
}

/// Chronological order
pub fn sort_months(mut months: Vec<MonthlyTotal>) -> Vec<MonthlyTotal> {
    months.sort_by_key(|m| (m.year, m.month));
    months
}

/// Midnight UTC on the first day of `now`'s month and of the month before
pub fn month_bounds(now: DateTime<Utc>) -> AppResult<(DateTime<Utc>, DateTime<Utc>)> {
    let (year, month) = (now.year(), now.month());
    let (prev_year, prev_month) = if month == 1 {
        (year - 1, 12)
    } else {
        (year, month - 1)
    };

    Ok((month_start(prev_year, prev_month)?, month_start(year, month)?))
}

fn month_start(year: i32, month: u32) -> AppResult<DateTime<Utc>> {
    Utc.with_ymd_and_hms(year, month, 1, 0, 0, 0)
        .single()
        .ok_or_else(|| AppError::Internal(format!("Invalid month {}-{}", year, month)))
}
