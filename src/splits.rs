use std::collections::BTreeMap;

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::features::FeatureRow;

/// Maps an event date to a coarse evaluation period.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeriodKey {
    #[default]
    CalendarYear,
    /// Seasons that straddle the new year: dates before this month belong to
    /// the season that started the previous year.
    SeasonStartMonth(u32),
}

impl PeriodKey {
    pub fn period_of(&self, date: NaiveDate) -> i32 {
        match *self {
            PeriodKey::CalendarYear => date.year(),
            PeriodKey::SeasonStartMonth(month) => {
                if date.month() < month {
                    date.year() - 1
                } else {
                    date.year()
                }
            }
        }
    }

    pub fn label(&self, period: i32) -> String {
        match *self {
            PeriodKey::SeasonStartMonth(month) if month > 1 => {
                format!("{period}-{:02}", (period + 1).rem_euclid(100))
            }
            _ => period.to_string(),
        }
    }
}

/// Expanding-window split: train on every row of every earlier period, test on
/// one period. Row indices refer to the slice given to [`plan_splits`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Split {
    pub test_period: i32,
    pub train_periods: Vec<i32>,
    pub train_rows: Vec<usize>,
    pub test_rows: Vec<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SkippedPeriod {
    pub period: i32,
    pub prior_rows: usize,
    pub period_rows: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SplitPlan {
    pub splits: Vec<Split>,
    pub skipped: Vec<SkippedPeriod>,
}

/// Plans one split per period that has at least `min_train_size` rows in the
/// periods before it. Earlier periods are reported in `skipped`. The earliest
/// period is never a test period.
pub fn plan_splits(rows: &[FeatureRow], key: PeriodKey, min_train_size: usize) -> SplitPlan {
    let mut by_period: BTreeMap<i32, Vec<usize>> = BTreeMap::new();
    for (idx, row) in rows.iter().enumerate() {
        by_period.entry(key.period_of(row.event_date)).or_default().push(idx);
    }

    let required = min_train_size.max(1);
    let mut plan = SplitPlan::default();
    let mut train_rows: Vec<usize> = Vec::new();
    let mut train_periods: Vec<i32> = Vec::new();
    for (period, idxs) in by_period {
        if train_rows.len() >= required {
            plan.splits.push(Split {
                test_period: period,
                train_periods: train_periods.clone(),
                train_rows: train_rows.clone(),
                test_rows: idxs.clone(),
            });
        } else {
            warn!(
                period = %key.label(period),
                prior_rows = train_rows.len(),
                required,
                "not enough prior rows, period skipped as a test period"
            );
            plan.skipped.push(SkippedPeriod {
                period,
                prior_rows: train_rows.len(),
                period_rows: idxs.len(),
            });
        }
        train_rows.extend(idxs);
        train_periods.push(period);
    }

    info!(
        splits = plan.splits.len(),
        skipped = plan.skipped.len(),
        min_train_size,
        "planned walk-forward splits"
    );
    plan
}
