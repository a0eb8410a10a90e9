use std::fmt;
use std::str::FromStr;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::BacktestConfig;
use crate::estimators::{Estimator, LogisticRegression, RidgeRegression};
use crate::features::FeatureRow;
use crate::metrics::{evaluate_binary, evaluate_regression};
use crate::splits::{Split, SplitPlan};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Target {
    HomeWin,
    PointDiff,
    TotalPoints,
}

impl Target {
    pub const ALL: [Target; 3] = [Target::HomeWin, Target::PointDiff, Target::TotalPoints];

    pub fn as_str(&self) -> &'static str {
        match self {
            Target::HomeWin => "home_win",
            Target::PointDiff => "point_diff",
            Target::TotalPoints => "total_points",
        }
    }

    pub fn is_classification(&self) -> bool {
        matches!(self, Target::HomeWin)
    }

    pub fn label(&self, row: &FeatureRow) -> f64 {
        match self {
            Target::HomeWin => row.labels.home_win,
            Target::PointDiff => row.labels.point_diff,
            Target::TotalPoints => row.labels.total_points,
        }
    }

    /// The side a prediction backs, or `None` when the target has no side.
    fn bet_on_home(&self, prediction: f64) -> Option<bool> {
        match self {
            Target::HomeWin => Some(prediction >= 0.5),
            Target::PointDiff if prediction > 0.0 => Some(true),
            Target::PointDiff if prediction < 0.0 => Some(false),
            Target::PointDiff | Target::TotalPoints => None,
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Target {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "home_win" | "win" => Ok(Target::HomeWin),
            "point_diff" | "spread" => Ok(Target::PointDiff),
            "total_points" | "total" => Ok(Target::TotalPoints),
            other => Err(format!("unknown target {other:?}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Validity {
    Valid,
    Invalid { reason: String },
}

/// Evaluation of one split for one target.
#[derive(Debug, Clone, PartialEq)]
pub struct PeriodMetric {
    pub period: i32,
    pub period_label: String,
    pub target: Target,
    pub train_rows: usize,
    pub test_rows: usize,
    pub validity: Validity,
    pub accuracy: Option<f64>,
    pub log_loss: Option<f64>,
    pub brier: Option<f64>,
    pub mae: Option<f64>,
    pub rmse: Option<f64>,
    pub bets: usize,
    pub staked: f64,
    pub profit: f64,
    pub roi: Option<f64>,
}

impl PeriodMetric {
    pub fn is_valid(&self) -> bool {
        self.validity == Validity::Valid
    }

    pub fn invalid_reason(&self) -> Option<&str> {
        match &self.validity {
            Validity::Valid => None,
            Validity::Invalid { reason } => Some(reason),
        }
    }

    /// Named metric values present on this record, in a fixed order.
    pub fn metric_values(&self) -> Vec<(&'static str, f64)> {
        let mut out = Vec::new();
        let named = [
            ("accuracy", self.accuracy),
            ("log_loss", self.log_loss),
            ("brier", self.brier),
            ("mae", self.mae),
            ("rmse", self.rmse),
            ("roi", self.roi),
        ];
        for (name, value) in named {
            if let Some(v) = value {
                out.push((name, v));
            }
        }
        if self.bets > 0 {
            out.push(("bets", self.bets as f64));
            out.push(("profit", self.profit));
        }
        out
    }

    fn empty(split: &Split, label: String, target: Target, validity: Validity) -> Self {
        Self {
            period: split.test_period,
            period_label: label,
            target,
            train_rows: split.train_rows.len(),
            test_rows: split.test_rows.len(),
            validity,
            accuracy: None,
            log_loss: None,
            brier: None,
            mae: None,
            rmse: None,
            bets: 0,
            staked: 0.0,
            profit: 0.0,
            roi: None,
        }
    }
}

/// The reference estimator for a target.
pub fn default_estimator(target: Target, cfg: &BacktestConfig) -> Box<dyn Estimator> {
    if target.is_classification() {
        Box::new(LogisticRegression {
            l2: cfg.l2,
            learning_rate: cfg.learning_rate,
            epochs: cfg.epochs,
        })
    } else {
        Box::new(RidgeRegression { l2: cfg.l2 })
    }
}

/// Fits a fresh model per split on train rows only and scores the test rows.
/// Splits run in parallel; output follows `plan.splits` order. A fit failure
/// marks that split invalid and never aborts the others.
pub fn run_backtest(
    rows: &[FeatureRow],
    plan: &SplitPlan,
    target: Target,
    estimator: &dyn Estimator,
    cfg: &BacktestConfig,
) -> Vec<PeriodMetric> {
    plan.splits
        .par_iter()
        .map(|split| evaluate_split(rows, split, target, estimator, cfg))
        .collect()
}

/// Runs every configured target with its reference estimator.
pub fn run_all_targets(rows: &[FeatureRow], plan: &SplitPlan, cfg: &BacktestConfig) -> Vec<PeriodMetric> {
    let mut out = Vec::new();
    for target in &cfg.targets {
        let estimator = default_estimator(*target, cfg);
        out.extend(run_backtest(rows, plan, *target, estimator.as_ref(), cfg));
    }
    out
}

fn evaluate_split(
    rows: &[FeatureRow],
    split: &Split,
    target: Target,
    estimator: &dyn Estimator,
    cfg: &BacktestConfig,
) -> PeriodMetric {
    let label = cfg.period_key.label(split.test_period);
    let train_x: Vec<Vec<f64>> = split.train_rows.iter().map(|&i| rows[i].feature_vector()).collect();
    let train_y: Vec<f64> = split.train_rows.iter().map(|&i| target.label(&rows[i])).collect();

    let model = match estimator.fit(&train_x, &train_y) {
        Ok(model) => model,
        Err(err) => {
            warn!(period = %label, target = %target, error = %err, "model fit failed, split marked invalid");
            return PeriodMetric::empty(
                split,
                label,
                target,
                Validity::Invalid {
                    reason: err.to_string(),
                },
            );
        }
    };

    let test: Vec<&FeatureRow> = split.test_rows.iter().map(|&i| &rows[i]).collect();
    let test_x: Vec<Vec<f64>> = test.iter().map(|r| r.feature_vector()).collect();
    let test_y: Vec<f64> = test.iter().map(|r| target.label(r)).collect();
    let preds = model.predict(&test_x);
    if preds.len() != test.len() || preds.iter().any(|p| !p.is_finite()) {
        return PeriodMetric::empty(
            split,
            label,
            target,
            Validity::Invalid {
                reason: "model produced non-finite or missing predictions".to_string(),
            },
        );
    }

    let mut metric = PeriodMetric::empty(split, label, target, Validity::Valid);
    if target.is_classification() {
        let m = evaluate_binary(&preds, &test_y);
        metric.accuracy = Some(m.accuracy);
        metric.log_loss = Some(m.log_loss);
        metric.brier = Some(m.brier);
    } else {
        let m = evaluate_regression(&preds, &test_y);
        metric.mae = Some(m.mae);
        metric.rmse = Some(m.rmse);
    }

    for (row, pred) in test.iter().zip(&preds) {
        let Some(home) = target.bet_on_home(*pred) else {
            continue;
        };
        let Some(pnl) = settle_wager(row, home, cfg.stake) else {
            continue;
        };
        metric.bets += 1;
        metric.staked += cfg.stake;
        metric.profit += pnl;
    }
    if metric.staked > 0.0 {
        metric.roi = Some(metric.profit / metric.staked);
    }

    debug!(
        period = %metric.period_label,
        target = %target,
        train = metric.train_rows,
        test = metric.test_rows,
        bets = metric.bets,
        "evaluated split"
    );
    metric
}

/// Profit of a fixed-stake bet at decimal odds. Draws lose. `None` when the
/// backed side has no price.
pub fn settle_wager(row: &FeatureRow, on_home: bool, stake: f64) -> Option<f64> {
    let odds = if on_home { row.home_odds } else { row.away_odds }?;
    let won = if on_home {
        row.labels.point_diff > 0.0
    } else {
        row.labels.point_diff < 0.0
    };
    Some(if won { stake * (odds - 1.0) } else { -stake })
}
