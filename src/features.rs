use std::collections::HashMap;

use chrono::NaiveDate;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::FeatureConfig;
use crate::events::RawEvent;
use crate::ledger::{EntityLedgerRow, build_ledger, entity_groups};

pub const SIDE_FEATURE_NAMES: [&str; 4] = ["avg_points_for", "avg_points_against", "win_rate", "rest_days"];

/// Rolling aggregates for one side, computed from games strictly before the
/// event date.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SideFeatures {
    pub avg_points_for: f64,
    pub avg_points_against: f64,
    pub win_rate: f64,
    pub rest_days: f64,
}

impl SideFeatures {
    pub fn values(&self) -> [f64; 4] {
        [
            self.avg_points_for,
            self.avg_points_against,
            self.win_rate,
            self.rest_days,
        ]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Labels {
    /// 1.0 when side one won; draws are 0.0.
    pub home_win: f64,
    pub point_diff: f64,
    pub total_points: f64,
}

/// One event with both sides' features. `home_*` is side one: the real home
/// team unless `swapped` is set by seeded side assignment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureRow {
    pub event_id: String,
    pub event_date: NaiveDate,
    pub season: Option<String>,
    pub home_id: String,
    pub away_id: String,
    pub swapped: bool,
    pub home: SideFeatures,
    pub away: SideFeatures,
    pub labels: Labels,
    pub home_odds: Option<f64>,
    pub away_odds: Option<f64>,
}

impl FeatureRow {
    pub fn feature_vector(&self) -> Vec<f64> {
        let mut out = Vec::with_capacity(SIDE_FEATURE_NAMES.len() * 2);
        out.extend(self.home.values());
        out.extend(self.away.values());
        out
    }

    pub fn has_odds(&self) -> bool {
        self.home_odds.is_some() && self.away_odds.is_some()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SideAssignment {
    /// Side one is always the listed home team.
    #[default]
    HomeAway,
    /// Neutral-site sports: side one is chosen per event from the seed and the
    /// event id, so re-runs produce the same orientation.
    Seeded { seed: u64 },
}

impl SideAssignment {
    pub fn home_is_side_one(&self, event_id: &str) -> bool {
        match self {
            SideAssignment::HomeAway => true,
            SideAssignment::Seeded { seed } => {
                let mut rng = StdRng::seed_from_u64(seed ^ fnv1a(event_id));
                rng.gen_bool(0.5)
            }
        }
    }
}

fn fnv1a(raw: &str) -> u64 {
    let mut hash = 0xcbf2_9ce4_8422_2325u64;
    for byte in raw.as_bytes() {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

/// Why an event produced no feature row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GapReason {
    /// A side has fewer than `window` games before the event date.
    InsufficientHistory,
    /// No ledger row matched (date, entity, event id). Signals a bug upstream.
    JoinMiss,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FeatureBuildReport {
    pub events: usize,
    pub ledger_rows: usize,
    pub rows: usize,
    pub dropped_missing_history: usize,
    pub dropped_join_miss: usize,
}

#[derive(Debug, Clone, Default)]
pub struct FeatureBuild {
    pub rows: Vec<FeatureRow>,
    pub report: FeatureBuildReport,
}

pub fn build_features(events: &[RawEvent], cfg: &FeatureConfig) -> FeatureBuild {
    let ledger = build_ledger(events);
    build_from_ledger(events, &ledger, cfg)
}

/// Joins rolling features onto events. `ledger` must come from
/// [`build_ledger`]; its order is relied on and never rechecked.
pub fn build_from_ledger(
    events: &[RawEvent],
    ledger: &[EntityLedgerRow],
    cfg: &FeatureConfig,
) -> FeatureBuild {
    let window = cfg.window.max(1);
    let rolling = rolling_features(ledger, window);

    let mut lookup: HashMap<(NaiveDate, &str, &str), Option<SideFeatures>> =
        HashMap::with_capacity(ledger.len());
    for (row, feats) in ledger.iter().zip(&rolling) {
        lookup.insert(
            (row.event_date, row.entity_id.as_str(), row.event_id.as_str()),
            *feats,
        );
    }
    let side = |ev: &RawEvent, entity: &str| -> Result<SideFeatures, GapReason> {
        match lookup.get(&(ev.event_date, entity, ev.event_id.as_str())) {
            None => Err(GapReason::JoinMiss),
            Some(None) => Err(GapReason::InsufficientHistory),
            Some(Some(f)) => Ok(*f),
        }
    };

    let mut report = FeatureBuildReport {
        events: events.len(),
        ledger_rows: ledger.len(),
        ..FeatureBuildReport::default()
    };
    let mut rows = Vec::with_capacity(events.len());
    for ev in events {
        let (home, away) = match (side(ev, &ev.home_id), side(ev, &ev.away_id)) {
            (Ok(h), Ok(a)) => (h, a),
            (Err(GapReason::JoinMiss), _) | (_, Err(GapReason::JoinMiss)) => {
                report.dropped_join_miss += 1;
                warn!(event = %ev.event_id, date = %ev.event_date, "no ledger row for event side");
                continue;
            }
            _ => {
                report.dropped_missing_history += 1;
                continue;
            }
        };
        rows.push(orient(ev, home, away, &cfg.side_assignment));
    }
    rows.sort_by(|a, b| {
        a.event_date
            .cmp(&b.event_date)
            .then_with(|| a.event_id.cmp(&b.event_id))
    });
    report.rows = rows.len();

    info!(
        events = report.events,
        rows = report.rows,
        window,
        dropped_missing_history = report.dropped_missing_history,
        dropped_join_miss = report.dropped_join_miss,
        "built feature rows"
    );
    FeatureBuild { rows, report }
}

fn orient(ev: &RawEvent, home: SideFeatures, away: SideFeatures, sides: &SideAssignment) -> FeatureRow {
    let total_points = ev.total_points();
    if sides.home_is_side_one(&ev.event_id) {
        FeatureRow {
            event_id: ev.event_id.clone(),
            event_date: ev.event_date,
            season: ev.season.clone(),
            home_id: ev.home_id.clone(),
            away_id: ev.away_id.clone(),
            swapped: false,
            home,
            away,
            labels: Labels {
                home_win: if ev.home_won() { 1.0 } else { 0.0 },
                point_diff: ev.point_diff(),
                total_points,
            },
            home_odds: ev.home_odds,
            away_odds: ev.away_odds,
        }
    } else {
        FeatureRow {
            event_id: ev.event_id.clone(),
            event_date: ev.event_date,
            season: ev.season.clone(),
            home_id: ev.away_id.clone(),
            away_id: ev.home_id.clone(),
            swapped: true,
            home: away,
            away: home,
            labels: Labels {
                home_win: if ev.away_won() { 1.0 } else { 0.0 },
                point_diff: -ev.point_diff(),
                total_points,
            },
            home_odds: ev.away_odds,
            away_odds: ev.home_odds,
        }
    }
}

/// Per-row rolling features aligned with `ledger`. Entities are processed in
/// parallel; output order matches input order.
pub fn rolling_features(ledger: &[EntityLedgerRow], window: usize) -> Vec<Option<SideFeatures>> {
    entity_groups(ledger)
        .par_iter()
        .map(|group| rolling_for_entity(group, window))
        .collect::<Vec<_>>()
        .into_iter()
        .flatten()
        .collect()
}

/// Shift then window: each row sees the `window` games before its date. Games
/// on the same date as the row are excluded, so a doubleheader's second game
/// does not see the first.
fn rolling_for_entity(rows: &[EntityLedgerRow], window: usize) -> Vec<Option<SideFeatures>> {
    let mut out = Vec::with_capacity(rows.len());
    let mut day_start = 0usize;
    for (idx, row) in rows.iter().enumerate() {
        if idx > 0 && rows[idx - 1].event_date != row.event_date {
            day_start = idx;
        }
        if day_start < window {
            out.push(None);
            continue;
        }
        let prior = &rows[day_start - window..day_start];
        let n = prior.len() as f64;
        let points_for: f64 = prior.iter().map(|r| r.points_for as f64).sum();
        let points_against: f64 = prior.iter().map(|r| r.points_against as f64).sum();
        let wins: f64 = prior.iter().map(EntityLedgerRow::win_flag).sum();
        let last = &rows[day_start - 1];
        out.push(Some(SideFeatures {
            avg_points_for: points_for / n,
            avg_points_against: points_against / n,
            win_rate: wins / n,
            rest_days: (row.event_date - last.event_date).num_days() as f64,
        }));
    }
    out
}
