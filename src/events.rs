use std::cmp::Ordering;
use std::fmt;

use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};

pub const DATE_FMT: &str = "%Y-%m-%d";
const ENTITY_SEP: char = '#';

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeriodScore {
    pub period: u32,
    pub home: u32,
    pub away: u32,
}

/// One completed game as reported by a provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawEvent {
    pub source: String,
    pub event_id: String,
    pub unit_key: String,
    pub event_date: NaiveDate,
    pub season: Option<String>,
    pub home_id: String,
    pub away_id: String,
    pub home_score: u32,
    pub away_score: u32,
    #[serde(default)]
    pub periods: Vec<PeriodScore>,
    #[serde(default)]
    pub home_odds: Option<f64>,
    #[serde(default)]
    pub away_odds: Option<f64>,
}

impl RawEvent {
    /// Rejects events that can never form a valid two-sided record.
    pub fn validate(&self) -> Result<(), String> {
        if self.event_id.trim().is_empty() {
            return Err("empty event id".to_string());
        }
        if self.home_id.trim().is_empty() || self.away_id.trim().is_empty() {
            return Err(format!("event {}: missing participant id", self.event_id));
        }
        if self.home_id == self.away_id {
            return Err(format!(
                "event {}: home and away are both {}",
                self.event_id, self.home_id
            ));
        }
        for odds in [self.home_odds, self.away_odds].into_iter().flatten() {
            if !odds.is_finite() || odds <= 1.0 {
                return Err(format!(
                    "event {}: decimal odds must be > 1.0, got {odds}",
                    self.event_id
                ));
            }
        }
        Ok(())
    }

    pub fn home_won(&self) -> bool {
        self.home_score > self.away_score
    }

    pub fn away_won(&self) -> bool {
        self.away_score > self.home_score
    }

    pub fn point_diff(&self) -> f64 {
        self.home_score as f64 - self.away_score as f64
    }

    pub fn total_points(&self) -> f64 {
        (self.home_score + self.away_score) as f64
    }
}

/// The granularity at which collection progress is checkpointed.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CollectionUnit {
    Date(NaiveDate),
    DateEntity(NaiveDate, String),
}

impl CollectionUnit {
    pub fn date(&self) -> NaiveDate {
        match self {
            CollectionUnit::Date(d) | CollectionUnit::DateEntity(d, _) => *d,
        }
    }

    pub fn entity(&self) -> Option<&str> {
        match self {
            CollectionUnit::Date(_) => None,
            CollectionUnit::DateEntity(_, entity) => Some(entity.as_str()),
        }
    }

    /// Persisted identity of the unit, e.g. `2024-01-05` or `2024-01-05#BOS`.
    pub fn key(&self) -> String {
        match self {
            CollectionUnit::Date(d) => d.format(DATE_FMT).to_string(),
            CollectionUnit::DateEntity(d, entity) => {
                format!("{}{ENTITY_SEP}{entity}", d.format(DATE_FMT))
            }
        }
    }

    pub fn parse_key(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        match raw.split_once(ENTITY_SEP) {
            Some((date, entity)) => {
                let date = NaiveDate::parse_from_str(date, DATE_FMT).ok()?;
                if entity.is_empty() {
                    return None;
                }
                Some(CollectionUnit::DateEntity(date, entity.to_string()))
            }
            None => NaiveDate::parse_from_str(raw, DATE_FMT)
                .ok()
                .map(CollectionUnit::Date),
        }
    }
}

impl Ord for CollectionUnit {
    fn cmp(&self, other: &Self) -> Ordering {
        self.date()
            .cmp(&other.date())
            .then_with(|| self.entity().cmp(&other.entity()))
    }
}

impl PartialOrd for CollectionUnit {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for CollectionUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}

/// Inclusive calendar date range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, String> {
        if end < start {
            return Err(format!("range end {end} is before start {start}"));
        }
        Ok(Self { start, end })
    }

    pub fn days(&self) -> impl Iterator<Item = NaiveDate> + '_ {
        let span = (self.end - self.start).num_days();
        (0..=span).map(move |offset| self.start + Duration::days(offset))
    }

    pub fn date_units(&self) -> Vec<CollectionUnit> {
        self.days().map(CollectionUnit::Date).collect()
    }

    pub fn entity_units(&self, entities: &[String]) -> Vec<CollectionUnit> {
        let mut out = Vec::new();
        for day in self.days() {
            for entity in entities {
                out.push(CollectionUnit::DateEntity(day, entity.clone()));
            }
        }
        out
    }
}

pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let trimmed = raw.trim();
    let head = trimmed.get(..10).unwrap_or(trimmed);
    NaiveDate::parse_from_str(head, DATE_FMT).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn unit_keys_round_trip() {
        let date = CollectionUnit::Date(d(2024, 1, 5));
        let pair = CollectionUnit::DateEntity(d(2024, 1, 5), "BOS".to_string());
        assert_eq!(date.key(), "2024-01-05");
        assert_eq!(pair.key(), "2024-01-05#BOS");
        assert_eq!(CollectionUnit::parse_key("2024-01-05"), Some(date));
        assert_eq!(CollectionUnit::parse_key("2024-01-05#BOS"), Some(pair));
        assert_eq!(CollectionUnit::parse_key("2024-01-05#"), None);
        assert_eq!(CollectionUnit::parse_key("yesterday"), None);
    }

    #[test]
    fn units_order_by_date_then_entity() {
        let mut units = vec![
            CollectionUnit::DateEntity(d(2024, 1, 2), "B".to_string()),
            CollectionUnit::DateEntity(d(2024, 1, 1), "Z".to_string()),
            CollectionUnit::DateEntity(d(2024, 1, 2), "A".to_string()),
        ];
        units.sort();
        let keys: Vec<String> = units.iter().map(|u| u.key()).collect();
        assert_eq!(keys, vec!["2024-01-01#Z", "2024-01-02#A", "2024-01-02#B"]);
    }

    #[test]
    fn range_is_inclusive() {
        let range = DateRange::new(d(2024, 2, 27), d(2024, 3, 1)).unwrap();
        assert_eq!(range.date_units().len(), 4);
        assert!(DateRange::new(d(2024, 3, 2), d(2024, 3, 1)).is_err());
    }

    #[test]
    fn validate_rejects_self_play_and_bad_odds() {
        let mut ev = RawEvent {
            source: "t".to_string(),
            event_id: "1".to_string(),
            unit_key: "2024-01-01".to_string(),
            event_date: d(2024, 1, 1),
            season: None,
            home_id: "A".to_string(),
            away_id: "A".to_string(),
            home_score: 1,
            away_score: 0,
            periods: Vec::new(),
            home_odds: None,
            away_odds: None,
        };
        assert!(ev.validate().is_err());
        ev.away_id = "B".to_string();
        assert!(ev.validate().is_ok());
        ev.home_odds = Some(0.9);
        assert!(ev.validate().is_err());
    }

    #[test]
    fn parse_date_accepts_timestamps() {
        assert_eq!(parse_date("2023-10-10T23:00:00Z"), Some(d(2023, 10, 10)));
        assert_eq!(parse_date(" 2023-10-10 "), Some(d(2023, 10, 10)));
        assert_eq!(parse_date("10/10/2023"), None);
    }
}
