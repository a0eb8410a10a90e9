use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::connector::{EventSource, UnitFetch};
use crate::error::FetchError;
use crate::events::{CollectionUnit, PeriodScore, RawEvent};

/// Reads `{dir}/{unit_key}.json`. A missing file means the provider had no
/// games for that unit.
pub struct LocalDirSource {
    name: String,
    dir: PathBuf,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum LocalFile {
    Wrapped { events: Vec<LocalEvent> },
    Bare(Vec<LocalEvent>),
}

#[derive(Debug, Deserialize)]
struct LocalEvent {
    event_id: String,
    #[serde(default)]
    event_date: Option<String>,
    #[serde(default)]
    season: Option<String>,
    home_id: String,
    away_id: String,
    home_score: u32,
    away_score: u32,
    #[serde(default)]
    periods: Vec<PeriodScore>,
    #[serde(default)]
    home_odds: Option<f64>,
    #[serde(default)]
    away_odds: Option<f64>,
}

impl LocalDirSource {
    pub fn new(name: &str, dir: impl Into<PathBuf>) -> Self {
        Self {
            name: name.to_string(),
            dir: dir.into(),
        }
    }

    pub fn unit_path(&self, unit: &CollectionUnit) -> PathBuf {
        self.dir.join(format!("{}.json", unit.key()))
    }
}

impl EventSource for LocalDirSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn fetch_unit(&self, unit: &CollectionUnit) -> Result<UnitFetch, FetchError> {
        let path = self.unit_path(unit);
        let raw = match std::fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(UnitFetch::NoData),
            Err(err) => {
                return Err(FetchError::Transient(format!("read {}: {err}", path.display())));
            }
        };
        let events = parse_local_json(&raw, &self.name, unit, &path)?;
        if events.is_empty() {
            return Ok(UnitFetch::NoData);
        }
        Ok(UnitFetch::Events(events))
    }
}

fn parse_local_json(
    raw: &str,
    source: &str,
    unit: &CollectionUnit,
    path: &Path,
) -> Result<Vec<RawEvent>, FetchError> {
    let file: LocalFile = serde_json::from_str(raw)
        .map_err(|e| FetchError::Permanent(format!("parse {}: {e}", path.display())))?;
    let items = match file {
        LocalFile::Wrapped { events } => events,
        LocalFile::Bare(events) => events,
    };

    let mut out = Vec::with_capacity(items.len());
    for item in items {
        let event_date = match item.event_date.as_deref() {
            Some(raw) => crate::events::parse_date(raw).ok_or_else(|| {
                FetchError::Permanent(format!("{}: bad event_date {raw:?}", path.display()))
            })?,
            None => unit.date(),
        };
        if event_date != unit.date() {
            return Err(FetchError::Permanent(format!(
                "{}: event {} dated {event_date} outside unit {}",
                path.display(),
                item.event_id,
                unit
            )));
        }
        out.push(RawEvent {
            source: source.to_string(),
            event_id: item.event_id,
            unit_key: unit.key(),
            event_date,
            season: item.season,
            home_id: item.home_id,
            away_id: item.away_id,
            home_score: item.home_score,
            away_score: item.away_score,
            periods: item.periods,
            home_odds: item.home_odds,
            away_odds: item.away_odds,
        });
    }
    Ok(out)
}
