use std::collections::BTreeMap;

use reqwest::blocking::Client;
use serde_json::Value;

use super::{as_id_string, as_u32_any, unit_matches};
use crate::connector::{EventSource, UnitFetch};
use crate::error::FetchError;
use crate::events::{CollectionUnit, DATE_FMT, PeriodScore, RawEvent, parse_date};
use crate::http_client::get_json;

const NHL_SCORE_URL: &str = "https://api-web.nhle.com/v1/score";
const FINAL_STATES: &[&str] = &["OFF", "FINAL"];
// Regular season and playoffs; preseason and exhibitions are ignored.
const GAME_TYPES: &[u64] = &[2, 3];

pub struct NhlSource {
    name: String,
    client: &'static Client,
    base_url: String,
}

impl NhlSource {
    pub fn new(name: &str, client: &'static Client, base_url: Option<&str>) -> Self {
        Self {
            name: name.to_string(),
            client,
            base_url: base_url.unwrap_or(NHL_SCORE_URL).trim_end_matches('/').to_string(),
        }
    }
}

impl EventSource for NhlSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn fetch_unit(&self, unit: &CollectionUnit) -> Result<UnitFetch, FetchError> {
        let url = format!("{}/{}", self.base_url, unit.date().format(DATE_FMT));
        let value = get_json(self.client, &url)?;
        let events = parse_score_json(&value, &self.name, unit)?;
        if events.is_empty() {
            return Ok(UnitFetch::NoData);
        }
        Ok(UnitFetch::Events(events))
    }
}

/// Completed games for `unit` from a daily score payload.
pub fn parse_score_json(
    value: &Value,
    source: &str,
    unit: &CollectionUnit,
) -> Result<Vec<RawEvent>, FetchError> {
    let games = value
        .get("games")
        .and_then(|g| g.as_array())
        .ok_or_else(|| FetchError::Permanent("score payload has no games array".to_string()))?;

    let mut out = Vec::new();
    for game in games {
        let state = game.get("gameState").and_then(|s| s.as_str()).unwrap_or("");
        if !FINAL_STATES.contains(&state) {
            continue;
        }
        let game_type = game.get("gameType").and_then(|t| t.as_u64()).unwrap_or(2);
        if !GAME_TYPES.contains(&game_type) {
            continue;
        }
        let Some(event_date) = game.get("gameDate").and_then(|d| d.as_str()).and_then(parse_date)
        else {
            return Err(FetchError::Permanent("final game without gameDate".to_string()));
        };
        if event_date != unit.date() {
            continue;
        }

        let event_id = game
            .get("id")
            .and_then(as_id_string)
            .ok_or_else(|| FetchError::Permanent("final game without id".to_string()))?;
        let (home_id, home_score) = team_line(game.get("homeTeam"))
            .ok_or_else(|| FetchError::Permanent(format!("game {event_id}: bad homeTeam")))?;
        let (away_id, away_score) = team_line(game.get("awayTeam"))
            .ok_or_else(|| FetchError::Permanent(format!("game {event_id}: bad awayTeam")))?;
        if !unit_matches(unit, &home_id, &away_id) {
            continue;
        }

        out.push(RawEvent {
            source: source.to_string(),
            event_id,
            unit_key: unit.key(),
            event_date,
            season: game.get("season").and_then(as_id_string),
            home_id,
            away_id,
            home_score,
            away_score,
            periods: period_breakdown(game.get("goals")),
            home_odds: None,
            away_odds: None,
        });
    }
    Ok(out)
}

fn team_line(team: Option<&Value>) -> Option<(String, u32)> {
    let team = team?;
    let id = team
        .get("abbrev")
        .and_then(as_id_string)
        .or_else(|| team.get("id").and_then(as_id_string))?;
    let score = as_u32_any(team.get("score")?)?;
    Some((id, score))
}

/// Goals carry the running score, so each period's tally is the last running
/// score seen in that period minus the last one seen before it.
fn period_breakdown(goals: Option<&Value>) -> Vec<PeriodScore> {
    let Some(goals) = goals.and_then(|g| g.as_array()) else {
        return Vec::new();
    };
    let mut running: BTreeMap<u32, (u32, u32)> = BTreeMap::new();
    for goal in goals {
        let period = goal
            .get("period")
            .and_then(as_u32_any)
            .or_else(|| {
                goal.get("periodDescriptor")
                    .and_then(|p| p.get("number"))
                    .and_then(as_u32_any)
            });
        let home = goal.get("homeScore").and_then(as_u32_any);
        let away = goal.get("awayScore").and_then(as_u32_any);
        let (Some(period), Some(home), Some(away)) = (period, home, away) else {
            continue;
        };
        let entry = running.entry(period).or_insert((home, away));
        *entry = ((*entry).0.max(home), (*entry).1.max(away));
    }

    let mut out = Vec::with_capacity(running.len());
    let mut prev = (0u32, 0u32);
    for (period, (home, away)) in running {
        out.push(PeriodScore {
            period,
            home: home.saturating_sub(prev.0),
            away: away.saturating_sub(prev.1),
        });
        prev = (home.max(prev.0), away.max(prev.1));
    }
    out
}
