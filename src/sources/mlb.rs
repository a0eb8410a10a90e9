use reqwest::blocking::Client;
use serde_json::Value;

use super::{as_id_string, as_u32_any, unit_matches};
use crate::connector::{EventSource, UnitFetch};
use crate::error::FetchError;
use crate::events::{CollectionUnit, DATE_FMT, PeriodScore, RawEvent, parse_date};
use crate::http_client::get_json;

const MLB_SCHEDULE_URL: &str = "https://statsapi.mlb.com/api/v1/schedule";
const GAME_TYPES: &[&str] = &["R", "F", "D", "L", "W"];

pub struct MlbSource {
    name: String,
    client: &'static Client,
    base_url: String,
}

impl MlbSource {
    pub fn new(name: &str, client: &'static Client, base_url: Option<&str>) -> Self {
        Self {
            name: name.to_string(),
            client,
            base_url: base_url.unwrap_or(MLB_SCHEDULE_URL).to_string(),
        }
    }
}

impl EventSource for MlbSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn fetch_unit(&self, unit: &CollectionUnit) -> Result<UnitFetch, FetchError> {
        let mut url = format!(
            "{}?sportId=1&date={}&hydrate=linescore",
            self.base_url,
            unit.date().format(DATE_FMT)
        );
        if let Some(team) = unit.entity() {
            url.push_str("&teamId=");
            url.push_str(team);
        }
        let value = get_json(self.client, &url)?;
        let events = parse_schedule_json(&value, &self.name, unit)?;
        if events.is_empty() {
            return Ok(UnitFetch::NoData);
        }
        Ok(UnitFetch::Events(events))
    }
}

/// Final games for `unit` from a schedule payload. Each game of a doubleheader
/// keeps its own `gamePk`, so both survive as distinct events.
pub fn parse_schedule_json(
    value: &Value,
    source: &str,
    unit: &CollectionUnit,
) -> Result<Vec<RawEvent>, FetchError> {
    let dates = value
        .get("dates")
        .and_then(|d| d.as_array())
        .ok_or_else(|| FetchError::Permanent("schedule payload has no dates array".to_string()))?;

    let mut out = Vec::new();
    for day in dates {
        let Some(games) = day.get("games").and_then(|g| g.as_array()) else {
            continue;
        };
        for game in games {
            if let Some(ev) = parse_game(game, source, unit)? {
                out.push(ev);
            }
        }
    }
    Ok(out)
}

fn parse_game(game: &Value, source: &str, unit: &CollectionUnit) -> Result<Option<RawEvent>, FetchError> {
    let status = game.get("status");
    let abstract_state = status
        .and_then(|s| s.get("abstractGameState"))
        .and_then(|s| s.as_str())
        .unwrap_or("");
    let detailed = status
        .and_then(|s| s.get("detailedState"))
        .and_then(|s| s.as_str())
        .unwrap_or("");
    if abstract_state != "Final" || detailed.starts_with("Postponed") || detailed.starts_with("Cancelled") {
        return Ok(None);
    }
    let game_type = game.get("gameType").and_then(|t| t.as_str()).unwrap_or("R");
    if !GAME_TYPES.contains(&game_type) {
        return Ok(None);
    }

    let event_id = game
        .get("gamePk")
        .and_then(as_id_string)
        .ok_or_else(|| FetchError::Permanent("final game without gamePk".to_string()))?;
    let event_date = game
        .get("officialDate")
        .and_then(|d| d.as_str())
        .and_then(parse_date)
        .ok_or_else(|| FetchError::Permanent(format!("game {event_id}: no officialDate")))?;
    if event_date != unit.date() {
        return Ok(None);
    }

    let teams = game
        .get("teams")
        .ok_or_else(|| FetchError::Permanent(format!("game {event_id}: no teams")))?;
    let (home_id, home_score) = side_line(teams.get("home"))
        .ok_or_else(|| FetchError::Permanent(format!("game {event_id}: bad home side")))?;
    let (away_id, away_score) = side_line(teams.get("away"))
        .ok_or_else(|| FetchError::Permanent(format!("game {event_id}: bad away side")))?;
    if !unit_matches(unit, &home_id, &away_id) {
        return Ok(None);
    }

    Ok(Some(RawEvent {
        source: source.to_string(),
        event_id,
        unit_key: unit.key(),
        event_date,
        season: game.get("season").and_then(as_id_string),
        home_id,
        away_id,
        home_score,
        away_score,
        periods: innings(game.get("linescore")),
        home_odds: None,
        away_odds: None,
    }))
}

fn side_line(side: Option<&Value>) -> Option<(String, u32)> {
    let side = side?;
    let id = side.get("team").and_then(|t| t.get("id")).and_then(as_id_string)?;
    let score = as_u32_any(side.get("score")?)?;
    Some((id, score))
}

fn innings(linescore: Option<&Value>) -> Vec<PeriodScore> {
    let Some(innings) = linescore
        .and_then(|l| l.get("innings"))
        .and_then(|i| i.as_array())
    else {
        return Vec::new();
    };
    innings
        .iter()
        .filter_map(|inning| {
            let period = inning.get("num").and_then(as_u32_any)?;
            // A walk-off home half has no runs entry; it counts as zero.
            let home = inning
                .get("home")
                .and_then(|h| h.get("runs"))
                .and_then(as_u32_any)
                .unwrap_or(0);
            let away = inning
                .get("away")
                .and_then(|a| a.get("runs"))
                .and_then(as_u32_any)
                .unwrap_or(0);
            Some(PeriodScore { period, home, away })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use serde_json::json;

    use super::*;

    fn game(pk: u64, state: &str, home: u32, away: u32) -> Value {
        json!({
            "gamePk": pk, "gameType": "R", "season": "2023",
            "officialDate": "2023-04-01",
            "status": {"abstractGameState": state, "detailedState": state},
            "teams": {
                "home": {"score": home, "team": {"id": 147, "name": "New York Yankees"}},
                "away": {"score": away, "team": {"id": 137, "name": "San Francisco Giants"}}
            },
            "linescore": {"innings": [
                {"num": 1, "home": {"runs": 1}, "away": {"runs": 0}},
                {"num": 2, "home": {"runs": 0}, "away": {"runs": 2}},
                {"num": 9, "home": {}, "away": {"runs": 0}}
            ]}
        })
    }

    #[test]
    fn doubleheader_games_stay_distinct() {
        let payload = json!({"dates": [{"date": "2023-04-01", "games": [
            game(1, "Final", 5, 2),
            game(2, "Final", 3, 4),
            game(3, "Preview", 0, 0)
        ]}]});
        let unit = CollectionUnit::Date(NaiveDate::from_ymd_opt(2023, 4, 1).unwrap());
        let events = parse_schedule_json(&payload, "mlb", &unit).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event_id, "1");
        assert_eq!(events[1].event_id, "2");
        assert_eq!(events[0].home_id, "147");
        assert_eq!(events[0].periods.len(), 3);
        assert_eq!(events[0].periods[2].home, 0);
    }

    #[test]
    fn empty_dates_is_no_events() {
        let unit = CollectionUnit::Date(NaiveDate::from_ymd_opt(2023, 12, 25).unwrap());
        let events = parse_schedule_json(&json!({"dates": []}), "mlb", &unit).unwrap();
        assert!(events.is_empty());
    }
}
