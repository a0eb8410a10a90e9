use std::fs;
use std::path::PathBuf;

use chrono::NaiveDate;
use serde_json::Value;

use sports_backtest::events::CollectionUnit;
use sports_backtest::sources::mlb::parse_schedule_json;
use sports_backtest::sources::nhl::parse_score_json;

fn read_fixture(name: &str) -> Value {
    let mut path = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    path.push("tests");
    path.push("fixtures");
    path.push(name);
    let raw = fs::read_to_string(path).expect("fixture file should be readable");
    serde_json::from_str(&raw).expect("fixture should be valid json")
}

fn day(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

#[test]
fn parses_nhl_score_fixture() {
    let value = read_fixture("nhl_score.json");
    let unit = CollectionUnit::Date(day(2024, 1, 15));
    let events = parse_score_json(&value, "nhl", &unit).expect("fixture should parse");
    assert_eq!(events.len(), 2);

    let tor = &events[0];
    assert_eq!(tor.event_id, "2023020700");
    assert_eq!(tor.season.as_deref(), Some("20232024"));
    assert_eq!((tor.home_id.as_str(), tor.away_id.as_str()), ("TOR", "BOS"));
    assert_eq!((tor.home_score, tor.away_score), (4, 3));
    assert_eq!(tor.unit_key, "2024-01-15");
    let by_period: Vec<(u32, u32, u32)> = tor.periods.iter().map(|p| (p.period, p.home, p.away)).collect();
    assert_eq!(by_period, vec![(1, 1, 1), (2, 1, 0), (3, 1, 2), (4, 1, 0)]);
    assert!(tor.validate().is_ok());

    // String scores and no goal list.
    let edm = &events[1];
    assert_eq!((edm.home_score, edm.away_score), (2, 5));
    assert!(edm.periods.is_empty());
}

#[test]
fn nhl_entity_unit_keeps_only_that_team() {
    let value = read_fixture("nhl_score.json");
    let unit = CollectionUnit::DateEntity(day(2024, 1, 15), "CGY".to_string());
    let events = parse_score_json(&value, "nhl", &unit).expect("fixture should parse");
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].away_id, "CGY");
    assert_eq!(events[0].unit_key, "2024-01-15#CGY");
}

#[test]
fn nhl_payload_without_games_is_rejected() {
    let unit = CollectionUnit::Date(day(2024, 1, 15));
    let value: Value = serde_json::from_str(r#"{"currentDate": "2024-01-15"}"#).unwrap();
    assert!(parse_score_json(&value, "nhl", &unit).is_err());
}

#[test]
fn parses_mlb_schedule_fixture() {
    let value = read_fixture("mlb_schedule.json");
    let unit = CollectionUnit::Date(day(2023, 7, 4));
    let events = parse_schedule_json(&value, "mlb", &unit).expect("fixture should parse");
    assert_eq!(events.len(), 2);

    assert_eq!(events[0].event_id, "717465");
    assert_eq!(events[1].event_id, "717466");
    for ev in &events {
        assert_eq!(ev.home_id, "144");
        assert_eq!(ev.away_id, "121");
        assert_eq!(ev.event_date, day(2023, 7, 4));
    }
    assert!(events[0].home_won());
    assert!(events[1].away_won());
    assert_eq!(events[0].periods.len(), 4);
    assert_eq!(events[0].periods[3].home, 0);
}

#[test]
fn mlb_other_dates_are_ignored() {
    let value = read_fixture("mlb_schedule.json");
    let unit = CollectionUnit::Date(day(2023, 7, 5));
    let events = parse_schedule_json(&value, "mlb", &unit).expect("fixture should parse");
    assert!(events.is_empty());
}
