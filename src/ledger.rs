use chrono::NaiveDate;
use serde::Serialize;

use crate::events::RawEvent;

/// One event seen from one participant's side.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntityLedgerRow {
    pub entity_id: String,
    pub opponent_id: String,
    pub event_date: NaiveDate,
    pub event_id: String,
    pub points_for: u32,
    pub points_against: u32,
    pub is_home: bool,
    pub won: bool,
}

impl EntityLedgerRow {
    pub fn win_flag(&self) -> f64 {
        if self.won { 1.0 } else { 0.0 }
    }
}

/// Two rows per event, sorted by (entity, date, event id).
///
/// This is the only place ledger order is established. Feature construction
/// relies on each entity's rows being contiguous and chronological, with
/// same-day events broken by event id so doubleheaders always land in the
/// same window positions.
pub fn build_ledger(events: &[RawEvent]) -> Vec<EntityLedgerRow> {
    let mut rows = Vec::with_capacity(events.len() * 2);
    for ev in events {
        rows.push(EntityLedgerRow {
            entity_id: ev.home_id.clone(),
            opponent_id: ev.away_id.clone(),
            event_date: ev.event_date,
            event_id: ev.event_id.clone(),
            points_for: ev.home_score,
            points_against: ev.away_score,
            is_home: true,
            won: ev.home_won(),
        });
        rows.push(EntityLedgerRow {
            entity_id: ev.away_id.clone(),
            opponent_id: ev.home_id.clone(),
            event_date: ev.event_date,
            event_id: ev.event_id.clone(),
            points_for: ev.away_score,
            points_against: ev.home_score,
            is_home: false,
            won: ev.away_won(),
        });
    }
    rows.sort_by(|a, b| {
        a.entity_id
            .cmp(&b.entity_id)
            .then_with(|| a.event_date.cmp(&b.event_date))
            .then_with(|| a.event_id.cmp(&b.event_id))
    });
    rows
}

/// Contiguous slices of `rows` sharing one entity id.
pub fn entity_groups(rows: &[EntityLedgerRow]) -> Vec<&[EntityLedgerRow]> {
    let mut out = Vec::new();
    let mut start = 0usize;
    for idx in 1..=rows.len() {
        if idx == rows.len() || rows[idx].entity_id != rows[start].entity_id {
            if idx > start {
                out.push(&rows[start..idx]);
            }
            start = idx;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ev(id: &str, day: u32, home: &str, away: &str, hs: u32, aw: u32) -> RawEvent {
        let date = NaiveDate::from_ymd_opt(2024, 5, day).unwrap();
        RawEvent {
            source: "t".to_string(),
            event_id: id.to_string(),
            unit_key: date.to_string(),
            event_date: date,
            season: None,
            home_id: home.to_string(),
            away_id: away.to_string(),
            home_score: hs,
            away_score: aw,
            periods: Vec::new(),
            home_odds: None,
            away_odds: None,
        }
    }

    #[test]
    fn two_rows_per_event_from_each_side() {
        let rows = build_ledger(&[ev("g1", 1, "NYY", "BOS", 4, 2)]);
        assert_eq!(rows.len(), 2);
        let bos = &rows[0];
        assert_eq!(bos.entity_id, "BOS");
        assert_eq!((bos.points_for, bos.points_against), (2, 4));
        assert!(!bos.is_home && !bos.won);
        let nyy = &rows[1];
        assert!(nyy.is_home && nyy.won);
        assert_eq!(nyy.win_flag(), 1.0);
    }

    #[test]
    fn doubleheader_order_is_by_event_id() {
        let a = vec![
            ev("g9", 2, "NYY", "BOS", 1, 0),
            ev("g2", 2, "BOS", "NYY", 3, 5),
            ev("g1", 1, "NYY", "TOR", 0, 1),
        ];
        let mut b = a.clone();
        b.reverse();
        let ra = build_ledger(&a);
        assert_eq!(ra, build_ledger(&b));
        let nyy: Vec<&str> = ra
            .iter()
            .filter(|r| r.entity_id == "NYY")
            .map(|r| r.event_id.as_str())
            .collect();
        assert_eq!(nyy, vec!["g1", "g2", "g9"]);
    }

    #[test]
    fn groups_are_contiguous_per_entity() {
        let rows = build_ledger(&[ev("g1", 1, "A", "B", 1, 0), ev("g2", 2, "A", "C", 1, 0)]);
        let groups = entity_groups(&rows);
        let sizes: Vec<(String, usize)> = groups
            .iter()
            .map(|g| (g[0].entity_id.clone(), g.len()))
            .collect();
        assert_eq!(
            sizes,
            vec![("A".to_string(), 2), ("B".to_string(), 1), ("C".to_string(), 1)]
        );
        assert!(entity_groups(&[]).is_empty());
    }
}
