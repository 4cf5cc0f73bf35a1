//! Score alerts and the score-to-brightness mapping

use std::collections::HashSet;
use std::collections::VecDeque;

use serde_json::json;
use serde_json::Map;
use serde_json::Value;

/// Alerts kept for `/updates` polling
pub const ALERT_HISTORY: usize = 50;

pub type Alert = Map<String, Value>;

fn alert_types(alert: &Alert) -> Vec<&str> {
    alert
        .get("alert_types")
        .and_then(Value::as_array)
        .map(|types| types.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default()
}

pub fn is_final(alert: &Alert) -> bool {
    alert_types(alert).contains(&"FINAL")
}

/// A score field, accepting numbers or numeric strings
pub fn score(alert: &Alert, field: &str) -> i64 {
    match alert.get(field) {
        Some(Value::Number(n)) => n.as_i64().unwrap_or(0),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(0),
        _ => 0,
    }
}

/// One-line description for the log
pub fn summary(alert: &Alert) -> String {
    let text = |field: &str, default: &str| match alert.get(field) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => default.to_string(),
        Some(other) => other.to_string(),
    };
    format!(
        "{}: {} {} @ {} {}",
        alert_types(alert).join(", "),
        text("away_abbr", "???"),
        text("away_score", "?"),
        text("home_abbr", "???"),
        text("home_score", "?"),
    )
}

/// Brightness for the (home, away) lights given the current score.
///
/// The leading side brightens with the margin, the trailing side dims.
pub fn score_brightness(home: i64, away: i64) -> (u8, u8) {
    let lead = |margin: i64| (20 + 4 * margin).min(100) as u8;
    let trail = |margin: i64| (50 - 4 * margin).max(5) as u8;

    let delta = home.saturating_sub(away).clamp(-100, 100);
    match delta {
        d if d > 0 => (lead(d), trail(d)),
        d if d < 0 => (trail(-d), lead(-d)),
        _ => (50, 50),
    }
}

/// Recent alerts, newest first
#[derive(Debug, Default)]
pub struct ScoreBoard {
    alerts: VecDeque<Alert>,
    last_id: u64,
}

impl ScoreBoard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stamp and store an alert, returning its id
    pub fn record(&mut self, mut alert: Alert) -> u64 {
        self.last_id += 1;
        alert.insert("alert_id".to_string(), json!(self.last_id));
        alert.insert(
            "received_at".to_string(),
            json!(chrono::Local::now().to_rfc3339()),
        );

        self.alerts.push_front(alert);
        self.alerts.truncate(ALERT_HISTORY);
        self.last_id
    }

    /// Alerts newer than `since`, newest first
    pub fn since(&self, since: u64) -> Vec<Alert> {
        self.alerts
            .iter()
            .filter(|alert| {
                alert
                    .get("alert_id")
                    .and_then(Value::as_u64)
                    .is_some_and(|id| id > since)
            })
            .cloned()
            .collect()
    }

    /// Number of distinct games among stored alerts that are not final
    pub fn live_games(&self) -> usize {
        self.alerts
            .iter()
            .filter(|alert| !is_final(alert))
            .map(|alert| alert.get("game_id").map(Value::to_string))
            .collect::<HashSet<_>>()
            .len()
    }

    /// Store a canned alert so displays can be tested without a live game
    pub fn test_alert(&mut self) -> u64 {
        let now = chrono::Local::now().to_rfc3339();
        let alert = json!({
            "game_id": "test-001",
            "home_team": "Duke Blue Devils",
            "home_abbr": "DUKE",
            "home_score": 72,
            "home_rank": 7,
            "away_team": "North Carolina Tar Heels",
            "away_abbr": "UNC",
            "away_score": 70,
            "away_rank": 12,
            "alert_types": ["SCORE_UPDATE", "CLOSE_GAME"],
            "is_favorite": true,
            "status_detail": "5:32 - 2nd Half",
            "clock": "5:32",
            "period": 2,
            "timestamp": now,
        });

        match alert {
            Value::Object(alert) => self.record(alert),
            _ => self.last_id,
        }
    }

    pub fn len(&self) -> usize {
        self.alerts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.alerts.is_empty()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn alert(value: Value) -> Alert {
        match value {
            Value::Object(map) => map,
            other => panic!("not an object: {}", other),
        }
    }

    #[test]
    fn test_score_brightness() {
        assert_eq!(score_brightness(3, 3), (50, 50));
        assert_eq!(score_brightness(72, 70), (28, 42));
        assert_eq!(score_brightness(70, 72), (42, 28));
        assert_eq!(score_brightness(40, 10), (100, 5));
        assert_eq!(score_brightness(0, 21), (5, 100));
    }

    #[test]
    fn test_history_is_capped_newest_first() {
        let mut board = ScoreBoard::new();
        for i in 0..60 {
            board.record(alert(json!({"game_id": "g1", "home_score": i})));
        }

        assert_eq!(board.len(), ALERT_HISTORY);
        let recent = board.since(57);
        let ids: Vec<_> = recent.iter().map(|a| a["alert_id"].as_u64().unwrap()).collect();
        assert_eq!(ids, [60, 59, 58]);
        assert!(recent[0]["received_at"].is_string());
    }

    #[test]
    fn test_live_games_ignore_final() {
        let mut board = ScoreBoard::new();
        board.record(alert(json!({"game_id": "g1", "alert_types": ["SCORE_UPDATE"]})));
        board.record(alert(json!({"game_id": "g2", "alert_types": ["FINAL"]})));
        assert_eq!(board.live_games(), 1);

        board.record(alert(json!({"game_id": "g3", "alert_types": []})));
        assert_eq!(board.live_games(), 2);
    }

    #[test]
    fn test_summary_line() {
        let update = alert(json!({
            "alert_types": ["SCORE_UPDATE", "CLOSE_GAME"],
            "home_abbr": "DUKE",
            "home_score": 72,
            "away_abbr": "UNC",
            "away_score": "70",
        }));
        assert_eq!(summary(&update), "SCORE_UPDATE, CLOSE_GAME: UNC 70 @ DUKE 72");
        assert_eq!(score(&update, "away_score"), 70);
        assert_eq!(summary(&Alert::new()), ": ??? ? @ ??? ?");
    }

    #[test]
    fn test_canned_alert() {
        let mut board = ScoreBoard::new();
        assert_eq!(board.test_alert(), 1);
        let alerts = board.since(0);
        assert_eq!(alerts[0]["home_abbr"], "DUKE");
        assert_eq!(alerts[0]["alert_id"], 1);
    }
}
