use std::fmt;
use std::str::FromStr;

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use serde::de::{DeserializeOwned, Error as _};
use serde::{Deserialize, Deserializer, Serialize};
use tracing::warn;
use uuid::Uuid;

pub const DEFAULT_TIMER_TITLE: &str = "New timer";
pub const DEFAULT_TIMER_MINUTES: u32 = 5;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    #[serde(deserialize_with = "record_id")]
    pub id: Uuid,

    pub text: String,

    #[serde(default)]
    pub completed: bool,

    pub created_at: DateTime<Utc>,
}

impl Task {
    pub fn new(text: String, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            text,
            completed: false,
            created_at: now,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ListWindow {
    #[serde(deserialize_with = "record_id")]
    pub id: Uuid,

    pub title: String,

    #[serde(default, deserialize_with = "lenient_tasks")]
    pub tasks: Vec<Task>,

    pub created_at: DateTime<Utc>,
}

impl ListWindow {
    pub fn new(title: String, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            title,
            tasks: vec![],
            created_at: now,
        }
    }

    pub fn task(&self, task_id: Uuid) -> Option<&Task> {
        self.tasks.iter().find(|task| task.id == task_id)
    }

    pub fn stats(&self) -> WindowStats {
        WindowStats {
            completed: self.tasks.iter().filter(|task| task.completed).count(),
            total: self.tasks.len(),
        }
    }
}

/// Completion counters shown in a window footer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowStats {
    pub completed: usize,
    pub total: usize,
}

impl WindowStats {
    pub fn percent(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        self.completed as f64 / self.total as f64 * 100.0
    }

    pub fn summary(&self) -> String {
        format!("{} of {}", self.completed, self.total)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerState {
    Idle,
    Running,
    Paused,
    Finished,
}

/// Persisted countdown record. The tick handle of a running timer lives in
/// the timer store and is never part of this struct.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Timer {
    #[serde(deserialize_with = "record_id")]
    pub id: Uuid,

    pub title: String,

    #[serde(deserialize_with = "lenient_seconds")]
    pub hours: u32,

    #[serde(deserialize_with = "lenient_seconds")]
    pub minutes: u32,

    #[serde(deserialize_with = "lenient_seconds")]
    pub seconds: u32,

    #[serde(deserialize_with = "lenient_seconds")]
    pub initial_time: u32,

    #[serde(deserialize_with = "lenient_seconds")]
    pub remaining_time: u32,

    #[serde(default)]
    pub is_running: bool,

    #[serde(default)]
    pub is_paused: bool,
}

impl Timer {
    pub fn new(title: String, hours: u32, minutes: u32, seconds: u32) -> Self {
        let hours = DurationField::Hours.clamp(hours.into());
        let minutes = DurationField::Minutes.clamp(minutes.into());
        let seconds = DurationField::Seconds.clamp(seconds.into());
        let initial_time = total_seconds(hours, minutes, seconds);
        Self {
            id: Uuid::new_v4(),
            title,
            hours,
            minutes,
            seconds,
            initial_time,
            remaining_time: initial_time,
            is_running: false,
            is_paused: false,
        }
    }

    pub fn state(&self) -> TimerState {
        if self.is_running {
            TimerState::Running
        } else if self.is_paused {
            TimerState::Paused
        } else if self.remaining_time == 0 && self.initial_time > 0 {
            TimerState::Finished
        } else {
            TimerState::Idle
        }
    }

    /// Elapsed share of the countdown in percent.
    pub fn progress(&self) -> f64 {
        if self.initial_time == 0 {
            return 0.0;
        }
        let elapsed = self.initial_time.saturating_sub(self.remaining_time);
        f64::from(elapsed) / f64::from(self.initial_time) * 100.0
    }

    pub fn display(&self) -> String {
        format_clock(self.remaining_time)
    }
}

pub fn total_seconds(hours: u32, minutes: u32, seconds: u32) -> u32 {
    hours * 3600 + minutes * 60 + seconds
}

pub fn format_clock(seconds: u32) -> String {
    format!(
        "{:02}:{:02}:{:02}",
        seconds / 3600,
        (seconds % 3600) / 60,
        seconds % 60
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DurationField {
    Hours,
    Minutes,
    Seconds,
}

impl DurationField {
    pub fn max(self) -> u32 {
        match self {
            DurationField::Hours => 99,
            DurationField::Minutes | DurationField::Seconds => 59,
        }
    }

    pub fn clamp(self, value: i64) -> u32 {
        value.clamp(0, i64::from(self.max())) as u32
    }
}

impl FromStr for DurationField {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "h" | "hour" | "hours" => Ok(DurationField::Hours),
            "m" | "min" | "minute" | "minutes" => Ok(DurationField::Minutes),
            "s" | "sec" | "second" | "seconds" => Ok(DurationField::Seconds),
            other => Err(anyhow!("unknown duration field: {other}")),
        }
    }
}

impl fmt::Display for DurationField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DurationField::Hours => "hours",
            DurationField::Minutes => "minutes",
            DurationField::Seconds => "seconds",
        };
        f.write_str(name)
    }
}

/// Parses a duration input the way a numeric form field does: an optional
/// sign followed by leading digits, anything unparsable counts as zero.
/// Values too large for `i64` saturate so they still clamp to the maximum.
pub fn parse_field_input(raw: &str) -> i64 {
    let trimmed = raw.trim();
    let (sign, digits) = match trimmed.strip_prefix('-') {
        Some(rest) => (-1, rest),
        None => (1, trimmed.strip_prefix('+').unwrap_or(trimmed)),
    };
    digits
        .chars()
        .map_while(|ch| ch.to_digit(10))
        .fold(0_i64, |acc, digit| {
            acc.saturating_mul(10)
                .saturating_add(sign * i64::from(digit))
        })
}

/// Id for a record written with a millisecond timestamp instead of a UUID.
/// The mapping is stable, so the same record keeps its id across loads.
pub fn legacy_id(millis: u64) -> Uuid {
    Uuid::from_u128(u128::from(millis))
}

fn record_id<'de, D>(deserializer: D) -> Result<Uuid, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawId {
        Uuid(Uuid),
        Millis(u64),
        Text(String),
    }

    match RawId::deserialize(deserializer)? {
        RawId::Uuid(id) => Ok(id),
        RawId::Millis(millis) => Ok(legacy_id(millis)),
        RawId::Text(text) => text
            .trim()
            .parse::<u64>()
            .map(legacy_id)
            .map_err(|_| D::Error::custom(format!("invalid record id: {text:?}"))),
    }
}

/// Decodes each element on its own, logging and skipping the ones that
/// do not fit `T`.
pub fn parse_records<T: DeserializeOwned>(values: Vec<serde_json::Value>, kind: &str) -> Vec<T> {
    values
        .into_iter()
        .enumerate()
        .filter_map(|(idx, value)| match serde_json::from_value(value) {
            Ok(record) => Some(record),
            Err(err) => {
                warn!(kind, index = idx, error = %err, "skipping unreadable record");
                None
            }
        })
        .collect()
}

fn lenient_tasks<'de, D>(deserializer: D) -> Result<Vec<Task>, D::Error>
where
    D: Deserializer<'de>,
{
    let values = Vec::<serde_json::Value>::deserialize(deserializer)?;
    Ok(parse_records(values, "task"))
}

fn lenient_seconds<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = f64::deserialize(deserializer)?;
    Ok(raw.clamp(0.0, f64::from(u32::MAX)) as u32)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{
        DurationField, ListWindow, Timer, TimerState, WindowStats, format_clock, legacy_id,
        parse_field_input,
    };

    #[test]
    fn stats_summary_and_percent() {
        let empty = WindowStats {
            completed: 0,
            total: 0,
        };
        assert_eq!(empty.summary(), "0 of 0");
        assert_eq!(empty.percent(), 0.0);

        let half = WindowStats {
            completed: 1,
            total: 2,
        };
        assert_eq!(half.summary(), "1 of 2");
        assert!((half.percent() - 50.0).abs() < f64::EPSILON);
    }

    #[test]
    fn timer_loads_legacy_record_with_negative_remaining() {
        let raw = json!({
            "id": "6f1d7f1e-3c2a-4f59-9d9e-0d7c6a1b2c3d",
            "title": "Tea",
            "hours": 0,
            "minutes": 3,
            "seconds": 0,
            "initialTime": 180,
            "remainingTime": -1,
            "isRunning": true,
            "isPaused": false,
            "intervalId": 42
        });

        let timer: Timer = serde_json::from_value(raw).expect("legacy timer should load");
        assert_eq!(timer.remaining_time, 0);
        assert_eq!(timer.initial_time, 180);
        assert!(timer.is_running);
    }

    #[test]
    fn timer_state_and_display() {
        let mut timer = Timer::new("t".to_string(), 1, 2, 3);
        assert_eq!(timer.initial_time, 3723);
        assert_eq!(timer.display(), "01:02:03");
        assert_eq!(timer.state(), TimerState::Idle);

        timer.remaining_time = 0;
        assert_eq!(timer.state(), TimerState::Finished);
        assert!((timer.progress() - 100.0).abs() < f64::EPSILON);

        let zero = Timer::new("z".to_string(), 0, 0, 0);
        assert_eq!(zero.state(), TimerState::Idle);
        assert_eq!(zero.progress(), 0.0);
    }

    #[test]
    fn field_input_parsing_matches_form_semantics() {
        assert_eq!(parse_field_input("42"), 42);
        assert_eq!(parse_field_input(" 7min"), 7);
        assert_eq!(parse_field_input("-3"), -3);
        assert_eq!(parse_field_input("abc"), 0);
        assert_eq!(parse_field_input(""), 0);
        assert_eq!(DurationField::Minutes.clamp(parse_field_input("75")), 59);
        assert_eq!(DurationField::Hours.clamp(-5), 0);
        assert_eq!(parse_field_input("99999999999999999999"), i64::MAX);
        assert_eq!(parse_field_input("-99999999999999999999"), i64::MIN);
        assert_eq!(
            DurationField::Hours.clamp(parse_field_input("99999999999999999999")),
            99
        );
    }

    #[test]
    fn timestamp_ids_load_and_bad_tasks_are_skipped() {
        let raw = json!({
            "id": 1700000000000_u64,
            "title": "Groceries",
            "tasks": [
                {"id": "1700000000001", "text": "Milk", "completed": true,
                 "createdAt": "2023-11-14T22:13:20.001Z"},
                {"id": null, "text": "broken"}
            ],
            "createdAt": "2023-11-14T22:13:20.000Z"
        });

        let window: ListWindow = serde_json::from_value(raw).expect("window should load");
        assert_eq!(window.id, legacy_id(1_700_000_000_000));
        assert_eq!(window.tasks.len(), 1);
        assert_eq!(window.tasks[0].id, legacy_id(1_700_000_000_001));
        assert!(window.tasks[0].completed);

        let reloaded: ListWindow =
            serde_json::from_value(serde_json::to_value(&window).expect("encode")).expect("decode");
        assert_eq!(reloaded, window);
    }

    #[test]
    fn clock_formatting_pads_components() {
        assert_eq!(format_clock(0), "00:00:00");
        assert_eq!(format_clock(59), "00:00:59");
        assert_eq!(format_clock(359_999), "99:59:59");
    }
}
