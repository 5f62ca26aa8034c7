//! Core domain types shared by the ingestion path, the predictor and storage.

use chrono::{DateTime, NaiveDate, Utc, Weekday};
use serde::{Deserialize, Serialize};

/// A single load observation, keyed by its timestamp in storage.
///
/// `load` is a percentage and stays within [0, 100] at every ingestion
/// point; the type admits larger values, so boundaries must validate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Event {
    pub timestamp: DateTime<Utc>,
    pub load: u8,
    /// Forecast value synthesized by the predictor; never persisted.
    #[sqlx(default)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub predict: Option<f64>,
}

impl Event {
    pub fn new(timestamp: DateTime<Utc>, load: u8) -> Self {
        Self {
            timestamp,
            load,
            predict: None,
        }
    }

    /// The observed load as a float, for the statistics arithmetic.
    pub fn load_f64(&self) -> f64 {
        f64::from(self.load)
    }
}

/// A calendar holiday. The checker only looks at month and day; the year is
/// kept because the upstream calendar is published per year.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Holiday {
    pub day: NaiveDate,
    pub title: String,
}

/// Category assigned to an instant for the statistics key: the weekday
/// (Monday first), overridden to `Holiday` when the calendar flags the date.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DayType {
    Monday = 0,
    Tuesday = 1,
    Wednesday = 2,
    Thursday = 3,
    Friday = 4,
    Saturday = 5,
    Sunday = 6,
    Holiday = 7,
}

impl DayType {
    /// Number of day types: seven weekdays plus the holiday bucket.
    pub const COUNT: usize = 8;

    pub fn from_weekday(weekday: Weekday) -> Self {
        match weekday {
            Weekday::Mon => DayType::Monday,
            Weekday::Tue => DayType::Tuesday,
            Weekday::Wed => DayType::Wednesday,
            Weekday::Thu => DayType::Thursday,
            Weekday::Fri => DayType::Friday,
            Weekday::Sat => DayType::Saturday,
            Weekday::Sun => DayType::Sunday,
        }
    }

    pub fn index(self) -> usize {
        self as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_day_type_from_weekday() {
        assert_eq!(DayType::from_weekday(Weekday::Mon), DayType::Monday);
        assert_eq!(DayType::from_weekday(Weekday::Sun), DayType::Sunday);
        assert_eq!(DayType::Monday.index(), 0);
        assert_eq!(DayType::Sunday.index(), 6);
        assert_eq!(DayType::Holiday.index(), 7);
    }

    #[test]
    fn test_event_load_f64() {
        let event = Event::new(Utc.with_ymd_and_hms(2025, 1, 6, 10, 0, 0).unwrap(), 42);
        assert_eq!(event.load_f64(), 42.0);
        assert!(event.predict.is_none());
    }

    #[test]
    fn test_event_serialization_skips_empty_predict() {
        let event = Event::new(Utc.with_ymd_and_hms(2025, 1, 6, 10, 0, 0).unwrap(), 10);
        let json = serde_json::to_string(&event).unwrap();
        assert!(!json.contains("predict"));

        let parsed: Event = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, event);
    }
}
