use std::collections::HashMap;

use chrono::{DateTime, Datelike, Utc};
use chrono_tz::Tz;

use crate::domain::Holiday;
use crate::error::Result;
use crate::storage::Store;

/// Answers "is this instant a holiday?" for the predictor's day
/// classification. A trait so tests can inject a fixed calendar.
pub trait HolidayCheck: Send + Sync {
    fn is_holiday(&self, t: DateTime<Utc>) -> bool;
    fn holiday_title(&self, t: DateTime<Utc>) -> Option<String>;
}

/// Calendar-backed checker over a `(month, day) → title` snapshot.
///
/// Year-independent on purpose: January 1st is a holiday every year the
/// checker is consulted. The snapshot is taken once at construction, so a
/// process surviving past a year boundary keeps last year's calendar until
/// the controller is rebuilt.
pub struct CalendarChecker {
    days: HashMap<(u32, u32), String>,
    tz: Tz,
}

impl CalendarChecker {
    pub fn new(holidays: Vec<Holiday>, tz: Tz) -> Self {
        let days = holidays
            .into_iter()
            .map(|h| ((h.day.month(), h.day.day()), h.title))
            .collect();

        Self { days, tz }
    }

    /// Build a checker from the stored holidays of the current year in the
    /// configured zone.
    pub async fn from_store(store: &Store, tz: Tz) -> Result<Self> {
        let year = Utc::now().with_timezone(&tz).year();
        let holidays = store.holidays_for_year(year).await?;
        Ok(Self::new(holidays, tz))
    }

    fn month_day(&self, t: DateTime<Utc>) -> (u32, u32) {
        let local = t.with_timezone(&self.tz);
        (local.month(), local.day())
    }
}

impl HolidayCheck for CalendarChecker {
    fn is_holiday(&self, t: DateTime<Utc>) -> bool {
        self.days.contains_key(&self.month_day(t))
    }

    fn holiday_title(&self, t: DateTime<Utc>) -> Option<String> {
        self.days.get(&self.month_day(t)).cloned()
    }
}
