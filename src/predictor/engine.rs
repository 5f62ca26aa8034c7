use std::collections::VecDeque;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Datelike, TimeDelta, Timelike, Utc};
use chrono_tz::Tz;

use crate::domain::{DayType, Event};
use crate::predictor::checker::HolidayCheck;
use crate::predictor::stats::{HourlyStats, StatsMatrix, HOURS_PER_DAY};

/// Fallback when no statistics exist at all. Gyms idle well below half
/// capacity most of the day, so 25 is closer to reality than 50.
pub const AVERAGE_LOAD: f64 = 25.0;

/// A load prediction for a specific hour.
#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    pub target_time: DateTime<Utc>,
    pub hour: u32,
    pub load: f64,
    /// Prediction confidence [0.0..1.0]
    pub confidence: f64,
    pub is_holiday: bool,
}

struct State {
    stats: StatsMatrix,
    recent: VecDeque<Event>,
}

/// Online load predictor.
///
/// Owns the 8×24 statistics matrix and a short window of recent events
/// behind one reader-writer lock. All methods are CPU-bound; the lock is
/// never held across a suspension point.
pub struct Predictor {
    state: RwLock<State>,
    checker: Option<Arc<dyn HolidayCheck>>,
    tz: Tz,
    decay_lambda: f64,
    min_weight: f64,
    confidence_threshold: f64,
    max_recent_count: usize,
}

impl Predictor {
    /// Create a predictor with default tuning. The checker may be absent in
    /// minimal deployments; every date then classifies as a plain weekday.
    pub fn new(checker: Option<Arc<dyn HolidayCheck>>, tz: Tz) -> Self {
        Self {
            state: RwLock::new(State {
                stats: StatsMatrix::new(),
                recent: VecDeque::new(),
            }),
            checker,
            tz,
            decay_lambda: 0.1,        // exp(-0.1*7) ~= 0.5
            min_weight: 0.5,          // minimum weight for prediction confidence
            confidence_threshold: 20.0, // weight threshold for max confidence
            max_recent_count: 40,     // ~ last hour at 90s polling
        }
    }

    /// Ingest an event and update the statistics.
    pub fn ingest(&self, event: &Event) {
        let day_type = self.day_type(event.timestamp);
        let hour = event.timestamp.hour() as usize;

        let mut state = self.state.write().expect("predictor lock poisoned");
        state
            .stats
            .cell_mut(day_type, hour)
            .observe(event.timestamp, event.load_f64(), self.decay_lambda);

        state.recent.push_back(event.clone());
        if state.recent.len() > self.max_recent_count {
            state.recent.pop_front();
        }
    }

    /// Load prediction for the given number of hours ahead of now.
    pub fn predict(&self, hours_ahead: u8) -> Prediction {
        self.predict_at(Utc::now(), hours_ahead)
    }

    /// Load prediction relative to an explicit instant.
    pub fn predict_at(&self, now: DateTime<Utc>, hours_ahead: u8) -> Prediction {
        let state = self.state.read().expect("predictor lock poisoned");

        let target_time = now + TimeDelta::hours(i64::from(hours_ahead));
        let hour = target_time.hour();
        let day_type = self.day_type(target_time);
        let cell = state.stats.cell(day_type, hour as usize);

        let mut load = self.blended_base(&state.stats, day_type, hour as usize);

        let confidence = if cell.total_weight >= self.min_weight {
            self.confidence(now, cell, day_type)
        } else if day_type == DayType::Holiday {
            let sunday = state.stats.cell(DayType::Sunday, hour as usize);
            if sunday.total_weight >= self.min_weight {
                0.5
            } else {
                0.3
            }
        } else {
            load = self.fallback(&state.stats, day_type);
            0.3
        };

        // trend correction for short-term predictions
        if hours_ahead <= 3 && state.recent.len() >= 20 {
            let trend = trend(&state.recent);
            let trend_weight = 0.3 / f64::from(hours_ahead);
            load += trend * trend_weight * f64::from(hours_ahead);
        }

        load = load.clamp(0.0, 100.0);

        Prediction {
            target_time,
            hour,
            load,
            confidence,
            is_holiday: day_type == DayType::Holiday,
        }
    }

    /// Load predictions for the next `max_hours` hours, in order.
    pub fn predict_range(&self, max_hours: u8) -> Vec<Prediction> {
        let now = Utc::now();
        (1..=max_hours).map(|h| self.predict_at(now, h)).collect()
    }

    /// Typical load for the given instant based on historical data.
    pub fn typical_load(&self, t: DateTime<Utc>) -> f64 {
        let state = self.state.read().expect("predictor lock poisoned");

        let day_type = self.day_type(t);
        let cell = state.stats.cell(day_type, t.hour() as usize);

        if cell.total_weight >= self.min_weight {
            cell.weighted_sum / cell.total_weight
        } else {
            self.fallback(&state.stats, day_type)
        }
    }

    /// Diagnostic view of a single cell.
    pub fn cell_stats(&self, day_type: DayType, hour: usize) -> HourlyStats {
        let state = self.state.read().expect("predictor lock poisoned");
        *state.stats.cell(day_type, hour)
    }

    /// Classify an instant: holiday wins over the zone-local weekday.
    fn day_type(&self, t: DateTime<Utc>) -> DayType {
        if let Some(checker) = &self.checker {
            if checker.is_holiday(t) {
                return DayType::Holiday;
            }
        }
        DayType::from_weekday(t.with_timezone(&self.tz).weekday())
    }

    /// Weighted mean of a cell, falling back to `AVERAGE_LOAD` for a cell
    /// with negligible weight.
    fn weighted_average(&self, stats: &StatsMatrix, day_type: DayType, hour: usize) -> f64 {
        let cell = stats.cell(day_type, hour);
        if cell.total_weight < 0.1 {
            return AVERAGE_LOAD;
        }
        cell.weighted_sum / cell.total_weight
    }

    /// Base prediction for the target cell. Holidays blend the holiday cell
    /// with the Sunday cell at the same hour, Sunday counting half: holidays
    /// resemble Sundays but observed holiday data wins when present.
    fn blended_base(&self, stats: &StatsMatrix, day_type: DayType, hour: usize) -> f64 {
        if day_type != DayType::Holiday {
            return self.weighted_average(stats, day_type, hour);
        }

        let holiday = stats.cell(DayType::Holiday, hour);
        let sunday = stats.cell(DayType::Sunday, hour);

        let holiday_weight = holiday.total_weight;
        let sunday_weight = sunday.total_weight * 0.5;

        let total_weight = holiday_weight + sunday_weight;
        if total_weight < 0.1 {
            return AVERAGE_LOAD;
        }

        let holiday_avg = holiday.weighted_mean().unwrap_or(0.0);
        let sunday_avg = sunday.weighted_mean().unwrap_or(0.0);

        (holiday_avg * holiday_weight + sunday_avg * sunday_weight) / total_weight
    }

    /// Fallback for a target hour without data: the weighted mean over all
    /// 24 hours of the day type, or `AVERAGE_LOAD` if the row is empty.
    fn fallback(&self, stats: &StatsMatrix, day_type: DayType) -> f64 {
        let mut sum = 0.0;
        let mut weight = 0.0;

        for cell in stats.day_row(day_type) {
            if cell.total_weight > 0.0 {
                sum += cell.weighted_sum;
                weight += cell.total_weight;
            }
        }

        if weight > 0.0 {
            sum / weight
        } else {
            AVERAGE_LOAD
        }
    }

    fn confidence(&self, now: DateTime<Utc>, cell: &HourlyStats, day_type: DayType) -> f64 {
        // base confidence from effective sample size
        let mut base = (cell.total_weight / self.confidence_threshold).min(1.0);

        // small penalty for holidays
        if day_type == DayType::Holiday {
            base *= 0.7;
        }

        // penalty for stale data
        if let Some(last_update) = cell.last_update {
            let days_since =
                (now - last_update).num_seconds() as f64 / (HOURS_PER_DAY * 3600) as f64;
            let freshness = (-0.05 * days_since).exp(); // 2 weeks -> ~0.5
            base *= freshness;
        }

        base
    }
}

/// Short-horizon trend in load units per hour over the recent window:
/// `(newest - oldest) / hours_between`, zero for a degenerate window.
fn trend(recent: &VecDeque<Event>) -> f64 {
    let (Some(first), Some(last)) = (recent.front(), recent.back()) else {
        return 0.0;
    };
    if recent.len() < 3 {
        return 0.0;
    }

    let hours_diff = (last.timestamp - first.timestamp).num_seconds() as f64 / 3600.0;
    if hours_diff < 0.1 {
        return 0.0; // too small interval
    }

    (last.load_f64() - first.load_f64()) / hours_diff
}
