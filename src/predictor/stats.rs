use chrono::{DateTime, Utc};

use crate::domain::DayType;

pub(crate) const HOURS_PER_DAY: usize = 24;

/// Weighted aggregates for one (day-type, hour) cell.
///
/// Observations lose weight exponentially with elapsed days, so the cell
/// reflects roughly the last `1/lambda` days in effective sample size.
#[derive(Debug, Clone, Copy, Default)]
pub struct HourlyStats {
    /// Sum(load × weight)
    pub weighted_sum: f64,
    /// Sum(weight)
    pub total_weight: f64,
    /// Total events counted, never decayed
    pub count: u64,
    /// Timestamp of the event that last touched the cell
    pub last_update: Option<DateTime<Utc>>,
}

impl HourlyStats {
    /// Decay both sums by elapsed days, then accumulate a new observation.
    ///
    /// A non-positive day difference skips the decay but still accumulates:
    /// arrival is assumed causal, and out-of-order events must not inflate
    /// the remaining weight.
    pub fn observe(&mut self, timestamp: DateTime<Utc>, load: f64, lambda: f64) {
        if let Some(last_update) = self.last_update {
            let days_since =
                (timestamp - last_update).num_seconds() as f64 / (HOURS_PER_DAY * 3600) as f64;
            if days_since > 0.0 {
                let decay = (-lambda * days_since).exp();
                self.weighted_sum *= decay;
                self.total_weight *= decay;
            }
        }

        self.weighted_sum += load;
        self.total_weight += 1.0;
        self.count += 1;
        self.last_update = Some(timestamp);
    }

    /// `weighted_sum / total_weight`, defined only for a non-empty cell.
    pub fn weighted_mean(&self) -> Option<f64> {
        if self.total_weight > 0.0 {
            Some(self.weighted_sum / self.total_weight)
        } else {
            None
        }
    }
}

/// Dense 8×24 matrix of cells, one per (day-type, hour).
#[derive(Debug, Clone)]
pub(crate) struct StatsMatrix {
    cells: [[HourlyStats; HOURS_PER_DAY]; DayType::COUNT],
}

impl StatsMatrix {
    pub fn new() -> Self {
        Self {
            cells: [[HourlyStats::default(); HOURS_PER_DAY]; DayType::COUNT],
        }
    }

    pub fn cell(&self, day_type: DayType, hour: usize) -> &HourlyStats {
        &self.cells[day_type.index()][hour]
    }

    pub fn cell_mut(&mut self, day_type: DayType, hour: usize) -> &mut HourlyStats {
        &mut self.cells[day_type.index()][hour]
    }

    pub fn day_row(&self, day_type: DayType) -> &[HourlyStats; HOURS_PER_DAY] {
        &self.cells[day_type.index()]
    }
}
