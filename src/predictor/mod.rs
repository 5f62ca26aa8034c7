//! Load prediction: hourly weighted statistics with exponential time-decay,
//! holiday-aware blending and short-horizon trend correction.

mod checker;
mod controller;
mod engine;
mod stats;

pub use checker::{CalendarChecker, HolidayCheck};
pub use controller::Controller;
pub use engine::{Prediction, Predictor, AVERAGE_LOAD};
pub use stats::HourlyStats;
