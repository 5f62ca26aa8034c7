pub mod config;
pub mod domain;
pub mod error;
pub mod fetcher;
pub mod holidayer;
pub mod importer;
pub mod predictor;
pub mod storage;

pub use config::AppConfig;
pub use domain::{DayType, Event, Holiday};
pub use error::{GymError, Result};
pub use fetcher::LoadFetcher;
pub use holidayer::HolidayFetcher;
pub use predictor::{Controller, Prediction, Predictor};
pub use storage::Store;
