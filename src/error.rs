use thiserror::Error;

/// Main error type for the telemetry pipeline
#[derive(Error, Debug)]
pub enum GymError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // Database errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    // Network errors
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    // Remote endpoint returned something unusable: bad status, wrong
    // content type, oversize body, or an unparseable payload.
    #[error("Fetch failed: {0}")]
    Fetch(String),

    #[error("XML decode error: {0}")]
    Xml(#[from] quick_xml::DeError),

    // Import errors
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Import failed: {0}")]
    Import(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Generic errors
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// Result type alias for GymError
pub type Result<T> = std::result::Result<T, GymError>;
