//! SQLite-backed storage facade.
//!
//! The rest of the pipeline only sees this narrow surface: append an event,
//! scan events in pages, read a recent window, and replace holiday years
//! inside one transaction. SQLite is a single-writer engine, so the pool is
//! capped at one connection.

use std::path::Path;
use std::time::Duration;

use chrono::{Datelike, NaiveDate, TimeDelta, Utc};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};
use tracing::{debug, info};

use crate::domain::{Event, Holiday};
use crate::error::Result;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS events (
    timestamp TEXT PRIMARY KEY,
    load      INTEGER NOT NULL
);
CREATE TABLE IF NOT EXISTS holidays (
    day   TEXT PRIMARY KEY,
    title TEXT NOT NULL
);
"#;

/// Storage facade over a SQLite pool.
#[derive(Debug, Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Open (or create) the database file and initialize the schema.
    pub async fn connect<P: AsRef<Path>>(path: P, busy_timeout: Duration) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(busy_timeout)
            .foreign_keys(true);

        Self::connect_with(options).await
    }

    /// Open an in-memory database, used by tests.
    pub async fn connect_in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::new().in_memory(true);
        Self::connect_with(options).await
    }

    async fn connect_with(options: SqliteConnectOptions) -> Result<Self> {
        // One connection: SQLite doesn't support multiple writers, and an
        // in-memory database lives only as long as its connection.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.init().await?;
        Ok(store)
    }

    async fn init(&self) -> Result<()> {
        sqlx::query(SCHEMA).execute(&self.pool).await?;
        Ok(())
    }

    /// Store an event; an existing event with the same timestamp is replaced.
    pub async fn save_event(&self, event: &Event) -> Result<()> {
        sqlx::query("INSERT OR REPLACE INTO events (timestamp, load) VALUES (?, ?)")
            .bind(event.timestamp)
            .bind(event.load)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Store a batch of events inside one transaction.
    pub async fn save_events(&self, events: &[Event]) -> Result<()> {
        if events.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;
        for event in events {
            sqlx::query("INSERT OR REPLACE INTO events (timestamp, load) VALUES (?, ?)")
                .bind(event.timestamp)
                .bind(event.load)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// One page of the full event scan, ascending by timestamp.
    pub async fn all_events(&self, limit: i64, offset: i64) -> Result<Vec<Event>> {
        let events = sqlx::query_as::<_, Event>(
            "SELECT timestamp, load FROM events ORDER BY timestamp LIMIT ? OFFSET ?",
        )
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        Ok(events)
    }

    /// Events at or after `now - period`, ascending by timestamp.
    pub async fn events_since(&self, period: TimeDelta) -> Result<Vec<Event>> {
        let since = Utc::now() - period;
        debug!(%since, "events_since");

        let events = sqlx::query_as::<_, Event>(
            "SELECT timestamp, load FROM events WHERE timestamp >= ? ORDER BY timestamp",
        )
        .bind(since)
        .fetch_all(&self.pool)
        .await?;

        Ok(events)
    }

    /// Holidays whose date falls within the given year, ordered by date.
    pub async fn holidays_for_year(&self, year: i32) -> Result<Vec<Holiday>> {
        let holidays = sqlx::query_as::<_, Holiday>(
            "SELECT day, title FROM holidays WHERE day BETWEEN ? AND ? ORDER BY day",
        )
        .bind(start_of_year(year))
        .bind(end_of_year(year))
        .fetch_all(&self.pool)
        .await?;

        Ok(holidays)
    }

    /// Replace all holidays within the year range covered by `holidays`.
    ///
    /// The transaction deletes every stored holiday between the start of the
    /// earliest year and the end of the latest year, then inserts the new
    /// set, so one call refreshes whole years atomically and repeating it is
    /// idempotent. The transaction rolls back on any error.
    pub async fn replace_holidays(&self, holidays: &[Holiday]) -> Result<()> {
        let Some(first) = holidays.first() else {
            return Ok(());
        };

        let mut min_day = first.day;
        let mut max_day = first.day;
        for holiday in &holidays[1..] {
            min_day = min_day.min(holiday.day);
            max_day = max_day.max(holiday.day);
        }

        let mut tx = self.pool.begin().await?;

        let deleted = sqlx::query("DELETE FROM holidays WHERE day BETWEEN ? AND ?")
            .bind(start_of_year(min_day.year()))
            .bind(end_of_year(max_day.year()))
            .execute(&mut *tx)
            .await?;

        for holiday in holidays {
            sqlx::query("INSERT OR REPLACE INTO holidays (day, title) VALUES (?, ?)")
                .bind(holiday.day)
                .bind(&holiday.title)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        info!(
            deleted = deleted.rows_affected(),
            inserted = holidays.len(),
            "replaced holidays"
        );
        Ok(())
    }
}

fn start_of_year(year: i32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, 1, 1).expect("January 1st always exists")
}

fn end_of_year(year: i32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, 12, 31).expect("December 31st always exists")
}
