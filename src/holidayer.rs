//! Periodic poller for the holiday calendar.
//!
//! Each fetch pulls the XML calendar for the current year and the next one,
//! flattens it to `Holiday` rows and replaces both years in storage inside a
//! single transaction. Response example:
//!
//! ```xml
//! <calendar year="2025" lang="ru" date="2024.12.01">
//!   <holidays>
//!     <holiday id="1" title="title-1"/>
//!     <holiday id="2" title="title-2"/>
//!   </holidays>
//!   <days>
//!     <day d="01.01" t="1" h="1"/>
//!     <day d="01.02" t="2" h="1"/>
//!     <day d="12.31" t="1" f="01.05"/>
//!   </days>
//! </calendar>
//! ```

use std::collections::HashMap;
use std::time::Duration;

use chrono::{Datelike, NaiveDate, Utc};
use chrono_tz::Tz;
use reqwest::StatusCode;
use serde::Deserialize;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::config::{DatabaseConfig, HolidayerConfig};
use crate::domain::Holiday;
use crate::error::{GymError, Result};
use crate::storage::Store;

const YEAR_TEMPLATE: &str = "<YEAR>";
/// A full holiday (t = 1) or a shortened working day (t = 2).
const DAY_TYPE_HOLIDAY: u8 = 1;
const DAY_TYPE_SHORT: u8 = 2;
/// Response bodies above this size are rejected to prevent memory exhaustion.
const MAX_RESPONSE_SIZE: usize = 1 << 20;

#[derive(Debug, Deserialize)]
struct XmlCalendar {
    #[serde(rename = "@year")]
    year: i32,
    holidays: XmlHolidays,
    days: XmlDays,
}

#[derive(Debug, Deserialize)]
struct XmlHolidays {
    #[serde(rename = "holiday", default)]
    items: Vec<XmlHoliday>,
}

#[derive(Debug, Deserialize)]
struct XmlHoliday {
    #[serde(rename = "@id")]
    id: i64,
    #[serde(rename = "@title")]
    title: String,
}

#[derive(Debug, Deserialize)]
struct XmlDays {
    #[serde(rename = "day", default)]
    items: Vec<XmlDay>,
}

#[derive(Debug, Deserialize)]
struct XmlDay {
    /// `MM.DD` within the calendar's year
    #[serde(rename = "@d")]
    date: String,
    #[serde(rename = "@t")]
    day_type: u8,
    /// Reference into the `holidays` section; optional
    #[serde(rename = "@h")]
    holiday: Option<i64>,
}

/// Periodically refreshes the persisted holiday calendar.
pub struct HolidayFetcher {
    store: Store,
    client: reqwest::Client,
    url: String,
    tz: Tz,
    period: Duration,
    query_timeout: Duration,
}

impl HolidayFetcher {
    pub fn new(store: Store, tz: Tz, holidayer: &HolidayerConfig, database: &DatabaseConfig) -> Self {
        Self {
            store,
            client: reqwest::Client::new(),
            url: holidayer.url.clone(),
            tz,
            period: holidayer.period(),
            query_timeout: database.query_timeout(),
        }
    }

    /// Perform one immediate fetch, then start the ticking worker.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) -> Result<JoinHandle<()>> {
        self.fetch()
            .await
            .map_err(|e| GymError::Fetch(format!("initial holidays fetch: {e}")))?;

        let handle = tokio::spawn(async move {
            let mut ticker = interval(self.period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await; // the immediate tick; the initial fetch already ran
            info!(period = ?self.period, "holidayer starting");

            loop {
                tokio::select! {
                    _ = shutdown.recv() => {
                        info!("stopping holidayer");
                        return;
                    }
                    _ = ticker.tick() => {
                        info!("wake up holidayer");
                        if let Err(e) = self.fetch().await {
                            error!(error = %e, "holidayer error");
                        }
                    }
                }
            }
        });

        Ok(handle)
    }

    /// Fetch holidays for the current and the next year and replace both
    /// year ranges in one transaction.
    pub async fn fetch(&self) -> Result<()> {
        tokio::time::timeout(self.query_timeout, async {
            let year = Utc::now().with_timezone(&self.tz).year();

            let mut holidays = self.get_holidays(year).await?;
            holidays.extend(self.get_holidays(year + 1).await?);

            self.store.replace_holidays(&holidays).await?;

            info!(count = holidays.len(), "holidayer fetched");
            Ok(())
        })
        .await
        .map_err(|_| GymError::Fetch("holidays fetch timed out".to_string()))?
    }

    /// Download and flatten the calendar for one year.
    async fn get_holidays(&self, year: i32) -> Result<Vec<Holiday>> {
        let url = self.url.replacen(YEAR_TEMPLATE, &year.to_string(), 1);
        debug!(url, year, "fetching holidays");

        let response = self.client.get(&url).send().await?;

        if response.status() != StatusCode::OK {
            return Err(GymError::Fetch(format!(
                "unexpected status: {}",
                response.status()
            )));
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        if !content_type.starts_with("text/xml") && !content_type.starts_with("application/xml") {
            return Err(GymError::Fetch(format!(
                "unexpected content type: {content_type}"
            )));
        }

        let body = read_limited(response).await?;
        parse_calendar(&body)
    }
}

/// Read the response body, rejecting anything above `MAX_RESPONSE_SIZE`.
async fn read_limited(mut response: reqwest::Response) -> Result<String> {
    let mut body = Vec::new();
    while let Some(chunk) = response.chunk().await? {
        if body.len() + chunk.len() > MAX_RESPONSE_SIZE {
            return Err(GymError::Fetch(format!(
                "response body exceeds {MAX_RESPONSE_SIZE} bytes"
            )));
        }
        body.extend_from_slice(&chunk);
    }

    String::from_utf8(body).map_err(|e| GymError::Fetch(format!("response is not UTF-8: {e}")))
}

/// Flatten a calendar document into holiday rows. Only full holidays and
/// short days participate; the title comes from the referenced `holidays`
/// entry and is empty for a missing reference.
fn parse_calendar(body: &str) -> Result<Vec<Holiday>> {
    let calendar: XmlCalendar = quick_xml::de::from_str(body)?;

    let titles: HashMap<i64, String> = calendar
        .holidays
        .items
        .into_iter()
        .map(|h| (h.id, h.title))
        .collect();

    if calendar.days.items.is_empty() {
        warn!(year = calendar.year, "no holidays found in the response");
        return Ok(Vec::new());
    }

    let mut holidays = Vec::with_capacity(calendar.days.items.len());
    for day in &calendar.days.items {
        if day.day_type != DAY_TYPE_HOLIDAY && day.day_type != DAY_TYPE_SHORT {
            continue;
        }

        let date = parse_month_day(&day.date, calendar.year)?;
        let title = day
            .holiday
            .and_then(|id| titles.get(&id))
            .cloned()
            .unwrap_or_default();

        holidays.push(Holiday { day: date, title });
    }

    info!(
        holidays = holidays.len(),
        year = calendar.year,
        "collected holidays"
    );
    Ok(holidays)
}

/// Parse a `MM.DD` date within the given year.
fn parse_month_day(value: &str, year: i32) -> Result<NaiveDate> {
    let parse = |part: Option<&str>| {
        part.and_then(|p| p.parse::<u32>().ok())
            .ok_or_else(|| GymError::Fetch(format!("parse date {value:?}")))
    };

    let mut parts = value.split('.');
    let month = parse(parts.next())?;
    let day = parse(parts.next())?;
    if parts.next().is_some() {
        return Err(GymError::Fetch(format!("parse date {value:?}")));
    }

    NaiveDate::from_ymd_opt(year, month, day)
        .ok_or_else(|| GymError::Fetch(format!("invalid date {value:?} in year {year}")))
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;

    use axum::extract::{Path, State};
    use axum::http::header::CONTENT_TYPE;
    use axum::routing::get;
    use axum::Router;

    use super::*;

    const CALENDAR_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<calendar year="2024" lang="ru" date="2023.12.01">
  <holidays>
    <holiday id="1" title="New"/>
    <holiday id="2" title="Unused"/>
  </holidays>
  <days>
    <day d="03.01" t="1" h="1"/>
  </days>
</calendar>"#;

    #[test]
    fn test_parse_calendar() {
        let xml = r#"<calendar year="2025">
  <holidays>
    <holiday id="1" title="New Year"/>
  </holidays>
  <days>
    <day d="01.01" t="1" h="1"/>
    <day d="01.02" t="2" h="1"/>
    <day d="02.10" t="3"/>
    <day d="12.31" t="1" f="01.05"/>
  </days>
</calendar>"#;

        let holidays = parse_calendar(xml).unwrap();
        assert_eq!(
            holidays,
            vec![
                Holiday {
                    day: NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
                    title: "New Year".to_string(),
                },
                Holiday {
                    day: NaiveDate::from_ymd_opt(2025, 1, 2).unwrap(),
                    title: "New Year".to_string(),
                },
                // day without a holiday reference gets an empty title
                Holiday {
                    day: NaiveDate::from_ymd_opt(2025, 12, 31).unwrap(),
                    title: String::new(),
                },
            ]
        );
    }

    #[test]
    fn test_parse_calendar_empty_days() {
        let xml = r#"<calendar year="2025"><holidays/><days/></calendar>"#;
        assert!(parse_calendar(xml).unwrap().is_empty());
    }

    #[test]
    fn test_parse_month_day_rejects_garbage() {
        assert_eq!(
            parse_month_day("03.01", 2024).unwrap(),
            NaiveDate::from_ymd_opt(2024, 3, 1).unwrap()
        );
        for invalid in ["13.01", "02.30", "0301", "03.01.02", "ab.cd", ""] {
            assert!(parse_month_day(invalid, 2024).is_err(), "{invalid:?}");
        }
    }

    /// Serve `CALENDAR_XML` with the year attribute rewritten to the one
    /// requested, so `fetch` works for any current year.
    async fn serve_calendar(content_type: &'static str) -> SocketAddr {
        let app = Router::new().route(
            "/calendar/{year}",
            get(
                |Path(year): Path<i32>, State(content_type): State<&'static str>| async move {
                    let body = CALENDAR_XML.replace("year=\"2024\"", &format!("year=\"{year}\""));
                    ([(CONTENT_TYPE, content_type)], body)
                },
            ),
        );
        let app = app.with_state(content_type);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        addr
    }

    async fn holidayer(store: Store, addr: SocketAddr) -> HolidayFetcher {
        let holidayer_cfg = HolidayerConfig {
            active: true,
            period: 86_400,
            url: format!("http://{addr}/calendar/<YEAR>"),
        };
        let database_cfg = DatabaseConfig {
            path: ":memory:".to_string(),
            query_timeout: 5,
        };
        HolidayFetcher::new(store, Tz::UTC, &holidayer_cfg, &database_cfg)
    }

    #[tokio::test]
    async fn test_get_holidays_range_replace() {
        let addr = serve_calendar("text/xml; charset=utf-8").await;
        let store = Store::connect_in_memory().await.unwrap();

        // preloaded 2024 state that the refresh must wipe
        store
            .replace_holidays(&[
                Holiday {
                    day: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
                    title: "Old1".to_string(),
                },
                Holiday {
                    day: NaiveDate::from_ymd_opt(2024, 6, 1).unwrap(),
                    title: "Old2".to_string(),
                },
            ])
            .await
            .unwrap();

        let fetcher = holidayer(store.clone(), addr).await;
        let holidays = fetcher.get_holidays(2024).await.unwrap();
        store.replace_holidays(&holidays).await.unwrap();

        let stored = store.holidays_for_year(2024).await.unwrap();
        assert_eq!(
            stored,
            vec![Holiday {
                day: NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
                title: "New".to_string(),
            }]
        );
    }

    #[tokio::test]
    async fn test_fetch_is_idempotent() {
        let addr = serve_calendar("application/xml").await;
        let store = Store::connect_in_memory().await.unwrap();
        let fetcher = holidayer(store.clone(), addr).await;

        fetcher.fetch().await.unwrap();
        let year = Utc::now().year();
        let first = store.holidays_for_year(year).await.unwrap();
        assert_eq!(first.len(), 1);
        assert!(!store.holidays_for_year(year + 1).await.unwrap().is_empty());

        fetcher.fetch().await.unwrap();
        assert_eq!(store.holidays_for_year(year).await.unwrap(), first);
    }

    #[tokio::test]
    async fn test_wrong_content_type_is_rejected() {
        let addr = serve_calendar("text/html").await;
        let store = Store::connect_in_memory().await.unwrap();
        let fetcher = holidayer(store, addr).await;

        let err = fetcher.get_holidays(2024).await.unwrap_err();
        assert!(err.to_string().contains("unexpected content type"));
    }

    #[tokio::test]
    async fn test_run_performs_initial_fetch() {
        let addr = serve_calendar("text/xml").await;
        let store = Store::connect_in_memory().await.unwrap();
        let fetcher = holidayer(store.clone(), addr).await;

        let (shutdown_tx, _) = broadcast::channel(1);
        let handle = fetcher.run(shutdown_tx.subscribe()).await.unwrap();

        assert!(!store
            .holidays_for_year(Utc::now().year())
            .await
            .unwrap()
            .is_empty());

        shutdown_tx.send(()).unwrap();
        handle.await.unwrap();
    }
}
