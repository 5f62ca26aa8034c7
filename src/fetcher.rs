//! Periodic poller for the remote club-load endpoint.
//!
//! One immediate fetch runs before the worker starts; a failure there is a
//! configuration problem and aborts startup. Afterwards every tick fetches,
//! persists and forwards the event; per-tick errors are logged and absorbed.

use std::time::Duration;

use chrono::{SubsecRound, Utc};
use reqwest::header::{self, HeaderMap, HeaderValue};
use reqwest::StatusCode;
use serde::Deserialize;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info};

use crate::config::{DatabaseConfig, FetcherConfig};
use crate::domain::Event;
use crate::error::{GymError, Result};
use crate::storage::Store;

/// JSON structure of the club data returned by the API. Other fields
/// (`id`, `title`, ...) are ignored.
#[derive(Debug, Deserialize)]
struct Club {
    #[serde(rename = "currentLoad", default)]
    current_load: String,
}

/// Periodically fetches the current club load, persists it and emits it on
/// the outbound event channel.
pub struct LoadFetcher {
    store: Store,
    client: reqwest::Client,
    url: String,
    token: String,
    period: Duration,
    query_timeout: Duration,
}

impl LoadFetcher {
    pub fn new(store: Store, fetcher: &FetcherConfig, database: &DatabaseConfig) -> Self {
        Self {
            store,
            client: reqwest::Client::new(),
            url: fetcher.url.clone(),
            token: fetcher.auth_token(),
            period: fetcher.period(),
            query_timeout: database.query_timeout(),
        }
    }

    /// Perform one immediate fetch, then start the ticking worker.
    ///
    /// The event channel has capacity 1; if the consumer stalls, the send
    /// blocks and delays the next tick. The worker closes the channel before
    /// its handle completes.
    pub async fn run(
        self,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(JoinHandle<()>, mpsc::Receiver<Event>)> {
        let (tx, rx) = mpsc::channel(1);

        self.fetch(&tx)
            .await
            .map_err(|e| GymError::Fetch(format!("initial fetch: {e}")))?;

        let handle = tokio::spawn(async move {
            let mut ticker = interval(self.period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await; // the immediate tick; the initial fetch already ran
            info!(period = ?self.period, "fetcher starting");

            loop {
                tokio::select! {
                    _ = shutdown.recv() => {
                        info!("stopping fetcher");
                        break;
                    }
                    _ = ticker.tick() => {
                        info!("wake up fetcher");
                        if let Err(e) = self.fetch(&tx).await {
                            error!(error = %e, "fetch error");
                        }
                    }
                }
            }
            drop(tx); // close the event channel before completing
        });

        Ok((handle, rx))
    }

    /// Retrieve the current load, persist it and forward the event.
    pub async fn fetch(&self, events: &mpsc::Sender<Event>) -> Result<()> {
        let event = tokio::time::timeout(self.query_timeout, async {
            let load = self.get_load().await?;
            let event = Event::new(Utc::now().trunc_subsecs(0), load);
            self.store.save_event(&event).await?;
            Ok::<_, GymError>(event)
        })
        .await
        .map_err(|_| GymError::Fetch("fetch timed out".to_string()))??;

        events
            .send(event.clone())
            .await
            .map_err(|_| GymError::Fetch("event channel closed".to_string()))?;

        info!(timestamp = %event.timestamp, load = event.load, "fetched");
        Ok(())
    }

    async fn get_load(&self) -> Result<u8> {
        let response = self
            .client
            .get(&self.url)
            .headers(browser_headers())
            .header(header::AUTHORIZATION, &self.token)
            .send()
            .await?;

        if response.status() != StatusCode::OK {
            return Err(GymError::Fetch(format!(
                "unexpected status: {}",
                response.status()
            )));
        }

        let club: Club = response.json().await?;
        parse_current_load(&club.current_load)
    }
}

/// Parse the `currentLoad` value of the form `"<digits>[%]"`.
fn parse_current_load(value: &str) -> Result<u8> {
    if value.is_empty() {
        return Err(GymError::Fetch("currentLoad is not set".to_string()));
    }

    let load: u8 = value
        .trim_end_matches('%')
        .parse()
        .map_err(|e| GymError::Fetch(format!("parse currentLoad={value:?}: {e}")))?;

    if load > 100 {
        return Err(GymError::Fetch(format!(
            "currentLoad {load} out of range [0, 100]"
        )));
    }

    Ok(load)
}

/// The browser-like header set the upstream gates on. Non-semantic, but
/// required for the endpoint to answer.
fn browser_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
        header::ACCEPT,
        HeaderValue::from_static("application/json, text/javascript, */*; q=0.01"),
    );
    headers.insert(header::ACCEPT_LANGUAGE, HeaderValue::from_static("en"));
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(header::PRAGMA, HeaderValue::from_static("no-cache"));
    headers.insert(header::DNT, HeaderValue::from_static("1"));
    headers.insert(
        header::REFERER,
        HeaderValue::from_static(
            "Mozilla/5.0 (Macintosh; Intel Mac OS X 10.15; rv:145.0) Gecko/20100101 Firefox/145.0",
        ),
    );
    headers.insert(
        header::USER_AGENT,
        HeaderValue::from_static(
            "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 \
             (KHTML, like Gecko) Chrome/142.0.0.0 Safari/537.36",
        ),
    );
    headers.insert("X-Angular-Widget", HeaderValue::from_static("true"));
    headers.insert("X-Requested-With", HeaderValue::from_static("XMLHttpRequest"));
    headers.insert("Sec-Fetch-Dest", HeaderValue::from_static("empty"));
    headers.insert("Sec-Fetch-Mode", HeaderValue::from_static("cors"));
    headers.insert("Sec-Fetch-Site", HeaderValue::from_static("same-origin"));
    headers.insert(header::TE, HeaderValue::from_static("trailers"));
    headers
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;

    use axum::http::HeaderMap as AxumHeaderMap;
    use axum::routing::get;
    use axum::Json;
    use axum::Router;

    use super::*;

    #[test]
    fn test_parse_current_load() {
        assert_eq!(parse_current_load("34%").unwrap(), 34);
        assert_eq!(parse_current_load("0%").unwrap(), 0);
        assert_eq!(parse_current_load("100").unwrap(), 100);

        for invalid in ["101%", "abc%", "", "300%", "-5%", "12.5%"] {
            assert!(
                parse_current_load(invalid).is_err(),
                "{invalid:?} should be rejected"
            );
        }
    }

    async fn serve_club_json() -> SocketAddr {
        let app = Router::new().route(
            "/club",
            get(|headers: AxumHeaderMap| async move {
                assert_eq!(headers.get("authorization").unwrap(), "Bearer test-token");
                assert_eq!(headers.get("x-requested-with").unwrap(), "XMLHttpRequest");
                Json(serde_json::json!({
                    "id": 1,
                    "title": "X",
                    "currentLoad": "34%"
                }))
            }),
        );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        addr
    }

    fn fetcher(store: Store, url: String) -> LoadFetcher {
        let fetcher_cfg = FetcherConfig {
            active: true,
            period: 90,
            token: "test-token".to_string(),
            url,
        };
        let database_cfg = DatabaseConfig {
            path: ":memory:".to_string(),
            query_timeout: 5,
        };
        LoadFetcher::new(store, &fetcher_cfg, &database_cfg)
    }

    #[tokio::test]
    async fn test_fetch_persists_and_emits_event() {
        let addr = serve_club_json().await;
        let store = Store::connect_in_memory().await.unwrap();
        let fetcher = fetcher(store.clone(), format!("http://{addr}/club"));

        let (tx, mut rx) = mpsc::channel(1);
        let before = Utc::now().trunc_subsecs(0);
        fetcher.fetch(&tx).await.unwrap();
        let after = Utc::now();

        let event = rx.try_recv().unwrap();
        assert_eq!(event.load, 34);
        assert_eq!(event.timestamp.timestamp_subsec_nanos(), 0);
        assert!(event.timestamp >= before && event.timestamp <= after);

        let stored = store.all_events(10, 0).await.unwrap();
        assert_eq!(stored, vec![event]);
    }

    #[tokio::test]
    async fn test_fetch_rejects_bad_status() {
        let app = Router::new().route("/club", get(|| async { (StatusCode::FORBIDDEN, "no") }));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

        let store = Store::connect_in_memory().await.unwrap();
        let fetcher = fetcher(store.clone(), format!("http://{addr}/club"));

        let (tx, _rx) = mpsc::channel(1);
        let err = fetcher.fetch(&tx).await.unwrap_err();
        assert!(err.to_string().contains("unexpected status"));
        assert!(store.all_events(10, 0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_run_emits_initial_event_and_closes_on_shutdown() {
        let addr = serve_club_json().await;
        let store = Store::connect_in_memory().await.unwrap();
        let fetcher = fetcher(store, format!("http://{addr}/club"));

        let (shutdown_tx, _) = broadcast::channel(1);
        let (handle, mut rx) = fetcher.run(shutdown_tx.subscribe()).await.unwrap();

        let event = rx.recv().await.unwrap();
        assert_eq!(event.load, 34);

        shutdown_tx.send(()).unwrap();
        handle.await.unwrap();
        // producer closed the channel on its way out
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_run_fails_fast_on_unreachable_endpoint() {
        let store = Store::connect_in_memory().await.unwrap();
        let fetcher = fetcher(store, "http://127.0.0.1:1/club".to_string());

        let (shutdown_tx, _) = broadcast::channel::<()>(1);
        assert!(fetcher.run(shutdown_tx.subscribe()).await.is_err());
    }
}
