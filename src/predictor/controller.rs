use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::config::AppConfig;
use crate::domain::Event;
use crate::error::Result;
use crate::predictor::checker::CalendarChecker;
use crate::predictor::engine::Predictor;
use crate::storage::Store;

const BACKFILL_PAGE_SIZE: i64 = 1000;

/// Wires the predictor to storage and the live event stream.
pub struct Controller {
    predictor: Arc<Predictor>,
    events: Option<mpsc::Receiver<Event>>,
    pub hours: u8,
}

impl Controller {
    /// Build the holiday checker from storage, create a fresh predictor and
    /// backfill it with every persisted event in ascending timestamp order,
    /// so the decay arithmetic matches online ingestion.
    pub async fn new(
        store: &Store,
        events: Option<mpsc::Receiver<Event>>,
        cfg: &AppConfig,
    ) -> Result<Self> {
        let tz = cfg.base.timezone()?;
        let checker = CalendarChecker::from_store(store, tz).await?;

        let controller = Self {
            predictor: Arc::new(Predictor::new(Some(Arc::new(checker)), tz)),
            events,
            hours: cfg.predictor.hours,
        };
        controller.backfill(store).await?;

        Ok(controller)
    }

    /// Page through all persisted events and ingest them.
    async fn backfill(&self, store: &Store) -> Result<()> {
        let mut offset = 0i64;

        loop {
            let events = store.all_events(BACKFILL_PAGE_SIZE, offset).await?;
            if events.is_empty() {
                break;
            }

            offset += events.len() as i64;
            for event in &events {
                self.predictor.ingest(event);
            }
            debug!(offset, "backfill progress");
        }

        info!(events = offset, "predictor backfill complete");
        Ok(())
    }

    /// Consume the live event stream until it closes or shutdown fires.
    ///
    /// Without an event channel the returned handle is already complete.
    pub fn run(&mut self, mut shutdown: broadcast::Receiver<()>) -> JoinHandle<()> {
        let Some(mut events) = self.events.take() else {
            info!("no event channel provided, predictor controller will not run");
            return tokio::spawn(async {});
        };

        let predictor = Arc::clone(&self.predictor);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.recv() => {
                        info!("stopping predictor controller");
                        return;
                    }
                    event = events.recv() => {
                        let Some(event) = event else {
                            info!("event channel closed, stopping predictor controller");
                            return;
                        };
                        debug!(?event, "predictor received event");
                        predictor.ingest(&event);
                    }
                }
            }
        })
    }

    /// Synthetic forecast events: the current typical load followed by one
    /// prediction per hour of the horizon.
    pub fn predict_load(&self, hours: u8) -> Vec<Event> {
        let now = Utc::now();
        let predictions = self.predictor.predict_range(hours);

        let mut events = Vec::with_capacity(predictions.len() + 1);
        events.push(Event {
            timestamp: now,
            load: 0,
            predict: Some(self.predictor.typical_load(now)),
        });
        for p in predictions {
            events.push(Event {
                timestamp: p.target_time,
                load: 0,
                predict: Some(p.load),
            });
        }

        events
    }

    /// Shared predictor handle, mainly for diagnostics.
    pub fn predictor(&self) -> &Arc<Predictor> {
        &self.predictor
    }
}
