//! Bulk import of historical events from a headered CSV file of
//! `timestamp, load` rows. Timestamps are parsed in the configured zone and
//! stored in UTC; rows are written in chunks inside transactions.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use chrono::{NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use tracing::{debug, info};

use crate::domain::Event;
use crate::error::{GymError, Result};
use crate::storage::Store;

const CHUNK_SIZE: usize = 250;
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Import events from a CSV file into storage. Returns the imported count.
pub async fn import_csv<P: AsRef<Path>>(store: &Store, path: P, tz: Tz) -> Result<u64> {
    let file = File::open(path.as_ref())?;
    let count = import_from_reader(store, file, tz).await?;
    info!(count, path = %path.as_ref().display(), "import complete");
    Ok(count)
}

async fn import_from_reader<R: Read>(store: &Store, reader: R, tz: Tz) -> Result<u64> {
    let mut csv_reader = csv::Reader::from_reader(reader);
    let mut chunk = Vec::with_capacity(CHUNK_SIZE);
    let mut count = 0u64;

    for (i, record) in csv_reader.records().enumerate() {
        let record = record?;
        let event = parse_record(&record, tz)
            .map_err(|e| GymError::Import(format!("record {}: {e}", i + 1)))?;

        chunk.push(event);
        if chunk.len() == CHUNK_SIZE {
            store.save_events(&chunk).await?;
            count += chunk.len() as u64;
            debug!(count, "imported chunk");
            chunk.clear();
        }
    }

    store.save_events(&chunk).await?;
    count += chunk.len() as u64;

    Ok(count)
}

fn parse_record(record: &csv::StringRecord, tz: Tz) -> Result<Event> {
    if record.len() < 2 {
        return Err(GymError::Import(format!(
            "invalid record length: {}",
            record.len()
        )));
    }

    let naive = NaiveDateTime::parse_from_str(&record[0], TIMESTAMP_FORMAT)
        .map_err(|e| GymError::Import(format!("parse timestamp {:?}: {e}", &record[0])))?;
    let timestamp = tz
        .from_local_datetime(&naive)
        .single()
        .ok_or_else(|| GymError::Import(format!("ambiguous timestamp {:?}", &record[0])))?
        .with_timezone(&Utc);

    let load: u8 = record[1]
        .parse()
        .map_err(|e| GymError::Import(format!("parse load {:?}: {e}", &record[1])))?;
    if load > 100 {
        return Err(GymError::Import(format!("load {load} out of range [0, 100]")));
    }

    Ok(Event::new(timestamp, load))
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone as _;
    use std::io::Cursor;

    use super::*;

    #[tokio::test]
    async fn test_import_parses_and_stores_in_utc() {
        let store = Store::connect_in_memory().await.unwrap();
        let csv = "timestamp,load\n\
                   2025-01-06 10:00:00,50\n\
                   2025-01-06 10:01:30,60\n";

        let count = import_from_reader(&store, Cursor::new(csv), chrono_tz::Europe::Moscow)
            .await
            .unwrap();
        assert_eq!(count, 2);

        let events = store.all_events(10, 0).await.unwrap();
        // 10:00 Moscow is 07:00 UTC
        assert_eq!(
            events[0].timestamp,
            Utc.with_ymd_and_hms(2025, 1, 6, 7, 0, 0).unwrap()
        );
        assert_eq!(events[0].load, 50);
        assert_eq!(events[1].load, 60);
    }

    #[tokio::test]
    async fn test_import_spans_multiple_chunks() {
        let store = Store::connect_in_memory().await.unwrap();

        let mut csv = String::from("timestamp,load\n");
        for i in 0..600u32 {
            let minute = i % 60;
            let hour = i / 60;
            csv.push_str(&format!("2025-01-06 {hour:02}:{minute:02}:00,40\n"));
        }

        let count = import_from_reader(&store, Cursor::new(csv), Tz::UTC)
            .await
            .unwrap();
        assert_eq!(count, 600);
        assert_eq!(store.all_events(1000, 0).await.unwrap().len(), 600);
    }

    #[tokio::test]
    async fn test_import_rejects_bad_rows() {
        let store = Store::connect_in_memory().await.unwrap();

        for bad in [
            "timestamp,load\nnot-a-date,50\n",
            "timestamp,load\n2025-01-06 10:00:00,abc\n",
            "timestamp,load\n2025-01-06 10:00:00,101\n",
            "timestamp,load\n2025-01-06 10:00:00,300\n",
        ] {
            let err = import_from_reader(&store, Cursor::new(bad), Tz::UTC)
                .await
                .unwrap_err();
            assert!(matches!(err, GymError::Import(_)), "{bad:?} -> {err}");
        }

        assert!(store.all_events(10, 0).await.unwrap().is_empty());
    }
}
