//! CSV Persistence Module
//!
//! Append-only storage of ratio samples. The full series is kept in memory
//! behind an async RwLock and mirrored to `samples/ratio_samples.csv`; the
//! file is reloaded at startup so the store survives restarts.

pub mod subscribers;

pub use subscribers::SubscriberRegistry;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use csv::{ReaderBuilder, WriterBuilder};
use rust_decimal::Decimal;
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use tokio::sync::RwLock as AsyncRwLock;
use tracing::info;

use crate::error::StoreError;
use crate::types::RatioSample;

/// Samples and their writer share one lock so an append is either fully
/// visible (memory + file) or not at all.
struct StoreInner {
    samples: Vec<RatioSample>,
    next_id: u64,
    writer: csv::Writer<std::fs::File>,
}

/// Append-only ratio sample store
pub struct RatioStore {
    inner: AsyncRwLock<StoreInner>,
}

impl RatioStore {
    /// Open the store under `data_dir`, reloading any existing series.
    pub fn new(data_dir: &str) -> Result<Self> {
        let data_dir = PathBuf::from(data_dir);

        fs::create_dir_all(data_dir.join("samples"))
            .context("Failed to create data directory")?;

        let path = data_dir.join("samples").join("ratio_samples.csv");
        let samples = Self::load_samples(&path)?;
        let next_id = samples.last().map(|s| s.id + 1).unwrap_or(1);

        if !samples.is_empty() {
            info!(
                count = samples.len(),
                latest = %samples[samples.len() - 1].timestamp,
                "Reloaded ratio series from disk"
            );
        }

        let writer = Self::create_writer(&path)?;

        Ok(Self {
            inner: AsyncRwLock::new(StoreInner {
                samples,
                next_id,
                writer,
            }),
        })
    }

    fn create_writer(path: &Path) -> Result<csv::Writer<std::fs::File>> {
        let file_has_data =
            path.exists() && fs::metadata(path).map(|m| m.len() > 0).unwrap_or(false);

        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .append(true)
            .open(path)
            .context("Failed to open sample CSV file")?;

        let writer = WriterBuilder::new()
            .has_headers(!file_has_data)
            .from_writer(file);

        Ok(writer)
    }

    fn load_samples(path: &Path) -> Result<Vec<RatioSample>> {
        if !path.exists() {
            return Ok(Vec::new());
        }

        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .from_path(path)
            .context("Failed to open sample CSV file for reload")?;

        let mut samples = Vec::new();
        for record in reader.deserialize::<RatioSample>() {
            samples.push(record.context("Failed to parse persisted sample")?);
        }
        Ok(samples)
    }

    /// Append a new sample, assigning the next surrogate id.
    ///
    /// Refuses non-positive ratios (`InvalidSample`) and non-increasing
    /// timestamps (`OutOfOrder`); the store is left unchanged on either.
    pub async fn append(
        &self,
        ratio: Decimal,
        timestamp: DateTime<Utc>,
    ) -> Result<RatioSample, StoreError> {
        if ratio <= Decimal::ZERO {
            return Err(StoreError::InvalidSample { ratio });
        }

        let mut inner = self.inner.write().await;

        if let Some(latest) = inner.samples.last() {
            if timestamp <= latest.timestamp {
                return Err(StoreError::OutOfOrder {
                    candidate: timestamp,
                    latest: latest.timestamp,
                });
            }
        }

        let sample = RatioSample {
            id: inner.next_id,
            timestamp,
            ratio,
        };

        inner.writer.serialize(&sample)?;
        inner.writer.flush()?;

        inner.next_id += 1;
        inner.samples.push(sample.clone());

        Ok(sample)
    }

    /// The most recent sample.
    pub async fn latest(&self) -> Result<RatioSample, StoreError> {
        let inner = self.inner.read().await;
        inner.samples.last().cloned().ok_or(StoreError::NotFound)
    }

    /// The `n` most recent samples in descending-time order.
    pub async fn previous(&self, n: usize) -> Result<Vec<RatioSample>, StoreError> {
        let inner = self.inner.read().await;
        if inner.samples.len() < n {
            return Err(StoreError::InsufficientHistory {
                have: inner.samples.len(),
                need: n,
            });
        }
        Ok(inner.samples.iter().rev().take(n).cloned().collect())
    }

    /// Samples inside the inclusive window, ascending by timestamp.
    /// Unbounded ends are open.
    pub async fn range(
        &self,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Vec<RatioSample> {
        let inner = self.inner.read().await;
        inner
            .samples
            .iter()
            .filter(|s| from.map_or(true, |f| s.timestamp >= f))
            .filter(|s| to.map_or(true, |t| s.timestamp <= t))
            .cloned()
            .collect()
    }

    /// Number of stored samples.
    pub async fn len(&self) -> usize {
        self.inner.read().await.samples.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn temp_data_dir() -> String {
        let dir = std::env::temp_dir().join(format!("xsushi-store-{}", uuid::Uuid::new_v4()));
        dir.to_string_lossy().to_string()
    }

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    #[tokio::test]
    async fn append_then_latest_round_trips() {
        let store = RatioStore::new(&temp_data_dir()).unwrap();

        let sample = store.append(dec!(0.6150), ts(0)).await.unwrap();
        assert_eq!(sample.id, 1);

        let latest = store.latest().await.unwrap();
        assert_eq!(latest, sample);
    }

    #[tokio::test]
    async fn out_of_order_append_is_rejected_and_store_unchanged() {
        let store = RatioStore::new(&temp_data_dir()).unwrap();
        store.append(dec!(0.60), ts(10)).await.unwrap();

        let equal = store.append(dec!(0.61), ts(10)).await;
        assert!(matches!(equal, Err(StoreError::OutOfOrder { .. })));

        let earlier = store.append(dec!(0.61), ts(5)).await;
        assert!(matches!(earlier, Err(StoreError::OutOfOrder { .. })));

        assert_eq!(store.len().await, 1);
        assert_eq!(store.latest().await.unwrap().ratio, dec!(0.60));
    }

    #[tokio::test]
    async fn non_positive_ratio_is_invalid() {
        let store = RatioStore::new(&temp_data_dir()).unwrap();

        let zero = store.append(dec!(0), ts(0)).await;
        assert!(matches!(zero, Err(StoreError::InvalidSample { .. })));

        let negative = store.append(dec!(-0.5), ts(0)).await;
        assert!(matches!(negative, Err(StoreError::InvalidSample { .. })));
        assert_eq!(store.len().await, 0);
    }

    #[tokio::test]
    async fn previous_needs_enough_history() {
        let store = RatioStore::new(&temp_data_dir()).unwrap();
        store.append(dec!(0.60), ts(0)).await.unwrap();

        let result = store.previous(2).await;
        assert!(matches!(
            result,
            Err(StoreError::InsufficientHistory { have: 1, need: 2 })
        ));

        store.append(dec!(0.61), ts(60)).await.unwrap();
        let pair = store.previous(2).await.unwrap();
        assert_eq!(pair[0].ratio, dec!(0.61));
        assert_eq!(pair[1].ratio, dec!(0.60));
    }

    #[tokio::test]
    async fn range_is_inclusive_ascending_and_empty_window_is_ok() {
        let store = RatioStore::new(&temp_data_dir()).unwrap();
        store.append(dec!(0.60), ts(0)).await.unwrap();
        store.append(dec!(0.61), ts(60)).await.unwrap();
        store.append(dec!(0.62), ts(120)).await.unwrap();

        let empty = store.range(Some(ts(200)), Some(ts(300))).await;
        assert!(empty.is_empty());

        let open_upper = store.range(Some(ts(60)), None).await;
        assert_eq!(open_upper.len(), 2);
        assert_eq!(open_upper[0].ratio, dec!(0.61));
        assert_eq!(open_upper[1].ratio, dec!(0.62));

        let bounded = store.range(Some(ts(0)), Some(ts(60))).await;
        assert_eq!(bounded.len(), 2);
    }

    #[tokio::test]
    async fn series_survives_a_restart() {
        let data_dir = temp_data_dir();

        {
            let store = RatioStore::new(&data_dir).unwrap();
            store.append(dec!(0.60), ts(0)).await.unwrap();
            store.append(dec!(0.615), ts(3600)).await.unwrap();
        }

        let reopened = RatioStore::new(&data_dir).unwrap();
        assert_eq!(reopened.len().await, 2);
        assert_eq!(reopened.latest().await.unwrap().ratio, dec!(0.615));

        // ids keep counting from where the previous process stopped
        let next = reopened.append(dec!(0.62), ts(7200)).await.unwrap();
        assert_eq!(next.id, 3);
    }
}
