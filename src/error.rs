//! Error taxonomy for the tracker
//!
//! Store and source failures are typed so callers can tell expected
//! transient states (`InsufficientHistory`, `NotFound`) from faults that
//! mean a tick must be skipped or a write refused.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use thiserror::Error;

/// Failures raised by the ratio store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Reading failed validation at the append boundary. Discarded, no write.
    #[error("invalid sample: ratio must be positive, got {ratio}")]
    InvalidSample { ratio: Decimal },

    /// Candidate timestamp does not advance past the stored head. This is an
    /// upstream ordering bug; the store is left unchanged.
    #[error("out-of-order append: {candidate} is not after latest {latest}")]
    OutOfOrder {
        candidate: DateTime<Utc>,
        latest: DateTime<Utc>,
    },

    /// The store holds no samples yet.
    #[error("no samples stored")]
    NotFound,

    /// Fewer samples than the query needs. Expected while the series warms up.
    #[error("insufficient history: have {have}, need {need}")]
    InsufficientHistory { have: usize, need: usize },

    #[error("sample persistence I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("sample serialization failed: {0}")]
    Csv(#[from] csv::Error),
}

/// Failures of one fetch attempt against the external value source.
#[derive(Debug, Error)]
pub enum SourceError {
    /// Transport or HTTP failure. The tick is skipped, leaving a gap.
    #[error("source unavailable: {0}")]
    Unavailable(String),

    /// The source answered, but not with a usable reading.
    #[error("source anomaly: {0}")]
    Anomaly(String),
}

impl From<reqwest::Error> for SourceError {
    fn from(err: reqwest::Error) -> Self {
        SourceError::Unavailable(err.to_string())
    }
}

/// What went wrong inside one sampling tick.
#[derive(Debug, Error)]
pub enum SampleError {
    #[error(transparent)]
    Source(#[from] SourceError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Failure of one delivery attempt to one recipient.
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// Worth retrying on the next event; the recipient stays subscribed.
    #[error("transient delivery failure: {0}")]
    Transient(String),

    /// The recipient can never again be reached through this channel.
    #[error("permanent delivery failure: {0}")]
    Permanent(String),
}

impl DeliveryError {
    pub fn is_permanent(&self) -> bool {
        matches!(self, DeliveryError::Permanent(_))
    }
}
