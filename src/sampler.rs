//! Sampler
//!
//! One fetch and one append per tick. No retry inside a tick; a failed poll
//! leaves a gap in the series and the next tick is the retry.

use chrono::Utc;
use std::sync::Arc;
use tracing::info;

use crate::error::SampleError;
use crate::persistence::RatioStore;
use crate::source::RatioSource;
use crate::types::RatioSample;

pub struct Sampler {
    source: Arc<dyn RatioSource>,
    store: Arc<RatioStore>,
}

impl Sampler {
    pub fn new(source: Arc<dyn RatioSource>, store: Arc<RatioStore>) -> Self {
        Self { source, store }
    }

    /// Fetch one reading and persist it.
    ///
    /// Source failures and store rejections propagate to the caller (the
    /// tick pipeline), which logs and skips the tick.
    pub async fn poll(&self) -> Result<RatioSample, SampleError> {
        let ratio = self.source.fetch_ratio().await?;
        let sample = self.store.append(ratio, Utc::now()).await?;
        info!(id = sample.id, ratio = %sample.ratio, "Sampled ratio");
        Ok(sample)
    }
}
