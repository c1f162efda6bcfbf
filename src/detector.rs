//! Change detector
//!
//! Compares the two newest persisted samples and surfaces every computed
//! change, zero included. Whether an event is worth dispatching is the
//! dispatcher's policy, not the detector's.

use rust_decimal::Decimal;
use std::sync::Arc;

use crate::error::StoreError;
use crate::persistence::RatioStore;
use crate::types::ChangeEvent;

/// Signed percent change from `previous` to `current`, 2 decimal places.
pub fn delta_percent(previous: Decimal, current: Decimal) -> Decimal {
    ((current - previous) / previous * Decimal::ONE_HUNDRED).round_dp(2)
}

pub struct ChangeDetector {
    store: Arc<RatioStore>,
}

impl ChangeDetector {
    pub fn new(store: Arc<RatioStore>) -> Self {
        Self { store }
    }

    /// Compare the two newest samples.
    ///
    /// `Ok(None)` while the series holds fewer than two samples; that is the
    /// expected state right after the first-ever poll, not an error.
    pub async fn detect(&self) -> Result<Option<ChangeEvent>, StoreError> {
        let pair = match self.store.previous(2).await {
            Ok(pair) => pair,
            Err(StoreError::InsufficientHistory { .. }) => return Ok(None),
            Err(e) => return Err(e),
        };

        let current = &pair[0];
        let previous = &pair[1];

        Ok(Some(ChangeEvent {
            previous_ratio: previous.ratio,
            current_ratio: current.ratio,
            delta_percent: delta_percent(previous.ratio, current.ratio),
            timestamp: current.timestamp,
        }))
    }
}
