//! Core types used throughout the tracker
//!
//! Defines the persisted sample and subscriber records, the per-tick change
//! event, and the two display orientations of the ratio.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// One persisted ratio reading
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RatioSample {
    /// Surrogate sequence number, assigned by the store
    pub id: u64,
    /// Instant the sample was taken (UTC), strictly increasing
    pub timestamp: DateTime<Utc>,
    /// Sushi-per-xSushi ratio, quantized to 4 decimal places
    pub ratio: Decimal,
}

/// One opted-in notification recipient
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscriber {
    /// Chat id on the delivery platform
    pub user_id: i64,
    /// When the subscription was created
    pub subscribed_at: DateTime<Utc>,
}

/// Delta between the two newest samples. Rebuilt every tick, never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    pub previous_ratio: Decimal,
    pub current_ratio: Decimal,
    /// Signed percent change of the stored orientation, 2 decimal places
    pub delta_percent: Decimal,
    /// Timestamp of the newer sample
    pub timestamp: DateTime<Utc>,
}

impl ChangeEvent {
    /// Signed percent change as seen in the given orientation, 2 decimal
    /// places.
    ///
    /// Computed from the projected values at both timestamps, not by negating
    /// `delta_percent`: percentage change is not invariant under inversion.
    pub fn delta_for(&self, orientation: Orientation) -> Decimal {
        let previous = orientation.project(self.previous_ratio);
        let current = orientation.project(self.current_ratio);
        ((current - previous) / previous * Decimal::ONE_HUNDRED).round_dp(2)
    }
}

/// The two reciprocal forms of the ratio.
///
/// The store always holds Sushi-per-xSushi; the other form is derived on
/// read. Deltas must be recomputed per orientation because percentage change
/// does not survive inversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Orientation {
    /// Sushi per xSushi, as stored
    SushiPerXSushi,
    /// xSushi per Sushi, the reciprocal
    XSushiPerSushi,
}

impl Default for Orientation {
    fn default() -> Self {
        Orientation::SushiPerXSushi
    }
}

impl Orientation {
    /// Project a stored ratio into this orientation, 4 decimal places
    pub fn project(&self, ratio: Decimal) -> Decimal {
        match self {
            Orientation::SushiPerXSushi => ratio,
            Orientation::XSushiPerSushi => (Decimal::ONE / ratio).round_dp(4),
        }
    }
}

impl fmt::Display for Orientation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Orientation::SushiPerXSushi => write!(f, "Sushi/xSushi"),
            Orientation::XSushiPerSushi => write!(f, "xSushi/Sushi"),
        }
    }
}
