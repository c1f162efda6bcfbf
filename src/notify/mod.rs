//! Notification fan-out
//!
//! Delivers one change event to every active subscriber independently. The
//! dispatcher owns the suppression policy and holds only the narrow
//! registry capability it needs: list the snapshot, prune dead recipients.

pub mod telegram;

pub use telegram::TelegramClient;

use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::error::DeliveryError;
use crate::persistence::SubscriberRegistry;
use crate::types::{ChangeEvent, Orientation};

/// Send primitive of the delivery platform
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DeliveryChannel: Send + Sync {
    async fn send(&self, user_id: i64, text: &str) -> Result<(), DeliveryError>;
}

/// The slice of the registry the dispatcher is allowed to touch
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SubscriberDirectory: Send + Sync {
    async fn list_active(&self) -> Vec<i64>;
    async fn unsubscribe(&self, user_id: i64) -> anyhow::Result<bool>;
}

#[async_trait]
impl SubscriberDirectory for SubscriberRegistry {
    async fn list_active(&self) -> Vec<i64> {
        SubscriberRegistry::list_active(self).await
    }

    async fn unsubscribe(&self, user_id: i64) -> anyhow::Result<bool> {
        SubscriberRegistry::unsubscribe(self, user_id).await
    }
}

/// When is a change event worth sending
#[derive(Debug, Clone, Copy)]
pub struct DispatchPolicy {
    threshold_percent: Decimal,
}

impl DispatchPolicy {
    pub fn new(threshold_percent: f64) -> Self {
        Self {
            threshold_percent: Decimal::from_f64(threshold_percent)
                .unwrap_or(Decimal::ZERO)
                .abs(),
        }
    }

    /// Threshold 0 suppresses only exact-zero deltas; a positive threshold
    /// dispatches only when the magnitude reaches it.
    pub fn should_dispatch(&self, delta_percent: Decimal) -> bool {
        if self.threshold_percent.is_zero() {
            !delta_percent.is_zero()
        } else {
            delta_percent.abs() >= self.threshold_percent
        }
    }
}

/// Per-fan-out outcome tally
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FanoutSummary {
    pub delivered: usize,
    pub transient_failures: usize,
    pub pruned: usize,
}

/// Render the notification body for one event.
pub fn format_message(event: &ChangeEvent) -> String {
    let delta = event.delta_percent;
    let signed = if delta.is_sign_negative() {
        delta.to_string()
    } else {
        format!("+{delta}")
    };

    format!(
        "Reward distributed!\n\
         xSushi/Sushi = {}\n\
         Sushi/xSushi = {}\n\
         Last change date: {}\n\
         Last change: {}%\n\
         \n\
         To unsubscribe, use /stop",
        Orientation::XSushiPerSushi.project(event.current_ratio),
        Orientation::SushiPerXSushi.project(event.current_ratio),
        event.timestamp.format("%Y-%m-%d %H:%M"),
        signed
    )
}

pub struct Dispatcher {
    channel: Arc<dyn DeliveryChannel>,
    directory: Arc<dyn SubscriberDirectory>,
    policy: DispatchPolicy,
    concurrency: usize,
}

impl Dispatcher {
    pub fn new(
        channel: Arc<dyn DeliveryChannel>,
        directory: Arc<dyn SubscriberDirectory>,
        policy: DispatchPolicy,
        concurrency: usize,
    ) -> Self {
        Self {
            channel,
            directory,
            policy,
            concurrency: concurrency.max(1),
        }
    }

    /// Apply the suppression policy, then fan the event out.
    ///
    /// Returns `None` when the event was suppressed.
    pub async fn dispatch(&self, event: &ChangeEvent) -> Option<FanoutSummary> {
        if !self.policy.should_dispatch(event.delta_percent) {
            info!(delta = %event.delta_percent, "Change suppressed by policy");
            return None;
        }
        Some(self.fanout(event).await)
    }

    /// Deliver the event to one stable snapshot of the registry.
    ///
    /// Sends run concurrently up to the configured limit; each recipient's
    /// outcome is isolated. A permanent failure prunes that recipient.
    pub async fn fanout(&self, event: &ChangeEvent) -> FanoutSummary {
        let recipients = self.directory.list_active().await;
        let text = format_message(event);

        let outcomes: Vec<(i64, Result<(), DeliveryError>)> = stream::iter(recipients)
            .map(|user_id| {
                let channel = self.channel.clone();
                let text = text.clone();
                async move { (user_id, channel.send(user_id, &text).await) }
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        let mut summary = FanoutSummary::default();
        for (user_id, outcome) in outcomes {
            match outcome {
                Ok(()) => summary.delivered += 1,
                Err(DeliveryError::Transient(reason)) => {
                    summary.transient_failures += 1;
                    warn!(user_id, reason, "Delivery failed, will retry on next event");
                }
                Err(DeliveryError::Permanent(reason)) => {
                    warn!(user_id, reason, "Recipient unreachable, pruning");
                    match self.directory.unsubscribe(user_id).await {
                        Ok(_) => summary.pruned += 1,
                        Err(e) => error!(user_id, error = %e, "Failed to prune recipient"),
                    }
                }
            }
        }

        info!(
            delivered = summary.delivered,
            transient = summary.transient_failures,
            pruned = summary.pruned,
            delta = %event.delta_percent,
            "Fan-out complete"
        );
        summary
    }
}
