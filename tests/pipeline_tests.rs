//! End-to-end pipeline tests
//!
//! Drives the real store, sampler, detector, and dispatcher together with a
//! scripted source and a recording delivery channel.

use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::Mutex;

use xsushi_tracker::detector::ChangeDetector;
use xsushi_tracker::error::{DeliveryError, SourceError};
use xsushi_tracker::notify::{DeliveryChannel, DispatchPolicy, Dispatcher};
use xsushi_tracker::persistence::{RatioStore, SubscriberRegistry};
use xsushi_tracker::sampler::Sampler;
use xsushi_tracker::source::RatioSource;

/// Source that replays a fixed script of readings.
struct ScriptedSource {
    readings: Mutex<VecDeque<Result<Decimal, SourceError>>>,
}

impl ScriptedSource {
    fn new(readings: Vec<Result<Decimal, SourceError>>) -> Self {
        Self {
            readings: Mutex::new(readings.into()),
        }
    }
}

#[async_trait]
impl RatioSource for ScriptedSource {
    async fn fetch_ratio(&self) -> Result<Decimal, SourceError> {
        self.readings
            .lock()
            .await
            .pop_front()
            .unwrap_or_else(|| Err(SourceError::Unavailable("script exhausted".to_string())))
    }
}

/// Channel that records every send and fails on demand.
#[derive(Default)]
struct RecordingChannel {
    sent: Mutex<Vec<(i64, String)>>,
    permanent_for: Option<i64>,
}

#[async_trait]
impl DeliveryChannel for RecordingChannel {
    async fn send(&self, user_id: i64, text: &str) -> Result<(), DeliveryError> {
        if self.permanent_for == Some(user_id) {
            return Err(DeliveryError::Permanent("bot was blocked".to_string()));
        }
        self.sent.lock().await.push((user_id, text.to_string()));
        Ok(())
    }
}

fn temp_data_dir() -> String {
    std::env::temp_dir()
        .join(format!("xsushi-e2e-{}", uuid::Uuid::new_v4()))
        .to_string_lossy()
        .to_string()
}

#[tokio::test]
async fn two_samples_produce_a_dispatched_change_alert() {
    let data_dir = temp_data_dir();
    let store = Arc::new(RatioStore::new(&data_dir).unwrap());
    let registry = Arc::new(SubscriberRegistry::load(&data_dir).unwrap());
    registry.subscribe(100).await.unwrap();
    registry.subscribe(200).await.unwrap();

    let source = Arc::new(ScriptedSource::new(vec![Ok(dec!(0.60)), Ok(dec!(0.615))]));
    let sampler = Sampler::new(source, store.clone());
    let detector = ChangeDetector::new(store.clone());

    let channel = Arc::new(RecordingChannel::default());
    let dispatcher = Dispatcher::new(
        channel.clone(),
        registry.clone(),
        DispatchPolicy::new(0.0),
        4,
    );

    // First tick: sample lands, nothing to compare against
    sampler.poll().await.unwrap();
    assert!(detector.detect().await.unwrap().is_none());

    // Second tick: +2.50% change, dispatched to both subscribers
    tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    sampler.poll().await.unwrap();
    let event = detector.detect().await.unwrap().unwrap();
    assert_eq!(event.delta_percent, dec!(2.50));

    let summary = dispatcher.dispatch(&event).await.unwrap();
    assert_eq!(summary.delivered, 2);

    let sent = channel.sent.lock().await;
    assert_eq!(sent.len(), 2);
    assert!(sent[0].1.contains("Last change: +2.50%"));
    assert!(sent[0].1.contains("Sushi/xSushi = 0.615"));
}

#[tokio::test]
async fn a_five_percent_threshold_suppresses_the_same_event() {
    let data_dir = temp_data_dir();
    let store = Arc::new(RatioStore::new(&data_dir).unwrap());
    let registry = Arc::new(SubscriberRegistry::load(&data_dir).unwrap());
    registry.subscribe(100).await.unwrap();

    let source = Arc::new(ScriptedSource::new(vec![Ok(dec!(0.60)), Ok(dec!(0.615))]));
    let sampler = Sampler::new(source, store.clone());
    let detector = ChangeDetector::new(store.clone());

    let channel = Arc::new(RecordingChannel::default());
    let dispatcher = Dispatcher::new(
        channel.clone(),
        registry.clone(),
        DispatchPolicy::new(5.0),
        4,
    );

    sampler.poll().await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    sampler.poll().await.unwrap();

    let event = detector.detect().await.unwrap().unwrap();
    assert_eq!(dispatcher.dispatch(&event).await, None);
    assert!(channel.sent.lock().await.is_empty());
}

#[tokio::test]
async fn permanent_failure_prunes_the_recipient_from_the_registry() {
    let data_dir = temp_data_dir();
    let store = Arc::new(RatioStore::new(&data_dir).unwrap());
    let registry = Arc::new(SubscriberRegistry::load(&data_dir).unwrap());
    for user_id in [1, 2, 3] {
        registry.subscribe(user_id).await.unwrap();
    }

    let source = Arc::new(ScriptedSource::new(vec![Ok(dec!(0.60)), Ok(dec!(0.61))]));
    let sampler = Sampler::new(source, store.clone());
    let detector = ChangeDetector::new(store.clone());

    let channel = Arc::new(RecordingChannel {
        permanent_for: Some(2),
        ..Default::default()
    });
    let dispatcher = Dispatcher::new(
        channel.clone(),
        registry.clone(),
        DispatchPolicy::new(0.0),
        4,
    );

    sampler.poll().await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    sampler.poll().await.unwrap();

    let event = detector.detect().await.unwrap().unwrap();
    let summary = dispatcher.dispatch(&event).await.unwrap();

    assert_eq!(summary.delivered, 2);
    assert_eq!(summary.pruned, 1);
    assert_eq!(registry.list_active().await, vec![1, 3]);
}

#[tokio::test]
async fn a_failed_poll_leaves_a_gap_and_the_next_one_recovers() {
    let data_dir = temp_data_dir();
    let store = Arc::new(RatioStore::new(&data_dir).unwrap());

    let source = Arc::new(ScriptedSource::new(vec![
        Ok(dec!(0.60)),
        Err(SourceError::Unavailable("timeout".to_string())),
        Ok(dec!(0.61)),
    ]));
    let sampler = Sampler::new(source, store.clone());

    sampler.poll().await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    assert!(sampler.poll().await.is_err());
    tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    sampler.poll().await.unwrap();

    // No invented value in between; ids stay contiguous
    assert_eq!(store.len().await, 2);
    let pair = store.previous(2).await.unwrap();
    assert_eq!(pair[0].ratio, dec!(0.61));
    assert_eq!(pair[0].id, 2);
}
