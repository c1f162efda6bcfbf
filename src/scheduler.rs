//! Tick scheduler
//!
//! Drives sample → detect → dispatch on a fixed interval. The first tick
//! fires immediately at startup. An atomic in-flight flag guards against
//! overlap: a tick that comes due while the previous one is still running
//! is skipped outright, never queued.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::detector::ChangeDetector;
use crate::error::{SampleError, SourceError, StoreError};
use crate::notify::Dispatcher;
use crate::sampler::Sampler;

/// One tick's worth of work: poll, compare, maybe notify.
///
/// Every failure is contained here; a tick never takes the process down and
/// never blocks the next tick.
pub struct TickPipeline {
    sampler: Sampler,
    detector: ChangeDetector,
    dispatcher: Option<Dispatcher>,
}

impl TickPipeline {
    pub fn new(
        sampler: Sampler,
        detector: ChangeDetector,
        dispatcher: Option<Dispatcher>,
    ) -> Self {
        Self {
            sampler,
            detector,
            dispatcher,
        }
    }

    pub async fn run_tick(&self) {
        match self.sampler.poll().await {
            Ok(_) => {}
            Err(SampleError::Source(SourceError::Unavailable(reason))) => {
                warn!(reason, "Source unavailable, tick skipped");
                return;
            }
            Err(SampleError::Source(SourceError::Anomaly(reason))) => {
                warn!(reason, "Source returned an unusable reading, tick skipped");
                return;
            }
            Err(SampleError::Store(StoreError::OutOfOrder { candidate, latest })) => {
                // Ordering is the sampler's invariant; reaching this branch
                // means an upstream bug, not a bad reading.
                error!(%candidate, %latest, "Out-of-order append refused, tick skipped");
                return;
            }
            Err(e) => {
                error!(error = %e, "Sampling failed, tick skipped");
                return;
            }
        }

        let event = match self.detector.detect().await {
            Ok(Some(event)) => event,
            Ok(None) => {
                debug!("First sample, nothing to compare against yet");
                return;
            }
            Err(e) => {
                error!(error = %e, "Change detection failed");
                return;
            }
        };

        if let Some(dispatcher) = &self.dispatcher {
            dispatcher.dispatch(&event).await;
        } else {
            debug!(delta = %event.delta_percent, "No delivery channel configured");
        }
    }
}

/// Interval-driven loop around the pipeline
pub struct Scheduler {
    pipeline: Arc<TickPipeline>,
    interval: Duration,
    in_flight: Arc<AtomicBool>,
    skipped_ticks: AtomicU64,
}

impl Scheduler {
    pub fn new(pipeline: TickPipeline, interval_secs: u64) -> Self {
        Self {
            pipeline: Arc::new(pipeline),
            interval: Duration::from_secs(interval_secs.max(1)),
            in_flight: Arc::new(AtomicBool::new(false)),
            skipped_ticks: AtomicU64::new(0),
        }
    }

    #[cfg(test)]
    fn with_interval(pipeline: TickPipeline, interval: Duration) -> Self {
        Self {
            pipeline: Arc::new(pipeline),
            interval,
            in_flight: Arc::new(AtomicBool::new(false)),
            skipped_ticks: AtomicU64::new(0),
        }
    }

    /// Ticks skipped because the previous tick was still in flight.
    pub fn skipped_ticks(&self) -> u64 {
        self.skipped_ticks.load(Ordering::Relaxed)
    }

    /// Run until the shutdown signal arrives.
    pub async fn run(&self, mut shutdown_rx: broadcast::Receiver<()>) {
        info!(interval_secs = self.interval.as_secs(), "Scheduler started");

        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!(
                        skipped = self.skipped_ticks(),
                        "Scheduler shutting down"
                    );
                    break;
                }
                _ = ticker.tick() => {
                    if self.in_flight.swap(true, Ordering::SeqCst) {
                        let skipped = self.skipped_ticks.fetch_add(1, Ordering::Relaxed) + 1;
                        warn!(skipped, "Previous tick still in flight, skipping this one");
                        continue;
                    }

                    let pipeline = self.pipeline.clone();
                    let in_flight = self.in_flight.clone();
                    tokio::spawn(async move {
                        pipeline.run_tick().await;
                        in_flight.store(false, Ordering::SeqCst);
                    });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SourceError;
    use crate::persistence::RatioStore;
    use crate::source::RatioSource;
    use async_trait::async_trait;
    use rust_decimal::Decimal;
    use tokio::time::timeout;

    /// Source whose fetch takes longer than the test interval.
    struct SlowSource {
        delay: Duration,
    }

    #[async_trait]
    impl RatioSource for SlowSource {
        async fn fetch_ratio(&self) -> Result<Decimal, SourceError> {
            tokio::time::sleep(self.delay).await;
            Err(SourceError::Unavailable("slow test source".to_string()))
        }
    }

    fn temp_store() -> Arc<RatioStore> {
        let dir = std::env::temp_dir().join(format!("xsushi-sched-{}", uuid::Uuid::new_v4()));
        Arc::new(RatioStore::new(&dir.to_string_lossy()).unwrap())
    }

    fn pipeline_with(source: Arc<dyn RatioSource>) -> TickPipeline {
        let store = temp_store();
        TickPipeline::new(
            Sampler::new(source, store.clone()),
            ChangeDetector::new(store),
            None,
        )
    }

    #[tokio::test]
    async fn overlapping_ticks_are_skipped_not_queued() {
        let pipeline = pipeline_with(Arc::new(SlowSource {
            delay: Duration::from_millis(500),
        }));
        // Interval far below the tick duration so overlap must occur
        let scheduler = Arc::new(Scheduler::with_interval(
            pipeline,
            Duration::from_millis(50),
        ));

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let runner = scheduler.clone();
        let handle = tokio::spawn(async move { runner.run(shutdown_rx).await });

        tokio::time::sleep(Duration::from_millis(300)).await;
        shutdown_tx.send(()).unwrap();
        timeout(Duration::from_secs(1), handle).await.unwrap().unwrap();

        assert!(
            scheduler.skipped_ticks() >= 1,
            "expected at least one skipped tick, got {}",
            scheduler.skipped_ticks()
        );
    }

    #[tokio::test]
    async fn scheduler_stops_on_shutdown_signal() {
        let pipeline = pipeline_with(Arc::new(SlowSource {
            delay: Duration::from_millis(1),
        }));
        let scheduler = Arc::new(Scheduler::new(pipeline, 3600));

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let runner = scheduler.clone();
        let handle = tokio::spawn(async move { runner.run(shutdown_rx).await });

        shutdown_tx.send(()).unwrap();
        let result = timeout(Duration::from_secs(1), handle).await;
        assert!(result.is_ok(), "scheduler should stop promptly on shutdown");
    }
}
