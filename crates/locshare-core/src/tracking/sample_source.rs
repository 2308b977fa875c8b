//! Sample source: turns the platform position primitive into a stream.
//!
//! A [`SampleFeed`] is a lazy, restartable producer. Starting a new session
//! means starting a new feed; stopping one never affects another.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use super::platform::LocationProvider;
use super::types::LocationSample;

const FEED_CAPACITY: usize = 32;

/// Stops the producer behind a feed.
#[derive(Debug)]
pub struct SampleHandle {
    task: Option<JoinHandle<()>>,
}

impl SampleHandle {
    /// Stop producing. Idempotent.
    pub fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }
}

impl Drop for SampleHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Batches of samples plus the handle controlling their producer.
pub struct SampleFeed {
    pub samples: mpsc::Receiver<Vec<LocationSample>>,
    pub handle: SampleHandle,
}

/// Factory for sample feeds.
pub struct SampleSource;

impl SampleSource {
    /// Sample `provider` every `interval`, starting one interval from now.
    ///
    /// Ticks without a fix, or where the provider errors, are skipped; the
    /// schedule keeps running.
    pub fn start<P>(interval: Duration, provider: Arc<P>) -> SampleFeed
    where
        P: LocationProvider + ?Sized + 'static,
    {
        let (tx, rx) = mpsc::channel(FEED_CAPACITY);
        let period = interval.max(Duration::from_millis(1));

        let task = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                match provider.current_position().await {
                    Ok(Some(sample)) => {
                        if tx.send(vec![sample]).await.is_err() {
                            break;
                        }
                    }
                    Ok(None) => tracing::debug!("missed tick: no position fix"),
                    Err(e) => tracing::debug!(error = %e, "missed tick"),
                }
            }
        });

        SampleFeed {
            samples: rx,
            handle: SampleHandle { task: Some(task) },
        }
    }

    /// A feed driven from outside, e.g. by a background task registrar.
    ///
    /// Returns the feed and the sender the external producer writes to.
    pub fn relay() -> (SampleFeed, mpsc::Sender<Vec<LocationSample>>) {
        let (tx, rx) = mpsc::channel(FEED_CAPACITY);
        (
            SampleFeed {
                samples: rx,
                handle: SampleHandle { task: None },
            },
            tx,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TrackingError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Produces a fix on every third call only.
    struct Flaky {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl LocationProvider for Flaky {
        async fn current_position(&self) -> Result<Option<LocationSample>, TrackingError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            match n % 3 {
                0 => Ok(Some(LocationSample::now(n as f64, 0.0))),
                1 => Ok(None),
                _ => Err(TrackingError::LocationUnavailable("no gps".into())),
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn first_sample_after_one_interval() {
        let provider = Arc::new(Flaky {
            calls: AtomicUsize::new(0),
        });
        let start = Instant::now();
        let mut feed = SampleSource::start(Duration::from_millis(3000), provider);

        let batch = feed.samples.recv().await.unwrap();
        assert_eq!(batch[0].latitude, 0.0);
        assert!(start.elapsed() >= Duration::from_millis(3000));
        assert!(start.elapsed() < Duration::from_millis(3100));
    }

    #[tokio::test(start_paused = true)]
    async fn missed_ticks_do_not_stop_schedule() {
        let provider = Arc::new(Flaky {
            calls: AtomicUsize::new(0),
        });
        let start = Instant::now();
        let mut feed = SampleSource::start(Duration::from_millis(100), provider);

        feed.samples.recv().await.unwrap();
        let second = feed.samples.recv().await.unwrap();
        // Calls 1 and 2 missed, call 3 produced.
        assert_eq!(second[0].latitude, 3.0);
        assert!(start.elapsed() >= Duration::from_millis(400));
        assert!(start.elapsed() < Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn stop_closes_feed() {
        let provider = Arc::new(Flaky {
            calls: AtomicUsize::new(0),
        });
        let mut feed = SampleSource::start(Duration::from_millis(100), provider);
        assert!(feed.handle.is_running());

        feed.handle.stop();
        feed.handle.stop();
        assert!(feed.samples.recv().await.is_none());
    }

    #[tokio::test]
    async fn relay_forwards_external_batches() {
        let (mut feed, tx) = SampleSource::relay();
        tx.send(vec![LocationSample::now(1.0, 1.0), LocationSample::now(2.0, 2.0)])
            .await
            .unwrap();
        assert_eq!(feed.samples.recv().await.unwrap().len(), 2);
        assert!(!feed.handle.is_running());
    }
}
