//! Traffic aggregation engine.
//!
//! Two workers share one [`WindowAccumulator`]: the ingestion loop adds the
//! byte length of every IP frame under its source address, and the window
//! loop swaps the accumulated counts out on every boundary and publishes a
//! [`WindowResult`]. A single [`CancellationToken`] stops both. Whoever
//! triggers it first (the caller, or the ingestion loop on source
//! exhaustion), the window loop waits for ingestion to exit, flushes one last
//! time and then closes the result channel.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::capture::CapturedFrame;

pub mod accumulator;
pub mod ingest;
pub mod rank;
pub mod sample;
pub mod window;

pub use accumulator::WindowAccumulator;
pub use ingest::IngestStats;
pub use rank::rate_mbps;
pub use window::WindowResult;

/// Engine settings fixed at construction.
#[derive(Debug, Clone)]
pub struct AggregatorConfig {
    pub window: Duration,
    /// Results buffered before the window loop waits on the consumer.
    pub result_capacity: usize,
}

impl AggregatorConfig {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            result_capacity: 1,
        }
    }
}

/// Handle to a running engine.
pub struct Aggregator {
    stop: CancellationToken,
    ingest: JoinHandle<IngestStats>,
    window: JoinHandle<()>,
}

impl Aggregator {
    /// Spawn both workers on the current tokio runtime.
    ///
    /// The returned receiver yields one [`WindowResult`] per window and ends
    /// after the final flush.
    pub fn start(
        config: AggregatorConfig,
        frames: mpsc::Receiver<CapturedFrame>,
        stop: CancellationToken,
    ) -> (Self, mpsc::Receiver<WindowResult>) {
        let period = if config.window.is_zero() {
            warn!("Window duration is zero, defaulting to 1 second");
            Duration::from_secs(1)
        } else {
            config.window
        };

        let accumulator = Arc::new(WindowAccumulator::new());
        let (tx, rx) = mpsc::channel(config.result_capacity.max(1));
        let ingest_done = CancellationToken::new();

        info!("Starting aggregator with {:?} windows", period);
        let ingest = tokio::spawn({
            let accumulator = Arc::clone(&accumulator);
            let stop = stop.clone();
            // Cancelled on return or unwind, never before the last `add`.
            let done = ingest_done.clone().drop_guard();
            async move {
                let stats = ingest::run_ingestion(frames, accumulator, stop).await;
                drop(done);
                stats
            }
        });
        let window = tokio::spawn(window::run_window_loop(
            accumulator,
            period,
            stop.clone(),
            ingest_done,
            tx,
        ));

        (Self { stop, ingest, window }, rx)
    }

    /// Request shutdown. Safe to call any number of times.
    #[cfg(test)]
    pub fn stop(&self) {
        self.stop.cancel();
    }

    pub fn stop_token(&self) -> CancellationToken {
        self.stop.clone()
    }

    /// Wait for both workers to finish.
    pub async fn join(self) -> IngestStats {
        let stats = match self.ingest.await {
            Ok(stats) => stats,
            Err(e) => {
                warn!("Ingestion task failed: {:?}", e);
                IngestStats::default()
            }
        };
        if let Err(e) = self.window.await {
            warn!("Window task failed: {:?}", e);
        }
        info!(
            "Aggregator stopped: {} frames counted, {} skipped",
            stats.counted, stats.skipped
        );
        stats
    }
}
