use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::accumulator::{WindowAccumulator, WindowSnapshot};
use super::rank::{self, TopTalker};

/// Everything produced by one window cycle.
#[derive(Debug, Clone)]
pub struct WindowResult {
    pub snapshot: WindowSnapshot,
    pub total_bytes: u64,
    /// Configured window length, the basis of `rate_mbps`.
    pub window: Duration,
    /// Time actually elapsed since the previous boundary.
    pub elapsed: Duration,
    pub rate_mbps: f64,
    pub closed_at: DateTime<Utc>,
    /// Set on the flush performed at shutdown.
    pub is_final: bool,
}

impl WindowResult {
    pub fn top_talkers(&self, n: usize) -> Vec<TopTalker> {
        self.snapshot.top_n(n)
    }
}

enum Delivery {
    Sent,
    Interrupted,
    ReceiverGone,
}

/// Swap out the accumulator and derive totals for the window just closed.
pub fn window_cycle(
    accumulator: &WindowAccumulator,
    window: Duration,
    elapsed: Duration,
    is_final: bool,
) -> WindowResult {
    let snapshot = accumulator.swap_and_reset();
    let total_bytes = snapshot.total_bytes();
    let basis = if window.is_zero() {
        Duration::from_secs(1)
    } else {
        window
    };
    let rate_mbps = rank::rate_mbps(total_bytes, basis);

    info!(
        "Interval finished. Total Bytes: {}, Overall Speed: {:.2} Mbps, Sources: {}",
        total_bytes,
        rate_mbps,
        snapshot.len()
    );

    WindowResult {
        snapshot,
        total_bytes,
        window,
        elapsed,
        rate_mbps,
        closed_at: Utc::now(),
        is_final,
    }
}

/// Close a window every `window` until `stop` fires, then flush once more.
///
/// The final flush happens only after `ingest_done` is cancelled, so every
/// byte the ingestion loop counted is in some snapshot. Dropping `results`
/// on return closes the channel for the consumer.
///
/// Delivery policy: a regular result waits for buffer space, but that wait
/// is abandoned (and the result dropped) if `stop` fires meanwhile. The final
/// flush never waits: it is delivered when the buffer has a free slot and
/// dropped otherwise. That includes a live consumer that has not yet taken
/// the previous result, not only an absent one. Shutdown therefore cannot
/// hang on a slow consumer; callers that need the tail window must keep
/// draining, or raise `AggregatorConfig::result_capacity`.
pub async fn run_window_loop(
    accumulator: Arc<WindowAccumulator>,
    window: Duration,
    stop: CancellationToken,
    ingest_done: CancellationToken,
    results: mpsc::Sender<WindowResult>,
) {
    let mut ticker = interval_at(Instant::now() + window, window);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut boundary = Instant::now();
    let mut windows = 0u64;

    loop {
        tokio::select! {
            biased;

            _ = stop.cancelled() => {
                info!("Stopping aggregator ticker");
                ingest_done.cancelled().await;
                let result = window_cycle(&accumulator, window, boundary.elapsed(), true);
                match results.try_send(result) {
                    Ok(()) => windows += 1,
                    Err(TrySendError::Full(_)) => {
                        warn!("Consumer not draining, discarding final interval result");
                    }
                    Err(TrySendError::Closed(_)) => {
                        debug!("Result receiver gone, discarding final interval result");
                    }
                }
                break;
            }
            _ = ticker.tick() => {
                let now = Instant::now();
                let result = window_cycle(&accumulator, window, now - boundary, false);
                boundary = now;
                match deliver(&results, result, &stop).await {
                    Delivery::Sent => windows += 1,
                    Delivery::Interrupted => {
                        warn!("Aggregator stopping, discarding in-flight interval result");
                    }
                    Delivery::ReceiverGone => {
                        warn!("Result receiver dropped, stopping aggregator");
                        stop.cancel();
                        break;
                    }
                }
            }
        }
    }

    debug!(windows, "Window loop finished");
}

async fn deliver(
    results: &mpsc::Sender<WindowResult>,
    result: WindowResult,
    stop: &CancellationToken,
) -> Delivery {
    tokio::select! {
        biased;

        sent = results.send(result) => match sent {
            Ok(()) => Delivery::Sent,
            Err(_) => Delivery::ReceiverGone,
        },
        _ = stop.cancelled() => Delivery::Interrupted,
    }
}
