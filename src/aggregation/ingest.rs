use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::accumulator::WindowAccumulator;
use super::sample::TrafficSample;
use crate::capture::CapturedFrame;

/// Frame counts observed by one run of the ingestion loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestStats {
    pub counted: u64,
    pub skipped: u64,
    pub bytes: u64,
}

/// Feed frames into the accumulator until the source closes or `stop` fires.
///
/// Source exhaustion cancels `stop` so the window loop flushes and exits too.
pub async fn run_ingestion(
    mut frames: mpsc::Receiver<CapturedFrame>,
    accumulator: Arc<WindowAccumulator>,
    stop: CancellationToken,
) -> IngestStats {
    let mut stats = IngestStats::default();

    loop {
        tokio::select! {
            biased;

            _ = stop.cancelled() => {
                info!("Stopping packet processing");
                break;
            }
            frame = frames.recv() => {
                let Some(frame) = frame else {
                    info!("Packet source channel closed");
                    stop.cancel();
                    break;
                };
                match TrafficSample::from_frame(&frame) {
                    Some(sample) => {
                        accumulator.add(sample.source, sample.bytes);
                        stats.counted += 1;
                        stats.bytes = stats.bytes.saturating_add(sample.bytes);
                    }
                    None => stats.skipped += 1,
                }
            }
        }
    }

    debug!(
        counted = stats.counted,
        skipped = stats.skipped,
        bytes = stats.bytes,
        "Ingestion finished"
    );
    stats
}
