use serde::Serialize;
use std::net::IpAddr;
use std::time::Duration;

const BITS_PER_BYTE: f64 = 8.0;
const BITS_PER_MEGABIT: f64 = 1_000_000.0;

/// A source address together with the bytes it sent during one window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TopTalker {
    pub address: IpAddr,
    pub bytes: u64,
}

/// Throughput in megabits per second. Zero when `window` is zero.
pub fn rate_mbps(bytes: u64, window: Duration) -> f64 {
    let seconds = window.as_secs_f64();
    if seconds <= 0.0 {
        return 0.0;
    }
    (bytes as f64 * BITS_PER_BYTE) / (seconds * BITS_PER_MEGABIT)
}

/// The `n` largest contributors, by byte count descending.
///
/// The sort is stable, so equal counts keep the order of `entries`.
pub fn top_n(entries: &[(IpAddr, u64)], n: usize) -> Vec<TopTalker> {
    let mut ranked: Vec<TopTalker> = entries
        .iter()
        .map(|&(address, bytes)| TopTalker { address, bytes })
        .collect();
    ranked.sort_by(|a, b| b.bytes.cmp(&a.bytes));
    ranked.truncate(n);
    ranked
}
