use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::{Mutex, MutexGuard};

use super::rank::{self, TopTalker};

/// Per-source byte counts for the open window, in first-seen order.
#[derive(Debug, Default)]
struct Tally {
    index: HashMap<IpAddr, usize>,
    entries: Vec<(IpAddr, u64)>,
}

/// Mutex-guarded byte counters for the current window.
///
/// Data only leaves through [`WindowAccumulator::swap_and_reset`], which
/// replaces the whole live tally inside one critical section. Every `add`
/// therefore lands in exactly one snapshot.
#[derive(Debug, Default)]
pub struct WindowAccumulator {
    live: Mutex<Tally>,
}

impl WindowAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `bytes` to the counter of `source`, creating it on first sight.
    pub fn add(&self, source: IpAddr, bytes: u64) {
        let mut guard = self.lock();
        let tally = &mut *guard;
        match tally.index.entry(source) {
            Entry::Occupied(slot) => {
                let counter = &mut tally.entries[*slot.get()].1;
                *counter = counter.saturating_add(bytes);
            }
            Entry::Vacant(slot) => {
                slot.insert(tally.entries.len());
                tally.entries.push((source, bytes));
            }
        }
    }

    /// Take everything accumulated so far and start a fresh, empty window.
    pub fn swap_and_reset(&self) -> WindowSnapshot {
        let tally = std::mem::take(&mut *self.lock());
        WindowSnapshot {
            entries: tally.entries,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Tally> {
        // A panic while holding the lock cannot leave the tally half-updated,
        // so a poisoned mutex is still usable.
        self.live.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Immutable per-source byte counts covering one completed window.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WindowSnapshot {
    entries: Vec<(IpAddr, u64)>,
}

impl WindowSnapshot {
    pub fn total_bytes(&self) -> u64 {
        self.entries
            .iter()
            .fold(0u64, |total, (_, bytes)| total.saturating_add(*bytes))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[cfg(test)]
    pub fn get(&self, source: &IpAddr) -> Option<u64> {
        self.entries
            .iter()
            .find(|(addr, _)| addr == source)
            .map(|(_, bytes)| *bytes)
    }

    /// Entries in the order their source was first seen during the window.
    #[cfg(test)]
    pub fn iter(&self) -> impl Iterator<Item = (IpAddr, u64)> + '_ {
        self.entries.iter().copied()
    }

    pub fn top_n(&self, n: usize) -> Vec<TopTalker> {
        rank::top_n(&self.entries, n)
    }
}

#[cfg(test)]
impl FromIterator<(IpAddr, u64)> for WindowSnapshot {
    /// Builds a snapshot the same way the accumulator would: repeated sources
    /// are summed into their first-seen slot.
    fn from_iter<I: IntoIterator<Item = (IpAddr, u64)>>(iter: I) -> Self {
        let accumulator = WindowAccumulator::new();
        for (source, bytes) in iter {
            accumulator.add(source, bytes);
        }
        accumulator.swap_and_reset()
    }
}
