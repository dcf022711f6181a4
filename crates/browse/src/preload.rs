//! Preload-gated presentation buffer.
//!
//! The buffer decides when a newly fetched list replaces the visible one. The new list
//! always wins; only the timing depends on asset readiness.

#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::Duration;

use futures::stream::{FuturesUnordered, StreamExt};
use kagami_api::{AssetLoader, AssetReadiness};
use metrics::counter;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PreloadConfig {
    /// K: number of leading items whose assets are preloaded.
    pub count: usize,
    pub threshold: f32,
    pub timeout: Duration,
}

impl Default for PreloadConfig {
    fn default() -> Self {
        Self { count: 12, threshold: 0.75, timeout: Duration::from_millis(1200) }
    }
}

/// Result of offering a new list to the buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SwapDecision {
    /// The new list is already visible.
    Swapped,
    /// Preload `urls`, then call [`PreloadBuffer::complete`] with `ticket`.
    Wait { ticket: u64, urls: Vec<String> },
}

/// Read-only view of what is on screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferView<'a, T> {
    pub display_items: &'a [T],
    /// A replacement list is waiting on its assets; a soft overlay may be shown.
    pub is_swapping: bool,
    /// Nothing to show and nothing pending: render the empty state, not a skeleton.
    pub empty: bool,
}

#[derive(Debug)]
pub struct PreloadBuffer<T> {
    displayed: Vec<T>,
    pending: Option<(u64, Vec<T>)>,
    ticket: u64,
    has_swapped: bool,
    cfg: PreloadConfig,
}

impl<T> PreloadBuffer<T> {
    pub fn new(cfg: PreloadConfig) -> Self {
        Self { displayed: Vec::new(), pending: None, ticket: 0, has_swapped: false, cfg }
    }

    pub fn config(&self) -> &PreloadConfig {
        &self.cfg
    }

    pub fn set_config(&mut self, cfg: PreloadConfig) {
        self.cfg = cfg;
    }

    /// Offer a new list. With `skip` (assets known warm) or an empty list the swap is
    /// immediate; otherwise the caller preloads the returned urls and completes the ticket.
    pub fn swap<F>(&mut self, items: Vec<T>, asset_url: F, skip: bool) -> SwapDecision
    where
        F: Fn(&T) -> Option<String>,
    {
        self.ticket += 1;
        let urls: Vec<String> = if skip {
            Vec::new()
        } else {
            items.iter().take(self.cfg.count).filter_map(&asset_url).collect()
        };
        if urls.is_empty() {
            self.show(items);
            return SwapDecision::Swapped;
        }
        self.pending = Some((self.ticket, items));
        SwapDecision::Wait { ticket: self.ticket, urls }
    }

    /// Swap in the list for `ticket`. Returns false when a newer offer superseded it.
    pub fn complete(&mut self, ticket: u64) -> bool {
        match self.pending.take() {
            Some((t, items)) if t == ticket => {
                self.show(items);
                true
            }
            other => {
                self.pending = other;
                false
            }
        }
    }

    /// Drop everything (e.g. on a failed query).
    pub fn clear(&mut self) {
        self.pending = None;
        self.displayed.clear();
    }

    /// Show `items` without waiting (snapshot restore).
    pub fn replace(&mut self, items: Vec<T>) {
        self.ticket += 1;
        self.show(items);
    }

    fn show(&mut self, items: Vec<T>) {
        self.pending = None;
        self.displayed = items;
        self.has_swapped = true;
    }

    pub fn view(&self) -> BufferView<'_, T> {
        BufferView {
            display_items: &self.displayed,
            is_swapping: self.pending.is_some(),
            empty: self.has_swapped && self.displayed.is_empty() && self.pending.is_none(),
        }
    }

    pub fn displayed(&self) -> &[T] {
        &self.displayed
    }
}

/// Counts asset outcomes against the readiness threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadinessGate {
    total: usize,
    needed: usize,
    ready: usize,
    failed: usize,
}

impl ReadinessGate {
    pub fn new(total: usize, threshold: f32) -> Self {
        let needed = (total as f32 * threshold.clamp(0.0, 1.0)).ceil() as usize;
        Self { total, needed: needed.min(total), ready: 0, failed: 0 }
    }

    /// Record one outcome; returns whether the gate is now open.
    pub fn record(&mut self, r: AssetReadiness) -> bool {
        match r {
            AssetReadiness::Ready => self.ready += 1,
            AssetReadiness::Failed => self.failed += 1,
        }
        self.is_open()
    }

    pub fn is_open(&self) -> bool {
        self.ready >= self.needed
    }

    pub fn ready(&self) -> usize {
        self.ready
    }

    pub fn failed(&self) -> usize {
        self.failed
    }

    pub fn settled(&self) -> bool {
        self.ready + self.failed >= self.total
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateOutcome {
    /// Threshold reached before the timeout.
    Ready { ready: usize },
    TimedOut { ready: usize },
}

/// Preload `urls` concurrently and wait until the threshold is met or `timeout` elapses.
///
/// Failed assets count as settled but never open the gate; the timeout always bounds
/// the wait.
pub async fn await_gate(loader: Arc<dyn AssetLoader>, urls: Vec<String>, cfg: PreloadConfig) -> GateOutcome {
    let mut gate = ReadinessGate::new(urls.len(), cfg.threshold);
    if gate.is_open() {
        return GateOutcome::Ready { ready: 0 };
    }
    let mut pending: FuturesUnordered<_> = urls
        .into_iter()
        .map(|url| {
            let loader = loader.clone();
            async move { loader.preload(&url).await }
        })
        .collect();
    let deadline = tokio::time::sleep(cfg.timeout);
    tokio::pin!(deadline);
    loop {
        tokio::select! {
            _ = &mut deadline => break,
            next = pending.next(), if !gate.settled() => match next {
                Some(r) => {
                    if gate.record(r) {
                        debug!(ready = gate.ready(), failed = gate.failed(), "preload: gate open");
                        return GateOutcome::Ready { ready: gate.ready() };
                    }
                }
                None => {}
            },
        }
    }
    counter!("preload_timeout_total", 1u64);
    debug!(ready = gate.ready(), failed = gate.failed(), "preload: gate timed out");
    GateOutcome::TimedOut { ready: gate.ready() }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(n: &u32) -> Option<String> {
        Some(format!("u{n}"))
    }

    #[test]
    fn empty_and_skip_swap_immediately() {
        let mut b: PreloadBuffer<u32> = PreloadBuffer::new(PreloadConfig::default());
        assert_eq!(b.swap(vec![1, 2], url, true), SwapDecision::Swapped);
        assert_eq!(b.view().display_items, &[1, 2]);
        assert_eq!(b.swap(Vec::new(), url, false), SwapDecision::Swapped);
        assert!(b.view().empty);
    }

    #[test]
    fn previous_list_stays_until_completed() {
        let mut b: PreloadBuffer<u32> = PreloadBuffer::new(PreloadConfig { count: 2, ..Default::default() });
        b.swap(vec![1], url, true);
        let SwapDecision::Wait { ticket, urls } = b.swap(vec![7, 8, 9], url, false) else {
            panic!("expected wait")
        };
        assert_eq!(urls, vec!["u7", "u8"]);
        assert_eq!(b.view().display_items, &[1]);
        assert!(b.view().is_swapping);
        assert!(b.complete(ticket));
        assert_eq!(b.view().display_items, &[7, 8, 9]);
        assert!(!b.view().is_swapping);
    }

    #[test]
    fn superseded_ticket_is_ignored() {
        let mut b: PreloadBuffer<u32> = PreloadBuffer::new(PreloadConfig::default());
        let SwapDecision::Wait { ticket: old, .. } = b.swap(vec![1], url, false) else { panic!() };
        let SwapDecision::Wait { ticket: new, .. } = b.swap(vec![2], url, false) else { panic!() };
        assert!(!b.complete(old));
        assert!(b.view().is_swapping);
        assert!(b.complete(new));
        assert_eq!(b.view().display_items, &[2]);
    }

    #[test]
    fn gate_needs_ceil_of_threshold() {
        let mut g = ReadinessGate::new(12, 0.75);
        for _ in 0..8 {
            assert!(!g.record(AssetReadiness::Ready));
        }
        assert!(g.record(AssetReadiness::Ready));
        let mut all_failed = ReadinessGate::new(2, 0.5);
        all_failed.record(AssetReadiness::Failed);
        all_failed.record(AssetReadiness::Failed);
        assert!(all_failed.settled());
        assert!(!all_failed.is_open());
    }
}
