// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Printer status aggregation with bounded-age caching.
//
// Reachability and paper level are cached for five minutes per printer, so
// a flood of status requests costs at most one device probe per printer per
// window. Toner is served from cache only: the device-reported marker level
// has been observed to return 0 spuriously, and an absent value beats a lie.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use futures::future::join_all;
use tokio::time::timeout;
use tracing::{debug, instrument};

use druckwerk_core::{Printer, PrinterStatus};

use crate::backend::PrintBackend;

/// How long cached probe results stay fresh.
const CACHE_TTL: Duration = Duration::from_secs(5 * 60);

/// Soft deadline for answering about a single printer.
const PROBE_DEADLINE: Duration = Duration::from_secs(2);

#[derive(Clone, Copy)]
struct Cached<T> {
    value: T,
    at: Instant,
}

impl<T: Copy> Cached<T> {
    fn new(value: T) -> Self {
        Self {
            value,
            at: Instant::now(),
        }
    }

    fn fresh(&self) -> Option<T> {
        (self.at.elapsed() < CACHE_TTL).then_some(self.value)
    }
}

/// Combines reachability, toner, and paper level into a `PrinterStatus`.
///
/// Never raises into its caller: backend trouble collapses into absent
/// fields. Keys are printer IPP endpoints.
pub struct StatusAggregator {
    backend: Arc<dyn PrintBackend>,
    reachability: DashMap<String, Cached<bool>>,
    paper: DashMap<String, Cached<u8>>,
    toner: DashMap<String, Cached<u8>>,
}

impl StatusAggregator {
    pub fn new(backend: Arc<dyn PrintBackend>) -> Self {
        Self {
            backend,
            reachability: DashMap::new(),
            paper: DashMap::new(),
            toner: DashMap::new(),
        }
    }

    /// Status of a single printer, honoring the caches.
    #[instrument(skip(self, printer), fields(printer = %printer.cups_name))]
    pub async fn status(&self, printer: &Printer) -> PrinterStatus {
        let known_offline = self
            .reachability
            .get(&printer.ipp)
            .and_then(|c| c.fresh())
            .map(|reachable| !reachable)
            .unwrap_or(false);

        // Snapshot the paper cache before probing: if the printer turns out
        // to be offline, only this pre-probe value may be served.
        let cached_paper = self.paper.get(&printer.ipp).map(|c| c.value);

        // Probe reachability and paper concurrently; the paper probe is
        // skipped entirely while the printer is known offline.
        let (reachable, probed_paper) = tokio::join!(
            self.reachability(&printer.ipp),
            self.paper(&printer.ipp, known_offline),
        );

        let offline = !reachable;
        let paper_pct = if offline {
            // Offline: a cached value of any age is all we may use.
            cached_paper
        } else {
            probed_paper
        };
        let toner_pct = self.toner.get(&printer.ipp).and_then(|c| c.fresh());

        debug!(offline, ?paper_pct, ?toner_pct, "status assembled");
        PrinterStatus {
            printer: printer.clone(),
            offline,
            toner_pct,
            paper_pct,
        }
    }

    /// Statuses of a whole fleet, probing printers in parallel.
    ///
    /// Slow devices only degrade their own entry; the deadline per printer
    /// keeps the enumeration bounded.
    pub async fn statuses(&self, printers: &[Printer]) -> Vec<PrinterStatus> {
        join_all(printers.iter().map(|p| self.status(p))).await
    }

    /// Record a trusted toner level, e.g. sourced from field reports.
    pub fn record_toner(&self, ipp: &str, pct: u8) {
        self.toner.insert(ipp.to_string(), Cached::new(pct));
    }

    async fn reachability(&self, ipp: &str) -> bool {
        if let Some(cached) = self.reachability.get(ipp).and_then(|c| c.fresh()) {
            return cached;
        }
        let reachable = timeout(PROBE_DEADLINE, self.backend.probe_reachable(ipp))
            .await
            .unwrap_or(false);
        self.reachability
            .insert(ipp.to_string(), Cached::new(reachable));
        reachable
    }

    async fn paper(&self, ipp: &str, known_offline: bool) -> Option<u8> {
        if let Some(cached) = self.paper.get(ipp).and_then(|c| c.fresh()) {
            return Some(cached);
        }
        if known_offline {
            return None;
        }
        let probed = timeout(PROBE_DEADLINE, self.backend.paper_pct(ipp))
            .await
            .ok()
            .flatten();
        if let Some(pct) = probed {
            self.paper.insert(ipp.to_string(), Cached::new(pct));
        }
        probed
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use druckwerk_core::error::Result;
    use druckwerk_core::{JobAttributes, PrintOptions};

    use super::*;

    /// Probe-counting backend with switchable reachability.
    struct ProbeCounter {
        reachable: Mutex<bool>,
        probe_count: AtomicUsize,
        paper_count: AtomicUsize,
        paper: Option<u8>,
    }

    impl ProbeCounter {
        fn new(reachable: bool, paper: Option<u8>) -> Self {
            Self {
                reachable: Mutex::new(reachable),
                probe_count: AtomicUsize::new(0),
                paper_count: AtomicUsize::new(0),
                paper,
            }
        }
    }

    #[async_trait]
    impl PrintBackend for ProbeCounter {
        async fn submit(
            &self,
            _printer: &str,
            _path: &Path,
            _title: &str,
            _options: &PrintOptions,
        ) -> Result<i32> {
            unreachable!("not exercised")
        }

        async fn job_attributes(&self, _job_id: i32) -> Result<JobAttributes> {
            unreachable!("not exercised")
        }

        async fn cancel(&self, _job_id: i32) -> Result<()> {
            unreachable!("not exercised")
        }

        async fn probe_reachable(&self, _ipp: &str) -> bool {
            self.probe_count.fetch_add(1, Ordering::SeqCst);
            *self.reachable.lock().unwrap()
        }

        async fn paper_pct(&self, _ipp: &str) -> Option<u8> {
            self.paper_count.fetch_add(1, Ordering::SeqCst);
            self.paper
        }
    }

    fn printer() -> Printer {
        Printer {
            display_name: "Office".into(),
            cups_name: "office".into(),
            ipp: "http://10.0.0.10:631/ipp/print".into(),
        }
    }

    #[tokio::test]
    async fn online_printer_reports_paper() {
        let backend = Arc::new(ProbeCounter::new(true, Some(80)));
        let aggregator = StatusAggregator::new(backend.clone());

        let status = aggregator.status(&printer()).await;
        assert!(!status.offline);
        assert_eq!(status.paper_pct, Some(80));
        assert_eq!(status.toner_pct, None);
    }

    #[tokio::test]
    async fn probes_are_bounded_by_the_cache() {
        let backend = Arc::new(ProbeCounter::new(true, Some(60)));
        let aggregator = StatusAggregator::new(backend.clone());

        for _ in 0..1000 {
            aggregator.status(&printer()).await;
        }
        assert_eq!(backend.probe_count.load(Ordering::SeqCst), 1);
        assert_eq!(backend.paper_count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn offline_printer_serves_cached_paper() {
        let backend = Arc::new(ProbeCounter::new(true, Some(55)));
        let aggregator = StatusAggregator::new(backend.clone());

        // Warm the paper cache while the device is up.
        let warm = aggregator.status(&printer()).await;
        assert_eq!(warm.paper_pct, Some(55));

        // Device goes down; the stale value must come from cache and the
        // paper endpoint must not be probed again.
        *backend.reachable.lock().unwrap() = false;
        aggregator.reachability.clear();
        let paper_probes = backend.paper_count.load(Ordering::SeqCst);

        let status = aggregator.status(&printer()).await;
        assert!(status.offline);
        assert_eq!(status.paper_pct, Some(55));
        assert_eq!(backend.paper_count.load(Ordering::SeqCst), paper_probes);
    }

    #[tokio::test]
    async fn offline_printer_without_cache_has_absent_paper() {
        let backend = Arc::new(ProbeCounter::new(false, Some(90)));
        let aggregator = StatusAggregator::new(backend.clone());

        let status = aggregator.status(&printer()).await;
        assert!(status.offline);
        assert_eq!(status.paper_pct, None);
    }

    #[tokio::test]
    async fn recorded_toner_is_served_from_cache() {
        let backend = Arc::new(ProbeCounter::new(true, None));
        let aggregator = StatusAggregator::new(backend);

        aggregator.record_toner("http://10.0.0.10:631/ipp/print", 42);
        let status = aggregator.status(&printer()).await;
        assert_eq!(status.toner_pct, Some(42));
    }

    #[tokio::test]
    async fn fleet_enumeration_covers_every_printer() {
        let backend = Arc::new(ProbeCounter::new(true, Some(10)));
        let aggregator = StatusAggregator::new(backend);

        let mut second = printer();
        second.cups_name = "annex".into();
        second.ipp = "http://10.0.0.11:631/ipp/print".into();

        let statuses = aggregator.statuses(&[printer(), second]).await;
        assert_eq!(statuses.len(), 2);
        assert!(statuses.iter().all(|s| !s.offline));
    }
}
