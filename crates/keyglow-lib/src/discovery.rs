//! Hot-plug discovery with exponential backoff.
//!
//! Scans run from inside the tick under the structural lock. A scan that
//! finds nothing pushes the next one further out; attaching a keyboard brings
//! the interval back to its start.

use std::time::{Duration, Instant};

/// Backoff parameters for USB scans.
#[derive(Debug, Clone)]
pub struct ScanConfig {
    /// Delay after the first empty scan.
    pub initial_interval: Duration,
    /// Upper bound on the delay between scans.
    pub max_interval: Duration,
    /// Growth factor per empty scan (typically 2.0).
    pub multiplier: f64,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_secs(1),
            max_interval: Duration::from_secs(5),
            multiplier: 2.0,
        }
    }
}

/// When the next scan is due.
#[derive(Debug)]
pub struct DiscoveryState {
    config: ScanConfig,
    current_interval: Duration,
    last_scan: Option<Instant>,
}

impl DiscoveryState {
    pub fn new(config: ScanConfig) -> Self {
        Self {
            current_interval: config.initial_interval,
            config,
            last_scan: None,
        }
    }

    /// `true` before the first scan and whenever the interval has elapsed.
    pub fn scan_due(&self) -> bool {
        self.scan_due_at(Instant::now())
    }

    pub fn scan_due_at(&self, now: Instant) -> bool {
        match self.last_scan {
            None => true,
            Some(last) => now.saturating_duration_since(last) >= self.current_interval,
        }
    }

    /// Record a scan that attached `found` keyboards.
    pub fn record_scan(&mut self, found: usize) {
        self.record_scan_at(Instant::now(), found);
    }

    pub fn record_scan_at(&mut self, now: Instant, found: usize) {
        self.last_scan = Some(now);
        if found > 0 {
            self.current_interval = self.config.initial_interval;
            return;
        }
        let next = self.current_interval.as_secs_f64() * self.config.multiplier;
        self.current_interval = Duration::from_secs_f64(next).min(self.config.max_interval);
    }

    /// Scan again on the next tick, e.g. after a keyboard dropped out.
    pub fn rescan_soon(&mut self) {
        self.current_interval = self.config.initial_interval;
        self.last_scan = None;
    }

    pub fn current_interval(&self) -> Duration {
        self.current_interval
    }
}
