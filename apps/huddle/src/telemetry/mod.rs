//! Opt-in perf counters for negotiation latency, signaling backlog and
//! received media. Set `HUDDLE_PERF=1` (or `HUDDLE_TELEMETRY=1`) to enable;
//! otherwise every call returns immediately.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use tracing::info;

pub mod logging;

const REPORT_EVERY: u64 = 200;

static PERF_ENABLED: Lazy<bool> =
    Lazy::new(|| ["HUDDLE_PERF", "HUDDLE_TELEMETRY"].into_iter().any(flag_set));

static REGISTRY: Lazy<Registry> = Lazy::new(Registry::default);

fn flag_set(var: &str) -> bool {
    matches!(std::env::var(var).as_deref(), Ok(value) if !value.is_empty() && value != "0")
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Sample {
    pub count: u64,
    pub total: Duration,
    pub max: Duration,
    pub bytes: u64,
    /// Most recent gauge reading.
    pub last: u64,
}

impl Sample {
    pub fn average(&self) -> Duration {
        match u32::try_from(self.count) {
            Ok(0) => Duration::ZERO,
            Ok(count) => self.total / count,
            Err(_) => Duration::from_nanos((self.total.as_nanos() / self.count as u128) as u64),
        }
    }
}

#[derive(Default)]
struct Registry {
    samples: Mutex<HashMap<&'static str, Sample>>,
}

impl Registry {
    fn record(&self, label: &'static str, apply: impl FnOnce(&mut Sample)) {
        let mut samples = self.samples.lock();
        let sample = samples.entry(label).or_default();
        sample.count += 1;
        apply(sample);
        if sample.count % REPORT_EVERY == 0 {
            report(label, sample);
        }
    }

    fn get(&self, label: &str) -> Option<Sample> {
        self.samples.lock().get(label).copied()
    }

    fn sorted(&self) -> Vec<(&'static str, Sample)> {
        let mut all: Vec<_> = self
            .samples
            .lock()
            .iter()
            .map(|(label, sample)| (*label, *sample))
            .collect();
        all.sort_by_key(|(label, _)| *label);
        all
    }
}

fn report(label: &'static str, sample: &Sample) {
    info!(
        target = "huddle::perf",
        label,
        count = sample.count,
        avg_ms = sample.average().as_secs_f64() * 1_000.0,
        max_ms = sample.max.as_secs_f64() * 1_000.0,
        bytes = sample.bytes,
        last = sample.last,
        "perf"
    );
}

pub fn enabled() -> bool {
    *PERF_ENABLED
}

pub fn record_duration(label: &'static str, duration: Duration) {
    if enabled() {
        REGISTRY.record(label, |sample| {
            sample.total += duration;
            sample.max = sample.max.max(duration);
        });
    }
}

pub fn record_gauge(label: &'static str, value: u64) {
    if enabled() {
        REGISTRY.record(label, |sample| sample.last = value);
    }
}

pub fn record_bytes(label: &'static str, bytes: usize) {
    if enabled() {
        REGISTRY.record(label, |sample| sample.bytes += bytes as u64);
    }
}

pub fn snapshot(label: &str) -> Option<Sample> {
    REGISTRY.get(label)
}

/// Logs every counter collected so far; used when leaving a conference.
pub fn report_all() {
    if !enabled() {
        return;
    }
    for (label, sample) in REGISTRY.sorted() {
        report(label, &sample);
    }
}

/// Records the time between construction and drop under `label`.
pub struct PerfGuard {
    label: &'static str,
    start: Instant,
}

impl PerfGuard {
    pub fn new(label: &'static str) -> Option<Self> {
        enabled().then(|| Self {
            label,
            start: Instant::now(),
        })
    }
}

impl Drop for PerfGuard {
    fn drop(&mut self) {
        record_duration(self.label, self.start.elapsed());
    }
}
