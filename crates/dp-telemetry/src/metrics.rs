//! A small in-process metrics collector: counters, gauges, and duration
//! histograms, exported as Prometheus text for `GET /api/admin/stats`.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{OnceLock, RwLock};

use ahash::AHashMap;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Labels(pub Vec<(String, String)>);

impl Labels {
    pub fn new(pairs: &[(&str, &str)]) -> Self {
        let mut v: Vec<(String, String)> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        v.sort();
        Labels(v)
    }

    fn prometheus_str(&self) -> String {
        if self.0.is_empty() {
            return String::new();
        }
        let inner = self
            .0
            .iter()
            .map(|(k, v)| format!("{k}=\"{}\"", v.replace('"', "\\\"")))
            .collect::<Vec<_>>()
            .join(",");
        format!("{{{inner}}}")
    }
}

pub struct Histogram {
    boundaries: Vec<f64>,
    counts: Vec<AtomicU64>,
    sum_bits: AtomicU64,
    count: AtomicU64,
}

fn default_duration_buckets() -> Vec<f64> {
    vec![0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]
}

impl Histogram {
    fn new(boundaries: Vec<f64>) -> Self {
        let counts = (0..=boundaries.len()).map(|_| AtomicU64::new(0)).collect();
        Self {
            boundaries,
            counts,
            sum_bits: AtomicU64::new(0.0f64.to_bits()),
            count: AtomicU64::new(0),
        }
    }

    pub fn observe(&self, value: f64) {
        let bucket = self.boundaries.iter().position(|b| value <= *b).unwrap_or(self.boundaries.len());
        self.counts[bucket].fetch_add(1, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);
        loop {
            let cur = self.sum_bits.load(Ordering::Relaxed);
            let new = (f64::from_bits(cur) + value).to_bits();
            if self
                .sum_bits
                .compare_exchange_weak(cur, new, Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
            {
                break;
            }
        }
    }

    pub fn sum(&self) -> f64 {
        f64::from_bits(self.sum_bits.load(Ordering::Relaxed))
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }
}

#[derive(Default)]
pub struct MetricsCollector {
    counters: RwLock<AHashMap<(String, Labels), AtomicU64>>,
    gauges: RwLock<AHashMap<String, AtomicI64>>,
    histograms: RwLock<AHashMap<String, Histogram>>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment_counter(&self, name: &str, labels: &[(&str, &str)]) {
        let key = (name.to_string(), Labels::new(labels));
        let counters = self.counters.read().unwrap();
        if let Some(c) = counters.get(&key) {
            c.fetch_add(1, Ordering::Relaxed);
            return;
        }
        drop(counters);
        let mut counters = self.counters.write().unwrap();
        counters.entry(key).or_insert_with(|| AtomicU64::new(0)).fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_gauge(&self, name: &str, value: i64) {
        let gauges = self.gauges.read().unwrap();
        if let Some(g) = gauges.get(name) {
            g.store(value, Ordering::Relaxed);
            return;
        }
        drop(gauges);
        self.gauges.write().unwrap().insert(name.to_string(), AtomicI64::new(value));
    }

    pub fn record_histogram(&self, name: &str, value: f64) {
        let histograms = self.histograms.read().unwrap();
        if let Some(h) = histograms.get(name) {
            h.observe(value);
            return;
        }
        drop(histograms);
        let mut histograms = self.histograms.write().unwrap();
        histograms
            .entry(name.to_string())
            .or_insert_with(|| Histogram::new(default_duration_buckets()))
            .observe(value);
    }

    pub fn render_prometheus(&self) -> String {
        let mut out = String::new();
        for ((name, labels), value) in self.counters.read().unwrap().iter() {
            out.push_str(&format!("{name}{} {}\n", labels.prometheus_str(), value.load(Ordering::Relaxed)));
        }
        for (name, value) in self.gauges.read().unwrap().iter() {
            out.push_str(&format!("{name} {}\n", value.load(Ordering::Relaxed)));
        }
        for (name, hist) in self.histograms.read().unwrap().iter() {
            out.push_str(&format!("{name}_sum {}\n", hist.sum()));
            out.push_str(&format!("{name}_count {}\n", hist.count()));
        }
        out
    }
}

static GLOBAL: OnceLock<MetricsCollector> = OnceLock::new();

pub fn global_metrics() -> &'static MetricsCollector {
    GLOBAL.get_or_init(MetricsCollector::new)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counter_increments() {
        let m = MetricsCollector::new();
        m.increment_counter("reqs", &[("method", "GET")]);
        m.increment_counter("reqs", &[("method", "GET")]);
        let text = m.render_prometheus();
        assert!(text.contains("reqs{method=\"GET\"} 2"));
    }

    #[test]
    fn histogram_tracks_sum_and_count() {
        let h = Histogram::new(default_duration_buckets());
        h.observe(0.01);
        h.observe(0.2);
        assert_eq!(h.count(), 2);
        assert!((h.sum() - 0.21).abs() < 1e-9);
    }
}
