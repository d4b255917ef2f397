//! Per-step metric history stored alongside checkpoints.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Metric name -> values, one value per recorded step.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MetricLog {
    series: BTreeMap<String, Vec<f64>>,
}

impl MetricLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, name: &str, value: f64) {
        self.series.entry(name.to_string()).or_default().push(value);
    }

    pub fn push_all(&mut self, values: &[(&str, f64)]) {
        for (name, value) in values {
            self.push(name, *value);
        }
    }

    pub fn extend<I: IntoIterator<Item = f64>>(&mut self, name: &str, values: I) {
        self.series
            .entry(name.to_string())
            .or_default()
            .extend(values);
    }

    pub fn get(&self, name: &str) -> Option<&[f64]> {
        self.series.get(name).map(Vec::as_slice)
    }

    pub fn last(&self, name: &str) -> Option<f64> {
        self.get(name).and_then(|v| v.last().copied())
    }

    pub fn len(&self, name: &str) -> usize {
        self.get(name).map_or(0, <[f64]>::len)
    }

    pub fn is_empty(&self) -> bool {
        self.series.values().all(Vec::is_empty)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.series.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[f64])> {
        self.series.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }
}

/// `steps` evenly spaced values from `start` to `end`, both included.
pub fn linspace(start: f64, end: f64, steps: usize) -> Vec<f64> {
    match steps {
        0 => Vec::new(),
        1 => vec![start],
        n => {
            let step = (end - start) / (n - 1) as f64;
            (0..n)
                .map(|i| if i + 1 == n { end } else { start + step * i as f64 })
                .collect()
        }
    }
}

/// Trailing moving average over the finite values of each window.
///
/// NaN or infinite entries are skipped, so one bad step only drops out of the
/// windows that contain it; a window with no finite value yields NaN.
pub fn smooth(values: &[f64], window: usize) -> Vec<f64> {
    let window = window.max(1);
    let mut out = Vec::with_capacity(values.len());
    let mut sum = 0.0;
    let mut count = 0usize;
    for (i, v) in values.iter().enumerate() {
        if v.is_finite() {
            sum += v;
            count += 1;
        }
        if i >= window {
            let leaving = values[i - window];
            if leaving.is_finite() {
                sum -= leaving;
                count -= 1;
            }
        }
        out.push(if count == 0 { f64::NAN } else { sum / count as f64 });
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn linspace_endpoints() {
        assert!(linspace(0.0, 1.0, 0).is_empty());
        assert_eq!(linspace(0.3, 0.9, 1), vec![0.3]);
        assert_eq!(linspace(0.0, 1.0, 5), vec![0.0, 0.25, 0.5, 0.75, 1.0]);
    }

    #[test]
    fn smooth_is_trailing_mean() {
        let out = smooth(&[1.0, 3.0, 5.0, 7.0], 2);
        assert_eq!(out, vec![1.0, 2.0, 4.0, 6.0]);
        assert_eq!(smooth(&[], 10), Vec::<f64>::new());
    }

    #[test]
    fn smooth_recovers_after_non_finite_values() {
        let out = smooth(&[1.0, f64::NAN, 3.0, 5.0, f64::INFINITY, 7.0], 2);
        assert_eq!(out[..4], [1.0, 1.0, 3.0, 4.0]);
        assert_eq!(out[4], 5.0);
        assert_eq!(out[5], 7.0);
        assert!(smooth(&[f64::NAN], 3)[0].is_nan());
    }

    #[test]
    fn log_appends_per_metric() {
        let mut log = MetricLog::new();
        log.push_all(&[("acc", 0.5), ("loss", 2.0)]);
        log.push("acc", 0.75);
        log.extend("val_acc", linspace(0.0, 0.5, 3));
        assert_eq!(log.len("acc"), 2);
        assert_eq!(log.last("acc"), Some(0.75));
        assert_eq!(log.get("val_acc"), Some(&[0.0, 0.25, 0.5][..]));
        assert_eq!(log.names().collect::<Vec<_>>(), vec!["acc", "loss", "val_acc"]);
        assert_eq!(log.len("missing"), 0);
    }
}
