use std::collections::HashMap;
use std::sync::Mutex;

use crate::types::SizeBucket;

#[derive(Debug, Clone, Hash, PartialEq, Eq)]
struct EtaKey {
    resource: String,
    operation: String,
    bucket: SizeBucket,
}

#[derive(Debug, Clone, Copy, Default)]
struct Samples {
    total_ms: u64,
    count: u64,
}

impl Samples {
    fn add(&mut self, ms: u64) {
        self.total_ms += ms;
        self.count += 1;
    }

    fn avg_ms(&self) -> Option<u64> {
        (self.count > 0).then(|| self.total_ms / self.count)
    }
}

/// Running per-record duration averages, bucketed by
/// (resource, operation, size). Used to log how long the rest of a run
/// should take after each batch.
pub struct EtaTracker {
    samples: Mutex<HashMap<EtaKey, Samples>>,
}

impl Default for EtaTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl EtaTracker {
    pub fn new() -> Self {
        Self {
            samples: Mutex::new(HashMap::new()),
        }
    }

    /// Record how long one record took.
    pub fn record(&self, resource: &str, operation: &str, bucket: SizeBucket, duration_ms: u64) {
        let key = EtaKey {
            resource: resource.to_string(),
            operation: operation.to_string(),
            bucket,
        };
        match self.samples.lock() {
            Ok(mut samples) => samples.entry(key).or_default().add(duration_ms),
            Err(e) => tracing::warn!(error = %e, "ETA samples mutex poisoned"),
        }
    }

    /// Estimate the remaining time for records with the given buckets.
    ///
    /// A bucket without samples borrows the average over every bucket
    /// seen for the same resource and operation. Returns `None` until at
    /// least one sample exists.
    pub fn estimate_remaining(
        &self,
        resource: &str,
        operation: &str,
        remaining: &[SizeBucket],
    ) -> Option<u64> {
        if remaining.is_empty() {
            return Some(0);
        }
        let samples = self.samples.lock().ok()?;

        let mut overall = Samples::default();
        for (key, s) in samples.iter() {
            if key.resource == resource && key.operation == operation {
                overall.total_ms += s.total_ms;
                overall.count += s.count;
            }
        }
        let fallback = overall.avg_ms()?;

        let total = remaining
            .iter()
            .map(|&bucket| {
                let key = EtaKey {
                    resource: resource.to_string(),
                    operation: operation.to_string(),
                    bucket,
                };
                samples
                    .get(&key)
                    .and_then(Samples::avg_ms)
                    .unwrap_or(fallback)
            })
            .sum();
        Some(total)
    }

    /// Number of samples for one exact key.
    pub fn sample_count(&self, resource: &str, operation: &str, bucket: SizeBucket) -> u64 {
        let key = EtaKey {
            resource: resource.to_string(),
            operation: operation.to_string(),
            bucket,
        };
        self.samples
            .lock()
            .ok()
            .and_then(|s| s.get(&key).map(|s| s.count))
            .unwrap_or(0)
    }
}

/// Render milliseconds as `1h02m03s` / `2m03s` / `3s` for log lines.
pub fn format_duration_ms(ms: u64) -> String {
    let secs = ms / 1000;
    let (h, m, s) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    if h > 0 {
        format!("{}h{:02}m{:02}s", h, m, s)
    } else if m > 0 {
        format!("{}m{:02}s", m, s)
    } else {
        format!("{}s", s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_samples_returns_none() {
        let tracker = EtaTracker::new();
        let eta = tracker.estimate_remaining("gpt-4", "qa", &[SizeBucket::Small]);
        assert_eq!(eta, None);
    }

    #[test]
    fn test_nothing_remaining_is_zero() {
        let tracker = EtaTracker::new();
        assert_eq!(tracker.estimate_remaining("gpt-4", "qa", &[]), Some(0));
    }

    #[test]
    fn test_exact_bucket_average() {
        let tracker = EtaTracker::new();
        tracker.record("gpt-4", "qa", SizeBucket::Small, 1000);
        tracker.record("gpt-4", "qa", SizeBucket::Small, 2000);

        let eta = tracker.estimate_remaining("gpt-4", "qa", &[SizeBucket::Small; 2]);
        assert_eq!(eta, Some(3000));
        assert_eq!(tracker.sample_count("gpt-4", "qa", SizeBucket::Small), 2);
    }

    #[test]
    fn test_missing_bucket_uses_overall_average() {
        let tracker = EtaTracker::new();
        tracker.record("echoprime", "views", SizeBucket::Small, 100);
        tracker.record("echoprime", "views", SizeBucket::Large, 300);

        // Medium has no samples: falls back to (100 + 300) / 2
        let eta = tracker.estimate_remaining(
            "echoprime",
            "views",
            &[SizeBucket::Small, SizeBucket::Medium],
        );
        assert_eq!(eta, Some(300));
    }

    #[test]
    fn test_operations_isolated() {
        let tracker = EtaTracker::new();
        tracker.record("m", "qa", SizeBucket::Small, 1000);
        assert_eq!(tracker.estimate_remaining("m", "views", &[SizeBucket::Small]), None);
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration_ms(3_000), "3s");
        assert_eq!(format_duration_ms(123_000), "2m03s");
        assert_eq!(format_duration_ms(3_723_000), "1h02m03s");
    }
}
