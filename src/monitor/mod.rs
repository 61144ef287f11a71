//! Performance Monitoring Service
//!
//! Records per-stage latency and outcome samples. Read-only with respect to
//! job state: the engine reports samples fire-and-forget, the Feedback Loop
//! consults the aggregates to decide whether a provider is degraded, and
//! operators read the same aggregates. Samples are mirrored to the
//! append-only `metrics` log keyed by `(provider_ref, recorded_at)`.

use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};

use crate::domain::{Layer, StageRecord, StageStatus};
use crate::id::now_ms;
use crate::storage::{Storage, METRICS_COLLECTION};

/// One per-stage outcome sample
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageSample {
    pub provider_ref: String,
    pub layer: Layer,
    pub duration_ms: i64,
    pub success: bool,
    pub recorded_at: i64,
}

impl StageSample {
    /// Build a sample from a terminal stage record.
    pub fn from_record(record: &StageRecord) -> Self {
        Self {
            provider_ref: record.provider_ref.clone(),
            layer: record.layer,
            duration_ms: record.duration_ms().unwrap_or(0),
            success: record.status == StageStatus::Succeeded,
            recorded_at: now_ms(),
        }
    }
}

/// Read model over a provider's samples
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProviderStats {
    /// Total recorded attempts
    pub attempts: u64,
    /// Total recorded failures
    pub failures: u64,
    /// Mean latency across all attempts
    pub mean_latency_ms: f64,
    /// Failure ratio within the recent window
    pub recent_failure_ratio: f64,
}

/// Configuration for degradation detection
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Width of the recency window used for degradation checks
    pub window_ms: i64,
    /// Failure ratio at or above which a provider counts as degraded
    pub degraded_failure_ratio: f64,
    /// Minimum samples inside the window before degradation can trigger
    pub min_samples: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            window_ms: 5 * 60 * 1000,
            degraded_failure_ratio: 0.5,
            min_samples: 3,
        }
    }
}

/// Append-only performance monitor shared across jobs
pub struct PerformanceMonitor<S: Storage> {
    samples: RwLock<Vec<StageSample>>,
    storage: Option<Arc<S>>,
    config: MonitorConfig,
}

impl<S: Storage> PerformanceMonitor<S> {
    /// Create an in-memory monitor.
    pub fn new(config: MonitorConfig) -> Self {
        Self {
            samples: RwLock::new(Vec::new()),
            storage: None,
            config,
        }
    }

    /// Create a monitor that mirrors samples to the metrics log.
    pub fn with_storage(config: MonitorConfig, storage: Arc<S>) -> Self {
        Self {
            samples: RwLock::new(Vec::new()),
            storage: Some(storage),
            config,
        }
    }

    /// Record one sample. Persistence failures are logged and swallowed;
    /// monitoring must never fail a stage.
    pub fn record(&self, sample: StageSample) {
        if let Some(storage) = &self.storage {
            if let Err(error) = storage.append(METRICS_COLLECTION, &sample) {
                tracing::warn!(
                    provider_ref = %sample.provider_ref,
                    %error,
                    "Failed to persist metrics sample"
                );
            }
        }

        if let Ok(mut samples) = self.samples.write() {
            samples.push(sample);
        }
    }

    /// Aggregate stats for one provider.
    pub fn stats(&self, provider_ref: &str) -> ProviderStats {
        let samples = match self.samples.read() {
            Ok(samples) => samples,
            Err(_) => return ProviderStats::default(),
        };

        let provider_samples: Vec<&StageSample> = samples
            .iter()
            .filter(|sample| sample.provider_ref == provider_ref)
            .collect();

        if provider_samples.is_empty() {
            return ProviderStats::default();
        }

        let attempts = provider_samples.len() as u64;
        let failures = provider_samples.iter().filter(|s| !s.success).count() as u64;
        let mean_latency_ms = provider_samples
            .iter()
            .map(|s| s.duration_ms as f64)
            .sum::<f64>()
            / attempts as f64;

        let window_start = now_ms() - self.config.window_ms;
        let recent: Vec<&&StageSample> = provider_samples
            .iter()
            .filter(|s| s.recorded_at >= window_start)
            .collect();
        let recent_failure_ratio = if recent.is_empty() {
            0.0
        } else {
            recent.iter().filter(|s| !s.success).count() as f64 / recent.len() as f64
        };

        ProviderStats {
            attempts,
            failures,
            mean_latency_ms,
            recent_failure_ratio,
        }
    }

    /// True when a provider's recent failure ratio crosses the configured
    /// threshold with enough samples to mean something.
    pub fn is_degraded(&self, provider_ref: &str) -> bool {
        let samples = match self.samples.read() {
            Ok(samples) => samples,
            Err(_) => return false,
        };

        let window_start = now_ms() - self.config.window_ms;
        let recent: Vec<&StageSample> = samples
            .iter()
            .filter(|s| s.provider_ref == provider_ref && s.recorded_at >= window_start)
            .collect();

        if recent.len() < self.config.min_samples {
            return false;
        }

        let failures = recent.iter().filter(|s| !s.success).count();
        failures as f64 / recent.len() as f64 >= self.config.degraded_failure_ratio
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::JsonlStorage;
    use tempfile::TempDir;

    fn sample(provider_ref: &str, success: bool, duration_ms: i64) -> StageSample {
        StageSample {
            provider_ref: provider_ref.to_string(),
            layer: Layer::Top,
            duration_ms,
            success,
            recorded_at: now_ms(),
        }
    }

    #[test]
    fn test_stats_empty() {
        let monitor: PerformanceMonitor<JsonlStorage> =
            PerformanceMonitor::new(MonitorConfig::default());
        assert_eq!(monitor.stats("ghost"), ProviderStats::default());
    }

    #[test]
    fn test_stats_aggregation() {
        let monitor: PerformanceMonitor<JsonlStorage> =
            PerformanceMonitor::new(MonitorConfig::default());
        monitor.record(sample("enricher", true, 100));
        monitor.record(sample("enricher", false, 300));
        monitor.record(sample("other", true, 50));

        let stats = monitor.stats("enricher");
        assert_eq!(stats.attempts, 2);
        assert_eq!(stats.failures, 1);
        assert!((stats.mean_latency_ms - 200.0).abs() < f64::EPSILON);
        assert!((stats.recent_failure_ratio - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_not_degraded_below_min_samples() {
        let monitor: PerformanceMonitor<JsonlStorage> =
            PerformanceMonitor::new(MonitorConfig::default());
        monitor.record(sample("enricher", false, 100));
        monitor.record(sample("enricher", false, 100));

        assert!(!monitor.is_degraded("enricher"));
    }

    #[test]
    fn test_degraded_at_threshold() {
        let monitor: PerformanceMonitor<JsonlStorage> =
            PerformanceMonitor::new(MonitorConfig::default());
        monitor.record(sample("enricher", false, 100));
        monitor.record(sample("enricher", false, 100));
        monitor.record(sample("enricher", true, 100));
        monitor.record(sample("enricher", false, 100));

        assert!(monitor.is_degraded("enricher"));
    }

    #[test]
    fn test_healthy_provider_not_degraded() {
        let monitor: PerformanceMonitor<JsonlStorage> =
            PerformanceMonitor::new(MonitorConfig::default());
        for _ in 0..5 {
            monitor.record(sample("validator", true, 40));
        }
        assert!(!monitor.is_degraded("validator"));
    }

    #[test]
    fn test_samples_persisted_to_metrics_log() {
        let temp_dir = TempDir::new().unwrap();
        let storage = Arc::new(JsonlStorage::new(temp_dir.path()).unwrap());
        let monitor = PerformanceMonitor::with_storage(MonitorConfig::default(), storage.clone());

        monitor.record(sample("validator", true, 40));
        monitor.record(sample("validator", false, 90));

        let persisted: Vec<StageSample> = storage.list(METRICS_COLLECTION).unwrap();
        assert_eq!(persisted.len(), 2);
        assert_eq!(persisted[0].provider_ref, "validator");
    }
}
