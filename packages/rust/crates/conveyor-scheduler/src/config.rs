//! Scheduler configuration and live updates.

use std::time::Duration;

use conveyor_queue::Strategy;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SchedulerError};

/// Config for batch formation, the two concurrency caps, and retry.
///
/// `batch_concurrency` caps how many batches process at once;
/// `job_concurrency` caps how many jobs run at once *within* one batch.
/// They are deliberately separate settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Jobs drained from the queue per batch.
    pub batch_size: usize,
    /// Maximum simultaneously processing batches.
    pub batch_concurrency: usize,
    /// Maximum simultaneously running jobs within one batch.
    pub job_concurrency: usize,
    /// Queue ordering strategy.
    pub strategy: Strategy,
    /// Emit `job.completed` per job as it settles, not only at batch end.
    pub progressive_results: bool,
    /// Re-enqueue failed jobs with boosted priority.
    pub retry_failed: bool,
    /// Maximum retries per job.
    pub retry_limit: u32,
    /// Wall-clock bound for one job runner invocation, in milliseconds.
    pub per_job_timeout_ms: u64,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            batch_size: 8,
            batch_concurrency: 2,
            job_concurrency: 4,
            strategy: Strategy::Priority,
            progressive_results: false,
            retry_failed: true,
            retry_limit: 2,
            per_job_timeout_ms: 120_000,
        }
    }
}

impl BatchConfig {
    /// Check every field is in range. Out-of-range values are rejected,
    /// never clamped.
    ///
    /// # Errors
    /// Returns [`SchedulerError::InvalidConfig`] naming the offending field.
    pub fn validate(&self) -> Result<()> {
        if self.batch_size < 1 {
            return Err(SchedulerError::InvalidConfig(
                "batch_size must be at least 1".to_string(),
            ));
        }
        if self.batch_concurrency < 1 {
            return Err(SchedulerError::InvalidConfig(
                "batch_concurrency must be at least 1".to_string(),
            ));
        }
        if self.job_concurrency < 1 {
            return Err(SchedulerError::InvalidConfig(
                "job_concurrency must be at least 1".to_string(),
            ));
        }
        if self.per_job_timeout_ms < 1 {
            return Err(SchedulerError::InvalidConfig(
                "per_job_timeout_ms must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Per-job timeout as a `Duration`.
    #[must_use]
    pub fn per_job_timeout(&self) -> Duration {
        Duration::from_millis(self.per_job_timeout_ms)
    }
}

/// Partial configuration update; `None` fields are left unchanged.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchConfigPatch {
    /// New batch size, if any.
    #[serde(default)]
    pub batch_size: Option<usize>,
    /// New batch concurrency cap, if any.
    #[serde(default)]
    pub batch_concurrency: Option<usize>,
    /// New within-batch job concurrency cap, if any.
    #[serde(default)]
    pub job_concurrency: Option<usize>,
    /// New ordering strategy, if any.
    #[serde(default)]
    pub strategy: Option<Strategy>,
    /// New progressive-results flag, if any.
    #[serde(default)]
    pub progressive_results: Option<bool>,
    /// New retry flag, if any.
    #[serde(default)]
    pub retry_failed: Option<bool>,
    /// New retry limit, if any.
    #[serde(default)]
    pub retry_limit: Option<u32>,
    /// New per-job timeout in milliseconds, if any.
    #[serde(default)]
    pub per_job_timeout_ms: Option<u64>,
}

impl BatchConfigPatch {
    /// The config that would result from merging this patch into `base`.
    #[must_use]
    pub fn apply_to(&self, base: &BatchConfig) -> BatchConfig {
        BatchConfig {
            batch_size: self.batch_size.unwrap_or(base.batch_size),
            batch_concurrency: self.batch_concurrency.unwrap_or(base.batch_concurrency),
            job_concurrency: self.job_concurrency.unwrap_or(base.job_concurrency),
            strategy: self.strategy.unwrap_or(base.strategy),
            progressive_results: self
                .progressive_results
                .unwrap_or(base.progressive_results),
            retry_failed: self.retry_failed.unwrap_or(base.retry_failed),
            retry_limit: self.retry_limit.unwrap_or(base.retry_limit),
            per_job_timeout_ms: self.per_job_timeout_ms.unwrap_or(base.per_job_timeout_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(BatchConfig::default().validate().is_ok());
    }

    #[test]
    fn test_zero_batch_size_is_rejected() {
        let config = BatchConfig {
            batch_size: 0,
            ..BatchConfig::default()
        };
        let error = config.validate().unwrap_err();
        assert!(error.to_string().contains("batch_size"));
    }

    #[test]
    fn test_zero_concurrency_is_rejected() {
        for field in ["batch_concurrency", "job_concurrency"] {
            let mut config = BatchConfig::default();
            match field {
                "batch_concurrency" => config.batch_concurrency = 0,
                _ => config.job_concurrency = 0,
            }
            let error = config.validate().unwrap_err();
            assert!(error.to_string().contains(field), "{field}");
        }
    }

    #[test]
    fn test_patch_merges_only_present_fields() {
        let base = BatchConfig::default();
        let patch = BatchConfigPatch {
            batch_size: Some(16),
            strategy: Some(Strategy::Size),
            ..BatchConfigPatch::default()
        };

        let merged = patch.apply_to(&base);
        assert_eq!(merged.batch_size, 16);
        assert_eq!(merged.strategy, Strategy::Size);
        assert_eq!(merged.batch_concurrency, base.batch_concurrency);
        assert_eq!(merged.retry_limit, base.retry_limit);
    }
}
