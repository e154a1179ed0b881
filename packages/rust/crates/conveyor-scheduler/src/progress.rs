//! Progress math recomputed on every batch settlement.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::types::duration_ms;

/// Counters published under the `queue.progress` topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressReport {
    /// Initial job count of the run.
    pub total: usize,
    /// Terminal successes so far.
    pub completed: usize,
    /// Terminal failures so far.
    pub failed: usize,
    /// Jobs not yet terminally settled (queued or in flight).
    pub remaining: usize,
    /// Floor of processed/total in percent.
    pub percentage: u8,
    /// Wall-clock elapsed since the run started, in milliseconds.
    pub elapsed_ms: u64,
    /// Estimated milliseconds to drain; 0 when the rate is 0.
    pub eta_ms: u64,
    /// Terminal settlements per second of elapsed time.
    pub rate_per_second: f64,
}

/// Compute a progress report from run counters.
///
/// When nothing has been processed yet (or no time has elapsed) the rate is
/// 0 and the ETA is reported as 0 rather than dividing by zero.
#[must_use]
pub fn compute_progress(
    total: usize,
    completed: usize,
    failed: usize,
    elapsed: Duration,
) -> ProgressReport {
    let processed = completed + failed;
    let remaining = total.saturating_sub(processed);
    let percentage = if total == 0 {
        100
    } else {
        ((processed * 100 / total).min(100)) as u8
    };
    let elapsed_secs = elapsed.as_secs_f64();
    let rate_per_second = if elapsed_secs > 0.0 && processed > 0 {
        processed as f64 / elapsed_secs
    } else {
        0.0
    };
    let eta_ms = if rate_per_second > 0.0 {
        (remaining as f64 / rate_per_second * 1000.0) as u64
    } else {
        0
    };

    ProgressReport {
        total,
        completed,
        failed,
        remaining,
        percentage,
        elapsed_ms: duration_ms(elapsed),
        eta_ms,
        rate_per_second,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percentage_is_floored() {
        let report = compute_progress(3, 1, 0, Duration::from_secs(1));
        assert_eq!(report.percentage, 33);
        assert_eq!(report.remaining, 2);
    }

    #[test]
    fn test_zero_rate_reports_zero_eta() {
        let report = compute_progress(10, 0, 0, Duration::from_secs(5));
        assert_eq!(report.rate_per_second, 0.0);
        assert_eq!(report.eta_ms, 0);
    }

    #[test]
    fn test_zero_elapsed_does_not_divide_by_zero() {
        let report = compute_progress(10, 4, 1, Duration::ZERO);
        assert_eq!(report.rate_per_second, 0.0);
        assert_eq!(report.eta_ms, 0);
        assert_eq!(report.percentage, 50);
    }

    #[test]
    fn test_eta_scales_with_remaining_work() {
        // 4 processed in 2s -> 2/s; 6 remaining -> 3s.
        let report = compute_progress(10, 3, 1, Duration::from_secs(2));
        assert_eq!(report.eta_ms, 3000);
        assert!((report.rate_per_second - 2.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_empty_run_is_complete() {
        let report = compute_progress(0, 0, 0, Duration::from_secs(1));
        assert_eq!(report.percentage, 100);
        assert_eq!(report.remaining, 0);
    }
}
