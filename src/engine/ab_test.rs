//! Baseline vs candidate comparison for the canary stage
//!
//! Win rates are compared with a one-sided two-proportion z-test; ROI gives the
//! improvement figure checked against the configured threshold.

use statrs::distribution::{ContinuousCDF, Normal};

use crate::domain::{decline_pct, AbTestResult, PerformanceSample, RetrainingConfiguration};

pub fn analyze(
    baseline: PerformanceSample,
    candidate: PerformanceSample,
    config: &RetrainingConfiguration,
) -> AbTestResult {
    let improvement_pct = -decline_pct(baseline.roi, candidate.roi);
    let enough_samples =
        baseline.sample_size >= config.min_ab_samples && candidate.sample_size >= config.min_ab_samples;

    let p_value = win_rate_p_value(baseline, candidate);
    let significance = p_value.map(|p| 1.0 - p).unwrap_or(0.0);

    let deployment_recommended = enough_samples
        && improvement_pct >= config.improvement_threshold_pct
        && significance >= config.significance_level;

    let summary = if !enough_samples {
        format!(
            "Insufficient samples (baseline {}, candidate {}, need {} each)",
            baseline.sample_size, candidate.sample_size, config.min_ab_samples
        )
    } else if deployment_recommended {
        format!(
            "Candidate outperforms baseline: ROI {:+.2}% at {:.1}% confidence",
            improvement_pct,
            significance * 100.0
        )
    } else if improvement_pct < config.improvement_threshold_pct {
        format!(
            "Improvement {:+.2}% below threshold {:.2}%",
            improvement_pct, config.improvement_threshold_pct
        )
    } else {
        format!(
            "Improvement {:+.2}% not significant ({:.1}% < {:.1}%)",
            improvement_pct,
            significance * 100.0,
            config.significance_level * 100.0
        )
    };

    AbTestResult {
        baseline,
        candidate,
        improvement_pct,
        significance,
        p_value,
        deployment_recommended,
        summary,
    }
}

/// One-sided p-value for "candidate win rate > baseline win rate"
fn win_rate_p_value(baseline: PerformanceSample, candidate: PerformanceSample) -> Option<f64> {
    if baseline.sample_size == 0 || candidate.sample_size == 0 {
        return None;
    }
    let n_b = baseline.sample_size as f64;
    let n_c = candidate.sample_size as f64;
    let pooled = (baseline.win_rate * n_b + candidate.win_rate * n_c) / (n_b + n_c);
    let std_err = (pooled * (1.0 - pooled) * (1.0 / n_b + 1.0 / n_c)).sqrt();
    if !std_err.is_finite() || std_err == 0.0 {
        return None;
    }

    let z = (candidate.win_rate - baseline.win_rate) / std_err;
    let normal = Normal::new(0.0, 1.0).ok()?;
    Some(1.0 - normal.cdf(z))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(roi: f64, win_rate: f64, n: u64) -> PerformanceSample {
        PerformanceSample {
            roi,
            win_rate,
            sample_size: n,
        }
    }

    #[test]
    fn test_clear_winner_is_recommended() {
        let config = RetrainingConfiguration::default();
        let result = analyze(sample(0.04, 0.52, 1000), sample(0.05, 0.58, 1000), &config);
        assert!((result.improvement_pct - 25.0).abs() < 1e-6);
        assert!(result.significance > 0.99);
        assert!(result.deployment_recommended);
    }

    #[test]
    fn test_small_samples_never_recommended() {
        let config = RetrainingConfiguration {
            min_ab_samples: 100,
            ..Default::default()
        };
        let result = analyze(sample(0.04, 0.50, 40), sample(0.10, 0.70, 40), &config);
        assert!(!result.deployment_recommended);
        assert!(result.summary.starts_with("Insufficient samples"));
    }

    #[test]
    fn test_noise_is_not_significant() {
        let config = RetrainingConfiguration::default();
        let result = analyze(sample(0.04, 0.540, 200), sample(0.045, 0.545, 200), &config);
        assert!(result.improvement_pct > config.improvement_threshold_pct);
        assert!(result.significance < config.significance_level);
        assert!(!result.deployment_recommended);
    }

    #[test]
    fn test_worse_candidate_rejected() {
        let config = RetrainingConfiguration::default();
        let result = analyze(sample(0.05, 0.56, 1000), sample(0.03, 0.50, 1000), &config);
        assert!(result.improvement_pct < 0.0);
        assert!(!result.deployment_recommended);
    }
}
