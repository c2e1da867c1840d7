//! Trailing-window statistics, rates of change and linear trend.

use statrs::statistics::{Data, OrderStatistics, Statistics};

/// Last `days` values of `values`, or all of them when the history is shorter.
pub fn trailing(values: &[f64], days: usize) -> &[f64] {
    &values[values.len().saturating_sub(days)..]
}

/// Summary of one trailing window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowStats {
    pub mean: f64,
    pub std: f64,
    pub min: f64,
    pub max: f64,
    pub p25: f64,
    pub p75: f64,
    pub p90: f64,
}

impl WindowStats {
    /// Statistics over a non-empty window. Std is the population std-dev so a
    /// single-day window yields 0 rather than NaN.
    pub fn compute(window: &[f64]) -> Self {
        if window.is_empty() {
            return Self {
                mean: 0.0,
                std: 0.0,
                min: 0.0,
                max: 0.0,
                p25: 0.0,
                p75: 0.0,
                p90: 0.0,
            };
        }
        let mut data = Data::new(window.to_vec());
        Self {
            mean: window.mean(),
            std: window.population_std_dev(),
            min: window.min(),
            max: window.max(),
            p25: data.percentile(25),
            p75: data.percentile(75),
            p90: data.percentile(90),
        }
    }

    /// Mean and population std-dev only.
    pub fn mean_std(window: &[f64]) -> (f64, f64) {
        if window.is_empty() {
            return (0.0, 0.0);
        }
        (window.mean(), window.population_std_dev())
    }
}

/// Value `days` steps before the latest one, clamped to the first value.
fn lagged(values: &[f64], days: usize) -> f64 {
    let last = values.len().saturating_sub(1);
    values.get(last.saturating_sub(days)).copied().unwrap_or(0.0)
}

/// Change between the latest value and the value `days` earlier.
pub fn change_over(values: &[f64], days: usize) -> f64 {
    values.last().map_or(0.0, |&v| v - lagged(values, days))
}

/// Latest `days`-day change minus the `days`-day change before it.
pub fn acceleration(values: &[f64], days: usize) -> f64 {
    let recent = change_over(values, days);
    let previous = lagged(values, days) - lagged(values, days * 2);
    recent - previous
}

/// Least-squares slope per step. Zero for fewer than two points.
pub fn linear_slope(values: &[f64]) -> f64 {
    let n = values.len();
    if n < 2 {
        return 0.0;
    }
    #[allow(clippy::cast_precision_loss)]
    let x_mean = (n - 1) as f64 / 2.0;
    let y_mean = values.mean();

    let mut sxy = 0.0;
    let mut sxx = 0.0;
    for (i, &y) in values.iter().enumerate() {
        #[allow(clippy::cast_precision_loss)]
        let dx = i as f64 - x_mean;
        sxy += dx * (y - y_mean);
        sxx += dx * dx;
    }
    if sxx == 0.0 {
        0.0
    } else {
        sxy / sxx
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trailing_shorter_history_uses_all_days() {
        let values = [1.0, 2.0, 3.0];
        assert_eq!(trailing(&values, 2), &[2.0, 3.0]);
        assert_eq!(trailing(&values, 60), &values);
    }

    #[test]
    fn test_window_stats() {
        let stats = WindowStats::compute(&[1.0, 2.0, 3.0, 4.0]);
        assert!((stats.mean - 2.5).abs() < 1e-12);
        assert!((stats.std - 1.25_f64.sqrt()).abs() < 1e-12);
        assert_eq!(stats.min, 1.0);
        assert_eq!(stats.max, 4.0);
        assert!(stats.p25 <= stats.p75 && stats.p75 <= stats.p90);
    }

    #[test]
    fn test_single_day_window_has_zero_std() {
        let stats = WindowStats::compute(&[0.4]);
        assert_eq!(stats.std, 0.0);
        assert_eq!(stats.p90, 0.4);
    }

    #[test]
    fn test_linear_slope_exact_line() {
        let values: Vec<f64> = (0..10).map(|i| 0.3 + 0.01 * f64::from(i)).collect();
        assert!((linear_slope(&values) - 0.01).abs() < 1e-12);
        assert_eq!(linear_slope(&[0.5]), 0.0);
    }

    #[test]
    fn test_change_and_acceleration() {
        let values: Vec<f64> = (0..30).map(|i| f64::from(i) * f64::from(i)).collect();
        // 29² - 22² = 357, (22² - 15²) = 259
        assert_eq!(change_over(&values, 7), 357.0);
        assert_eq!(acceleration(&values, 7), 98.0);
        // lag clamps to first value
        assert_eq!(change_over(&[1.0, 2.0], 30), 1.0);
    }
}
