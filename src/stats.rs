use serde::Serialize;

use crate::dataset::Dataset;

/// Descriptive statistics of one numeric column
///
/// `std_dev` is the sample standard deviation (N-1 denominator). With fewer
/// than two present values it is NaN, and with no present values every
/// field is NaN. Missing values are skipped.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ColumnStats {
    pub column: String,
    pub count: usize,
    pub avg: f64,
    pub std_dev: f64,
    pub min: f64,
    pub max: f64,
}

/// The four headline metric cards shown above the statistics table
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct HeadlineMetrics {
    /// Mean of the per-column averages
    pub avg: f64,
    /// Smallest per-column minimum
    pub min: f64,
    /// Largest per-column maximum
    pub max: f64,
    /// Mean of the per-column standard deviations
    pub std_dev: f64,
}

/// Arithmetic mean of present values; NaN when there are none
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Sample standard deviation (N-1); NaN for fewer than two values
pub fn sample_std_dev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return f64::NAN;
    }
    let m = mean(values);
    let sum_sq: f64 = values.iter().map(|v| (v - m).powi(2)).sum();
    (sum_sq / (values.len() - 1) as f64).sqrt()
}

/// Present values of an optional series
pub fn present(values: &[Option<f64>]) -> Vec<f64> {
    values.iter().flatten().copied().collect()
}

impl ColumnStats {
    /// Compute statistics over the present values of a series
    ///
    /// # Examples
    /// ```
    /// use wattwatch::stats::ColumnStats;
    ///
    /// let s = ColumnStats::from_values("kW", &[Some(10.0), Some(20.0), Some(30.0)]);
    /// assert_eq!((s.avg, s.min, s.max, s.std_dev), (20.0, 10.0, 30.0, 10.0));
    /// ```
    pub fn from_values(column: impl Into<String>, values: &[Option<f64>]) -> Self {
        let xs = present(values);
        let (min, max) = if xs.is_empty() {
            (f64::NAN, f64::NAN)
        } else {
            (
                xs.iter().copied().fold(f64::INFINITY, f64::min),
                xs.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            )
        };
        Self {
            column: column.into(),
            count: xs.len(),
            avg: mean(&xs),
            std_dev: sample_std_dev(&xs),
            min,
            max,
        }
    }
}

/// Statistics for every numeric column, in column order
///
/// Recomputed from the full table on each call.
pub fn compute_energy_stats(dataset: &Dataset) -> Vec<ColumnStats> {
    dataset
        .numeric_column_names()
        .into_iter()
        .filter_map(|name| {
            let values = dataset.numeric(&name)?;
            Some(ColumnStats::from_values(name.clone(), values))
        })
        .collect()
}

/// Aggregate a statistics table into the headline metric cards
///
/// NaN entries are skipped; a metric with nothing to aggregate is NaN.
pub fn headline_metrics(stats: &[ColumnStats]) -> HeadlineMetrics {
    let finite = |f: fn(&ColumnStats) -> f64| -> Vec<f64> {
        stats.iter().map(f).filter(|v| !v.is_nan()).collect()
    };
    let mins = finite(|s| s.min);
    let maxs = finite(|s| s.max);

    HeadlineMetrics {
        avg: mean(&finite(|s| s.avg)),
        min: mins.iter().copied().reduce(f64::min).unwrap_or(f64::NAN),
        max: maxs.iter().copied().reduce(f64::max).unwrap_or(f64::NAN),
        std_dev: mean(&finite(|s| s.std_dev)),
    }
}
