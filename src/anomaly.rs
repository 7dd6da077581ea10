use chrono::NaiveDateTime;
use serde::Serialize;

use crate::dataset::{Dataset, TIMESTAMP_COLUMN, Value};
use crate::stats::{mean, present, sample_std_dev};

/// Default |Z| above which a value counts as an anomaly
pub const DEFAULT_Z_THRESHOLD: f64 = 3.0;

/// One flagged row
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct AnomalyRecord {
    /// Row index in the analysed dataset
    pub row: usize,
    pub timestamp: Option<NaiveDateTime>,
    pub value: f64,
    pub z: f64,
    /// Full row, in dataset column order
    pub values: Vec<Value>,
}

/// Result of one detector run
#[derive(Clone, Debug, Serialize)]
pub struct AnomalyReport {
    pub column: String,
    pub threshold: f64,
    pub mean: f64,
    pub std_dev: f64,
    pub anomalies: Vec<AnomalyRecord>,
}

impl AnomalyReport {
    fn empty(column: &str, threshold: f64) -> Self {
        Self {
            column: column.to_string(),
            threshold,
            mean: f64::NAN,
            std_dev: f64::NAN,
            anomalies: Vec::new(),
        }
    }

    pub fn count(&self) -> usize {
        self.anomalies.len()
    }
}

/// Flag rows whose Z-score in `column` exceeds `threshold` in magnitude
///
/// Z = (x - mean) / sample std dev, over present values only. Rows with a
/// missing value in `column` are never flagged.
///
/// Degenerate inputs return an empty report rather than an error:
/// * `column` absent or not numeric
/// * fewer than two present values (std dev undefined)
/// * zero variance (every deviation is undefined)
///
/// # Examples
/// ```
/// use wattwatch::anomaly::detect_anomalies;
/// use wattwatch::dataset::{Column, Dataset};
///
/// let values = [1.0, 2.0, 3.0, 4.0, 100.0, 2.0, 3.0, 1.0, 2.0, 3.0, 4.0, 2.0];
/// let ds = Dataset::from_columns(vec![Column::numbers(
///     "kW",
///     values.iter().map(|v| Some(*v)).collect(),
/// )])
/// .unwrap();
///
/// let report = detect_anomalies(&ds, "kW", 3.0);
/// assert_eq!(report.count(), 1);
/// assert_eq!(report.anomalies[0].value, 100.0);
/// ```
pub fn detect_anomalies(dataset: &Dataset, column: &str, threshold: f64) -> AnomalyReport {
    let Some(values) = dataset.numeric(column) else {
        return AnomalyReport::empty(column, threshold);
    };

    let xs = present(values);
    let m = mean(&xs);
    let sd = sample_std_dev(&xs);

    let mut report = AnomalyReport::empty(column, threshold);
    report.mean = m;
    report.std_dev = sd;

    if !sd.is_finite() || sd == 0.0 {
        return report;
    }

    let stamps = dataset.timestamps(TIMESTAMP_COLUMN);
    report.anomalies = values
        .iter()
        .enumerate()
        .filter_map(|(row, v)| {
            let value = (*v)?;
            let z = (value - m) / sd;
            (z.abs() > threshold).then(|| AnomalyRecord {
                row,
                timestamp: stamps.and_then(|s| s[row]),
                value,
                z,
                values: dataset.row(row),
            })
        })
        .collect();
    report
}
