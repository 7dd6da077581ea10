use chrono::{DateTime, NaiveDateTime};
use std::collections::BTreeMap;

use crate::dataset::Dataset;

/// Row count above which chart series are resampled
pub const RESAMPLE_ABOVE: usize = 2000;

/// A chartable series of (time, value) points
pub type TimePoints = Vec<(NaiveDateTime, f64)>;

/// Pair a timestamp column with a numeric column, skipping incomplete rows
pub fn time_series(dataset: &Dataset, time_column: &str, value_column: &str) -> TimePoints {
    match (dataset.timestamps(time_column), dataset.numeric(value_column)) {
        (Some(stamps), Some(values)) => stamps
            .iter()
            .zip(values)
            .filter_map(|(t, v)| Some(((*t)?, (*v)?)))
            .collect(),
        _ => Vec::new(),
    }
}

/// Floor a timestamp to the start of its `minutes`-wide bucket
fn bucket_start(t: NaiveDateTime, minutes: i64) -> NaiveDateTime {
    let width = minutes.max(1) * 60;
    let secs = t.and_utc().timestamp();
    DateTime::from_timestamp(secs.div_euclid(width) * width, 0)
        .map(|d| d.naive_utc())
        .unwrap_or(t)
}

/// Mean of each `minutes`-wide bucket, in time order
///
/// Buckets with no samples are not emitted.
pub fn resample_mean(points: &[(NaiveDateTime, f64)], minutes: i64) -> TimePoints {
    let mut buckets: BTreeMap<NaiveDateTime, (f64, usize)> = BTreeMap::new();
    for &(t, v) in points {
        let entry = buckets.entry(bucket_start(t, minutes)).or_insert((0.0, 0));
        entry.0 += v;
        entry.1 += 1;
    }
    buckets
        .into_iter()
        .map(|(t, (sum, n))| (t, sum / n as f64))
        .collect()
}

/// Points ready to plot: one-minute means when there are more than `limit`
pub fn prepare_series(points: TimePoints, limit: usize) -> TimePoints {
    if points.len() > limit {
        resample_mean(&points, 1)
    } else {
        points
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::Column;
    use chrono::{Duration, NaiveDate};

    fn t0() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 1).unwrap().and_hms_opt(10, 0, 0).unwrap()
    }

    #[test]
    fn pairs_skip_missing_values() {
        let ds = Dataset::from_columns(vec![
            Column::timestamps("T", vec![Some(t0()), None, Some(t0())]),
            Column::numbers("V", vec![Some(1.0), Some(2.0), None]),
        ])
        .unwrap();
        assert_eq!(time_series(&ds, "T", "V"), vec![(t0(), 1.0)]);
        assert!(time_series(&ds, "T", "missing").is_empty());
    }

    #[test]
    fn one_minute_means() {
        let points: TimePoints = (0..6)
            .map(|i| (t0() + Duration::seconds(i * 20), i as f64))
            .collect();
        let out = resample_mean(&points, 1);
        assert_eq!(out, vec![(t0(), 1.0), (t0() + Duration::minutes(1), 4.0)]);
    }

    #[test]
    fn gaps_produce_no_bucket() {
        let points = vec![(t0(), 1.0), (t0() + Duration::minutes(5), 3.0)];
        assert_eq!(resample_mean(&points, 1).len(), 2);
    }

    #[test]
    fn only_large_series_are_resampled() {
        let small: TimePoints = (0..10).map(|i| (t0() + Duration::seconds(i), 1.0)).collect();
        assert_eq!(prepare_series(small.clone(), RESAMPLE_ABOVE).len(), 10);

        let large: TimePoints = (0..2400).map(|i| (t0() + Duration::seconds(i), 1.0)).collect();
        assert_eq!(prepare_series(large, RESAMPLE_ABOVE).len(), 40);
    }
}
