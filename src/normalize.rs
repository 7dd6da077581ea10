use log::{debug, info};
use serde::Serialize;

use crate::dataset::{ColumnData, Dataset, TIMESTAMP_COLUMN};
use crate::error::{EnergyError, Result};
use crate::inference::MatchStrategy;
use crate::loader::CsvLoader;
use crate::timestamp::parse_timestamp;

/// What normalization did to the raw table
#[derive(Clone, Debug, Default, Serialize)]
pub struct NormalizeReport {
    /// Original name of the column used as timestamp, if one was found
    pub timestamp_source: Option<String>,
    /// Rows dropped because their timestamp did not parse
    pub dropped_rows: usize,
    /// Columns dropped because no value survived coercion
    pub dropped_columns: Vec<String>,
    /// Delimiter the CSV was read with, when loaded from bytes
    pub delimiter: Option<char>,
}

/// A normalized dataset and its report
#[derive(Clone, Debug)]
pub struct Normalized {
    pub dataset: Dataset,
    pub report: NormalizeReport,
}

/// Coerce text to a number, accepting a decimal comma
///
/// Returns `None` for anything that does not parse to a finite number, so
/// absence is preserved instead of inventing a zero.
///
/// # Examples
/// ```
/// use wattwatch::normalize::coerce_number;
///
/// assert_eq!(coerce_number("12,5"), Some(12.5));
/// assert_eq!(coerce_number(" 230 "), Some(230.0));
/// assert_eq!(coerce_number("n/a"), None);
/// ```
pub fn coerce_number(raw: &str) -> Option<f64> {
    let cleaned = raw.trim().replace(',', ".");
    match cleaned.parse::<f64>() {
        Ok(n) if n.is_finite() => Some(n),
        _ => None,
    }
}

/// Coerce every value of a text column to a number
pub fn coerce_numeric(values: &[Option<String>]) -> Vec<Option<f64>> {
    values
        .iter()
        .map(|v| v.as_deref().and_then(coerce_number))
        .collect()
}

/// Coerce every value of a text column to a timestamp
pub fn coerce_timestamps(values: &[Option<String>]) -> Vec<Option<chrono::NaiveDateTime>> {
    values
        .iter()
        .map(|v| v.as_deref().and_then(parse_timestamp))
        .collect()
}

/// Normalize a raw table with name-based timestamp detection
pub fn normalize(raw: Dataset) -> Normalized {
    normalize_with(raw, &MatchStrategy::timestamp_by_name())
}

/// Normalize a raw table
///
/// 1. The column chosen by `strategy` is parsed as timestamps; rows whose
///    timestamp does not parse are dropped, the rest are sorted ascending and
///    the column is renamed to [`TIMESTAMP_COLUMN`].
/// 2. Every remaining text column is coerced to numbers, decimal comma
///    accepted; unparseable values become missing.
/// 3. Columns with no value left are dropped, as are rows with no value left.
///
/// Without a timestamp column the table is still normalized; callers that
/// need a time axis report the absence themselves.
pub fn normalize_with(raw: Dataset, strategy: &MatchStrategy) -> Normalized {
    let mut dataset = raw;
    let mut report = NormalizeReport::default();

    if let Some(index) = strategy.find(&dataset) {
        let name = dataset.columns()[index].name.clone();
        debug!("timestamp column '{}' ({})", name, strategy.describe());

        if let ColumnData::Text(values) = &dataset.columns()[index].data {
            let parsed = coerce_timestamps(values);
            // Length matches by construction
            let _ = dataset.replace_column(index, ColumnData::Timestamp(parsed));
        }

        let before = dataset.len();
        dataset.drop_rows_missing_any(&[name.as_str()]);
        report.dropped_rows = before - dataset.len();

        if name != TIMESTAMP_COLUMN && dataset.has_column(TIMESTAMP_COLUMN) {
            let free = (1..)
                .map(|n| format!("{}.{}", TIMESTAMP_COLUMN, n))
                .find(|candidate| !dataset.has_column(candidate));
            if let Some(displaced) = free {
                dataset.rename_column(TIMESTAMP_COLUMN, &displaced);
            }
        }
        dataset.rename_column(&name, TIMESTAMP_COLUMN);
        // The column was just made a timestamp column, so sorting cannot fail
        let _ = dataset.sort_by_timestamp(TIMESTAMP_COLUMN);
        report.timestamp_source = Some(name);
    }

    for index in 0..dataset.width() {
        if let ColumnData::Text(values) = &dataset.columns()[index].data {
            let numbers = coerce_numeric(values);
            let _ = dataset.replace_column(index, ColumnData::Number(numbers));
        }
    }

    report.dropped_columns = dataset.drop_empty_columns();
    dataset.drop_empty_rows();

    Normalized { dataset, report }
}

/// Load CSV bytes and normalize them
///
/// # Errors
/// * `EnergyError::Parse` for unreadable content
/// * `EnergyError::EmptyDataset` when no row survives normalization
pub fn load_energy_data(bytes: &[u8]) -> Result<Normalized> {
    let loaded = CsvLoader::new().load_bytes(bytes)?;
    let mut normalized = normalize(loaded.dataset);
    normalized.report.delimiter = Some(loaded.delimiter as char);

    if normalized.dataset.is_empty() {
        return Err(EnergyError::EmptyDataset);
    }

    info!(
        "normalized {} rows x {} columns (timestamp: {:?}, dropped columns: {:?})",
        normalized.dataset.len(),
        normalized.dataset.width(),
        normalized.report.timestamp_source,
        normalized.report.dropped_columns
    );
    Ok(normalized)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::Value;
    use chrono::{NaiveDate, Timelike};

    #[test]
    fn renames_date_and_sorts_ascending() {
        let csv = "Date;Voltage\n2024-03-01 12:00;231\n2024-03-01 10:00;229\n2024-03-01 11:00;230\n";
        let n = load_energy_data(csv.as_bytes()).unwrap();

        assert_eq!(n.dataset.column_names(), vec![TIMESTAMP_COLUMN, "Voltage"]);
        assert_eq!(n.report.timestamp_source.as_deref(), Some("Date"));

        let hours: Vec<u32> = n
            .dataset
            .timestamps(TIMESTAMP_COLUMN)
            .unwrap()
            .iter()
            .map(|t| t.unwrap().hour())
            .collect();
        assert_eq!(hours, vec![10, 11, 12]);
        assert_eq!(n.dataset.numeric("Voltage").unwrap(), &[Some(229.0), Some(230.0), Some(231.0)]);
    }

    #[test]
    fn locale_decimals_become_numbers() {
        let csv = "Time;Current\n2024-03-01 10:00;12,5\n";
        let n = load_energy_data(csv.as_bytes()).unwrap();
        assert_eq!(n.dataset.numeric("Current").unwrap(), &[Some(12.5)]);
        assert_eq!(n.report.delimiter, Some(';'));
    }

    #[test]
    fn unparseable_timestamps_drop_the_row() {
        let csv = "timestamp,kW\n2024-03-01 10:00,1\nbroken,2\n2024-03-01 09:00,3\n";
        let n = load_energy_data(csv.as_bytes()).unwrap();
        assert_eq!(n.dataset.len(), 2);
        assert_eq!(n.report.dropped_rows, 1);
        assert_eq!(n.dataset.numeric("kW").unwrap(), &[Some(3.0), Some(1.0)]);
    }

    #[test]
    fn bad_numbers_become_missing_not_zero() {
        let csv = "Time,Voltage,Label\n2024-03-01 10:00,abc,x\n2024-03-01 11:00,230,y\n";
        let n = load_energy_data(csv.as_bytes()).unwrap();
        assert_eq!(n.dataset.numeric("Voltage").unwrap(), &[None, Some(230.0)]);
        assert_eq!(n.report.dropped_columns, vec!["Label".to_string()]);
        assert!(!n.dataset.has_column("Label"));
    }

    #[test]
    fn works_without_timestamp_column() {
        let csv = "Voltage,Power\n230,1000\n231,1100\n";
        let n = load_energy_data(csv.as_bytes()).unwrap();
        assert!(n.report.timestamp_source.is_none());
        assert!(!n.dataset.has_column(TIMESTAMP_COLUMN));
        assert_eq!(n.dataset.numeric_column_names(), vec!["Voltage", "Power"]);
    }

    #[test]
    fn existing_canonical_name_is_displaced() {
        let raw = Dataset::from_columns(vec![
            crate::dataset::Column::text("Date", vec![Some("2024-03-01".to_string())]),
            crate::dataset::Column::text("Timestamp", vec![Some("7".to_string())]),
        ])
        .unwrap();
        let n = normalize(raw);
        assert_eq!(n.dataset.column_names(), vec![TIMESTAMP_COLUMN, "Timestamp.1"]);
        assert_eq!(
            n.dataset.row(0)[0],
            Value::Timestamp(NaiveDate::from_ymd_opt(2024, 3, 1).unwrap().and_hms_opt(0, 0, 0).unwrap())
        );
    }

    #[test]
    fn displaced_name_skips_suffixes_in_use() {
        let csv = "Date,Timestamp,Timestamp
2024-03-01 10:00,1,2
";
        let n = load_energy_data(csv.as_bytes()).unwrap();
        assert_eq!(
            n.dataset.column_names(),
            vec![TIMESTAMP_COLUMN, "Timestamp.2", "Timestamp.1"]
        );
        assert_eq!(n.dataset.numeric("Timestamp.2").unwrap(), &[Some(1.0)]);
        assert_eq!(n.dataset.numeric("Timestamp.1").unwrap(), &[Some(2.0)]);
    }

    #[test]
    fn vendor_timestamp_layouts_are_not_dropped() {
        for csv in [
            "Date;Power
03/01/2024 10:00:00 AM;1000
03/01/2024 01:00:00 PM;1100
",
            "Date;Power
01-Mar-2024 10:00;1000
01-Mar-2024 13:00;1100
",
            "Date;Power
1 March 2024 10:00;1000
1 March 2024 13:00;1100
",
            "Date;Power
2024-03-01 10:00:00 +0530;1000
2024-03-01 13:00:00 +0530;1100
",
        ] {
            let n = load_energy_data(csv.as_bytes()).unwrap();
            assert_eq!(n.report.dropped_rows, 0, "{}", csv);
            let hours: Vec<u32> = n
                .dataset
                .timestamps(TIMESTAMP_COLUMN)
                .unwrap()
                .iter()
                .map(|t| t.unwrap().hour())
                .collect();
            assert_eq!(hours, vec![10, 13], "{}", csv);
        }
    }

    #[test]
    fn header_only_file_is_empty_dataset() {
        let err = load_energy_data(b"Time;Voltage\n").unwrap_err();
        assert!(matches!(err, EnergyError::EmptyDataset));
    }

    #[test]
    fn non_finite_text_is_missing() {
        assert_eq!(coerce_number("NaN"), None);
        assert_eq!(coerce_number("inf"), None);
        assert_eq!(coerce_number("1,234.5"), None);
        assert_eq!(coerce_number("-0,25"), Some(-0.25));
    }
}
