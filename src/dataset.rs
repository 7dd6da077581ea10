use chrono::NaiveDateTime;
use serde::{Serialize, Serializer};

use crate::error::{EnergyError, Result};

/// Canonical name the detected timestamp column is renamed to
pub const TIMESTAMP_COLUMN: &str = "Timestamp";

/// Display format for timestamps in previews and exports
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// A single cell of a dataset
///
/// `Missing` preserves absence: a value that failed to coerce is never
/// replaced by zero or an empty string.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Missing,
    Text(String),
    Number(f64),
    Timestamp(NaiveDateTime),
}

impl Value {
    pub fn is_missing(&self) -> bool {
        matches!(self, Value::Missing)
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Render the value the way it is written back to CSV
    pub fn to_field(&self) -> String {
        match self {
            Value::Missing => String::new(),
            Value::Text(s) => s.clone(),
            Value::Number(n) => n.to_string(),
            Value::Timestamp(t) => t.format(TIMESTAMP_FORMAT).to_string(),
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Value::Missing => serializer.serialize_none(),
            Value::Text(s) => serializer.serialize_str(s),
            Value::Number(n) if n.is_finite() => serializer.serialize_f64(*n),
            Value::Number(_) => serializer.serialize_none(),
            Value::Timestamp(t) => serializer.collect_str(&t.format(TIMESTAMP_FORMAT)),
        }
    }
}

/// Storage of one column
///
/// Columns are homogeneous; the variant is the column's storage type.
#[derive(Clone, Debug, PartialEq)]
pub enum ColumnData {
    Text(Vec<Option<String>>),
    Number(Vec<Option<f64>>),
    Timestamp(Vec<Option<NaiveDateTime>>),
}

impl ColumnData {
    pub fn len(&self) -> usize {
        match self {
            ColumnData::Text(v) => v.len(),
            ColumnData::Number(v) => v.len(),
            ColumnData::Timestamp(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_missing(&self, row: usize) -> bool {
        match self {
            ColumnData::Text(v) => v.get(row).is_none_or(|x| x.is_none()),
            ColumnData::Number(v) => v.get(row).is_none_or(|x| x.is_none()),
            ColumnData::Timestamp(v) => v.get(row).is_none_or(|x| x.is_none()),
        }
    }

    /// True when no row holds a value
    pub fn all_missing(&self) -> bool {
        (0..self.len()).all(|row| self.is_missing(row))
    }

    pub fn value(&self, row: usize) -> Value {
        match self {
            ColumnData::Text(v) => v
                .get(row)
                .cloned()
                .flatten()
                .map_or(Value::Missing, Value::Text),
            ColumnData::Number(v) => v
                .get(row)
                .copied()
                .flatten()
                .map_or(Value::Missing, Value::Number),
            ColumnData::Timestamp(v) => v
                .get(row)
                .copied()
                .flatten()
                .map_or(Value::Missing, Value::Timestamp),
        }
    }

    /// Build a new column holding the given rows in the given order
    ///
    /// # Panics
    /// If any index is out of range; callers pass indices taken from the
    /// same dataset.
    pub(crate) fn select(&self, rows: &[usize]) -> ColumnData {
        match self {
            ColumnData::Text(v) => ColumnData::Text(rows.iter().map(|&r| v[r].clone()).collect()),
            ColumnData::Number(v) => ColumnData::Number(rows.iter().map(|&r| v[r]).collect()),
            ColumnData::Timestamp(v) => {
                ColumnData::Timestamp(rows.iter().map(|&r| v[r]).collect())
            }
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, ColumnData::Number(_))
    }

    pub fn is_text(&self) -> bool {
        matches!(self, ColumnData::Text(_))
    }
}

/// A named column
#[derive(Clone, Debug, PartialEq)]
pub struct Column {
    pub name: String,
    pub data: ColumnData,
}

impl Column {
    pub fn new(name: impl Into<String>, data: ColumnData) -> Self {
        Self {
            name: name.into(),
            data,
        }
    }

    pub fn text(name: impl Into<String>, values: Vec<Option<String>>) -> Self {
        Self::new(name, ColumnData::Text(values))
    }

    pub fn numbers(name: impl Into<String>, values: Vec<Option<f64>>) -> Self {
        Self::new(name, ColumnData::Number(values))
    }

    pub fn timestamps(name: impl Into<String>, values: Vec<Option<NaiveDateTime>>) -> Self {
        Self::new(name, ColumnData::Timestamp(values))
    }
}

/// An in-memory table: an ordered sequence of rows over named columns
///
/// Stored column-wise. Every column has the same number of rows.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Dataset {
    columns: Vec<Column>,
    rows: usize,
}

/// The first rows of a dataset, shaped for the presentation layer
#[derive(Clone, Debug, Serialize)]
pub struct TablePreview {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
    pub total_rows: usize,
}

impl Dataset {
    /// Build a dataset from columns of equal length
    ///
    /// # Errors
    /// * `EnergyError::InvalidInput` if the column lengths differ
    pub fn from_columns(columns: Vec<Column>) -> Result<Self> {
        let rows = columns.first().map_or(0, |c| c.data.len());
        if let Some(bad) = columns.iter().find(|c| c.data.len() != rows) {
            return Err(EnergyError::InvalidInput(format!(
                "column '{}' has {} rows, expected {}",
                bad.name,
                bad.data.len(),
                rows
            )));
        }
        Ok(Self { columns, rows })
    }

    pub fn len(&self) -> usize {
        self.rows
    }

    pub fn is_empty(&self) -> bool {
        self.rows == 0
    }

    pub fn width(&self) -> usize {
        self.columns.len()
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column_index(name).is_some()
    }

    /// Values of a numeric column, or `None` if it is absent or not numeric
    pub fn numeric(&self, name: &str) -> Option<&[Option<f64>]> {
        match self.column(name).map(|c| &c.data) {
            Some(ColumnData::Number(v)) => Some(v),
            _ => None,
        }
    }

    /// Values of a timestamp column, or `None` if it is absent or not a timestamp
    pub fn timestamps(&self, name: &str) -> Option<&[Option<NaiveDateTime>]> {
        match self.column(name).map(|c| &c.data) {
            Some(ColumnData::Timestamp(v)) => Some(v),
            _ => None,
        }
    }

    /// Names of all numeric columns, in column order
    pub fn numeric_column_names(&self) -> Vec<String> {
        self.columns
            .iter()
            .filter(|c| c.data.is_numeric())
            .map(|c| c.name.clone())
            .collect()
    }

    /// The values of one row, in column order
    pub fn row(&self, index: usize) -> Vec<Value> {
        self.columns.iter().map(|c| c.data.value(index)).collect()
    }

    /// Replace the storage of column `index`
    pub fn replace_column(&mut self, index: usize, data: ColumnData) -> Result<()> {
        if data.len() != self.rows {
            return Err(EnergyError::InvalidInput(format!(
                "replacement column has {} rows, expected {}",
                data.len(),
                self.rows
            )));
        }
        if let Some(column) = self.columns.get_mut(index) {
            column.data = data;
        }
        Ok(())
    }

    pub fn rename_column(&mut self, from: &str, to: &str) -> bool {
        match self.columns.iter_mut().find(|c| c.name == from) {
            Some(column) => {
                column.name = to.to_string();
                true
            }
            None => false,
        }
    }

    /// Build a new dataset holding the given rows in the given order
    ///
    /// # Panics
    /// If any index is `>= self.len()`.
    pub(crate) fn select_rows(&self, rows: &[usize]) -> Dataset {
        Dataset {
            columns: self
                .columns
                .iter()
                .map(|c| Column::new(c.name.clone(), c.data.select(rows)))
                .collect(),
            rows: rows.len(),
        }
    }

    /// Keep only the rows for which `keep` returns true
    pub fn retain_rows<F: FnMut(usize) -> bool>(&mut self, mut keep: F) {
        let kept: Vec<usize> = (0..self.rows).filter(|&r| keep(r)).collect();
        if kept.len() != self.rows {
            *self = self.select_rows(&kept);
        }
    }

    /// Drop every row where any of the named columns is missing
    pub fn drop_rows_missing_any(&mut self, names: &[&str]) {
        let indices: Vec<usize> = names.iter().filter_map(|n| self.column_index(n)).collect();
        let columns = self.columns.clone();
        self.retain_rows(|r| indices.iter().all(|&i| !columns[i].data.is_missing(r)));
    }

    /// Drop rows in which every column is missing
    pub fn drop_empty_rows(&mut self) {
        let columns = self.columns.clone();
        self.retain_rows(|r| columns.iter().any(|c| !c.data.is_missing(r)));
    }

    /// Drop columns in which every row is missing, returning their names
    pub fn drop_empty_columns(&mut self) -> Vec<String> {
        let mut dropped = Vec::new();
        self.columns.retain(|c| {
            let empty = c.data.all_missing();
            if empty {
                dropped.push(c.name.clone());
            }
            !empty
        });
        if self.columns.is_empty() {
            self.rows = 0;
        }
        dropped
    }

    /// Stable ascending sort by a timestamp column; missing values sort last
    pub fn sort_by_timestamp(&mut self, name: &str) -> Result<()> {
        let stamps = self
            .timestamps(name)
            .ok_or_else(|| EnergyError::UnknownColumn(name.to_string()))?;
        let mut order: Vec<usize> = (0..self.rows).collect();
        order.sort_by_key(|&r| (stamps[r].is_none(), stamps[r]));
        *self = self.select_rows(&order);
        Ok(())
    }

    /// First `n` rows for display
    pub fn preview(&self, n: usize) -> TablePreview {
        TablePreview {
            columns: self.column_names(),
            rows: (0..self.rows.min(n)).map(|r| self.row(r)).collect(),
            total_rows: self.rows,
        }
    }

    /// Last `n` rows for display
    pub fn tail(&self, n: usize) -> TablePreview {
        let start = self.rows.saturating_sub(n);
        TablePreview {
            columns: self.column_names(),
            rows: (start..self.rows).map(|r| self.row(r)).collect(),
            total_rows: self.rows,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn ts(h: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 1)
            .unwrap()
            .and_hms_opt(h, 0, 0)
            .unwrap()
    }

    fn sample() -> Dataset {
        Dataset::from_columns(vec![
            Column::timestamps("Timestamp", vec![Some(ts(3)), None, Some(ts(1))]),
            Column::numbers("Voltage", vec![Some(230.0), Some(231.0), None]),
            Column::numbers("Empty", vec![None, None, None]),
        ])
        .unwrap()
    }

    #[test]
    fn select_rows_reorders_every_column() {
        let picked = sample().select_rows(&[2, 0]);
        assert_eq!(picked.len(), 2);
        assert_eq!(picked.numeric("Voltage").unwrap(), &[None, Some(230.0)]);
    }

    #[test]
    #[should_panic]
    fn select_rows_out_of_range_panics() {
        sample().select_rows(&[3]);
    }

    #[test]
    fn rejects_ragged_columns() {
        let result = Dataset::from_columns(vec![
            Column::numbers("a", vec![Some(1.0)]),
            Column::numbers("b", vec![Some(1.0), Some(2.0)]),
        ]);
        assert!(matches!(result, Err(EnergyError::InvalidInput(_))));
    }

    #[test]
    fn sort_puts_missing_timestamps_last() {
        let mut ds = sample();
        ds.sort_by_timestamp("Timestamp").unwrap();
        let stamps = ds.timestamps("Timestamp").unwrap();
        assert_eq!(stamps, &[Some(ts(1)), Some(ts(3)), None]);
        assert_eq!(ds.numeric("Voltage").unwrap(), &[None, Some(230.0), Some(231.0)]);
    }

    #[test]
    fn drops_all_missing_columns() {
        let mut ds = sample();
        let dropped = ds.drop_empty_columns();
        assert_eq!(dropped, vec!["Empty".to_string()]);
        assert_eq!(ds.column_names(), vec!["Timestamp", "Voltage"]);
        assert_eq!(ds.len(), 3);
    }

    #[test]
    fn drop_rows_missing_any_checks_each_named_column() {
        let mut ds = sample();
        ds.drop_rows_missing_any(&["Timestamp", "Voltage"]);
        assert_eq!(ds.len(), 1);
        assert_eq!(ds.row(0)[1], Value::Number(230.0));
    }

    #[test]
    fn preview_serializes_missing_as_null() {
        let ds = sample();
        let json = serde_json::to_value(ds.preview(1)).unwrap();
        assert_eq!(json["rows"][0][0], "2024-03-01 03:00:00");
        assert_eq!(json["rows"][0][2], serde_json::Value::Null);
        assert_eq!(json["total_rows"], 3);
    }

    #[test]
    fn tail_returns_last_rows() {
        let ds = sample();
        let tail = ds.tail(2);
        assert_eq!(tail.rows.len(), 2);
        assert_eq!(tail.rows[1][1], Value::Missing);
    }
}
