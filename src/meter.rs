//! Three-phase meter exports
//!
//! A stricter variant of normalization for one known export layout: the
//! timestamp plus voltage, active power and power-factor columns must all be
//! present, and rows missing any of them are dropped. The table can then be
//! cut to an inclusive time window for billing and charts.

use chrono::NaiveDateTime;
use log::debug;
use serde::{Deserialize, Serialize};

use crate::dataset::{ColumnData, Dataset, TIMESTAMP_FORMAT};
use crate::error::{EnergyError, Result};
use crate::inference::{MatchStrategy, NameContains};
use crate::loader::CsvLoader;
use crate::normalize::{coerce_numeric, coerce_timestamps};

/// Labels searched for in the column names of a meter export
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MeterLabels {
    /// Matched against the column name in any case
    pub timestamp: String,
    /// The remaining labels are case-sensitive substrings
    pub voltage: String,
    pub power: String,
    pub power_factor: String,
}

impl Default for MeterLabels {
    fn default() -> Self {
        Self {
            timestamp: "TIME".to_string(),
            voltage: "Average Phase Voltage".to_string(),
            power: "3 Phase Active Power".to_string(),
            power_factor: "Total-PF".to_string(),
        }
    }
}

/// Resolved names of the four required columns
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct MeterColumns {
    pub timestamp: String,
    pub voltage: String,
    pub power: String,
    pub power_factor: String,
}

impl MeterColumns {
    pub fn values(&self) -> [&str; 3] {
        [self.voltage.as_str(), self.power.as_str(), self.power_factor.as_str()]
    }
}

/// Locate the four required columns by first-match substring search
///
/// # Errors
/// * `EnergyError::MissingColumns` naming the labels that matched nothing
///   and listing every column that was found
pub fn locate_meter_columns(dataset: &Dataset, labels: &MeterLabels) -> Result<MeterColumns> {
    let lookup = |strategy: MatchStrategy| strategy.find_name(dataset);

    let timestamp = lookup(MatchStrategy::new().then(NameContains::any_ignore_case([
        labels.timestamp.as_str(),
    ])));
    let voltage = lookup(MatchStrategy::new().then(NameContains::exact(&labels.voltage)));
    let power = lookup(MatchStrategy::new().then(NameContains::exact(&labels.power)));
    let power_factor =
        lookup(MatchStrategy::new().then(NameContains::exact(&labels.power_factor)));

    match (timestamp, voltage, power, power_factor) {
        (Some(timestamp), Some(voltage), Some(power), Some(power_factor)) => Ok(MeterColumns {
            timestamp,
            voltage,
            power,
            power_factor,
        }),
        (t, v, p, pf) => {
            let missing = [
                (t, &labels.timestamp),
                (v, &labels.voltage),
                (p, &labels.power),
                (pf, &labels.power_factor),
            ]
            .into_iter()
            .filter(|(found, _)| found.is_none())
            .map(|(_, label)| label.clone())
            .collect();
            Err(EnergyError::MissingColumns {
                missing,
                found: dataset.column_names(),
            })
        }
    }
}

/// A meter export with its required columns coerced and complete
#[derive(Clone, Debug)]
pub struct MeterFrame {
    dataset: Dataset,
    columns: MeterColumns,
}

/// The rows of a [`MeterFrame`] inside an inclusive time window
#[derive(Clone, Debug)]
pub struct MeterWindow {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    pub dataset: Dataset,
    pub columns: MeterColumns,
}

impl MeterFrame {
    /// Read and prepare a meter export from CSV bytes
    pub fn load(bytes: &[u8], labels: &MeterLabels) -> Result<Self> {
        let loaded = CsvLoader::new().load_bytes(bytes)?;
        Self::from_raw(loaded.dataset, labels)
    }

    /// Prepare a raw all-text table
    ///
    /// The timestamp column is parsed and the three value columns coerced to
    /// numbers; rows missing any of the four are dropped and the rest sorted
    /// by time. Other columns are carried through untouched so the filtered
    /// table can be downloaded with the input's column set.
    ///
    /// # Errors
    /// * `EnergyError::MissingColumns` if a required column is absent
    /// * `EnergyError::EmptyDataset` if no complete row remains
    pub fn from_raw(raw: Dataset, labels: &MeterLabels) -> Result<Self> {
        let columns = locate_meter_columns(&raw, labels)?;
        let mut dataset = raw;

        let ts_index = dataset
            .column_index(&columns.timestamp)
            .ok_or_else(|| EnergyError::UnknownColumn(columns.timestamp.clone()))?;
        if let ColumnData::Text(values) = &dataset.columns()[ts_index].data {
            let parsed = coerce_timestamps(values);
            dataset.replace_column(ts_index, ColumnData::Timestamp(parsed))?;
        }

        for name in columns.values() {
            let index = dataset
                .column_index(name)
                .ok_or_else(|| EnergyError::UnknownColumn(name.to_string()))?;
            if let ColumnData::Text(values) = &dataset.columns()[index].data {
                let numbers = coerce_numeric(values);
                dataset.replace_column(index, ColumnData::Number(numbers))?;
            }
        }

        let before = dataset.len();
        dataset.drop_rows_missing_any(&[
            columns.timestamp.as_str(),
            columns.voltage.as_str(),
            columns.power.as_str(),
            columns.power_factor.as_str(),
        ]);
        debug!("meter frame kept {} of {} rows", dataset.len(), before);

        if dataset.is_empty() {
            return Err(EnergyError::EmptyDataset);
        }
        dataset.sort_by_timestamp(&columns.timestamp)?;

        Ok(Self { dataset, columns })
    }

    pub fn dataset(&self) -> &Dataset {
        &self.dataset
    }

    pub fn columns(&self) -> &MeterColumns {
        &self.columns
    }

    fn stamps(&self) -> &[Option<NaiveDateTime>] {
        self.dataset.timestamps(&self.columns.timestamp).unwrap_or(&[])
    }

    /// Earliest and latest timestamp, the default window
    pub fn time_range(&self) -> Option<(NaiveDateTime, NaiveDateTime)> {
        let stamps = self.stamps();
        let first = stamps.iter().flatten().min().copied()?;
        let last = stamps.iter().flatten().max().copied()?;
        Some((first, last))
    }

    /// Rows with `start <= timestamp <= end`
    ///
    /// Missing bounds default to the frame's own range.
    ///
    /// # Errors
    /// * `EnergyError::InvalidInput` if `start` is after `end`
    /// * `EnergyError::EmptyWindow` if no row falls inside the window
    pub fn window(
        &self,
        start: Option<NaiveDateTime>,
        end: Option<NaiveDateTime>,
    ) -> Result<MeterWindow> {
        let (first, last) = self.time_range().ok_or(EnergyError::EmptyDataset)?;
        let start = start.unwrap_or(first);
        let end = end.unwrap_or(last);
        if start > end {
            return Err(EnergyError::InvalidInput(format!(
                "window start {} is after end {}",
                start.format(TIMESTAMP_FORMAT),
                end.format(TIMESTAMP_FORMAT)
            )));
        }

        let rows: Vec<usize> = self
            .stamps()
            .iter()
            .enumerate()
            .filter(|(_, t)| t.is_some_and(|t| t >= start && t <= end))
            .map(|(i, _)| i)
            .collect();

        if rows.is_empty() {
            return Err(EnergyError::EmptyWindow {
                start: start.format(TIMESTAMP_FORMAT).to_string(),
                end: end.format(TIMESTAMP_FORMAT).to_string(),
            });
        }

        Ok(MeterWindow {
            start,
            end,
            dataset: self.dataset.select_rows(&rows),
            columns: self.columns.clone(),
        })
    }
}

impl MeterWindow {
    pub fn len(&self) -> usize {
        self.dataset.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dataset.is_empty()
    }

    pub fn timestamps(&self) -> Vec<NaiveDateTime> {
        self.dataset
            .timestamps(&self.columns.timestamp)
            .map(|s| s.iter().flatten().copied().collect())
            .unwrap_or_default()
    }

    fn series(&self, name: &str) -> Vec<f64> {
        self.dataset
            .numeric(name)
            .map(|s| s.iter().flatten().copied().collect())
            .unwrap_or_default()
    }

    pub fn voltage(&self) -> Vec<f64> {
        self.series(&self.columns.voltage)
    }

    pub fn power(&self) -> Vec<f64> {
        self.series(&self.columns.power)
    }

    pub fn power_factor(&self) -> Vec<f64> {
        self.series(&self.columns.power_factor)
    }

    /// Hours between the first and last sample in the window
    pub fn duration_hours(&self) -> f64 {
        let stamps = self.timestamps();
        match (stamps.iter().min(), stamps.iter().max()) {
            (Some(first), Some(last)) => (*last - *first).num_milliseconds() as f64 / 3_600_000.0,
            _ => 0.0,
        }
    }
}
