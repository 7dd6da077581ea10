use std::io;

use crate::dataset::{Dataset, Value};
use crate::error::{EnergyError, Result};

/// File name offered for the filtered meter data
pub const CSV_FILENAME: &str = "filtered_energy_data.csv";

/// File name offered for the spreadsheet variant
pub const XLSX_FILENAME: &str = "filtered_energy_data.xlsx";

/// Convert a dataset to UTF-8 CSV
///
/// The header row carries the dataset's column names in order. Missing values
/// are written as empty fields and timestamps as `%Y-%m-%d %H:%M:%S`; quoting
/// of commas, quotes and newlines is left to the csv writer.
///
/// # Arguments
/// * `dataset` - The dataset to export
///
/// # Returns
/// * `Result<Vec<u8>>` - CSV content as bytes or an error
///
/// # Examples
/// ```
/// use wattwatch::dataset::{Column, Dataset};
/// use wattwatch::downloader::to_csv;
///
/// let ds = Dataset::from_columns(vec![
///     Column::numbers("Power", vec![Some(1.5), None]),
///     Column::text("Site", vec![None, Some("B".to_string())]),
/// ])
/// .unwrap();
/// let csv = to_csv(&ds).unwrap();
/// assert_eq!(String::from_utf8(csv).unwrap(), "Power,Site\n1.5,\n,B\n");
/// ```
pub fn to_csv(dataset: &Dataset) -> Result<Vec<u8>> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(dataset.column_names())?;
    for r in 0..dataset.len() {
        writer.write_record(dataset.row(r).iter().map(Value::to_field))?;
    }
    writer
        .into_inner()
        .map_err(|e| EnergyError::Io(io::Error::other(e.to_string())))
}

/// Convert a dataset to XLSX format
///
/// Numbers are written as numeric cells; text and timestamps as strings so
/// the sheet matches the CSV export. Missing values leave the cell empty.
///
/// # Arguments
/// * `dataset` - The dataset to export
///
/// # Returns
/// * `Result<Vec<u8>>` - XLSX file content as bytes or an error
#[cfg(feature = "web")]
pub fn to_xlsx(dataset: &Dataset) -> Result<Vec<u8>> {
    use rust_xlsxwriter::{Format, Workbook, Worksheet, XlsxError};

    fn xlsx_error(e: XlsxError) -> EnergyError {
        EnergyError::Io(io::Error::other(e.to_string()))
    }

    let mut workbook = Workbook::new();
    let mut worksheet = Worksheet::new();
    worksheet.set_name("Energy Data").map_err(xlsx_error)?;

    let header = Format::new().set_bold();
    for (c, name) in dataset.column_names().iter().enumerate() {
        let col = u16::try_from(c)
            .map_err(|_| EnergyError::InvalidInput("too many columns for XLSX".to_string()))?;
        worksheet
            .write_string_with_format(0, col, name.as_str(), &header)
            .map_err(xlsx_error)?;
    }

    for r in 0..dataset.len() {
        let row = u32::try_from(r + 1)
            .map_err(|_| EnergyError::InvalidInput("too many rows for XLSX".to_string()))?;
        for (c, value) in dataset.row(r).iter().enumerate() {
            // Column count was checked on the header row
            let col = c as u16;
            match value {
                Value::Missing => {}
                Value::Number(n) => {
                    worksheet.write_number(row, col, *n).map_err(xlsx_error)?;
                }
                other => {
                    worksheet
                        .write_string(row, col, &other.to_field())
                        .map_err(xlsx_error)?;
                }
            }
        }
    }

    workbook.push_worksheet(worksheet);
    workbook.save_to_buffer().map_err(xlsx_error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::Column;
    use chrono::NaiveDate;

    fn dataset() -> Dataset {
        let t = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap().and_hms_opt(10, 0, 0).unwrap();
        Dataset::from_columns(vec![
            Column::timestamps("TIME", vec![Some(t), Some(t)]),
            Column::numbers("3 Phase Active Power", vec![Some(1000.0), Some(1200.5)]),
            Column::text("Note", vec![Some("ok, fine".to_string()), None]),
        ])
        .unwrap()
    }

    #[test]
    fn csv_keeps_columns_and_formats_timestamps() {
        let csv = String::from_utf8(to_csv(&dataset()).unwrap()).unwrap();
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines[0], "TIME,3 Phase Active Power,Note");
        assert_eq!(lines[1], "2024-03-01 10:00:00,1000,\"ok, fine\"");
        assert_eq!(lines[2], "2024-03-01 10:00:00,1200.5,");
    }

    #[test]
    fn csv_reads_back_with_the_loader() {
        let bytes = to_csv(&dataset()).unwrap();
        let loaded = crate::loader::CsvLoader::new().load_bytes(&bytes).unwrap();
        assert_eq!(loaded.delimiter, b',');
        assert_eq!(loaded.dataset.len(), 2);
        assert_eq!(loaded.dataset.column_names(), dataset().column_names());
    }

    #[cfg(feature = "web")]
    #[test]
    fn xlsx_is_a_zip_container() {
        let bytes = to_xlsx(&dataset()).unwrap();
        assert_eq!(&bytes[..2], b"PK");
    }
}
