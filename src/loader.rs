use csv::{ReaderBuilder, Trim};
use log::debug;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;

use crate::dataset::{Column, Dataset};
use crate::error::{EnergyError, Result};

/// Delimiters considered by auto-detection, in tie-break order
pub const CANDIDATE_DELIMITERS: [u8; 4] = [b',', b';', b'\t', b'|'];

/// Reads CSV bytes into a raw, all-text [`Dataset`]
///
/// The loader first tries its preferred delimiter (semicolon, as written by
/// most European meter exports). If that attempt fails it falls back to
/// detecting the delimiter from the first lines of the file.
#[derive(Clone, Debug)]
pub struct CsvLoader {
    preferred: u8,
    candidates: Vec<u8>,
}

/// A raw table plus the delimiter that produced it
#[derive(Clone, Debug)]
pub struct LoadedCsv {
    pub dataset: Dataset,
    pub delimiter: u8,
}

impl Default for CsvLoader {
    fn default() -> Self {
        Self {
            preferred: b';',
            candidates: CANDIDATE_DELIMITERS.to_vec(),
        }
    }
}

impl CsvLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the delimiter tried before auto-detection
    pub fn with_preferred(mut self, delimiter: u8) -> Self {
        self.preferred = delimiter;
        self
    }

    /// Load a CSV file from disk
    ///
    /// # Arguments
    /// * `path` - Path to the CSV file
    ///
    /// # Returns
    /// * `Result<LoadedCsv>` - All-text table, header row as column names
    pub fn load_path(&self, path: impl AsRef<Path>) -> Result<LoadedCsv> {
        let bytes = fs::read(path)?;
        self.load_bytes(&bytes)
    }

    /// Load CSV content already in memory (e.g. an HTTP upload)
    ///
    /// # Errors
    /// * `EnergyError::Parse` if the content is empty, has no header, or has
    ///   rows with data past the header width under every delimiter tried
    pub fn load_bytes(&self, bytes: &[u8]) -> Result<LoadedCsv> {
        let content = decode(bytes);
        if content.trim().is_empty() {
            return Err(EnergyError::Parse("CSV file is empty".to_string()));
        }

        match parse_with(&content, self.preferred) {
            Ok(dataset) if !self.looks_misdelimited(&content, &dataset) => {
                debug!("parsed CSV with preferred delimiter {:?}", self.preferred as char);
                return Ok(LoadedCsv {
                    dataset,
                    delimiter: self.preferred,
                });
            }
            Ok(_) => debug!("preferred delimiter produced a single column, detecting"),
            Err(e) => debug!("preferred delimiter failed ({}), detecting", e),
        }

        let delimiter = detect_delimiter(&content, &self.candidates);
        let dataset = parse_with(&content, delimiter)?;
        Ok(LoadedCsv { dataset, delimiter })
    }

    // A single column while the header line contains another candidate
    // delimiter means the preferred delimiter was the wrong guess.
    fn looks_misdelimited(&self, content: &str, dataset: &Dataset) -> bool {
        if dataset.width() > 1 {
            return false;
        }
        let header = content.lines().next().unwrap_or("");
        self.candidates
            .iter()
            .filter(|&&d| d != self.preferred)
            .any(|&d| header.as_bytes().contains(&d))
    }
}

/// Decode bytes as UTF-8, dropping a BOM and replacing invalid sequences
fn decode(bytes: &[u8]) -> String {
    let bytes = bytes.strip_prefix(&[0xEF, 0xBB, 0xBF]).unwrap_or(bytes);
    match std::str::from_utf8(bytes) {
        Ok(s) => s.to_string(),
        Err(_) => String::from_utf8_lossy(bytes).into_owned(),
    }
}

/// Pick the delimiter whose per-line count is high and consistent
///
/// Scores each candidate over the first ten lines as
/// `mean / (1 + stddev)` of its occurrences per line.
///
/// # Examples
/// ```
/// use wattwatch::loader::{detect_delimiter, CANDIDATE_DELIMITERS};
///
/// assert_eq!(detect_delimiter("a,b,c\n1,2,3", &CANDIDATE_DELIMITERS), b',');
/// assert_eq!(detect_delimiter("a|b\n1|2", &CANDIDATE_DELIMITERS), b'|');
/// ```
pub fn detect_delimiter(content: &str, candidates: &[u8]) -> u8 {
    let sample: Vec<&str> = content.lines().filter(|l| !l.trim().is_empty()).take(10).collect();
    let mut best = b',';
    let mut best_score = 0.0f64;

    if sample.is_empty() {
        return best;
    }

    for &delimiter in candidates {
        let counts: Vec<f64> = sample
            .iter()
            .map(|line| line.bytes().filter(|&b| b == delimiter).count() as f64)
            .collect();
        let mean = counts.iter().sum::<f64>() / counts.len() as f64;
        let variance = counts.iter().map(|c| (c - mean).powi(2)).sum::<f64>() / counts.len() as f64;
        let score = mean / (1.0 + variance.sqrt());

        if score > best_score {
            best_score = score;
            best = delimiter;
        }
    }

    best
}

/// Parse content with a fixed delimiter into an all-text dataset
///
/// Empty fields become missing. Short rows are padded with missing values.
/// Fields past the header width are ignored while empty (a trailing
/// delimiter); a row carrying data there is an error.
fn parse_with(content: &str, delimiter: u8) -> Result<Dataset> {
    let mut reader = ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(true)
        .flexible(true)
        .trim(Trim::All)
        .from_reader(content.as_bytes());

    let headers = clean_headers(reader.headers()?.iter());
    if headers.is_empty() || headers.iter().all(|h| h.starts_with("Unnamed: ")) {
        return Err(EnergyError::Parse("CSV file has no header row".to_string()));
    }

    let width = headers.len();
    let mut columns: Vec<Vec<Option<String>>> = vec![Vec::new(); width];

    for (line, record) in reader.records().enumerate() {
        let record = record?;
        if record.iter().skip(width).any(|f| !f.is_empty()) {
            return Err(EnergyError::Parse(format!(
                "expected {} fields in data row {}, saw {}",
                width,
                line + 1,
                record.len()
            )));
        }
        if record.iter().all(|f| f.is_empty()) {
            continue;
        }
        for (i, column) in columns.iter_mut().enumerate() {
            let field = record.get(i).unwrap_or("");
            column.push(if field.is_empty() {
                None
            } else {
                Some(field.to_string())
            });
        }
    }

    Dataset::from_columns(
        headers
            .into_iter()
            .zip(columns)
            .map(|(name, values)| Column::text(name, values))
            .collect(),
    )
}

/// Trim header names, name blank ones `Unnamed: i` and suffix duplicates `.n`
fn clean_headers<'a>(raw: impl Iterator<Item = &'a str>) -> Vec<String> {
    let raw: Vec<String> = raw
        .enumerate()
        .map(|(i, h)| match h.trim() {
            "" => format!("Unnamed: {}", i),
            name => name.to_string(),
        })
        .collect();

    let mut used: HashSet<String> = HashSet::new();
    let mut next_suffix: HashMap<String, usize> = HashMap::new();
    raw.into_iter()
        .map(|base| {
            if used.insert(base.clone()) {
                return base;
            }
            // Skip suffixes that are already real header names
            let n = next_suffix.entry(base.clone()).or_insert(1);
            let mut name = format!("{}.{}", base, n);
            while !used.insert(name.clone()) {
                *n += 1;
                name = format!("{}.{}", base, n);
            }
            *n += 1;
            name
        })
        .collect()
}
