#![cfg(not(tarpaulin_include))]

use log::info;
use std::env;
use std::fs;

use wattwatch::anomaly::{DEFAULT_Z_THRESHOLD, detect_anomalies};
use wattwatch::config::validate_threshold;
use wattwatch::dataset::TIMESTAMP_COLUMN;
use wattwatch::normalize::load_energy_data;
use wattwatch::stats::{compute_energy_stats, headline_metrics};

fn fmt(v: f64) -> String {
    if v.is_nan() {
        "-".to_string()
    } else {
        format!("{:.3}", v)
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("wattwatch=warn"))
        .init();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 || args.len() > 4 {
        eprintln!("Usage: {} <file.csv> [column] [threshold]", args[0]);
        return Ok(());
    }

    let threshold = match args.get(3) {
        Some(raw) => validate_threshold(raw.parse().map_err(|_| format!("invalid threshold '{}'", raw))?)?,
        None => DEFAULT_Z_THRESHOLD,
    };

    let bytes = fs::read(&args[1])?;
    info!("read {} bytes from {}", bytes.len(), args[1]);
    let normalized = load_energy_data(&bytes)?;
    let dataset = &normalized.dataset;
    let report = &normalized.report;

    println!("File: {}", args[1]);
    println!(
        "Rows: {}  Columns: {}  Delimiter: {:?}",
        dataset.len(),
        dataset.width(),
        report.delimiter.unwrap_or(',')
    );
    match &report.timestamp_source {
        Some(source) => println!(
            "Timestamp column: '{}' ({} rows dropped for unparseable time)",
            source, report.dropped_rows
        ),
        None => println!("Timestamp column: none found"),
    }
    if !report.dropped_columns.is_empty() {
        println!("Dropped empty columns: {}", report.dropped_columns.join(", "));
    }
    println!();

    let stats = compute_energy_stats(dataset);
    println!(
        "{:<30} {:>8} {:>12} {:>12} {:>12} {:>12}",
        "Column", "Count", "Avg", "StdDev", "Min", "Max"
    );
    for s in &stats {
        println!(
            "{:<30} {:>8} {:>12} {:>12} {:>12} {:>12}",
            s.column,
            s.count,
            fmt(s.avg),
            fmt(s.std_dev),
            fmt(s.min),
            fmt(s.max)
        );
    }

    let headline = headline_metrics(&stats);
    println!();
    println!(
        "Average: {}  Min: {}  Max: {}  Std Dev: {}",
        fmt(headline.avg),
        fmt(headline.min),
        fmt(headline.max),
        fmt(headline.std_dev)
    );

    let numeric = dataset.numeric_column_names();
    let column = match args.get(2) {
        Some(column) if numeric.contains(column) => column.clone(),
        Some(column) => {
            eprintln!("Error: '{}' is not a numeric column", column);
            return Ok(());
        }
        None => match numeric.first() {
            Some(first) => first.clone(),
            None => {
                println!("No numeric column to analyse");
                return Ok(());
            }
        },
    };

    let anomalies = detect_anomalies(dataset, &column, threshold);
    println!();
    println!(
        "Anomalies in '{}' (|z| > {}): {}",
        column,
        threshold,
        anomalies.count()
    );
    let has_time = dataset.has_column(TIMESTAMP_COLUMN);
    for a in &anomalies.anomalies {
        match (has_time, a.timestamp) {
            (true, Some(t)) => println!("  row {:>6}  {}  {:>12}  z={:.2}", a.row, t, fmt(a.value), a.z),
            _ => println!("  row {:>6}  {:>12}  z={:.2}", a.row, fmt(a.value), a.z),
        }
    }

    Ok(())
}
