use std::fs;

use wattwatch::EnergyError;
use wattwatch::anomaly::detect_anomalies;
use wattwatch::billing::summarize;
use wattwatch::dataset::TIMESTAMP_COLUMN;
use wattwatch::downloader::to_csv;
use wattwatch::live::{LIVE_LOG_HEADER, LiveRecorder};
use wattwatch::loader::CsvLoader;
use wattwatch::meter::{MeterFrame, MeterLabels};
use wattwatch::normalize::load_energy_data;
use wattwatch::stats::{compute_energy_stats, headline_metrics};
use wattwatch::timestamp::parse_timestamp;

fn meter_export(rows: usize, spike_at: usize) -> String {
    let mut csv = String::from("TIME;Average Phase Voltage;3 Phase Active Power;Total-PF;Comment\n");
    for i in 0..rows {
        let power = if i == spike_at { 9000 } else { 1000 + (i % 5) as i64 * 10 };
        csv.push_str(&format!(
            "2024-03-01 {:02}:{:02}:00;230,{};{};0,9{};\n",
            10 + i / 60,
            i % 60,
            i % 10,
            power,
            i % 10
        ));
    }
    csv
}

#[test]
fn upload_stats_and_anomalies() {
    let csv = meter_export(60, 42);
    let normalized = load_energy_data(csv.as_bytes()).unwrap();
    let dataset = &normalized.dataset;

    assert_eq!(normalized.report.delimiter, Some(';'));
    assert_eq!(normalized.report.timestamp_source.as_deref(), Some("TIME"));
    assert_eq!(normalized.report.dropped_columns, vec!["Comment".to_string()]);
    assert!(dataset.has_column(TIMESTAMP_COLUMN));
    assert_eq!(dataset.len(), 60);

    let stats = compute_energy_stats(dataset);
    assert_eq!(stats.len(), 3);
    assert!(stats.iter().all(|s| s.count == 60));
    let headline = headline_metrics(&stats);
    assert_eq!(headline.max, 9000.0);

    let report = detect_anomalies(dataset, "3 Phase Active Power", 3.0);
    assert_eq!(report.count(), 1);
    let spike = &report.anomalies[0];
    assert_eq!(spike.value, 9000.0);
    assert_eq!(spike.timestamp, parse_timestamp("2024-03-01 10:42:00"));
}

#[test]
fn meter_window_bill_and_export() {
    let csv = meter_export(120, usize::MAX);
    let frame = MeterFrame::load(csv.as_bytes(), &MeterLabels::default()).unwrap();
    assert_eq!(frame.dataset().len(), 120);

    let window = frame
        .window(
            parse_timestamp("2024-03-01 10:00:00"),
            parse_timestamp("2024-03-01 11:00:00"),
        )
        .unwrap();
    assert_eq!(window.len(), 61);

    let summary = summarize(&window, 8.0).unwrap();
    assert!((summary.duration_hours - 1.0).abs() < 1e-9);
    assert!(summary.avg_power > 1000.0 && summary.avg_power < 1040.0);
    assert!((summary.energy_kwh - summary.avg_power / 1000.0).abs() < 1e-9);
    assert!((summary.estimated_bill - summary.energy_kwh * 8.0).abs() < 1e-9);

    let exported = to_csv(&window.dataset).unwrap();
    let reloaded = CsvLoader::new().load_bytes(&exported).unwrap();
    assert_eq!(reloaded.dataset.len(), 61);
    assert_eq!(reloaded.dataset.column_names(), frame.dataset().column_names());

    let err = frame
        .window(
            parse_timestamp("2024-03-02 00:00:00"),
            parse_timestamp("2024-03-02 01:00:00"),
        )
        .unwrap_err();
    assert!(matches!(err, EnergyError::EmptyWindow { .. }));
}

#[test]
fn unparseable_upload_is_a_parse_error() {
    let err = load_energy_data(b"").unwrap_err();
    assert!(matches!(err, EnergyError::Parse(_)));
}

#[test]
fn live_log_file_contract() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("live_data.csv");
    let recorder = LiveRecorder::with_log(&path, 16).unwrap();
    for payload in ["230.1", "230,4", "status: ok"] {
        recorder.record(payload.as_bytes()).unwrap();
    }

    let content = fs::read_to_string(&path).unwrap();
    let lines: Vec<&str> = content.lines().collect();
    assert_eq!(lines.len(), 4);
    assert_eq!(lines[0], LIVE_LOG_HEADER);
    assert!(lines[1].ends_with(",230.1"));
    assert!(lines[3].ends_with(",status: ok"));

    assert_eq!(recorder.numeric_points(), vec![(0, 230.1), (1, 230.4)]);
}
