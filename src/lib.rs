/*!
# WattWatch

A browser-based dashboard for energy-meter data, built in Rust.

## Overview

WattWatch accepts an uploaded CSV export or a live MQTT feed, computes
summary statistics and an estimated electricity bill, flags Z-score outliers
and renders time-series charts. Two independent pipelines share the same
data model:

- **Batch**: CSV bytes -> delimiter strategy -> raw table -> normalization
  (timestamp detection, numeric coercion) -> statistics, billing, anomalies,
  charts and exports.
- **Streaming**: MQTT publishes -> listener task -> bounded in-memory buffer
  plus an append-only `timestamp,payload` log -> live tail and chart.

## Architecture

### Ingestion
- **loader**: CSV reading with a preferred delimiter and scored auto-detection
- **inference**: pluggable column matchers (by name, by content)
- **normalize**: timestamp parsing, sorting, numeric coercion, empty-column pruning
- **meter**: the stricter voltage / power / power-factor frame and its time window

### Analytics
- **stats**: per-column count, mean, sample standard deviation, min, max
- **billing**: mean-power energy in kWh and the bill estimate
- **anomaly**: Z-score outlier detection
- **resample**: one-minute means for charts of large datasets

### Streaming
- **live**: received samples, the bounded buffer and the log file
- **listener**: the MQTT subscription task and its stop handle

### Presentation (feature `web`)
- **graph**: PNG line charts drawn with plotters
- **downloader**: CSV and XLSX export
- **app**: axum routes serving the dashboard page and its JSON/PNG API

## REST API Endpoints

- `POST /api/upload` - Upload a CSV file (multipart field `file`)
- `GET /api/overview` - Preview, statistics and headline metrics
- `GET /api/chart/compare?columns=a,b,c` - Parameter comparison chart
- `GET /api/anomalies?column=..&threshold=..` - Z-score anomalies
- `POST /api/meter/upload` - Upload a meter export
- `GET /api/meter/summary?start=..&end=..&rate=..` - Energy and bill over a window
- `GET /api/meter/chart/{voltage|power|pf}` - Per-parameter chart
- `GET /api/meter/download?format={csv|xlsx}` - Filtered meter data
- `POST /api/live/start`, `POST /api/live/stop` - Listener lifecycle
- `GET /api/live/status`, `GET /api/live/chart` - Live tail and chart
*/

pub mod anomaly;
pub mod app;
pub mod billing;
pub mod config;
pub mod dataset;
pub mod downloader;
pub mod error;
pub mod graph;
pub mod inference;
pub mod listener;
pub mod live;
pub mod loader;
pub mod meter;
pub mod normalize;
pub mod resample;
pub mod stats;
pub mod timestamp;

pub use config::Config;
pub use dataset::{Column, ColumnData, Dataset, Value};
pub use error::{EnergyError, Result};
