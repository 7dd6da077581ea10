use chrono::NaiveDateTime;
use serde::Serialize;

use crate::error::{EnergyError, Result};
use crate::meter::MeterWindow;
use crate::stats::mean;

/// Default electricity rate, currency units per kWh
pub const DEFAULT_RATE: f64 = 8.0;

/// Highest rate accepted from a caller
pub const MAX_RATE: f64 = 50.0;

/// Energy and cost over a meter window
///
/// Energy uses the mean-power approximation `avg(power) * hours / 1000`. It
/// is exact only for uniformly sampled data.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct EnergySummary {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    pub rows: usize,
    pub avg_voltage: f64,
    pub avg_power: f64,
    pub avg_power_factor: f64,
    pub duration_hours: f64,
    pub energy_kwh: f64,
    pub rate: f64,
    pub estimated_bill: f64,
}

/// Energy in kWh from an average power in watts over a duration in hours
///
/// # Examples
/// ```
/// use wattwatch::billing::energy_kwh;
///
/// assert_eq!(energy_kwh(1000.0, 2.0), 2.0);
/// ```
pub fn energy_kwh(avg_power_w: f64, duration_hours: f64) -> f64 {
    avg_power_w * duration_hours / 1000.0
}

/// Cost of `kwh` at `rate` per kWh
pub fn estimated_cost(kwh: f64, rate: f64) -> f64 {
    kwh * rate
}

/// Check a caller-supplied rate lies in `[0, MAX_RATE]`
pub fn validate_rate(rate: f64) -> Result<f64> {
    if rate.is_finite() && (0.0..=MAX_RATE).contains(&rate) {
        Ok(rate)
    } else {
        Err(EnergyError::InvalidInput(format!(
            "rate must be between 0 and {}, got {}",
            MAX_RATE, rate
        )))
    }
}

/// Summarize a meter window: averages, energy and estimated bill
///
/// # Errors
/// * `EnergyError::InvalidInput` for a rate outside `[0, MAX_RATE]`
/// * `EnergyError::EmptyWindow` for a window without rows
pub fn summarize(window: &MeterWindow, rate: f64) -> Result<EnergySummary> {
    let rate = validate_rate(rate)?;
    if window.is_empty() {
        return Err(EnergyError::EmptyWindow {
            start: window.start.to_string(),
            end: window.end.to_string(),
        });
    }

    let avg_power = mean(&window.power());
    let duration_hours = window.duration_hours();
    let energy = energy_kwh(avg_power, duration_hours);

    Ok(EnergySummary {
        start: window.start,
        end: window.end,
        rows: window.len(),
        avg_voltage: mean(&window.voltage()),
        avg_power,
        avg_power_factor: mean(&window.power_factor()),
        duration_hours,
        energy_kwh: energy,
        rate,
        estimated_bill: estimated_cost(energy, rate),
    })
}
