//! Runtime configuration

use std::env;
use std::str::FromStr;

use crate::anomaly::DEFAULT_Z_THRESHOLD;
use crate::billing::{DEFAULT_RATE, validate_rate};
use crate::error::{EnergyError, Result};
use crate::meter::MeterLabels;
use crate::resample::RESAMPLE_ABOVE;

/// Application configuration
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Address the HTTP server binds to
    pub bind: String,

    /// Append-only live log file
    pub live_log: String,

    /// Samples kept in the in-memory live buffer
    pub live_capacity: usize,

    /// Broker and topic pre-filled in the live form
    pub mqtt_broker: String,
    pub mqtt_topic: String,
    pub mqtt_port: u16,

    /// Electricity rate used when a request does not supply one
    pub rate: f64,

    /// |Z| threshold used when a request does not supply one
    pub z_threshold: f64,

    /// Live page poll interval
    pub refresh_secs: u64,

    /// Charts resample to one-minute means above this many rows
    pub resample_above: usize,

    pub meter_labels: MeterLabels,

    /// Origins allowed to call the API cross-site; empty sends no CORS headers
    pub cors_origins: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:3000".to_string(),
            live_log: "live_data.csv".to_string(),
            live_capacity: 1000,
            mqtt_broker: "test.mosquitto.org".to_string(),
            mqtt_topic: "smartenergy/data".to_string(),
            mqtt_port: 1883,
            rate: DEFAULT_RATE,
            z_threshold: DEFAULT_Z_THRESHOLD,
            refresh_secs: 5,
            resample_above: RESAMPLE_ABOVE,
            meter_labels: MeterLabels::default(),
            cors_origins: Vec::new(),
        }
    }
}

fn parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    lookup(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

impl Config {
    /// Load configuration from environment variables (and `.env`, if present)
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build a configuration from any key lookup; unset or unparseable keys
    /// keep their defaults
    ///
    /// # Errors
    /// * `EnergyError::InvalidInput` if the rate or threshold is out of range
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let d = Config::default();
        let labels = MeterLabels {
            timestamp: lookup("WATTWATCH_LABEL_TIME").unwrap_or(d.meter_labels.timestamp.clone()),
            voltage: lookup("WATTWATCH_LABEL_VOLTAGE").unwrap_or(d.meter_labels.voltage.clone()),
            power: lookup("WATTWATCH_LABEL_POWER").unwrap_or(d.meter_labels.power.clone()),
            power_factor: lookup("WATTWATCH_LABEL_PF").unwrap_or(d.meter_labels.power_factor.clone()),
        };

        let config = Self {
            bind: lookup("WATTWATCH_BIND").unwrap_or(d.bind),
            live_log: lookup("WATTWATCH_LIVE_LOG").unwrap_or(d.live_log),
            live_capacity: parsed(&lookup, "WATTWATCH_LIVE_CAPACITY", d.live_capacity).max(1),
            mqtt_broker: lookup("WATTWATCH_MQTT_BROKER").unwrap_or(d.mqtt_broker),
            mqtt_topic: lookup("WATTWATCH_MQTT_TOPIC").unwrap_or(d.mqtt_topic),
            mqtt_port: parsed(&lookup, "WATTWATCH_MQTT_PORT", d.mqtt_port),
            rate: parsed(&lookup, "WATTWATCH_RATE", d.rate),
            z_threshold: parsed(&lookup, "WATTWATCH_Z_THRESHOLD", d.z_threshold),
            refresh_secs: parsed(&lookup, "WATTWATCH_REFRESH_SECS", d.refresh_secs).max(1),
            resample_above: parsed(&lookup, "WATTWATCH_RESAMPLE_ABOVE", d.resample_above),
            meter_labels: labels,
            cors_origins: lookup("WATTWATCH_CORS_ORIGINS")
                .map(|v| parse_origins(&v))
                .transpose()?
                .unwrap_or_default(),
        };

        validate_rate(config.rate)?;
        validate_threshold(config.z_threshold)?;
        Ok(config)
    }
}

/// Split a comma-separated origin list, e.g. `http://localhost:5173,https://energy.example`
fn parse_origins(raw: &str) -> Result<Vec<String>> {
    raw.split(',')
        .map(str::trim)
        .filter(|o| !o.is_empty())
        .map(|o| {
            let scheme_ok = o.starts_with("http://") || o.starts_with("https://");
            if scheme_ok && !o.contains(char::is_whitespace) && !o.ends_with('/') {
                Ok(o.to_string())
            } else {
                Err(EnergyError::InvalidInput(format!("invalid CORS origin '{}'", o)))
            }
        })
        .collect()
}

/// Check an anomaly threshold is finite and positive
pub fn validate_threshold(threshold: f64) -> Result<f64> {
    if threshold.is_finite() && threshold > 0.0 {
        Ok(threshold)
    } else {
        Err(EnergyError::InvalidInput(format!(
            "threshold must be a positive number, got {}",
            threshold
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_when_nothing_is_set() {
        let config = Config::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.z_threshold, 3.0);
        assert_eq!(config.rate, 8.0);
        assert_eq!(config.mqtt_port, 1883);
        assert!(config.cors_origins.is_empty());
    }

    #[test]
    fn cors_origins_are_listed_explicitly() {
        let config = Config::from_lookup(lookup(&[(
            "WATTWATCH_CORS_ORIGINS",
            "http://localhost:5173, https://energy.example,",
        )]))
        .unwrap();
        assert_eq!(
            config.cors_origins,
            vec!["http://localhost:5173".to_string(), "https://energy.example".to_string()]
        );

        assert!(Config::from_lookup(lookup(&[("WATTWATCH_CORS_ORIGINS", "*")])).is_err());
        assert!(Config::from_lookup(lookup(&[("WATTWATCH_CORS_ORIGINS", "energy.example")])).is_err());
    }

    #[test]
    fn overrides_and_bad_numbers() {
        let config = Config::from_lookup(lookup(&[
            ("WATTWATCH_BIND", "0.0.0.0:8080"),
            ("WATTWATCH_Z_THRESHOLD", "2.5"),
            ("WATTWATCH_LIVE_CAPACITY", "lots"),
            ("WATTWATCH_LABEL_PF", "PF Total"),
        ]))
        .unwrap();
        assert_eq!(config.bind, "0.0.0.0:8080");
        assert_eq!(config.z_threshold, 2.5);
        assert_eq!(config.live_capacity, 1000);
        assert_eq!(config.meter_labels.power_factor, "PF Total");
    }

    #[test]
    fn out_of_range_values_are_errors() {
        assert!(Config::from_lookup(lookup(&[("WATTWATCH_RATE", "80")])).is_err());
        assert!(Config::from_lookup(lookup(&[("WATTWATCH_Z_THRESHOLD", "-1")])).is_err());
    }
}
