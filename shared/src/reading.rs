//! Validated sensor readings

use crate::protocol::{
    HUMIDITY_RANGE, MAX_STATION_ID_LEN, PRESSURE_MAX_HPA, TEMPERATURE_RANGE,
};
use thiserror::Error;

/// Errors raised when a reading's fields are syntactically fine but unacceptable
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("Station id is empty")]
    EmptyStationId,

    #[error("Station id too long: {0} bytes (max: {MAX_STATION_ID_LEN})")]
    StationIdTooLong(usize),

    #[error("Unsafe station id: {0:?}")]
    UnsafeStationId(String),

    #[error("{field} out of range: {value}")]
    OutOfRange { field: &'static str, value: f64 },
}

/// One timestamped sample from a station
///
/// Fields are private so that every `Reading` in the system has passed
/// validation; use [`Reading::new`] to build one.
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    station_id: String,
    timestamp_ms: u64,
    temperature: f64,
    humidity: f64,
    pressure: Option<f64>,
}

impl Reading {
    /// Create a validated reading
    pub fn new(
        station_id: impl Into<String>,
        timestamp_ms: u64,
        temperature: f64,
        humidity: f64,
        pressure: Option<f64>,
    ) -> Result<Self, ValidationError> {
        let station_id = station_id.into();
        validate_station_id(&station_id)?;

        check_range("temperature", temperature, TEMPERATURE_RANGE)?;
        check_range("humidity", humidity, HUMIDITY_RANGE)?;
        if let Some(p) = pressure {
            if !(p.is_finite() && p > 0.0 && p <= PRESSURE_MAX_HPA) {
                return Err(ValidationError::OutOfRange {
                    field: "pressure",
                    value: p,
                });
            }
        }

        Ok(Self {
            station_id,
            timestamp_ms,
            temperature,
            humidity,
            pressure,
        })
    }

    pub fn station_id(&self) -> &str {
        &self.station_id
    }

    /// Unix epoch milliseconds
    pub fn timestamp_ms(&self) -> u64 {
        self.timestamp_ms
    }

    /// Degrees Celsius
    pub fn temperature(&self) -> f64 {
        self.temperature
    }

    /// Relative humidity in percent
    pub fn humidity(&self) -> f64 {
        self.humidity
    }

    /// Barometric pressure in hPa, if the station reports it
    pub fn pressure(&self) -> Option<f64> {
        self.pressure
    }

    /// Location label encoded in the station id
    pub fn location(&self) -> &str {
        location_of(&self.station_id)
    }

    /// Whether this reading advances past `other` in time
    pub fn is_newer_than(&self, other: &Reading) -> bool {
        self.timestamp_ms > other.timestamp_ms
    }
}

/// Extract the location suffix from a station id
///
/// `station01_coastal` yields `coastal`; an id without `_` is its own location.
pub fn location_of(station_id: &str) -> &str {
    match station_id.rsplit_once('_') {
        Some((_, suffix)) if !suffix.is_empty() => suffix,
        _ => station_id,
    }
}

/// Check that a station id is non-empty, bounded, and limited to `[A-Za-z0-9_-]`
pub fn validate_station_id(id: &str) -> Result<(), ValidationError> {
    if id.is_empty() {
        return Err(ValidationError::EmptyStationId);
    }
    if id.len() > MAX_STATION_ID_LEN {
        return Err(ValidationError::StationIdTooLong(id.len()));
    }
    if !id
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
    {
        return Err(ValidationError::UnsafeStationId(id.to_string()));
    }
    Ok(())
}

fn check_range(field: &'static str, value: f64, (min, max): (f64, f64)) -> Result<(), ValidationError> {
    if value.is_finite() && value >= min && value <= max {
        Ok(())
    } else {
        Err(ValidationError::OutOfRange { field, value })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_reading() {
        let r = Reading::new("stationA", 1_700_000_000_000, 21.5, 60.0, Some(1013.2))
            .expect("valid reading");
        assert_eq!(r.station_id(), "stationA");
        assert_eq!(r.timestamp_ms(), 1_700_000_000_000);
        assert_eq!(r.pressure(), Some(1013.2));
    }

    #[test]
    fn test_humidity_bounds_are_inclusive() {
        assert!(Reading::new("s", 0, 0.0, 0.0, None).is_ok());
        assert!(Reading::new("s", 0, 0.0, 100.0, None).is_ok());
        assert_eq!(
            Reading::new("s", 0, 0.0, 100.1, None),
            Err(ValidationError::OutOfRange {
                field: "humidity",
                value: 100.1
            })
        );
        assert!(Reading::new("s", 0, 0.0, -0.5, None).is_err());
    }

    #[test]
    fn test_non_finite_values_rejected() {
        assert!(Reading::new("s", 0, f64::NAN, 50.0, None).is_err());
        assert!(Reading::new("s", 0, 20.0, f64::INFINITY, None).is_err());
        assert!(Reading::new("s", 0, 20.0, 50.0, Some(f64::NAN)).is_err());
        assert!(Reading::new("s", 0, 20.0, 50.0, Some(0.0)).is_err());
    }

    #[test]
    fn test_station_id_rules() {
        assert_eq!(validate_station_id(""), Err(ValidationError::EmptyStationId));
        assert!(validate_station_id("station-01_coastal").is_ok());
        assert!(matches!(
            validate_station_id("drop table;"),
            Err(ValidationError::UnsafeStationId(_))
        ));
        let long = "a".repeat(MAX_STATION_ID_LEN + 1);
        assert_eq!(
            validate_station_id(&long),
            Err(ValidationError::StationIdTooLong(MAX_STATION_ID_LEN + 1))
        );
    }

    #[test]
    fn test_location() {
        assert_eq!(location_of("station01_coastal"), "coastal");
        assert_eq!(location_of("my_mountain_station_mountain"), "mountain");
        assert_eq!(location_of("station04"), "station04");
        assert_eq!(location_of("trailing_"), "trailing_");

        let r = Reading::new("station03_desert", 0, 35.0, 10.0, None).expect("valid");
        assert_eq!(r.location(), "desert");
    }

    #[test]
    fn test_is_newer_than() {
        let old = Reading::new("s", 1000, 20.0, 50.0, None).expect("valid");
        let new = Reading::new("s", 2000, 20.0, 50.0, None).expect("valid");
        assert!(new.is_newer_than(&old));
        assert!(!old.is_newer_than(&new));
        assert!(!old.is_newer_than(&old));
    }
}
