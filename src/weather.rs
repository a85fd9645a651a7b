//! Simulated sensor readings
//!
//! Each station draws Gaussian samples from the climate profile matching the
//! location suffix of its id, with deterministic seeding for reproducible runs.

use rand::prelude::*;
use rand::rngs::SmallRng;
use rand_distr::StandardNormal;
use weather_shared::reading::location_of;
use weather_shared::{Reading, ValidationError};

/// Gaussian parameters `(mean, std_dev)` for each generated quantity
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClimateProfile {
    pub name: &'static str,
    pub temperature: (f64, f64),
    pub humidity: (f64, f64),
    pub pressure: (f64, f64),
}

pub const NORMAL: ClimateProfile = ClimateProfile {
    name: "normal",
    temperature: (18.0, 7.0),
    humidity: (55.0, 20.0),
    pressure: (1013.0, 6.0),
};

pub const COASTAL: ClimateProfile = ClimateProfile {
    name: "coastal",
    temperature: (20.0, 4.0),
    humidity: (75.0, 10.0),
    pressure: (1015.0, 5.0),
};

pub const MOUNTAIN: ClimateProfile = ClimateProfile {
    name: "mountain",
    temperature: (5.0, 8.0),
    humidity: (40.0, 15.0),
    pressure: (1009.0, 9.0),
};

pub const DESERT: ClimateProfile = ClimateProfile {
    name: "desert",
    temperature: (33.0, 7.0),
    humidity: (20.0, 10.0),
    pressure: (1011.0, 4.0),
};

const TEMPERATURE_CLAMP: (f64, f64) = (-30.0, 50.0);
const HUMIDITY_CLAMP: (f64, f64) = (0.0, 100.0);
const PRESSURE_CLAMP: (f64, f64) = (870.0, 1085.0);

impl ClimateProfile {
    /// Profile for a station, chosen by its location suffix
    pub fn for_station(station_id: &str) -> Self {
        match location_of(station_id) {
            "coastal" => COASTAL,
            "mountain" => MOUNTAIN,
            "desert" => DESERT,
            _ => NORMAL,
        }
    }
}

/// Reading generator for one station
pub struct WeatherGenerator {
    station_id: String,
    profile: ClimateProfile,
    rng: SmallRng,
}

impl WeatherGenerator {
    /// Create a generator for `station_id`
    ///
    /// A seed of 0 draws from OS entropy; any other value gives a
    /// reproducible sequence.
    pub fn new(station_id: impl Into<String>, seed: u64) -> Self {
        let station_id = station_id.into();
        let rng = if seed == 0 {
            SmallRng::from_entropy()
        } else {
            SmallRng::seed_from_u64(seed)
        };
        Self {
            profile: ClimateProfile::for_station(&station_id),
            station_id,
            rng,
        }
    }

    pub fn station_id(&self) -> &str {
        &self.station_id
    }

    pub fn profile(&self) -> &ClimateProfile {
        &self.profile
    }

    /// Draw the next reading, stamped with `timestamp_ms`
    pub fn sample(&mut self, timestamp_ms: u64) -> Result<Reading, ValidationError> {
        let profile = self.profile;
        let temperature = round1(clamp(self.gaussian(profile.temperature), TEMPERATURE_CLAMP));
        let humidity = round1(clamp(self.gaussian(profile.humidity), HUMIDITY_CLAMP));
        let pressure = round1(clamp(self.gaussian(profile.pressure), PRESSURE_CLAMP));

        Reading::new(
            self.station_id.clone(),
            timestamp_ms,
            temperature,
            humidity,
            Some(pressure),
        )
    }

    fn gaussian(&mut self, (mean, std_dev): (f64, f64)) -> f64 {
        let n: f64 = self.rng.sample(StandardNormal);
        mean + n * std_dev
    }
}

fn clamp(value: f64, (min, max): (f64, f64)) -> f64 {
    value.clamp(min, max)
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}
