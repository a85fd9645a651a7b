//! Latest-reading registry shared by all sessions
//!
//! The registry is the single source of truth queried by downstream
//! consumers. Entries are only ever inserted or replaced; a station that
//! stops reporting keeps its last reading.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use weather_shared::Reading;

/// Result of offering a reading to the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// The reading is now the latest for its station
    Accepted { sequence: u64 },
    /// The stored reading is at least as new; nothing changed
    Stale { latest_ms: u64 },
}

impl UpsertOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, UpsertOutcome::Accepted { .. })
    }
}

#[derive(Debug, Clone)]
struct StationEntry {
    reading: Arc<Reading>,
    /// Number of readings accepted for this station so far
    sequence: u64,
}

/// Process-wide mapping from station id to latest validated reading
///
/// The map sits behind an `Arc` that writers update copy-on-write. Readers
/// clone the outer pointer under a momentary read lock and then work on
/// that version without holding anything, so a large `snapshot` never
/// stalls writers and never observes a partial update.
#[derive(Debug, Default)]
pub struct Registry {
    stations: RwLock<Arc<HashMap<String, StationEntry>>>,
}

impl Registry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Current version of the map
    fn view(&self) -> Arc<HashMap<String, StationEntry>> {
        Arc::clone(&self.stations.read())
    }

    /// Store `reading` if it is newer than the current one for its station
    pub fn upsert(&self, reading: Reading) -> UpsertOutcome {
        let mut guard = self.stations.write();

        if let Some(entry) = guard.get(reading.station_id()) {
            if !reading.is_newer_than(&entry.reading) {
                return UpsertOutcome::Stale {
                    latest_ms: entry.reading.timestamp_ms(),
                };
            }
        }

        // Copies the map only while an older version is still held by a reader
        let stations = Arc::make_mut(&mut *guard);
        match stations.get_mut(reading.station_id()) {
            Some(entry) => {
                entry.sequence += 1;
                entry.reading = Arc::new(reading);
                UpsertOutcome::Accepted {
                    sequence: entry.sequence,
                }
            }
            None => {
                let station_id = reading.station_id().to_string();
                stations.insert(
                    station_id,
                    StationEntry {
                        reading: Arc::new(reading),
                        sequence: 1,
                    },
                );
                UpsertOutcome::Accepted { sequence: 1 }
            }
        }
    }

    /// Latest reading for a station
    pub fn get(&self, station_id: &str) -> Option<Arc<Reading>> {
        self.view().get(station_id).map(|e| Arc::clone(&e.reading))
    }

    /// Number of accepted readings for a station
    pub fn sequence(&self, station_id: &str) -> Option<u64> {
        self.view().get(station_id).map(|e| e.sequence)
    }

    /// One reading per known station, in no particular order
    pub fn snapshot(&self) -> Vec<Arc<Reading>> {
        self.view()
            .values()
            .map(|e| Arc::clone(&e.reading))
            .collect()
    }

    /// Number of stations that have ever reported
    pub fn len(&self) -> usize {
        self.stations.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.stations.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn reading(station: &str, ts_secs: u64, temp: f64, hum: f64) -> Reading {
        Reading::new(station, ts_secs * 1000, temp, hum, None).expect("valid reading")
    }

    #[test]
    fn test_newer_timestamp_wins() {
        let registry = Registry::new();

        assert_eq!(
            registry.upsert(reading("stationA", 1_700_000_000, 21.5, 60.0)),
            UpsertOutcome::Accepted { sequence: 1 }
        );
        assert_eq!(
            registry.upsert(reading("stationA", 1_700_000_060, 22.0, 58.0)),
            UpsertOutcome::Accepted { sequence: 2 }
        );

        let latest = registry.get("stationA").expect("station present");
        assert_eq!(latest.temperature(), 22.0);
        assert_eq!(registry.sequence("stationA"), Some(2));
    }

    #[test]
    fn test_out_of_order_is_stale() {
        let registry = Registry::new();

        registry.upsert(reading("stationA", 1_700_000_060, 22.0, 58.0));
        let outcome = registry.upsert(reading("stationA", 1_700_000_000, 21.5, 60.0));

        assert_eq!(
            outcome,
            UpsertOutcome::Stale {
                latest_ms: 1_700_000_060_000
            }
        );
        assert_eq!(registry.get("stationA").expect("present").temperature(), 22.0);
        assert_eq!(registry.sequence("stationA"), Some(1));
    }

    #[test]
    fn test_repeated_reading_is_stale() {
        let registry = Registry::new();
        let r = reading("stationA", 1_700_000_000, 21.5, 60.0);

        assert!(registry.upsert(r.clone()).is_accepted());
        assert!(!registry.upsert(r.clone()).is_accepted());

        assert_eq!(registry.len(), 1);
        assert_eq!(*registry.get("stationA").expect("present"), r);
        assert_eq!(registry.sequence("stationA"), Some(1));
    }

    #[test]
    fn test_held_view_is_not_mutated() {
        let registry = Registry::new();
        registry.upsert(reading("stationA", 1_700_000_000, 21.5, 60.0));

        let view = registry.view();
        registry.upsert(reading("stationA", 1_700_000_060, 22.0, 58.0));
        registry.upsert(reading("stationB", 1_700_000_000, 18.0, 40.0));

        // The old version is untouched; the registry moved on
        assert_eq!(view.len(), 1);
        assert_eq!(view["stationA"].reading.temperature(), 21.5);
        assert_eq!(view["stationA"].sequence, 1);
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.get("stationA").expect("present").temperature(), 22.0);
    }

    #[test]
    fn test_unknown_station() {
        let registry = Registry::new();
        assert!(registry.is_empty());
        assert!(registry.get("nowhere").is_none());
        assert!(registry.sequence("nowhere").is_none());
        assert!(registry.snapshot().is_empty());
    }

    #[test]
    fn test_concurrent_upserts_lose_nothing() {
        const STATIONS: usize = 128;
        const UPDATES: u64 = 20;

        let registry = Arc::new(Registry::new());
        let handles: Vec<_> = (0..STATIONS)
            .map(|i| {
                let registry = Arc::clone(&registry);
                thread::spawn(move || {
                    let id = format!("station{:03}", i);
                    for ts in 1..=UPDATES {
                        registry.upsert(reading(&id, ts, i as f64 / 10.0, 50.0));
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().expect("upsert thread panicked");
        }

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.len(), STATIONS);
        for r in snapshot {
            let i: usize = r.station_id()["station".len()..].parse().expect("index");
            assert_eq!(r.timestamp_ms(), UPDATES * 1000);
            assert_eq!(r.temperature(), i as f64 / 10.0);
            assert_eq!(registry.sequence(r.station_id()), Some(UPDATES));
        }
    }
}
