use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use envwatch_core::ValueObject;

/// A monitored location.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoPoint {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self { latitude, longitude }
    }

    /// Fixed-point (micro-degree) representation used for key equality.
    fn micro_degrees(&self) -> (i64, i64) {
        (
            (self.latitude * 1e6).round() as i64,
            (self.longitude * 1e6).round() as i64,
        )
    }
}

impl ValueObject for GeoPoint {}

/// Natural key of a measurement: (location, UTC timestamp).
///
/// Coordinates are compared at micro-degree resolution so the key is `Eq + Hash`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MeasurementKey {
    pub latitude_e6: i64,
    pub longitude_e6: i64,
    pub observed_at: DateTime<Utc>,
}

impl MeasurementKey {
    pub fn new(location: GeoPoint, observed_at: DateTime<Utc>) -> Self {
        let (latitude_e6, longitude_e6) = location.micro_degrees();
        Self {
            latitude_e6,
            longitude_e6,
            observed_at,
        }
    }
}

impl ValueObject for MeasurementKey {}

/// Pollutants reported by the provider, in channel order.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Pollutant {
    Co,
    No,
    No2,
    O3,
    So2,
    #[serde(rename = "pm2_5")]
    Pm2_5,
    Pm10,
    Nh3,
}

impl Pollutant {
    pub const ALL: [Pollutant; 8] = [
        Pollutant::Co,
        Pollutant::No,
        Pollutant::No2,
        Pollutant::O3,
        Pollutant::So2,
        Pollutant::Pm2_5,
        Pollutant::Pm10,
        Pollutant::Nh3,
    ];

    pub fn code(&self) -> &'static str {
        match self {
            Pollutant::Co => "co",
            Pollutant::No => "no",
            Pollutant::No2 => "no2",
            Pollutant::O3 => "o3",
            Pollutant::So2 => "so2",
            Pollutant::Pm2_5 => "pm2_5",
            Pollutant::Pm10 => "pm10",
            Pollutant::Nh3 => "nh3",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|p| p.code() == code)
    }
}

/// Complete pollutant concentration vector (μg/m³).
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollutantComponents {
    pub co: f64,
    pub no: f64,
    pub no2: f64,
    pub o3: f64,
    pub so2: f64,
    pub pm2_5: f64,
    pub pm10: f64,
    pub nh3: f64,
}

impl PollutantComponents {
    pub fn get(&self, pollutant: Pollutant) -> f64 {
        match pollutant {
            Pollutant::Co => self.co,
            Pollutant::No => self.no,
            Pollutant::No2 => self.no2,
            Pollutant::O3 => self.o3,
            Pollutant::So2 => self.so2,
            Pollutant::Pm2_5 => self.pm2_5,
            Pollutant::Pm10 => self.pm10,
            Pollutant::Nh3 => self.nh3,
        }
    }
}

/// Pollutant concentrations as reported by the provider; any field may be absent.
#[derive(Debug, Copy, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawComponents {
    pub co: Option<f64>,
    pub no: Option<f64>,
    pub no2: Option<f64>,
    pub o3: Option<f64>,
    pub so2: Option<f64>,
    pub pm2_5: Option<f64>,
    pub pm10: Option<f64>,
    pub nh3: Option<f64>,
}

impl RawComponents {
    pub fn get(&self, pollutant: Pollutant) -> Option<f64> {
        match pollutant {
            Pollutant::Co => self.co,
            Pollutant::No => self.no,
            Pollutant::No2 => self.no2,
            Pollutant::O3 => self.o3,
            Pollutant::So2 => self.so2,
            Pollutant::Pm2_5 => self.pm2_5,
            Pollutant::Pm10 => self.pm10,
            Pollutant::Nh3 => self.nh3,
        }
    }

    /// All eight concentrations, or `None` if any is missing.
    pub fn complete(&self) -> Option<PollutantComponents> {
        Some(PollutantComponents {
            co: self.co?,
            no: self.no?,
            no2: self.no2?,
            o3: self.o3?,
            so2: self.so2?,
            pm2_5: self.pm2_5?,
            pm10: self.pm10?,
            nh3: self.nh3?,
        })
    }
}

impl From<PollutantComponents> for RawComponents {
    fn from(c: PollutantComponents) -> Self {
        Self {
            co: Some(c.co),
            no: Some(c.no),
            no2: Some(c.no2),
            o3: Some(c.o3),
            so2: Some(c.so2),
            pm2_5: Some(c.pm2_5),
            pm10: Some(c.pm10),
            nh3: Some(c.nh3),
        }
    }
}

/// One provider reading, normalised but not yet validated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AirQualityReading {
    pub observed_at: DateTime<Utc>,
    pub aqi: Option<u8>,
    pub components: RawComponents,
}

impl AirQualityReading {
    /// Classifier input row: `[aqi, co, no, no2, o3, so2, pm2_5, pm10, nh3]`.
    ///
    /// `None` when any channel is missing.
    pub fn feature_row(&self) -> Option<[f64; 9]> {
        let aqi = f64::from(self.aqi?);
        let c = self.components.complete()?;
        Some([aqi, c.co, c.no, c.no2, c.o3, c.so2, c.pm2_5, c.pm10, c.nh3])
    }
}

/// A persisted reading. Unique per [`MeasurementKey`], never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    pub location: GeoPoint,
    pub observed_at: DateTime<Utc>,
    pub aqi: u8,
    pub components: PollutantComponents,
}

impl Measurement {
    pub fn key(&self) -> MeasurementKey {
        MeasurementKey::new(self.location, self.observed_at)
    }

    /// Build a measurement from a provider reading; `None` when incomplete.
    pub fn from_reading(location: GeoPoint, reading: &AirQualityReading) -> Option<Self> {
        Some(Self {
            location,
            observed_at: reading.observed_at,
            aqi: reading.aqi?,
            components: reading.components.complete()?,
        })
    }
}

/// Outcome of planning an ingestion batch against already-stored keys.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IngestionPlan {
    /// New measurements, in provider order, unique by key.
    pub to_insert: Vec<Measurement>,
    /// Records whose key is already stored (or repeated within the batch).
    pub duplicates: usize,
    /// Records missing the index or a pollutant component.
    pub incomplete: usize,
}

/// Keys of every reading in a batch (the single batched existence lookup).
pub fn candidate_keys(location: GeoPoint, readings: &[AirQualityReading]) -> Vec<MeasurementKey> {
    let mut seen = HashSet::with_capacity(readings.len());
    readings
        .iter()
        .map(|r| MeasurementKey::new(location, r.observed_at))
        .filter(|k| seen.insert(*k))
        .collect()
}

/// Decide which readings become new rows.
///
/// A reading is skipped when its natural key is in `existing` or already planned
/// earlier in the same batch, so running a plan twice over overlapping ranges never
/// produces duplicate keys.
pub fn plan_ingestion(
    location: GeoPoint,
    readings: &[AirQualityReading],
    existing: &HashSet<MeasurementKey>,
) -> IngestionPlan {
    let mut plan = IngestionPlan::default();
    let mut planned: HashSet<MeasurementKey> = HashSet::new();

    for reading in readings {
        let key = MeasurementKey::new(location, reading.observed_at);
        if existing.contains(&key) || planned.contains(&key) {
            plan.duplicates += 1;
            continue;
        }
        match Measurement::from_reading(location, reading) {
            Some(m) => {
                planned.insert(key);
                plan.to_insert.push(m);
            }
            None => plan.incomplete += 1,
        }
    }

    plan
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;

    fn lyon() -> GeoPoint {
        GeoPoint::new(45.75, 4.85)
    }

    fn reading(hour: u32, co: f64) -> AirQualityReading {
        AirQualityReading {
            observed_at: Utc.with_ymd_and_hms(2025, 6, 1, hour, 0, 0).unwrap(),
            aqi: Some(2),
            components: PollutantComponents {
                co,
                no: 0.1,
                no2: 12.0,
                o3: 60.0,
                so2: 1.5,
                pm2_5: 8.0,
                pm10: 11.0,
                nh3: 0.7,
            }
            .into(),
        }
    }

    #[test]
    fn existing_keys_are_skipped() {
        let readings = vec![reading(0, 200.0), reading(1, 210.0), reading(2, 220.0)];
        let existing: HashSet<_> = [MeasurementKey::new(lyon(), readings[1].observed_at)].into();

        let plan = plan_ingestion(lyon(), &readings, &existing);

        assert_eq!(plan.to_insert.len(), 2);
        assert_eq!(plan.duplicates, 1);
        assert_eq!(plan.to_insert[0].components.co, 200.0);
        assert_eq!(plan.to_insert[1].components.co, 220.0);
    }

    #[test]
    fn repeated_timestamps_within_a_batch_are_collapsed() {
        let readings = vec![reading(3, 1.0), reading(3, 2.0)];
        let plan = plan_ingestion(lyon(), &readings, &HashSet::new());
        assert_eq!(plan.to_insert.len(), 1);
        assert_eq!(plan.duplicates, 1);
        assert_eq!(candidate_keys(lyon(), &readings).len(), 1);
    }

    #[test]
    fn incomplete_readings_are_counted_not_inserted() {
        let mut r = reading(4, 1.0);
        r.components.nh3 = None;
        let plan = plan_ingestion(lyon(), &[r], &HashSet::new());
        assert!(plan.to_insert.is_empty());
        assert_eq!(plan.incomplete, 1);
    }

    #[test]
    fn feature_row_is_in_channel_order() {
        let row = reading(5, 201.0).feature_row().unwrap();
        assert_eq!(row, [2.0, 201.0, 0.1, 12.0, 60.0, 1.5, 8.0, 11.0, 0.7]);

        let mut missing_index = reading(5, 201.0);
        missing_index.aqi = None;
        assert!(missing_index.feature_row().is_none());
    }

    #[test]
    fn keys_are_stable_across_float_noise() {
        let at = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let a = MeasurementKey::new(GeoPoint::new(45.75, 4.85), at);
        let b = MeasurementKey::new(GeoPoint::new(45.750000000001, 4.849999999999), at);
        assert_eq!(a, b);
    }

    proptest! {
        /// Property: applying a plan, then planning the same payload again against the
        /// stored keys, inserts nothing.
        #[test]
        fn planning_is_idempotent(hours in prop::collection::vec(0u32..24, 0..40)) {
            let readings: Vec<_> = hours.iter().map(|h| reading(*h, f64::from(*h))).collect();

            let mut stored: HashSet<MeasurementKey> = HashSet::new();
            let first = plan_ingestion(lyon(), &readings, &stored);
            stored.extend(first.to_insert.iter().map(Measurement::key));

            let second = plan_ingestion(lyon(), &readings, &stored);
            prop_assert!(second.to_insert.is_empty());

            let distinct: HashSet<u32> = hours.iter().copied().collect();
            prop_assert_eq!(stored.len(), distinct.len());
        }
    }
}
