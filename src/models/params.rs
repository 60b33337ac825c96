use std::collections::BTreeMap;

use chrono::NaiveDate;
use garde::Validate;
use serde::{Deserialize, Serialize};

/// Parameters of a Data Cube analytics query.
///
/// Two parameter sets are the same query exactly when all of their fields
/// are equal; see [`crate::services::fingerprint`] for how that equality is
/// turned into a cache key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct JobParameters {
    #[garde(skip)]
    pub time_start: NaiveDate,
    #[garde(skip)]
    pub time_end: NaiveDate,

    #[garde(range(min = -90.0, max = 90.0))]
    pub latitude_min: f64,
    #[garde(range(min = -90.0, max = 90.0))]
    pub latitude_max: f64,
    #[garde(range(min = -180.0, max = 180.0))]
    pub longitude_min: f64,
    #[garde(range(min = -180.0, max = 180.0))]
    pub longitude_max: f64,

    /// Data Cube platform, e.g. `LANDSAT_7`.
    #[garde(length(min = 1, max = 25))]
    pub platform: String,

    /// Data Cube product, e.g. `ls7_ledaps_colombia`.
    #[garde(length(min = 1, max = 50))]
    pub product: String,

    /// Application specific parameters (compositor, baseline, animation type...).
    #[serde(default)]
    #[garde(skip)]
    pub extra: BTreeMap<String, String>,
}

impl JobParameters {
    pub fn bounds(&self) -> GeoBounds {
        GeoBounds {
            latitude_min: self.latitude_min,
            latitude_max: self.latitude_max,
            longitude_min: self.longitude_min,
            longitude_max: self.longitude_max,
        }
    }
}

/// Geospatial bounding box in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoBounds {
    pub latitude_min: f64,
    pub latitude_max: f64,
    pub longitude_min: f64,
    pub longitude_max: f64,
}

impl GeoBounds {
    /// True when the two boxes share at least one point.
    pub fn intersects(&self, other: &GeoBounds) -> bool {
        self.latitude_min <= other.latitude_max
            && other.latitude_min <= self.latitude_max
            && self.longitude_min <= other.longitude_max
            && other.longitude_min <= self.longitude_max
    }
}
