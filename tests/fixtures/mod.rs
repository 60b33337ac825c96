//! Query fixtures shared by the integration tests
#![allow(dead_code)]

use std::collections::BTreeMap;

use chrono::{NaiveDate, TimeZone, Utc};
use datacube_query_cache::models::params::JobParameters;
use datacube_query_cache::services::manifest::{SceneEntry, SceneManifest};

/// Identity of [`landsat_query`].
pub const LANDSAT_QUERY_ID: &str =
    "2015-01-01-2015-06-01-20.0-10.0-110.0-100.0-LANDSAT_7-ls7_ledaps";

/// Landsat 7 query over [10,20] x [100,110], January to June 2015.
pub fn landsat_query() -> JobParameters {
    JobParameters {
        time_start: NaiveDate::from_ymd_opt(2015, 1, 1).unwrap(),
        time_end: NaiveDate::from_ymd_opt(2015, 6, 1).unwrap(),
        latitude_min: 10.0,
        latitude_max: 20.0,
        longitude_min: 100.0,
        longitude_max: 110.0,
        platform: "LANDSAT_7".to_string(),
        product: "ls7_ledaps".to_string(),
        extra: BTreeMap::new(),
    }
}

/// Same area, different time window.
pub fn later_landsat_query() -> JobParameters {
    JobParameters {
        time_start: NaiveDate::from_ymd_opt(2016, 1, 1).unwrap(),
        time_end: NaiveDate::from_ymd_opt(2016, 6, 1).unwrap(),
        ..landsat_query()
    }
}

/// Manifest for `ls7_ledaps`: three scenes inside the fixture window and
/// one after it.
pub fn ls7_manifest() -> SceneManifest {
    let scene = |month: u32, pixels: i64, clean: i64| SceneEntry {
        acquired_at: Utc.with_ymd_and_hms(2015, month, 10, 3, 15, 0).unwrap(),
        pixel_count: pixels,
        clean_pixel_count: clean,
    };

    SceneManifest {
        product: "ls7_ledaps".to_string(),
        scenes: vec![
            scene(1, 1000, 800),
            scene(3, 1000, 500),
            scene(5, 1000, 200),
            scene(9, 1000, 1000),
        ],
    }
}
