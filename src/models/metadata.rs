use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::job::JobIdentity;
use crate::models::params::GeoBounds;

/// `clean` as a percentage of `total`; zero when there are no pixels.
pub fn clean_percentage(clean: i64, total: i64) -> f64 {
    if total <= 0 {
        return 0.0;
    }
    clean as f64 / total as f64 * 100.0
}

/// Scene statistics for a query, written once after the data source has
/// been enumerated.
///
/// Position `i` of `acquisitions`, `clean_pixel_counts` and
/// `clean_pixel_percentages` describes the same acquisition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobMetadata {
    pub query_id: JobIdentity,
    pub bounds: GeoBounds,
    pub scene_count: i64,
    pub pixel_count: i64,
    pub clean_pixel_count: i64,
    pub acquisitions: Vec<DateTime<Utc>>,
    pub clean_pixel_counts: Vec<i64>,
    pub clean_pixel_percentages: Vec<f64>,
}

impl JobMetadata {
    /// Percentage of clean pixels over the whole query.
    pub fn percentage_clean_pixels(&self) -> f64 {
        clean_percentage(self.clean_pixel_count, self.pixel_count)
    }

    /// Per-acquisition view: (acquisition time, clean pixels, clean percentage).
    pub fn acquisitions_with_pixels(
        &self,
    ) -> impl Iterator<Item = (&DateTime<Utc>, i64, f64)> + '_ {
        self.acquisitions
            .iter()
            .zip(self.clean_pixel_counts.iter().copied())
            .zip(self.clean_pixel_percentages.iter().copied())
            .map(|((at, count), pct)| (at, count, pct))
    }
}

/// Metadata fields as reported by a worker, before being keyed and stored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SceneStatistics {
    pub scene_count: i64,
    pub pixel_count: i64,
    pub clean_pixel_count: i64,
    pub acquisitions: Vec<DateTime<Utc>>,
    pub clean_pixel_counts: Vec<i64>,
    pub clean_pixel_percentages: Vec<f64>,
}

impl SceneStatistics {
    /// The three per-acquisition sequences have the same length.
    pub fn is_well_shaped(&self) -> bool {
        self.acquisitions.len() == self.clean_pixel_counts.len()
            && self.acquisitions.len() == self.clean_pixel_percentages.len()
    }

    pub fn percentage_clean_pixels(&self) -> f64 {
        clean_percentage(self.clean_pixel_count, self.pixel_count)
    }

    pub fn into_metadata(self, query_id: JobIdentity, bounds: GeoBounds) -> JobMetadata {
        JobMetadata {
            query_id,
            bounds,
            scene_count: self.scene_count,
            pixel_count: self.pixel_count,
            clean_pixel_count: self.clean_pixel_count,
            acquisitions: self.acquisitions,
            clean_pixel_counts: self.clean_pixel_counts,
            clean_pixel_percentages: self.clean_pixel_percentages,
        }
    }
}
