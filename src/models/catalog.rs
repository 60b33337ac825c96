//! Satellites and areas ingested into the Data Cube.
//!
//! A product id is the satellite's product prefix followed by an area id,
//! e.g. `ls7_ledaps_` + `colombia`. The catalog is used to reject queries
//! for data that was never ingested before they reach the cache.

use std::path::Path;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::models::params::{GeoBounds, JobParameters};

/// A platform with data in the Data Cube, e.g. `LANDSAT_7`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Satellite {
    pub satellite_id: String,
    pub satellite_name: String,
    pub product_prefix: String,
    /// Valid data range for this platform.
    pub date_min: NaiveDate,
    pub date_max: NaiveDate,
}

/// An ingested geographic region.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Area {
    pub area_id: String,
    pub area_name: String,
    pub bounds: GeoBounds,
    /// Satellites with data ingested over this area.
    pub satellites: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Catalog {
    pub satellites: Vec<Satellite>,
    pub areas: Vec<Area>,
}

impl Catalog {
    /// Load a catalog from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, CatalogError> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let catalog: Catalog = serde_json::from_str(&raw)?;
        Ok(catalog)
    }

    pub fn satellite(&self, satellite_id: &str) -> Option<&Satellite> {
        self.satellites.iter().find(|s| s.satellite_id == satellite_id)
    }

    pub fn area(&self, area_id: &str) -> Option<&Area> {
        self.areas.iter().find(|a| a.area_id == area_id)
    }

    /// Check that a query targets ingested data.
    pub fn check(&self, params: &JobParameters) -> Result<(), CatalogError> {
        let satellite = self
            .satellite(&params.platform)
            .ok_or_else(|| CatalogError::UnknownPlatform(params.platform.clone()))?;

        let area = params
            .product
            .strip_prefix(&satellite.product_prefix)
            .and_then(|area_id| self.area(area_id))
            .ok_or_else(|| CatalogError::UnknownProduct {
                platform: params.platform.clone(),
                product: params.product.clone(),
            })?;

        if !area.satellites.iter().any(|s| s == &satellite.satellite_id) {
            return Err(CatalogError::UnknownProduct {
                platform: params.platform.clone(),
                product: params.product.clone(),
            });
        }

        if params.time_start < satellite.date_min || params.time_end > satellite.date_max {
            return Err(CatalogError::OutsideDateRange {
                platform: satellite.satellite_id.clone(),
                date_min: satellite.date_min,
                date_max: satellite.date_max,
            });
        }

        if !area.bounds.intersects(&params.bounds()) {
            return Err(CatalogError::OutsideArea(area.area_id.clone()));
        }

        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("Unknown platform: {0}")]
    UnknownPlatform(String),

    #[error("Product {product} is not ingested for platform {platform}")]
    UnknownProduct { platform: String, product: String },

    #[error("{platform} only has data between {date_min} and {date_max}")]
    OutsideDateRange {
        platform: String,
        date_min: NaiveDate,
        date_max: NaiveDate,
    },

    #[error("Bounding box does not intersect area {0}")]
    OutsideArea(String),

    #[error("Failed to read catalog: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse catalog: {0}")]
    Parse(#[from] serde_json::Error),
}
