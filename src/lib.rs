//! Data Cube query cache
//!
//! This library fingerprints Data Cube analytics queries (mosaics, water
//! detection, NDVI anomaly...) into deterministic identities and guarantees
//! each distinct query is dispatched to the chunk processing workers at most
//! once, keeping status, progress and scene metadata per identity.

pub mod app_state;
pub mod config;
pub mod db;
pub mod models;
pub mod routes;
pub mod services;
