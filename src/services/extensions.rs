//! Per-application extra parameters.
//!
//! Every query shares the same core fields; applications (mosaics, water
//! detection, NDVI anomaly...) add their own on top through the `extra`
//! map. Each application validates its extras with its own schema, without
//! touching the core record.

use std::collections::{BTreeMap, BTreeSet};

pub trait ExtensionSchema: Send + Sync {
    /// Reject extras this application does not understand.
    fn validate(&self, extra: &BTreeMap<String, String>) -> Result<(), String>;
}

/// Schema listing required and optional keys, with optional value choices.
///
/// Keys that are neither required nor optional are rejected.
#[derive(Debug, Clone, Default)]
pub struct FieldSchema {
    required: BTreeSet<String>,
    optional: BTreeSet<String>,
    choices: BTreeMap<String, BTreeSet<String>>,
}

impl FieldSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn required(mut self, key: &str) -> Self {
        self.required.insert(key.to_string());
        self
    }

    pub fn optional(mut self, key: &str) -> Self {
        self.optional.insert(key.to_string());
        self
    }

    /// Restrict `key` to one of `values` (e.g. compositor ids).
    pub fn one_of(mut self, key: &str, values: &[&str]) -> Self {
        self.choices.insert(
            key.to_string(),
            values.iter().map(|v| v.to_string()).collect(),
        );
        self
    }
}

impl ExtensionSchema for FieldSchema {
    fn validate(&self, extra: &BTreeMap<String, String>) -> Result<(), String> {
        if let Some(missing) = self.required.iter().find(|k| !extra.contains_key(*k)) {
            return Err(format!("missing required parameter {missing}"));
        }

        for (key, value) in extra {
            if !self.required.contains(key) && !self.optional.contains(key) {
                return Err(format!("unexpected parameter {key}"));
            }
            if let Some(allowed) = self.choices.get(key) {
                if !allowed.contains(value) {
                    return Err(format!("{key} must be one of {allowed:?}, got {value}"));
                }
            }
        }

        Ok(())
    }
}
