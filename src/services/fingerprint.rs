//! Deterministic query identities.
//!
//! An identity is the query's fields joined by [`DELIMITER`] in a fixed
//! order: start date, end date, latitude max, latitude min, longitude max,
//! longitude min, platform, product, then any extra parameters sorted by key
//! as `key=value`.
//!
//! Dates are written as `YYYY-MM-DD`. Coordinates use the shortest decimal
//! form that round-trips, always with a fractional part and never in
//! exponent notation, so `20` becomes `20.0` and `-0.0` becomes `0.0`.
//! Since coordinates are the only fields that may contain the delimiter, and
//! only as a leading sign, the identity can always be split back into its
//! fields unambiguously. Text fields are limited to `[A-Za-z0-9_.]`, so an
//! identity is also a valid URL path segment as is.

use chrono::NaiveDate;

use crate::models::job::JobIdentity;
use crate::models::params::JobParameters;

pub const DELIMITER: char = '-';
const EXTRA_SEPARATOR: char = '=';

/// Build the identity for a query.
pub fn compute_identity(params: &JobParameters) -> Result<JobIdentity, FingerprintError> {
    check_params(params)?;

    let mut segments = vec![
        canonical_date(params.time_start),
        canonical_date(params.time_end),
        canonical_coordinate(params.latitude_max),
        canonical_coordinate(params.latitude_min),
        canonical_coordinate(params.longitude_max),
        canonical_coordinate(params.longitude_min),
        params.platform.clone(),
        params.product.clone(),
    ];

    // BTreeMap iterates in key order
    for (key, value) in &params.extra {
        segments.push(format!("{key}{EXTRA_SEPARATOR}{value}"));
    }

    Ok(JobIdentity::new(segments.join(&DELIMITER.to_string())))
}

pub fn canonical_date(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

/// Render a finite coordinate in its canonical decimal form.
pub fn canonical_coordinate(value: f64) -> String {
    // -0.0 == 0.0, so both must render the same way
    let value = if value == 0.0 { 0.0 } else { value };
    let rendered = value.to_string();
    if rendered.contains('.') {
        rendered
    } else {
        format!("{rendered}.0")
    }
}

fn check_params(params: &JobParameters) -> Result<(), FingerprintError> {
    for (field, value) in [
        ("latitude_min", params.latitude_min),
        ("latitude_max", params.latitude_max),
        ("longitude_min", params.longitude_min),
        ("longitude_max", params.longitude_max),
    ] {
        if !value.is_finite() {
            return Err(FingerprintError::NonFinite(field));
        }
    }

    for (field, value) in [("platform", &params.platform), ("product", &params.product)] {
        if value.is_empty() {
            return Err(FingerprintError::Empty(field));
        }
        check_text(field, value)?;
    }

    for (key, value) in &params.extra {
        let key_ok = !key.is_empty()
            && key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
        if !key_ok {
            return Err(FingerprintError::InvalidExtraKey(key.clone()));
        }
        check_text(key, value)?;
    }

    Ok(())
}

/// Text fields end up verbatim in the identity, which is used as a URL path
/// segment. Only `[A-Za-z0-9_.]` is accepted.
fn check_text(field: &str, value: &str) -> Result<(), FingerprintError> {
    if value.contains(DELIMITER) || value.contains(EXTRA_SEPARATOR) {
        return Err(FingerprintError::ContainsDelimiter {
            field: field.to_string(),
            value: value.to_string(),
        });
    }
    if !value.chars().all(is_url_safe) {
        return Err(FingerprintError::UnsafeCharacter {
            field: field.to_string(),
            value: value.to_string(),
        });
    }
    Ok(())
}

fn is_url_safe(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '.'
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum FingerprintError {
    #[error("{0} must be a finite number")]
    NonFinite(&'static str),

    #[error("{0} must not be empty")]
    Empty(&'static str),

    #[error("{field} value {value:?} contains a reserved separator")]
    ContainsDelimiter { field: String, value: String },

    #[error("{field} value {value:?} may only contain letters, digits, '_' and '.'")]
    UnsafeCharacter { field: String, value: String },

    #[error("extra parameter name {0:?} must be alphanumeric or underscore")]
    InvalidExtraKey(String),
}
