//! Validation of Postgres specs before any child object is rendered
//!
//! Admission checks may be absent, so the controller refuses specs that
//! would produce objects the API server rejects or a workload that can
//! never start.

use kube::ResourceExt;

use crate::controller::error::{Error, Result};
use crate::crd::Postgres;

/// Maximum length of an instance name
///
/// Pods carry `controller-revision-hash=<name>-<10 char hash>`, a label value
/// limited to 63 characters.
pub const MAX_INSTANCE_NAME_LEN: usize = 52;

/// Maximum length of an image tag
const MAX_TAG_LEN: usize = 128;

const BINARY_SUFFIXES: [&str; 6] = ["Ki", "Mi", "Gi", "Ti", "Pi", "Ei"];
const DECIMAL_SUFFIXES: [&str; 6] = ["k", "M", "G", "T", "P", "E"];

/// Validate the Postgres spec
pub fn validate_spec(pg: &Postgres) -> Result<()> {
    validate_name(&pg.name_any())?;
    validate_version(&pg.spec.version)?;
    validate_storage_size(&pg.spec.persistence.size)?;

    if pg.spec.auth.database.trim().is_empty() {
        return Err(Error::ValidationError(
            "auth.database must not be empty".to_string(),
        ));
    }
    if pg.spec.auth.secret_ref.trim().is_empty() {
        return Err(Error::ValidationError(
            "auth.secretRef must not be empty".to_string(),
        ));
    }
    Ok(())
}

fn validate_name(name: &str) -> Result<()> {
    if name.len() > MAX_INSTANCE_NAME_LEN {
        return Err(Error::ValidationError(format!(
            "name {name} is too long, at most {MAX_INSTANCE_NAME_LEN} characters are allowed"
        )));
    }
    Ok(())
}

/// The version is used as an image tag
fn validate_version(version: &str) -> Result<()> {
    let valid_chars = version
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
    if version.is_empty()
        || version.len() > MAX_TAG_LEN
        || !valid_chars
        || version.starts_with(['.', '-'])
    {
        return Err(Error::ValidationError(format!(
            "version {version:?} is not a valid image tag"
        )));
    }
    Ok(())
}

/// Validate a storage size in resource-quantity syntax (e.g. "10Gi", "500M", "1e9")
pub fn validate_storage_size(size: &str) -> Result<()> {
    let invalid = || Error::ValidationError(format!("invalid storage size: {size:?}"));

    let number_end = size
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(size.len());
    let (number, suffix) = size.split_at(number_end);

    let value: f64 = number.parse().map_err(|_| invalid())?;
    if value <= 0.0 {
        return Err(Error::ValidationError(format!(
            "storage size must be positive: {size:?}"
        )));
    }

    let valid_suffix = suffix.is_empty()
        || BINARY_SUFFIXES.contains(&suffix)
        || DECIMAL_SUFFIXES.contains(&suffix)
        || is_decimal_exponent(suffix);
    if !valid_suffix {
        return Err(invalid());
    }
    Ok(())
}

fn is_decimal_exponent(suffix: &str) -> bool {
    let Some(exponent) = suffix.strip_prefix(['e', 'E']) else {
        return false;
    };
    let digits = exponent.strip_prefix(['+', '-']).unwrap_or(exponent);
    !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit())
}
