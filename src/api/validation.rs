//! Request validation.

use crate::api::error::ApiError;

/// Longest accepted bakeform name.
pub const MAX_NAME_LEN: usize = 64;

/// Names that would shadow fixed routes.
const RESERVED_NAMES: &[&str] = &["health", "openapi.json"];

/// Validate a bakeform name taken from a URL path.
///
/// Rules:
/// - Length: 1..=MAX_NAME_LEN characters
/// - Allowed characters: alphanumeric, hyphen (-), underscore (_), dot (.)
/// - Must start with a letter or digit
/// - No path separators (/, \)
/// - Not a reserved route name
pub fn validate_bakeform_name(name: &str) -> Result<(), ApiError> {
    let first_char = name
        .chars()
        .next()
        .ok_or_else(|| ApiError::BadRequest("bakeform name cannot be empty".into()))?;

    if name.len() > MAX_NAME_LEN {
        return Err(ApiError::BadRequest(format!(
            "bakeform name too long: {} characters (max {})",
            name.len(),
            MAX_NAME_LEN
        )));
    }

    if !first_char.is_ascii_alphanumeric() {
        return Err(ApiError::BadRequest(
            "bakeform name must start with a letter or digit".into(),
        ));
    }

    for c in name.chars() {
        if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
            continue;
        }
        if c == '/' || c == '\\' {
            return Err(ApiError::BadRequest(
                "bakeform name cannot contain path separators".into(),
            ));
        }
        return Err(ApiError::BadRequest(format!(
            "bakeform name contains invalid character: '{}'",
            c
        )));
    }

    if RESERVED_NAMES.contains(&name) {
        return Err(ApiError::BadRequest(format!(
            "bakeform name '{}' is reserved",
            name
        )));
    }

    Ok(())
}
