//! Input normalization shared by request types.
//!
//! Field rules (lengths, email shape) live on the request structs as
//! `validator` derives; the helpers here run before those rules, during
//! deserialization, so that `"  "` counts as empty and emails compare
//! case-insensitively.

use serde::{Deserialize, Deserializer};

pub const EXCERPT_CHARS: usize = 150;

/// `deserialize_with` helper: surrounding whitespace is dropped.
pub fn trimmed<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = String::deserialize(deserializer)?;
    Ok(value.trim().to_string())
}

/// Like [`trimmed`] for optional fields. Pair with `#[serde(default)]`.
pub fn trimmed_opt<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(value.map(|v| v.trim().to_string()))
}

/// `deserialize_with` helper: trimmed and lowercased email.
pub fn email<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = String::deserialize(deserializer)?;
    Ok(value.trim().to_lowercase())
}

/// `Some` only when the value has non-whitespace content.
pub fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|s| !s.is_empty())
}

/// First 150 characters of the content, with `...` when truncated.
pub fn excerpt(content: &str) -> String {
    let mut chars = content.char_indices();
    match chars.nth(EXCERPT_CHARS) {
        Some((cut, _)) => format!("{}...", &content[..cut]),
        None => content.to_string(),
    }
}

/// URL slug: lowercase ASCII alphanumerics, everything else becomes `-`.
pub fn slugify(name: &str) -> String {
    name.to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect()
}
