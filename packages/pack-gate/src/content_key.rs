//! Object-store key validation and content-prefix normalization.

use crate::Error;

const MAX_KEY_LEN: usize = 1024;

/// A validated key under the watermarked content prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentKey(String);

impl ContentKey {
    /// Validate `raw` and add `prefix` unless already present. Idempotent.
    pub fn normalize(raw: &str, prefix: &str) -> Result<Self, Error> {
        let key = validate_object_key(raw)?;
        if key.starts_with(prefix) {
            return Ok(Self(key.to_string()));
        }
        Ok(Self(format!("{prefix}{key}")))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ContentKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Reject keys that could escape their namespace. Strips one leading `/`.
pub fn validate_object_key(raw: &str) -> Result<&str, Error> {
    let key = raw.trim().strip_prefix('/').unwrap_or(raw.trim());
    if key.is_empty() {
        return Err(Error::invalid("invalid_content_key", "contentKey is empty"));
    }
    if key.len() > MAX_KEY_LEN {
        return Err(Error::invalid("invalid_content_key", "contentKey too long"));
    }
    if key.chars().any(|c| c.is_control() || c == '\\') {
        return Err(Error::invalid(
            "invalid_content_key",
            "contentKey contains forbidden characters",
        ));
    }
    // A trailing `/` names a directory, not an object.
    if key
        .split('/')
        .any(|segment| segment.is_empty() || segment == "." || segment == "..")
    {
        return Err(Error::invalid(
            "invalid_content_key",
            "contentKey contains an empty or relative path segment",
        ));
    }
    Ok(key)
}

/// Normalize a configured prefix to end with exactly one `/`.
pub fn normalize_prefix(prefix: &str) -> String {
    let trimmed = prefix.trim().trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("{trimmed}/")
    }
}
