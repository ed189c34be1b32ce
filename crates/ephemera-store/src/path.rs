//! Helpers for slash-separated store paths.

use crate::error::StoreError;

/// Join path segments with `/`, skipping empty segments and stray slashes.
#[must_use]
pub fn join<I, S>(segments: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    segments
        .into_iter()
        .map(|s| s.as_ref().trim_matches('/').to_owned())
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}

/// Normalise a scan prefix so it only matches whole path segments.
///
/// `a/b` becomes `a/b/`, which matches `a/b/c` but not `a/bc`. An empty prefix
/// scans the whole keyspace.
#[must_use]
pub fn scan_prefix(prefix: &str) -> String {
    let trimmed = prefix.trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("{trimmed}/")
    }
}

/// Strip a normalised scan prefix from `key`, returning the relative path.
#[must_use]
pub fn relative<'a>(scan_prefix: &str, key: &'a str) -> Option<&'a str> {
    key.strip_prefix(scan_prefix).filter(|rest| !rest.is_empty())
}

/// Whether `segment` can be used as exactly one path segment.
#[must_use]
pub fn is_segment(segment: &str) -> bool {
    !segment.is_empty() && !segment.contains('/')
}

/// Reject paths that cannot address a single entry.
pub fn validate(path: &str) -> Result<&str, StoreError> {
    let trimmed = path.trim_matches('/');
    if trimmed.is_empty() {
        return Err(StoreError::InvalidKey("empty path".to_owned()));
    }
    if trimmed.split('/').any(str::is_empty) {
        return Err(StoreError::InvalidKey(format!("empty segment in {path}")));
    }
    Ok(trimmed)
}
