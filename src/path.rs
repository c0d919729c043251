//! Materialized Path Codec
//!
//! Paths are `.`-delimited segment strings (`asia.japan.tokyo`). Each segment
//! matches `[A-Za-z0-9_]+`, so the delimiter never appears inside a segment
//! and prefix predicates over the raw string are exact ancestor/descendant
//! tests.

use crate::error::{Error, Result};

/// Segment delimiter
pub const DELIMITER: char = '.';

/// Check a single segment against `[A-Za-z0-9_]+`.
pub fn validate_segment(segment: &str) -> Result<()> {
    if segment.is_empty() {
        return Err(Error::validation("path segment must not be empty"));
    }
    if let Some(bad) = segment
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || *c == '_'))
    {
        return Err(Error::validation(format!(
            "invalid character {:?} in path segment '{}'",
            bad, segment
        )));
    }
    Ok(())
}

/// Join segments into a path.
pub fn encode<S: AsRef<str>>(segments: &[S]) -> Result<String> {
    if segments.is_empty() {
        return Err(Error::validation("path must have at least one segment"));
    }
    let mut out = String::new();
    for (i, segment) in segments.iter().enumerate() {
        let segment = segment.as_ref();
        validate_segment(segment)?;
        if i > 0 {
            out.push(DELIMITER);
        }
        out.push_str(segment);
    }
    Ok(out)
}

/// Split a path into validated segments.
pub fn decode(path: &str) -> Result<Vec<String>> {
    validate(path)?;
    Ok(path.split(DELIMITER).map(str::to_string).collect())
}

/// Check every segment of a path.
pub fn validate(path: &str) -> Result<()> {
    if path.is_empty() {
        return Err(Error::validation("path must not be empty"));
    }
    for segment in path.split(DELIMITER) {
        validate_segment(segment)?;
    }
    Ok(())
}

/// Number of segments in a valid path.
pub fn depth(path: &str) -> Result<u32> {
    validate(path)?;
    Ok(path.split(DELIMITER).count() as u32)
}

/// Append a segment to a parent path.
pub fn child(parent: &str, segment: &str) -> Result<String> {
    validate(parent)?;
    validate_segment(segment)?;
    Ok(format!("{}{}{}", parent, DELIMITER, segment))
}

/// Parent path, `None` for a root.
pub fn parent(path: &str) -> Option<&str> {
    path.rfind(DELIMITER).map(|idx| &path[..idx])
}

/// Last segment of a path.
pub fn last_segment(path: &str) -> &str {
    match path.rfind(DELIMITER) {
        Some(idx) => &path[idx + 1..],
        None => path,
    }
}

/// All proper prefixes of `path`, root first.
pub fn ancestors(path: &str) -> Vec<&str> {
    path.match_indices(DELIMITER)
        .map(|(idx, _)| &path[..idx])
        .collect()
}

/// Whether `path` lies strictly below `ancestor`.
pub fn is_descendant(path: &str, ancestor: &str) -> bool {
    path.len() > ancestor.len() + 1
        && path.starts_with(ancestor)
        && path[ancestor.len()..].starts_with(DELIMITER)
}

/// Prefix that every descendant of `path` starts with.
pub fn descendant_prefix(path: &str) -> String {
    format!("{}{}", path, DELIMITER)
}

/// Lowercase and replace characters outside the segment charset with `_`.
pub fn normalize_segment(raw: &str) -> String {
    let normalized: String = raw
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect();
    if normalized.is_empty() {
        "_".to_string()
    } else {
        normalized
    }
}
