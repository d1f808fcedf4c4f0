//! Hierarchical key model.
//!
//! A key is one or more non-empty segments joined by `.`, e.g. `robot.arm.angle`.
//! Keys address nodes in the server tree, index the client cache and act as
//! subscription filters: filter `A` matches `A` itself and every descendant
//! such as `A.B.C`.

use crate::KeyError;

/// Checks that `key` is a well formed hierarchical key.
///
/// # Errors
/// Returns the first violated rule: empty, whitespace, leading/trailing `.`,
/// consecutive `.`, or a segment that is empty after trimming.
pub fn validate(key: &str) -> std::result::Result<(), KeyError> {
    if key.is_empty() {
        return Err(KeyError::Empty);
    }
    if key.chars().any(char::is_whitespace) {
        return Err(KeyError::Whitespace(key.to_string()));
    }
    if key.starts_with('.') || key.ends_with('.') {
        return Err(KeyError::BoundaryDot(key.to_string()));
    }
    if key.contains("..") {
        return Err(KeyError::ConsecutiveDots(key.to_string()));
    }
    if key.split('.').any(|segment| segment.trim().is_empty()) {
        return Err(KeyError::EmptySegment(key.to_string()));
    }
    Ok(())
}

/// Checks a single segment name (no `.` allowed).
pub fn validate_name(name: &str) -> std::result::Result<(), KeyError> {
    if name.contains('.') {
        return Err(KeyError::DottedName(name.to_string()));
    }
    validate(name)
}

/// Validates an optional key where the empty string means "the root".
pub fn validate_optional(key: &str) -> std::result::Result<(), KeyError> {
    if key.is_empty() {
        return Ok(());
    }
    validate(key)
}

/// Splits a key into its ordered segments. The empty key has no segments.
pub fn segments(key: &str) -> Vec<&str> {
    if key.is_empty() {
        return Vec::new();
    }
    key.split('.').collect()
}

/// Returns the parent key, or `None` for a top-level key.
pub fn parent(key: &str) -> Option<&str> {
    key.rfind('.').map(|idx| &key[..idx])
}

/// True if `key` lies strictly below `ancestor` in the tree.
///
/// Every non-empty key is a descendant of the root (`""`).
pub fn is_descendant(
    key: &str,
    ancestor: &str,
) -> bool {
    if ancestor.is_empty() {
        return !key.is_empty();
    }
    key.len() > ancestor.len()
        && key.starts_with(ancestor)
        && key.as_bytes()[ancestor.len()] == b'.'
}

/// Subscription filter semantics: equal to the filter or below it.
///
/// The empty filter matches every key, including the empty "clear all" key.
pub fn matches_filter(
    key: &str,
    filter: &str,
) -> bool {
    filter.is_empty() || key == filter || is_descendant(key, filter)
}

/// True if the two keys lie on one root-to-leaf path (equal, ancestor or
/// descendant of each other). Used for cache invalidation.
pub fn is_related(
    a: &str,
    b: &str,
) -> bool {
    a == b || is_descendant(a, b) || is_descendant(b, a)
}

#[cfg(test)]
#[path = "key_test.rs"]
mod key_test;
