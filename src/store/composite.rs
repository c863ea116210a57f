//! Composite key encoding
//!
//! Layout: `U+0000 objectType U+0000 attr1 U+0000 ... attrN U+0000`. The
//! leading namespace byte keeps composite keys apart from simple keys, and the
//! trailing separator after every attribute means a partial key only ever
//! matches whole attributes.

use super::KeyRange;
use crate::error::{LedgerError, Result};

pub const COMPOSITE_KEY_NAMESPACE: char = '\u{0000}';
pub const MAX_UNICODE_RUNE: char = char::MAX;

fn validate_composite_attribute(attr: &str) -> Result<()> {
    if attr.contains(COMPOSITE_KEY_NAMESPACE) || attr.contains(MAX_UNICODE_RUNE) {
        return Err(LedgerError::Store(format!(
            "input contains unicode U+0000 or U+10FFFF which are not allowed in composite keys: {:?}",
            attr
        )));
    }
    Ok(())
}

pub fn create_composite_key(object_type: &str, attributes: &[&str]) -> Result<String> {
    validate_composite_attribute(object_type)?;
    let capacity = 2 + object_type.len() + attributes.iter().map(|a| a.len() + 1).sum::<usize>();
    let mut key = String::with_capacity(capacity);
    key.push(COMPOSITE_KEY_NAMESPACE);
    key.push_str(object_type);
    key.push(COMPOSITE_KEY_NAMESPACE);
    for attr in attributes {
        validate_composite_attribute(attr)?;
        key.push_str(attr);
        key.push(COMPOSITE_KEY_NAMESPACE);
    }
    Ok(key)
}

pub fn split_composite_key(key: &str) -> Result<(String, Vec<String>)> {
    let body = key
        .strip_prefix(COMPOSITE_KEY_NAMESPACE)
        .and_then(|rest| rest.strip_suffix(COMPOSITE_KEY_NAMESPACE))
        .ok_or_else(|| LedgerError::Store(format!("not a composite key: {:?}", key)))?;

    let mut parts = body.split(COMPOSITE_KEY_NAMESPACE).map(str::to_string);
    // `split` always yields at least one item
    let object_type = parts.next().unwrap_or_default();
    Ok((object_type, parts.collect()))
}

/// The key range holding every composite key of `object_type` whose leading
/// attributes equal `attributes`.
pub fn partial_composite_range(object_type: &str, attributes: &[&str]) -> Result<KeyRange> {
    let start = create_composite_key(object_type, attributes)?;
    let mut end = start.clone();
    end.push(MAX_UNICODE_RUNE);
    Ok(KeyRange { start, end })
}

/// Simple keys must be non-empty and may not start with the composite
/// namespace.
pub fn validate_simple_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(LedgerError::Validation("key must not be empty".to_string()));
    }
    if key.starts_with(COMPOSITE_KEY_NAMESPACE) {
        return Err(LedgerError::Validation(format!(
            "key {:?} starts with U+0000, which is reserved for composite keys",
            key
        )));
    }
    Ok(())
}
