//! Field-contract validation: flatten the payload, compare against the
//! template's declared placeholder set.
//!
//! ## Why flatten instead of walking the template?
//!
//! The declared field set was extracted once at upload time and stored with
//! the template. Validating against that stored contract means a merge
//! request can be rejected before the template bytes are even fetched, and
//! the failure names every missing dot-path in one response instead of
//! surfacing them one render attempt at a time.
//!
//! Arrays are leaves: a loop field like `items` is addressed by its
//! top-level dot-path only, never descended into — element shape is the
//! renderer's concern, not the contract's.

use crate::error::MergeError;
use serde_json::Value;
use tracing::debug;

/// Flatten a nested payload into its leaf dot-paths.
///
/// Every non-object value is a leaf at its current dot-path, including
/// arrays. Object values recurse, joining child keys with `.`. An empty
/// object contributes no leaves.
pub fn flatten_paths(data: &Value) -> Vec<String> {
    let mut paths = Vec::new();
    if let Value::Object(map) = data {
        for (key, value) in map {
            collect(key.clone(), value, &mut paths);
        }
    }
    paths
}

fn collect(path: String, value: &Value, out: &mut Vec<String>) {
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                collect(format!("{path}.{key}"), child, out);
            }
        }
        _ => out.push(path),
    }
}

/// Check the payload against the declared placeholder set.
///
/// Missing declared paths are fatal and short-circuit the merge before any
/// rendering; undeclared payload leaves are advisory only (templates may
/// intentionally ignore caller-provided context) and are logged, never
/// returned to the caller. A template with zero declared fields accepts
/// any payload.
pub fn check_fields(declared: &[String], data: &Value) -> Result<(), MergeError> {
    let leaves = flatten_paths(data);

    let missing: Vec<String> = declared
        .iter()
        .filter(|field| !leaves.iter().any(|leaf| leaf == *field))
        .cloned()
        .collect();

    let extra: Vec<&String> = leaves
        .iter()
        .filter(|leaf| !declared.iter().any(|field| field == *leaf))
        .collect();
    if !extra.is_empty() {
        debug!(
            "Payload carries {} undeclared field(s): {}",
            extra.len(),
            extra
                .iter()
                .map(|s| s.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        );
    }

    if missing.is_empty() {
        Ok(())
    } else {
        Err(MergeError::MissingFields { fields: missing })
    }
}
