//! Mutation detection and cached-artifact versioning.
//!
//! A resurrected instrument is either `Fresh` (every cached artifact computed
//! under the saved parameters is still valid) or `Stale` (something changed and
//! derived state must be recomputed under versioned file names). The decision
//! is made once, up front, and threaded explicitly through construction.

use crate::config::{schema_maps, Overlay, OperationalParams, PhysicalParams};
use crate::error::Result;
use serde_json::Value;
use std::path::{Path, PathBuf};

/// Validity of cached derived artifacts relative to a saved parameter set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    /// Saved artifacts remain valid and may be reloaded.
    Fresh,
    /// Parameters changed; artifacts must be recomputed and versioned.
    Stale,
}

impl Lifecycle {
    pub fn is_stale(self) -> bool {
        matches!(self, Lifecycle::Stale)
    }
}

/// Compare two JSON values, treating all numbers as f64 so that `1` and `1.0`
/// do not register as a change.
fn values_differ(new: &Value, old: &Value) -> bool {
    match (new.as_f64(), old.as_f64()) {
        (Some(a), Some(b)) => a != b,
        _ => new != old,
    }
}

fn as_f64_seq(value: &Value) -> Option<Vec<f64>> {
    value.as_array()?.iter().map(Value::as_f64).collect()
}

/// Element-wise comparison of the observation-duration array; differing length
/// or any differing element counts as a change.
fn t_obs_differ(new: &Value, old: &Value) -> bool {
    match (as_f64_seq(new), as_f64_seq(old)) {
        (Some(a), Some(b)) => a.len() != b.len() || a.iter().zip(&b).any(|(x, y)| x != y),
        _ => values_differ(new, old),
    }
}

/// Decide whether an overlay mutates the saved parameter set.
///
/// `new_identity` is true when the caller supplied an explicit new save-file
/// directive, which forces `Stale` regardless of the overlay contents. The
/// result is independent of overlay iteration order: every key is tested
/// against the saved schemas and any single difference is decisive.
pub fn decide(
    go: &OperationalParams,
    config: &PhysicalParams,
    overlay: &Overlay,
    new_identity: bool,
) -> Result<Lifecycle> {
    if new_identity {
        return Ok(Lifecycle::Stale);
    }

    let (go_map, config_map) = schema_maps(go, config)?;
    for (key, value) in overlay {
        let changed = if key == "t_obs" {
            match go_map.get(key) {
                Some(old) => t_obs_differ(value, old),
                None => true,
            }
        } else if let Some(old) = go_map.get(key) {
            values_differ(value, old)
        } else if let Some(old) = config_map.get(key) {
            values_differ(value, old)
        } else {
            // Schema drift: a key the saved records have never heard of.
            true
        };
        if changed {
            log::debug!("configuration mutated by key '{key}'");
            return Ok(Lifecycle::Stale);
        }
    }
    Ok(Lifecycle::Fresh)
}

/// Split a trailing `_<int>` version suffix off a file stem.
fn split_version_suffix(stem: &str) -> Option<(&str, u32)> {
    let (base, tail) = stem.rsplit_once('_')?;
    let n: u32 = tail.parse().ok()?;
    Some((base, n))
}

fn with_stem(path: &Path, stem: &str) -> PathBuf {
    let mut out = path.to_path_buf();
    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) => out.set_file_name(format!("{stem}.{ext}")),
        None => out.set_file_name(stem),
    }
    out
}

/// Version a cached-artifact path.
///
/// A `Fresh` configuration, or a target that does not exist yet, keeps its
/// name. Otherwise the trailing `_<n>` suffix is parsed (a missing or
/// malformed suffix falls back to 1) and incremented until `exists` reports a
/// free name. The existence predicate is injected so the probing is testable
/// without touching the filesystem.
pub fn version_path<F>(path: &Path, lifecycle: Lifecycle, exists: F) -> PathBuf
where
    F: Fn(&Path) -> bool,
{
    if !lifecycle.is_stale() || !exists(path) {
        return path.to_path_buf();
    }

    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_string();
    let (base, mut n) = match split_version_suffix(&stem) {
        Some((base, n)) => (base.to_string(), n),
        None => (stem, 1),
    };

    let mut candidate = with_stem(path, &format!("{base}_{n}"));
    while exists(&candidate) {
        n += 1;
        candidate = with_stem(path, &format!("{base}_{n}"));
    }
    candidate
}
