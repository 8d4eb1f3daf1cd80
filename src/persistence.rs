//! Versioned instrument snapshots.
//!
//! The full instrument state round-trips through one JSON file per
//! instrument, minus the two fields that are always recomputed at
//! construction (the propagated orbit and the tesselation array, both
//! serde-skipped on their records). Older snapshots missing newly introduced
//! schema keys deserialize cleanly; the gaps back-fill from current defaults.

use crate::config::{OperationalParams, PhysicalParams};
use crate::coverage::SourceCoverage;
use crate::error::{AthenaError, Result};
use crate::kuiper::TileSchedule;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// On-disk instrument state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Snapshot {
    #[serde(rename = "telescope_go_params")]
    pub go_params: OperationalParams,
    #[serde(rename = "telescope_config_struct")]
    pub config: PhysicalParams,
    #[serde(rename = "telescope_source_coverage")]
    pub source_coverage: Option<SourceCoverage>,
    #[serde(rename = "telescope_tile_struct")]
    pub tile_struct: Option<TileSchedule>,
    /// Save file this instrument was mutated away from, if any.
    #[serde(rename = "MutatedFromTelescopeFile")]
    pub mutated_from: Option<PathBuf>,
    /// Construction keys that matched neither schema, kept verbatim.
    pub extras: BTreeMap<String, Value>,
}

/// Load a snapshot; a missing or unreadable file means "recompute" and comes
/// back as `None`.
pub fn load(path: &Path) -> Result<Option<Snapshot>> {
    if !path.is_file() {
        return Ok(None);
    }
    let text = std::fs::read_to_string(path).map_err(|source| AthenaError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    match serde_json::from_str(&text) {
        Ok(snapshot) => Ok(Some(snapshot)),
        Err(e) => {
            log::warn!("snapshot {} unreadable ({e}); recomputing", path.display());
            Ok(None)
        }
    }
}

/// Write a snapshot, overwriting any previous file by the same name.
///
/// Suppressed entirely when this process lacks write permission; the caller's
/// in-memory state stays valid but never reaches disk.
pub fn save(snapshot: &Snapshot, path: &Path, write_permission: bool) -> Result<()> {
    if !write_permission {
        log::debug!("skipping snapshot write to {} (no permission)", path.display());
        return Ok(());
    }
    let text = serde_json::to_string_pretty(snapshot)?;
    std::fs::write(path, text).map_err(|source| AthenaError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    log::info!("saved telescope state to {}", path.display());
    Ok(())
}
