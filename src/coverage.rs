//! Source-coverage record carried inside instrument snapshots.

use crate::paths::{ProjectRoot, DATA_DIR, PARAM_DIR, SOURCE_SAVE_DIR};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Result of a prior tiling computation against one source.
///
/// References three files owned by the source-side pipeline plus the derived
/// tiling scalars. Voided whenever the instrument configuration mutates, since
/// coverage computed under old parameters is meaningless under new ones.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceCoverage {
    /// Inference parameter file for the covered source.
    #[serde(rename = "source JsonFile")]
    pub json_file: Option<PathBuf>,
    /// Posterior data file for the covered source.
    #[serde(rename = "source H5File")]
    pub data_file: Option<PathBuf>,
    /// Save file of the covered source object.
    #[serde(rename = "source save file")]
    pub save_file: Option<PathBuf>,
    /// Tile ids that exposed the source.
    pub tile_ids: Vec<u32>,
    /// Exposure time spent on each of those tiles, seconds.
    pub exposure_times: Vec<f64>,
}

impl SourceCoverage {
    /// Reconcile the three file references after loading a snapshot.
    ///
    /// Each reference is first rebased under the current project root; if it
    /// still points at nothing on disk, the sibling location implied by the
    /// instrument save file's subdirectory architecture is probed. A reference
    /// that cannot be recovered is kept as-is; downstream consumers treat a
    /// missing file as "recompute".
    pub fn reconcile(&mut self, root: &ProjectRoot, instrument_save: &Path) {
        for (slot, probe_dir) in [
            (&mut self.json_file, PARAM_DIR),
            (&mut self.data_file, DATA_DIR),
            (&mut self.save_file, SOURCE_SAVE_DIR),
        ] {
            let Some(path) = slot.as_ref() else { continue };
            let rerooted = root.reroot(path);
            if rerooted.is_file() {
                *slot = Some(rerooted);
                continue;
            }
            if let Some(found) = root.recover_coverage_ref(&rerooted, instrument_save, probe_dir) {
                log::debug!(
                    "recovered coverage reference {} at {}",
                    path.display(),
                    found.display()
                );
                *slot = Some(found);
            } else {
                *slot = Some(rerooted);
            }
        }
    }
}
