//! The Athena instrument: construction, resurrection, and analysis entry
//! points.
//!
//! An instrument is built from a [`ConstructionParams`] set. When a save file
//! is named and exists, the saved state is resurrected and the overlay merged
//! on top; the merge decides once whether the configuration mutated, and a
//! mutated instrument recomputes every derived artifact under versioned file
//! names while voiding state computed under the old parameters.

use crate::config::{self, OperationalParams, Overlay, PhysicalParams};
use crate::coverage::SourceCoverage;
use crate::error::{AthenaError, Result};
use crate::kuiper::{
    ExposureKuiperAccumulator, KuiperRun, PhotonSimulator, TileSchedule, XraySource,
};
use crate::lifecycle::{self, Lifecycle};
use crate::orbit::{resolve_orbit, OrbitPropagator};
use crate::paths::{ProjectRoot, ORBIT_DIR, SAVE_DIR, TESS_DIR};
use crate::persistence::{self, Snapshot};
use crate::tesselation::{compute_tesselation, SkyTesselator};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Construction-time parameter set.
///
/// Recognized overlay keys overwrite the corresponding schema field; unknown
/// keys are stored as opaque extras and flagged once. The three `new_*`
/// directives are reserved for control flow and short-circuit the versioning
/// algorithm for their artifact.
#[derive(Debug, Clone)]
pub struct ConstructionParams {
    /// Save file to resurrect from (created on first save if absent).
    pub save_file: Option<PathBuf>,
    /// Explicit new identity: save under this file, marking the old one as
    /// the mutation origin.
    pub new_save_file: Option<PathBuf>,
    /// Explicit replacement orbit file name.
    pub new_orbit_file: Option<PathBuf>,
    /// Explicit replacement tesselation file name.
    pub new_tesselation_file: Option<PathBuf>,
    /// Whether this process is the designated writer. Cooperating processes
    /// sharing a filesystem leave exactly one writer; all others compute the
    /// same state in memory but never touch disk.
    pub write_permission: bool,
    /// Schema-field overrides.
    pub overlay: Overlay,
}

impl Default for ConstructionParams {
    fn default() -> Self {
        Self {
            save_file: None,
            new_save_file: None,
            new_orbit_file: None,
            new_tesselation_file: None,
            write_permission: true,
            overlay: Overlay::new(),
        }
    }
}

/// Space-based X-ray follow-up instrument.
#[derive(Debug, Clone)]
pub struct Athena {
    pub go_params: OperationalParams,
    pub config: PhysicalParams,
    /// Coverage of a previously tiled source; voided on mutation.
    pub source_coverage: Option<SourceCoverage>,
    /// Previously computed tile schedule; voided on mutation.
    pub tile_struct: Option<TileSchedule>,
    /// Construction keys that matched neither schema.
    pub extras: BTreeMap<String, Value>,
    /// Current snapshot location.
    pub save_file: PathBuf,
    /// Save file this instrument was mutated away from, if any.
    pub mutated_from: Option<PathBuf>,
    /// Instrument response file used by the X-ray counterpart analysis.
    pub arf_file: PathBuf,
    write_permission: bool,
    root: ProjectRoot,
}

/// Resolve one cached-artifact path through the three-branch versioning
/// algorithm: explicit override verbatim, else a sibling derived from the new
/// identity, else suffix probing against the filesystem.
fn resolve_artifact_path(
    current: &Path,
    explicit: Option<&Path>,
    new_identity: Option<&Path>,
    lifecycle: Lifecycle,
    root: &ProjectRoot,
    to_dir: &str,
    ext: &str,
) -> PathBuf {
    if let Some(path) = explicit {
        return path.to_path_buf();
    }
    if lifecycle.is_stale() {
        if let Some(identity) = new_identity {
            return root.sibling_artifact(identity, SAVE_DIR, to_dir, ext);
        }
    }
    lifecycle::version_path(current, lifecycle, |p| p.is_file())
}

impl Athena {
    /// Build (or resurrect) an instrument.
    pub fn new(
        root: ProjectRoot,
        params: ConstructionParams,
        propagator: &dyn OrbitPropagator,
        tesselator: &dyn SkyTesselator,
    ) -> Result<Self> {
        let new_save_file = match &params.new_save_file {
            Some(path) => Some(root.ensure_parent_dir(path)?),
            None => None,
        };
        let prior_save = match &params.save_file {
            Some(path) => Some(root.ensure_parent_dir(path)?),
            None => None,
        };
        let snapshot = match &prior_save {
            Some(path) => persistence::load(path)?,
            None => None,
        };

        let (lifecycle, go_seed, config_seed, mut source_coverage, mut tile_struct, mut extras, prior_mutated_from) =
            match snapshot {
                Some(saved) => {
                    let lc = lifecycle::decide(
                        &saved.go_params,
                        &saved.config,
                        &params.overlay,
                        new_save_file.is_some(),
                    )?;
                    (
                        lc,
                        saved.go_params,
                        saved.config,
                        saved.source_coverage,
                        saved.tile_struct,
                        saved.extras,
                        saved.mutated_from,
                    )
                }
                None => (
                    Lifecycle::Fresh,
                    OperationalParams::default(),
                    PhysicalParams::default(),
                    None,
                    None,
                    BTreeMap::new(),
                    None,
                ),
            };

        let (go_params, mut config, unknown) =
            config::merge(&go_seed, &config_seed, &params.overlay)?;
        if !unknown.is_empty() {
            for key in &unknown {
                if let Some(value) = params.overlay.get(key) {
                    extras.insert(key.clone(), value.clone());
                }
            }
            log::warn!(
                "construction keys {unknown:?} match no schema field; storing as extras \
                 (see OperationalParams/PhysicalParams for the full field list)"
            );
        }

        // Tesselation file: default from the save-file architecture or the
        // telescope name, then version it independently of the other caches.
        let tess_file = match &config.tesselation_file {
            Some(path) => root.reroot(path),
            None => root.default_tesselation_file(prior_save.as_deref(), &go_params.telescope),
        };
        let tess_file = resolve_artifact_path(
            &tess_file,
            params.new_tesselation_file.as_deref(),
            new_save_file.as_deref(),
            lifecycle,
            &root,
            TESS_DIR,
            "tess",
        );
        let tess_file = root.ensure_parent_dir(&tess_file)?;
        config.tesselation_file = Some(tess_file.clone());

        // Orbit file: deterministic name from the element set, versioned the
        // same way but probed separately.
        let orbit_file = match &config.orbit_file {
            Some(path) => root.reroot(path),
            None => {
                log::info!("creating new orbit file name");
                root.orbit_file_name(&config)
            }
        };
        let orbit_file = resolve_artifact_path(
            &orbit_file,
            params.new_orbit_file.as_deref(),
            new_save_file.as_deref(),
            lifecycle,
            &root,
            ORBIT_DIR,
            "dat",
        );
        let orbit_file = root.ensure_parent_dir(&orbit_file)?;
        config.orbit_file = Some(orbit_file.clone());

        let orbit = resolve_orbit(
            &config,
            &orbit_file,
            lifecycle,
            params.write_permission,
            propagator,
        )?;
        config.orbit = Some(orbit);

        // Snapshot identity: the given save file, or one mirroring the
        // tesselation file's architecture. A mutated instrument keeps a
        // reference to where it came from and moves to a versioned name.
        let base_save = match prior_save {
            Some(path) => path,
            None => root.default_save_file(&tess_file),
        };
        let mut mutated_from = prior_mutated_from;
        let save_file = if lifecycle.is_stale() {
            source_coverage = None;
            tile_struct = None;
            mutated_from = Some(base_save.clone());
            let renamed = match new_save_file {
                Some(path) => path,
                None => lifecycle::version_path(&base_save, lifecycle, |p| p.is_file()),
            };
            log::info!(
                "mutated telescope {}; new save file {}",
                base_save.display(),
                renamed.display()
            );
            renamed
        } else {
            base_save
        };
        let save_file = root.ensure_parent_dir(&save_file)?;

        if let Some(coverage) = source_coverage.as_mut() {
            coverage.reconcile(&root, &save_file);
        }

        let arf_file = root.join("xifu_cc_baselineconf_2018_10_10.arf");

        let mut instrument = Self {
            go_params,
            config,
            source_coverage,
            tile_struct,
            extras,
            save_file,
            mutated_from,
            arf_file,
            write_permission: params.write_permission,
            root,
        };
        instrument.compute_tesselation(tesselator)?;
        Ok(instrument)
    }

    /// Derive the tile grid for the current configuration and save the full
    /// state, so downstream recomputation can resurrect it.
    pub fn compute_tesselation(&mut self, tesselator: &dyn SkyTesselator) -> Result<()> {
        compute_tesselation(
            &mut self.go_params,
            &mut self.config,
            tesselator,
            self.write_permission,
        )?;
        self.save()
    }

    /// Persist the instrument state to its save file. A no-op without write
    /// permission.
    pub fn save(&self) -> Result<()> {
        let snapshot = Snapshot {
            go_params: self.go_params.clone(),
            config: self.config.clone(),
            source_coverage: self.source_coverage.clone(),
            tile_struct: self.tile_struct.clone(),
            mutated_from: self.mutated_from.clone(),
            extras: self.extras.clone(),
        };
        persistence::save(&snapshot, &self.save_file, self.write_permission)
    }

    /// Persist under a different save file from now on.
    pub fn save_as(&mut self, path: &Path) -> Result<()> {
        self.save_file = self.root.ensure_parent_dir(path)?;
        self.save()
    }

    /// Whether this process is the designated writer.
    pub fn write_permission(&self) -> bool {
        self.write_permission
    }

    pub fn project_root(&self) -> &ProjectRoot {
        &self.root
    }

    /// Run the Kuiper exposure analysis for one source against the stored
    /// tile schedule.
    ///
    /// Photons are simulated from the source's counting-rate curve starting
    /// at its first sample; the schedule is consumed in merger-time order
    /// with this instrument's tile latency.
    pub fn kuiper_run<R: rand::Rng>(&self, source: &XraySource, rng: &mut R) -> Result<KuiperRun> {
        let schedule = self.tile_struct.as_ref().ok_or_else(|| {
            AthenaError::NoTileStruct("run the tiling pipeline before the Kuiper analysis".into())
        })?;
        let time_to_merger = source
            .time
            .first()
            .copied()
            .ok_or_else(|| AthenaError::InvalidConfig("source has no x-ray samples".into()))?;
        let photons = PhotonSimulator::default().simulate(source, time_to_merger, rng)?;
        let accumulator = ExposureKuiperAccumulator {
            tile_latency: self.config.tile_latency,
            trials_correction: self.go_params.trials_correction,
        };
        Ok(accumulator.run(
            schedule,
            source.beta,
            source.lambda,
            &photons,
            time_to_merger,
        ))
    }
}
