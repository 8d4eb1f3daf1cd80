//! Project-root path bookkeeping.
//!
//! All cached artifacts live in fixed directories under one project root:
//! saved instrument snapshots, tesselation tables, orbit tables, and the
//! source-side files referenced by a coverage record. Snapshots copied between
//! machines carry absolute paths from the other machine, so loading re-roots
//! any path that mentions the root's directory name.

use crate::config::PhysicalParams;
use crate::error::{AthenaError, Result};
use std::path::{Component, Path, PathBuf};
use time::OffsetDateTime;

/// Directory for instrument snapshots.
pub const SAVE_DIR: &str = "saved_telescopes";
/// Directory for tesselation tables.
pub const TESS_DIR: &str = "tess_files";
/// Directory for propagated orbit tables.
pub const ORBIT_DIR: &str = "orbit_files";
/// Directories probed when a coverage record's file references have gone
/// missing after a copy from another filesystem layout.
pub const PARAM_DIR: &str = "inference_param_files";
pub const DATA_DIR: &str = "inference_data";
pub const SOURCE_SAVE_DIR: &str = "saved_sources";

/// Root directory under which every cached artifact is filed.
#[derive(Debug, Clone)]
pub struct ProjectRoot {
    root: PathBuf,
}

impl ProjectRoot {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    pub fn join(&self, rel: impl AsRef<Path>) -> PathBuf {
        self.root.join(rel)
    }

    fn marker(&self) -> Option<&str> {
        self.root.file_name().and_then(|n| n.to_str())
    }

    /// Tail components of `path` after the root marker directory, if present.
    fn tail_after_marker(&self, path: &Path) -> Option<PathBuf> {
        let marker = self.marker()?;
        let mut components = path.components();
        for component in components.by_ref() {
            if matches!(component, Component::Normal(c) if c == marker) {
                let tail: PathBuf = components.collect();
                if tail.as_os_str().is_empty() {
                    return None;
                }
                return Some(tail);
            }
        }
        None
    }

    /// Rebase a path from another machine under the current root.
    ///
    /// Paths that do not mention the root's directory name are returned as-is.
    pub fn reroot(&self, path: &Path) -> PathBuf {
        match self.tail_after_marker(path) {
            Some(tail) => self.root.join(tail),
            None => path.to_path_buf(),
        }
    }

    /// Create the parent directory for `path`, falling back once to the
    /// project-root-relative location derived from the same suffix.
    ///
    /// Returns the path whose parent now exists; a second failure is fatal.
    pub fn ensure_parent_dir(&self, path: &Path) -> Result<PathBuf> {
        if let Some(parent) = path.parent() {
            if parent.as_os_str().is_empty() || std::fs::create_dir_all(parent).is_ok() {
                return Ok(path.to_path_buf());
            }
        }

        let fallback = match self.tail_after_marker(path) {
            Some(tail) => self.root.join(tail),
            None => self.root.join(path.file_name().unwrap_or_default()),
        };
        log::warn!(
            "could not create directory for {}; falling back to {}",
            path.display(),
            fallback.display()
        );
        if let Some(parent) = fallback.parent() {
            std::fs::create_dir_all(parent).map_err(|source| AthenaError::DirectoryCreation {
                path: fallback.clone(),
                source,
            })?;
        }
        Ok(fallback)
    }

    /// Components of `path` that follow the directory named `dir`, or just the
    /// file name when `dir` never appears.
    fn tail_after_dir(path: &Path, dir: &str) -> PathBuf {
        let mut components = path.components();
        for component in components.by_ref() {
            if matches!(component, Component::Normal(c) if c == dir) {
                let tail: PathBuf = components.collect();
                if !tail.as_os_str().is_empty() {
                    return tail;
                }
                break;
            }
        }
        PathBuf::from(path.file_name().unwrap_or_default())
    }

    /// Sibling artifact path: keep the subdirectory architecture `reference`
    /// has under `from_dir`, but file it under `to_dir` with extension `ext`.
    pub fn sibling_artifact(
        &self,
        reference: &Path,
        from_dir: &str,
        to_dir: &str,
        ext: &str,
    ) -> PathBuf {
        let mut out = self.root.join(to_dir);
        out.push(Self::tail_after_dir(reference, from_dir));
        out.set_extension(ext);
        out
    }

    /// Default tesselation table location: mirror the save file's architecture
    /// when one exists, else name it after the telescope.
    pub fn default_tesselation_file(&self, save_file: Option<&Path>, telescope: &str) -> PathBuf {
        match save_file {
            Some(save) => self.sibling_artifact(save, SAVE_DIR, TESS_DIR, "tess"),
            None => self.root.join(TESS_DIR).join(format!("{telescope}.tess")),
        }
    }

    /// Default snapshot location mirroring a tesselation file's architecture.
    pub fn default_save_file(&self, tesselation_file: &Path) -> PathBuf {
        self.sibling_artifact(tesselation_file, TESS_DIR, SAVE_DIR, "dat")
    }

    /// Deterministic orbit table name encoding the full element set.
    pub fn orbit_file_name(&self, config: &PhysicalParams) -> PathBuf {
        let (y, m, d) = gps_to_ymd(config.gps_science_start);
        let days = (config.mission_duration * 364.25).floor() as i64;
        let name = format!(
            "athena_{y:04}{m:02}{d:02}_{days}d_inc{}_R{}Mkm_ecc{}_argperi{}_ascnode{}_phi0{}_P{}_frozen{}.dat",
            config.inclination.floor() as i64,
            (config.mean_radius / 1.0e6).floor() as i64,
            (config.eccentricity / 0.1).floor() as i64,
            config.arg_periapsis.floor() as i64,
            config.ascending_node.floor() as i64,
            config.arg_periapsis.floor() as i64,
            config.period.floor() as i64,
            config.frozen,
        );
        self.root.join(ORBIT_DIR).join(name)
    }

    /// Probe for a coverage file reference that went missing in a copy: look
    /// for its file name under `probe_dir`, inside the same subdirectory
    /// architecture as the instrument's save file.
    pub fn recover_coverage_ref(
        &self,
        missing: &Path,
        instrument_save: &Path,
        probe_dir: &str,
    ) -> Option<PathBuf> {
        let arch = Self::tail_after_dir(instrument_save, SAVE_DIR);
        let mut candidate = self.root.join(probe_dir);
        if let Some(subdirs) = arch.parent() {
            candidate.push(subdirs);
        }
        candidate.push(missing.file_name()?);
        candidate.is_file().then_some(candidate)
    }
}

/// Civil date for a GPS timestamp. Leap seconds are ignored; the date only
/// feeds a file name, so a timestamp outside the representable range falls
/// back to the Unix epoch rather than failing the construction.
pub fn gps_to_ymd(gps: f64) -> (i64, u32, u32) {
    const GPS_UNIX_OFFSET: i64 = 315_964_800;
    let unix = gps as i64 + GPS_UNIX_OFFSET;
    let date = OffsetDateTime::from_unix_timestamp(unix)
        .unwrap_or(OffsetDateTime::UNIX_EPOCH)
        .date();
    (
        date.year() as i64,
        u8::from(date.month()) as u32,
        date.day() as u32,
    )
}
