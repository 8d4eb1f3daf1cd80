//! Typed instrument configuration records and the overlay merge.
//!
//! The scheduling knobs (`OperationalParams`) and the physical instrument
//! description (`PhysicalParams`) are kept as two explicit records with
//! serde-backed schemas. Construction-time overrides arrive as an untyped
//! [`Overlay`]; merging is a pure function that returns new records plus the
//! list of keys that matched neither schema.

use crate::error::{AthenaError, Result};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::orbit::OrbitData;

/// Untyped construction-time overrides, keyed by schema field name.
pub type Overlay = BTreeMap<String, Value>;

/// Field-of-view footprint shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FovShape {
    /// Circular footprint; tiles laid out on a spiral.
    Circle,
    /// Square footprint; tiles laid out on a declination-band grid.
    Square,
}

/// Tiling strategy selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TilesType {
    /// Multi-order-coverage tiling of the probability map.
    Moc,
    /// Galaxy-catalog-driven tiling; the tesselation array is a placeholder.
    Galaxy,
    /// Greedy probability-ranked tiling.
    Greedy,
    /// Hierarchical tiling.
    Hierarchical,
}

/// Scheduling-relevant knobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OperationalParams {
    /// Instrument name; used for default artifact file names.
    pub telescope: String,
    /// Tiling strategy.
    pub tiles_type: TilesType,
    /// Collapse the exposure schedule to a single exposure time.
    pub do_single_exposure: bool,
    /// Candidate exposure times in seconds; the first entry wins in
    /// single-exposure mode.
    pub exposure_times: Option<Vec<f64>>,
    /// Observation window boundaries in days. Compared element-wise when
    /// deciding whether a resurrected configuration mutated.
    pub t_obs: Vec<f64>,
    /// Independent-trials correction applied to detection p-values. Provenance
    /// of the historical value is a cadence-derived trials count; kept
    /// configurable pending domain review.
    pub trials_correction: f64,
}

impl Default for OperationalParams {
    fn default() -> Self {
        Self {
            telescope: "Athena".to_string(),
            tiles_type: TilesType::Moc,
            do_single_exposure: false,
            exposure_times: None,
            t_obs: vec![0.0, 1.0],
            trials_correction: 518_400.0,
        }
    }
}

/// Instrument, orbit and tesselation description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PhysicalParams {
    /// Field-of-view shape.
    pub fov_type: FovShape,
    /// Field-of-view radius (circle) or side (square) in degrees.
    pub fov: f64,
    /// Limiting magnitude at the baseline exposure time.
    pub magnitude: f64,
    /// Baseline per-tile exposure time in seconds.
    pub exposure_time: f64,
    /// Dwell time on one tile before the pointing advances, in seconds.
    pub tile_latency: f64,
    /// Mission duration in years.
    pub mission_duration: f64,
    /// Science phase start, GPS seconds.
    pub gps_science_start: f64,
    /// Orbit inclination in degrees.
    pub inclination: f64,
    /// Mean orbital radius in meters.
    pub mean_radius: f64,
    /// Orbit eccentricity.
    pub eccentricity: f64,
    /// Argument of periapsis in degrees.
    pub arg_periapsis: f64,
    /// Longitude of ascending node in degrees.
    pub ascending_node: f64,
    /// Orbital period in days.
    pub period: f64,
    /// Frozen-orbit flag, encoded into the orbit file name.
    pub frozen: bool,
    /// Plain-text tile table; derived from the save file name when unset.
    pub tesselation_file: Option<PathBuf>,
    /// Propagated orbit table; name derived from the element set when unset.
    pub orbit_file: Option<PathBuf>,
    /// N x 3 array of (index, ra, dec) rows. Always recomputed, never
    /// persisted.
    #[serde(skip)]
    pub tesselation: Option<Array2<f64>>,
    /// Propagated orbit samples. Always recomputed, never persisted.
    #[serde(skip)]
    pub orbit: Option<OrbitData>,
}

impl Default for PhysicalParams {
    fn default() -> Self {
        Self {
            fov_type: FovShape::Circle,
            fov: 1.0,
            magnitude: 21.0,
            exposure_time: 10_000.0,
            tile_latency: 10_000.0,
            mission_duration: 2.0,
            gps_science_start: 1_325_030_418.0,
            inclination: 60.0,
            mean_radius: 750.0e6,
            eccentricity: 0.4,
            arg_periapsis: 20.0,
            ascending_node: 10.0,
            period: 90.0,
            frozen: false,
            tesselation_file: None,
            orbit_file: None,
            tesselation: None,
            orbit: None,
        }
    }
}

fn to_map<T: Serialize>(value: &T) -> Result<serde_json::Map<String, Value>> {
    match serde_json::to_value(value)? {
        Value::Object(map) => Ok(map),
        other => Err(AthenaError::InvalidConfig(format!(
            "expected parameter record to serialize to an object, got {other}"
        ))),
    }
}

/// Overlay `overlay` onto the two parameter records.
///
/// Keys matching a schema field in either record overwrite that field; all
/// other keys are returned as unknown so the caller can stash them in the
/// extras side map and warn once. The inputs are untouched.
pub fn merge(
    go: &OperationalParams,
    config: &PhysicalParams,
    overlay: &Overlay,
) -> Result<(OperationalParams, PhysicalParams, Vec<String>)> {
    let mut go_map = to_map(go)?;
    let mut config_map = to_map(config)?;
    let mut unknown = Vec::new();

    for (key, value) in overlay {
        if go_map.contains_key(key) {
            go_map.insert(key.clone(), value.clone());
        } else if config_map.contains_key(key) {
            config_map.insert(key.clone(), value.clone());
        } else {
            unknown.push(key.clone());
        }
    }

    let merged_go: OperationalParams = serde_json::from_value(Value::Object(go_map))
        .map_err(|e| AthenaError::InvalidConfig(format!("bad operational parameter: {e}")))?;
    let mut merged_config: PhysicalParams = serde_json::from_value(Value::Object(config_map))
        .map_err(|e| AthenaError::InvalidConfig(format!("bad physical parameter: {e}")))?;

    // Serde skips the recomputed fields, so carry them across by hand.
    merged_config.tesselation = config.tesselation.clone();
    merged_config.orbit = config.orbit.clone();

    Ok((merged_go, merged_config, unknown))
}

/// Serialized views of the two schemas, for key-membership and value checks.
pub(crate) fn schema_maps(
    go: &OperationalParams,
    config: &PhysicalParams,
) -> Result<(serde_json::Map<String, Value>, serde_json::Map<String, Value>)> {
    Ok((to_map(go)?, to_map(config)?))
}
