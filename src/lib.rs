//! ATHENA - Space-based X-ray telescope model for gravitational-wave
//! follow-up tiling.
//!
//! Models a configurable X-ray instrument whose state (orbital parameters,
//! field-of-view tesselation, observed source coverage) persists across runs
//! of a follow-up pipeline. Resurrecting an instrument from its save file
//! merges saved state with new parameters and decides once whether the
//! configuration mutated; mutation invalidates every cached derived artifact
//! and moves the caches to versioned file names. A separate analysis pass
//! accumulates photon phases tile by tile and scores them with running
//! Kuiper statistics against a phase-uniform background.

pub mod config;
pub mod coverage;
pub mod error;
pub mod instrument;
pub mod kuiper;
pub mod lifecycle;
pub mod orbit;
pub mod paths;
pub mod persistence;
pub mod tesselation;

// Re-export the types most callers need.
pub use crate::config::{FovShape, OperationalParams, Overlay, PhysicalParams, TilesType};
pub use crate::coverage::SourceCoverage;
pub use crate::error::{AthenaError, Result};
pub use crate::instrument::{Athena, ConstructionParams};
pub use crate::kuiper::{
    ExposureKuiperAccumulator, KuiperRun, PhotonSimulator, PhotonStream, TileFootprint,
    TileRecord, TileSchedule, XraySource,
};
pub use crate::lifecycle::Lifecycle;
pub use crate::orbit::{KeplerOrbit, OrbitData, OrbitPropagator};
pub use crate::paths::ProjectRoot;
pub use crate::persistence::Snapshot;
pub use crate::tesselation::{GoldenSpiral, SkyTesselator};
