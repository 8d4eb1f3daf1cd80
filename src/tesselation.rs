//! Sky tesselation collaborator and the tesselation stage.
//!
//! Tile centers come through the [`SkyTesselator`] seam: circular fields of
//! view are laid out on a golden-angle spiral, square fields on
//! declination-band grid packing. The stage also applies the single-exposure
//! magnitude correction before tiling, mirrors the grid into the instrument's
//! N x 3 tesselation array, and writes the plain-text tile table when allowed.

use crate::config::{FovShape, OperationalParams, PhysicalParams, TilesType};
use crate::error::{AthenaError, Result};
use ndarray::Array2;
use std::f64::consts::{PI, TAU};
use std::io::Write;
use std::path::Path;

/// Tile-center generation seam.
pub trait SkyTesselator {
    /// Spiral layout for circular fields of view. Returns (ra, dec) in degrees.
    fn spiral(&self, config: &PhysicalParams) -> (Vec<f64>, Vec<f64>);
    /// Grid packing for square fields of view. Returns (ra, dec) in degrees.
    fn packing(&self, config: &PhysicalParams) -> (Vec<f64>, Vec<f64>);
}

/// Built-in tesselator: golden-angle spiral and declination-band packing.
#[derive(Debug, Clone, Default)]
pub struct GoldenSpiral;

impl SkyTesselator for GoldenSpiral {
    fn spiral(&self, config: &PhysicalParams) -> (Vec<f64>, Vec<f64>) {
        let fov_rad = config.fov.to_radians();
        // Tile count sized so the circular footprints cover the full sphere.
        let n = ((4.0 * PI) / (PI * fov_rad * fov_rad)).ceil().max(1.0) as usize;
        let golden_angle = PI * (3.0 - 5.0_f64.sqrt());

        let mut ras = Vec::with_capacity(n);
        let mut decs = Vec::with_capacity(n);
        for i in 0..n {
            let z = 1.0 - 2.0 * (i as f64 + 0.5) / n as f64;
            let dec = z.asin().to_degrees();
            let ra = (i as f64 * golden_angle).rem_euclid(TAU).to_degrees();
            ras.push(ra);
            decs.push(dec);
        }
        (ras, decs)
    }

    fn packing(&self, config: &PhysicalParams) -> (Vec<f64>, Vec<f64>) {
        let side = config.fov.max(1e-6);
        let n_bands = (180.0 / side).ceil() as usize;

        let mut ras = Vec::new();
        let mut decs = Vec::new();
        for band in 0..n_bands {
            let dec = -90.0 + (band as f64 + 0.5) * 180.0 / n_bands as f64;
            let circumference = 360.0 * dec.to_radians().cos().abs();
            let n_ra = ((circumference / side).ceil() as usize).max(1);
            for j in 0..n_ra {
                ras.push(j as f64 * 360.0 / n_ra as f64);
                decs.push(dec);
            }
        }
        (ras, decs)
    }
}

/// Write the tile table as `% index ra dec` rows.
pub fn write_tesselation_file(path: &Path, ras: &[f64], decs: &[f64]) -> Result<()> {
    let mut file = std::fs::File::create(path).map_err(|source| AthenaError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    writeln!(file, "% index ra[deg] dec[deg]").map_err(|source| AthenaError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    for (i, (ra, dec)) in ras.iter().zip(decs).enumerate() {
        writeln!(file, "{i} {ra:.6} {dec:.6}").map_err(|source| AthenaError::Io {
            path: path.to_path_buf(),
            source,
        })?;
    }
    Ok(())
}

/// Derive (or refresh) the tile grid for the current configuration.
///
/// In single-exposure mode the requested exposure time replaces the baseline
/// and the limiting magnitude is corrected by the exposure ratio first. The
/// galaxy tiling strategy defers to catalog-driven logic and only leaves a
/// placeholder array.
pub fn compute_tesselation(
    go: &mut OperationalParams,
    config: &mut PhysicalParams,
    tesselator: &dyn SkyTesselator,
    write_permission: bool,
) -> Result<()> {
    if go.do_single_exposure {
        let exposure = go
            .exposure_times
            .as_ref()
            .and_then(|times| times.first().copied())
            .unwrap_or(config.exposure_time);
        let nmag = -2.5 * (config.exposure_time / exposure).sqrt().log10();
        config.magnitude += nmag;
        config.exposure_time = exposure;
    }

    let (ras, decs) = match config.fov_type {
        FovShape::Circle => tesselator.spiral(config),
        FovShape::Square => tesselator.packing(config),
    };
    log::debug!("tesselated sky into {} tiles", ras.len());

    if write_permission {
        if let Some(path) = config.tesselation_file.clone() {
            write_tesselation_file(&path, &ras, &decs)?;
        }
    }

    if go.tiles_type == TilesType::Galaxy {
        // Catalog-driven tiling computes its own grid later; leave a
        // placeholder.
        config.tesselation = Some(Array2::zeros((3, 3)));
    } else {
        let mut rows = Vec::with_capacity(ras.len() * 3);
        for (i, (ra, dec)) in ras.iter().zip(&decs).enumerate() {
            rows.extend_from_slice(&[i as f64, *ra, *dec]);
        }
        let array = Array2::from_shape_vec((ras.len(), 3), rows)
            .map_err(|e| AthenaError::InvalidConfig(format!("tesselation array: {e}")))?;
        config.tesselation = Some(array);
    }
    Ok(())
}
