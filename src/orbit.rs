//! Orbit propagation collaborator.
//!
//! The instrument consumes orbits through the [`OrbitPropagator`] seam; the
//! built-in [`KeplerOrbit`] solves the Kepler equation for the configured
//! element set and samples heliocentric positions over the mission duration.
//! Orbit tables on disk are a cache: a missing or unreadable file means
//! "recompute", never an error.

use crate::config::PhysicalParams;
use crate::error::{AthenaError, Result};
use crate::lifecycle::Lifecycle;
use std::f64::consts::TAU;
use std::io::Write;
use std::path::Path;

/// Sampled orbit positions, heliocentric ecliptic frame, meters.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct OrbitData {
    /// Sample times, seconds from science start.
    pub t: Vec<f64>,
    pub x: Vec<f64>,
    pub y: Vec<f64>,
    pub z: Vec<f64>,
}

impl OrbitData {
    pub fn len(&self) -> usize {
        self.t.len()
    }

    pub fn is_empty(&self) -> bool {
        self.t.is_empty()
    }
}

/// Orbit propagation seam.
pub trait OrbitPropagator {
    fn propagate(&self, config: &PhysicalParams) -> Result<OrbitData>;
}

/// Keplerian two-body propagator.
#[derive(Debug, Clone)]
pub struct KeplerOrbit {
    /// Position samples per orbital period.
    pub samples_per_period: usize,
}

impl Default for KeplerOrbit {
    fn default() -> Self {
        Self {
            samples_per_period: 128,
        }
    }
}

/// Fixed-point solve of the Kepler equation M = E - e sin E.
fn eccentric_anomaly(mean_anomaly: f64, eccentricity: f64) -> f64 {
    let mut e_anom = mean_anomaly;
    for _ in 0..50 {
        let next = mean_anomaly + eccentricity * e_anom.sin();
        if (next - e_anom).abs() < 1e-12 {
            return next;
        }
        e_anom = next;
    }
    e_anom
}

impl OrbitPropagator for KeplerOrbit {
    fn propagate(&self, config: &PhysicalParams) -> Result<OrbitData> {
        if !(0.0..1.0).contains(&config.eccentricity) {
            return Err(AthenaError::Orbit(format!(
                "eccentricity {} outside [0, 1)",
                config.eccentricity
            )));
        }
        if config.period <= 0.0 || config.mission_duration <= 0.0 {
            return Err(AthenaError::Orbit(
                "period and mission duration must be positive".to_string(),
            ));
        }

        let period_s = config.period * 86_400.0;
        let mission_s = config.mission_duration * 364.25 * 86_400.0;
        let n_periods = mission_s / period_s;
        let n_samples = ((n_periods * self.samples_per_period as f64).ceil() as usize).max(2);
        let dt = mission_s / (n_samples - 1) as f64;

        let a = config.mean_radius / (1.0 - config.eccentricity.powi(2)).sqrt();
        let inc = config.inclination.to_radians();
        let arg_peri = config.arg_periapsis.to_radians();
        let node = config.ascending_node.to_radians();
        let (sin_i, cos_i) = inc.sin_cos();
        let (sin_n, cos_n) = node.sin_cos();

        let mut data = OrbitData::default();
        for i in 0..n_samples {
            let t = i as f64 * dt;
            let mean_anomaly = TAU * t / period_s;
            let e_anom = eccentric_anomaly(mean_anomaly, config.eccentricity);
            let r = a * (1.0 - config.eccentricity * e_anom.cos());
            let true_anomaly = 2.0
                * ((1.0 + config.eccentricity).sqrt() * (e_anom / 2.0).sin())
                    .atan2((1.0 - config.eccentricity).sqrt() * (e_anom / 2.0).cos());

            // Perifocal position rotated through argument of periapsis,
            // inclination, and ascending node.
            let u = arg_peri + true_anomaly;
            let (sin_u, cos_u) = u.sin_cos();
            data.t.push(t);
            data.x.push(r * (cos_n * cos_u - sin_n * sin_u * cos_i));
            data.y.push(r * (sin_n * cos_u + cos_n * sin_u * cos_i));
            data.z.push(r * (sin_u * sin_i));
        }
        Ok(data)
    }
}

/// Parse an orbit table written by [`write_orbit_file`]. Any malformed content
/// yields `None` so the caller recomputes.
pub fn load_orbit_file(path: &Path) -> Option<OrbitData> {
    let text = std::fs::read_to_string(path).ok()?;
    let mut data = OrbitData::default();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('%') {
            continue;
        }
        let mut fields = line.split_whitespace().map(str::parse::<f64>);
        let (t, x, y, z) = (
            fields.next()?.ok()?,
            fields.next()?.ok()?,
            fields.next()?.ok()?,
            fields.next()?.ok()?,
        );
        data.t.push(t);
        data.x.push(x);
        data.y.push(y);
        data.z.push(z);
    }
    (!data.is_empty()).then_some(data)
}

/// Write an orbit table as a whitespace-separated `t x y z` listing.
pub fn write_orbit_file(data: &OrbitData, path: &Path) -> Result<()> {
    let mut file = std::fs::File::create(path).map_err(|source| AthenaError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    writeln!(file, "% t[s] x[m] y[m] z[m]").map_err(|source| AthenaError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    for i in 0..data.len() {
        writeln!(
            file,
            "{:.6e} {:.6e} {:.6e} {:.6e}",
            data.t[i], data.x[i], data.y[i], data.z[i]
        )
        .map_err(|source| AthenaError::Io {
            path: path.to_path_buf(),
            source,
        })?;
    }
    Ok(())
}

/// Load the cached orbit table when the configuration is fresh, otherwise
/// propagate; write the result back only when this process holds write
/// permission and the cache was stale or absent.
pub fn resolve_orbit(
    config: &PhysicalParams,
    path: &Path,
    lifecycle: Lifecycle,
    write_permission: bool,
    propagator: &dyn OrbitPropagator,
) -> Result<OrbitData> {
    if !lifecycle.is_stale() && path.is_file() {
        if let Some(data) = load_orbit_file(path) {
            log::debug!("loaded orbit table from {}", path.display());
            return Ok(data);
        }
        log::warn!("orbit table {} unreadable; recomputing", path.display());
    }

    let data = propagator.propagate(config)?;
    if write_permission {
        write_orbit_file(&data, path)?;
        log::info!("wrote orbit table to {}", path.display());
    }
    Ok(data)
}
