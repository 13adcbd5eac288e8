// This file is part of Skylight.
//
// Skylight is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// Skylight is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with Skylight.  If not, see <http://www.gnu.org/licenses/>.
use crate::species::{Absorber, Scatterer};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use thiserror::Error;

/// Malformed or contradictory atmosphere description. Raised before any
/// GPU work begins; always fatal.
#[derive(Debug, Error)]
#[error("invalid atmosphere description: {0}")]
pub struct ConfigInvalid(pub String);

fn invalid<T>(message: impl Into<String>) -> Result<T, ConfigInvalid> {
    Err(ConfigInvalid(message.into()))
}

fn default_ground_albedo() -> f64 {
    0.04
}

fn default_angular_integration_points() -> u32 {
    64
}

/// Everything the precompute pipeline needs to know about the planet and
/// its atmosphere. Distances in metres, angles in radians, wavelengths in
/// nanometres.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AtmosphereDescription {
    pub earth_radius_m: f64,
    pub atmosphere_height_m: f64,
    pub sun_angular_radius_rad: f64,

    pub scatterers: Vec<Scatterer>,
    #[serde(default)]
    pub absorbers: Vec<Absorber>,

    /// Ordered groups of four wavelengths, each processed as one GPU pass.
    pub wavelength_sets: Vec<[f64; 4]>,
    /// Solar irradiance at the top of the atmosphere, one 4-vector per
    /// wavelength set, W/m^2/nm.
    pub solar_irradiance_at_toa: Vec<[f64; 4]>,
    /// Spectral ground albedo, one 4-vector per wavelength set. Defaults
    /// to 0.04 everywhere when omitted.
    #[serde(default)]
    pub ground_albedo: Vec<[f64; 4]>,

    pub scattering_orders_to_compute: u32,

    /// 4-D scattering table dimensions: cosSunZenith x dotViewSun x
    /// cosViewZenith x altitude. Stored as a 3-D texture of
    /// (nu * mu_s, mu, altitude).
    pub scattering_texture_size: [u32; 4],
    pub transmittance_texture_size: [u32; 2],
    pub irradiance_texture_size: [u32; 2],

    pub radial_integration_points: u32,
    pub transmittance_integration_points: u32,
    #[serde(default = "default_angular_integration_points")]
    pub angular_integration_points: u32,

    /// Keep the final scattering table as per-set spectral radiance
    /// instead of projecting to CIE XYZW luminance.
    #[serde(default)]
    pub save_result_as_radiance: bool,
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

impl AtmosphereDescription {
    pub fn wavelength_set_count(&self) -> usize {
        self.wavelength_sets.len()
    }

    /// First wavelength of the whole spectrum.
    pub fn lambda_first(&self) -> f64 {
        self.wavelength_sets[0][0]
    }

    /// Last wavelength of the whole spectrum.
    pub fn lambda_last(&self) -> f64 {
        self.wavelength_sets[self.wavelength_sets.len() - 1][3]
    }

    /// Ground albedo for one set, honoring the 0.04 default.
    pub fn ground_albedo_for_set(&self, set_index: usize) -> [f64; 4] {
        self.ground_albedo
            .get(set_index)
            .copied()
            .unwrap_or([default_ground_albedo(); 4])
    }

    /// Width of the packed 3-D scattering texture: nu * mu_s.
    pub fn scattering_texture_width(&self) -> u32 {
        self.scattering_texture_size[0] * self.scattering_texture_size[1]
    }

    pub fn scattering_texture_height(&self) -> u32 {
        self.scattering_texture_size[2]
    }

    pub fn scattering_texture_depth(&self) -> u32 {
        self.scattering_texture_size[3]
    }

    pub fn validate(&self) -> Result<(), ConfigInvalid> {
        if self.earth_radius_m <= 0.0 || !self.earth_radius_m.is_finite() {
            return invalid("earth_radius_m must be positive and finite");
        }
        if self.atmosphere_height_m <= 0.0 || !self.atmosphere_height_m.is_finite() {
            return invalid("atmosphere_height_m must be positive and finite");
        }
        if self.sun_angular_radius_rad <= 0.0 || !self.sun_angular_radius_rad.is_finite() {
            return invalid("sun_angular_radius_rad must be positive and finite");
        }

        if self.scatterers.is_empty() {
            return invalid("at least one scatterer is required");
        }
        let mut seen = HashSet::new();
        for name in self
            .scatterers
            .iter()
            .map(|s| &s.name)
            .chain(self.absorbers.iter().map(|a| &a.name))
        {
            if !is_identifier(name) {
                return invalid(format!(
                    "species name {:?} is not a valid identifier",
                    name
                ));
            }
            if !seen.insert(name.clone()) {
                return invalid(format!("species name {:?} is not unique", name));
            }
        }

        if self.wavelength_sets.is_empty() {
            return invalid("at least one wavelength set is required");
        }
        for (k, set) in self.wavelength_sets.iter().enumerate() {
            for &lambda in set {
                if lambda <= 0.0 || !lambda.is_finite() {
                    return invalid(format!(
                        "wavelength set {} contains a non-positive wavelength",
                        k
                    ));
                }
            }
            // Strictly increasing within a set; duplicates are only
            // allowed across set boundaries.
            if !(set[0] < set[1] && set[1] < set[2] && set[2] < set[3]) {
                return invalid(format!("wavelength set {} is not strictly increasing", k));
            }
            if k > 0 && self.wavelength_sets[k - 1][3] > set[0] {
                return invalid(format!(
                    "wavelength sets {} and {} are out of order",
                    k - 1,
                    k
                ));
            }
        }

        if self.solar_irradiance_at_toa.len() != self.wavelength_sets.len() {
            return invalid("solar_irradiance_at_toa needs one entry per wavelength set");
        }
        if !self.ground_albedo.is_empty() && self.ground_albedo.len() != self.wavelength_sets.len()
        {
            return invalid("ground_albedo needs one entry per wavelength set when given");
        }

        if self.scattering_orders_to_compute < 2 {
            return invalid("scattering_orders_to_compute must be at least 2");
        }

        for (name, dims) in [
            ("transmittance_texture_size", &self.transmittance_texture_size[..]),
            ("irradiance_texture_size", &self.irradiance_texture_size[..]),
            ("scattering_texture_size", &self.scattering_texture_size[..]),
        ] {
            if dims.iter().any(|&d| d == 0) {
                return invalid(format!("{} has a zero dimension", name));
            }
        }

        for (name, points) in [
            ("radial_integration_points", self.radial_integration_points),
            (
                "transmittance_integration_points",
                self.transmittance_integration_points,
            ),
            ("angular_integration_points", self.angular_integration_points),
        ] {
            if points < 2 {
                return invalid(format!("{} must be at least 2 for the trapezoid rule", name));
            }
        }

        Ok(())
    }
}
