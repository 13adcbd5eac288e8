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
use serde::{Deserialize, Serialize};

/// Spectral cross-section of a species, sampled at the four wavelengths of
/// a set at kernel-generation time and baked into the source as literals.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CrossSection {
    /// sigma(lambda) = sigma0 * (lambda0 / lambda)^alpha. Rayleigh is
    /// alpha = 4; Mie aerosols use their Angstrom exponent.
    PowerLaw {
        wavelength_nm: f64,
        cross_section_m2: f64,
        angstrom_exponent: f64,
    },
    /// Tabulated values with piecewise-linear interpolation, clamped at
    /// the table ends.
    Spectrum {
        wavelengths_nm: Vec<f64>,
        cross_sections_m2: Vec<f64>,
    },
}

// Evaluate the wavelength-based table at the given wavelength,
// interpolating between adjacent table values.
fn interpolate_at_lambda(wavelengths: &[f64], properties: &[f64], wavelength: f64) -> f64 {
    assert_eq!(properties.len(), wavelengths.len());
    if wavelength < wavelengths[0] {
        return properties[0];
    }
    for (wl, props) in wavelengths.windows(2).zip(properties.windows(2)) {
        if wavelength < wl[1] {
            let f = (wavelength - wl[0]) / (wl[1] - wl[0]);
            return props[0] * (1.0 - f) + props[1] * f;
        }
    }
    *properties.last().expect("non empty list")
}

impl CrossSection {
    pub fn at(&self, lambda_nm: f64) -> f64 {
        match self {
            Self::PowerLaw {
                wavelength_nm,
                cross_section_m2,
                angstrom_exponent,
            } => cross_section_m2 * (wavelength_nm / lambda_nm).powf(*angstrom_exponent),
            Self::Spectrum {
                wavelengths_nm,
                cross_sections_m2,
            } => interpolate_at_lambda(wavelengths_nm, cross_sections_m2, lambda_nm),
        }
    }

    /// Sample at the four wavelengths of one set.
    pub fn sample(&self, lambdas: [f64; 4]) -> [f64; 4] {
        [
            self.at(lambdas[0]),
            self.at(lambdas[1]),
            self.at(lambdas[2]),
            self.at(lambdas[3]),
        ]
    }
}

/// A scattering species. `number_density` and `phase_function` are GPU
/// expressions: the density is the body of a function of `altitude`
/// (metres, must `return` a value in m^-3), the phase function the body of
/// a function of `dotViewSun` returning a vec4 normalized to 1/(4 pi).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Scatterer {
    pub name: String,
    pub number_density: String,
    pub cross_section: CrossSection,
    pub phase_function: String,
}

/// An absorbing species: affects transmittance only, so it carries no
/// phase function.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Absorber {
    pub name: String,
    pub number_density: String,
    pub cross_section: CrossSection,
}
