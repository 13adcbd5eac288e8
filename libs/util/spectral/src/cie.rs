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

//! Analytic fits of the CIE observer curves.
//!
//! The photopic channels use the multi-lobe Gaussian fits of the CIE 1931
//! color matching functions (Wyman, Sloan & Shirley, JCGT 2013). The W
//! channel is a split-Gaussian fit of the CIE 1951 scotopic luminosity
//! function, peaked at 507nm, so a consumer may carry scotopic luminance
//! in the fourth texture component.
use nalgebra::Vector4;

// Piecewise Gaussian with separate falloff on each side of the peak.
fn lobe(lambda: f64, peak: f64, inv_width_lo: f64, inv_width_hi: f64) -> f64 {
    let t = if lambda < peak {
        inv_width_lo
    } else {
        inv_width_hi
    };
    (-0.5 * ((lambda - peak) * t).powi(2)).exp()
}

pub fn x_bar(lambda: f64) -> f64 {
    0.362 * lobe(lambda, 442.0, 0.0624, 0.0374) + 1.056 * lobe(lambda, 599.8, 0.0264, 0.0323)
        - 0.065 * lobe(lambda, 501.1, 0.0490, 0.0382)
}

pub fn y_bar(lambda: f64) -> f64 {
    0.821 * lobe(lambda, 568.8, 0.0213, 0.0247) + 0.286 * lobe(lambda, 530.9, 0.0613, 0.0322)
}

pub fn z_bar(lambda: f64) -> f64 {
    1.217 * lobe(lambda, 437.0, 0.0845, 0.0278) + 0.681 * lobe(lambda, 459.0, 0.0385, 0.0725)
}

/// CIE 1951 scotopic luminosity V'(lambda), unit peak at 507nm.
pub fn scotopic_bar(lambda: f64) -> f64 {
    lobe(lambda, 507.0, 1.0 / 45.4, 1.0 / 35.5)
}

/// One column of the spectral projection matrix: the four observer curves
/// evaluated at a single wavelength (nanometres).
pub fn wavelength_to_xyzw(lambda: f64) -> Vector4<f64> {
    Vector4::new(
        x_bar(lambda),
        y_bar(lambda),
        z_bar(lambda),
        scotopic_bar(lambda),
    )
}
