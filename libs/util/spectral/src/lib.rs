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

//! Spectral quadrature and projection to luminance.
//!
//! The pipeline processes the spectrum four wavelengths at a time. When the
//! accumulated scattering is to be stored as luminance, each wavelength
//! set's radiance is mapped to CIE (X,Y,Z,W) by a per-set 4x4 matrix:
//! luminous efficacy times the observer curves sampled at the set's
//! wavelengths times the trapezoidal quadrature weights of those
//! wavelengths within the full spectrum.
mod cie;

pub use crate::cie::{scotopic_bar, wavelength_to_xyzw, x_bar, y_bar, z_bar};

use nalgebra::{Matrix4, Vector4};

/// Maximum luminous efficacy, lm/W. The photopic constant fills the XYZ
/// slots; the fourth slot uses the scotopic constant so the W channel can
/// carry scotopic luminance.
/// Ref: Rapport BIPM-2019/05, Principles Governing Photometry, 2nd ed.
pub const MAX_LUMINOUS_EFFICACY: [f64; 4] = [683.002, 683.002, 683.002, 1700.13];

/// Trapezoid-rule weights for the four wavelengths of set `set_index` out
/// of `set_count` sets covering the spectrum: the first and last wavelength
/// of the whole spectrum get weight 1/2, all interior wavelengths weight 1.
pub fn trapezoid_weights(set_index: usize, set_count: usize) -> Vector4<f64> {
    assert!(set_count > 0, "empty wavelength schedule");
    assert!(
        set_index < set_count,
        "wavelength set {} out of range ({} sets)",
        set_index,
        set_count
    );
    if set_count == 1 {
        Vector4::new(0.5, 1.0, 1.0, 0.5)
    } else if set_index == 0 {
        Vector4::new(0.5, 1.0, 1.0, 1.0)
    } else if set_index + 1 == set_count {
        Vector4::new(1.0, 1.0, 1.0, 0.5)
    } else {
        Vector4::new(1.0, 1.0, 1.0, 1.0)
    }
}

/// Wavelength step of the uniform 4N-point grid spanning the spectrum.
pub fn delta_lambda(lambda_first: f64, lambda_last: f64, set_count: usize) -> f64 {
    assert!(set_count > 0, "empty wavelength schedule");
    (lambda_last - lambda_first).abs() / (4 * set_count - 1) as f64
}

/// The per-set radiance-to-luminance matrix: efficacy * CIE(lambdas) *
/// diag(weights * delta_lambda). Multiplying a set's 4-vector of spectral
/// radiance by this matrix yields that set's contribution to (X,Y,Z,W);
/// summing over all sets completes the quadrature.
pub fn radiance_to_luminance(
    lambdas: [f64; 4],
    set_index: usize,
    set_count: usize,
    lambda_first: f64,
    lambda_last: f64,
) -> Matrix4<f64> {
    let weights = trapezoid_weights(set_index, set_count);
    let dlambda = delta_lambda(lambda_first, lambda_last, set_count);
    let quadrature = Matrix4::from_diagonal(&(weights * dlambda));
    let observer = Matrix4::from_columns(&[
        wavelength_to_xyzw(lambdas[0]),
        wavelength_to_xyzw(lambdas[1]),
        wavelength_to_xyzw(lambdas[2]),
        wavelength_to_xyzw(lambdas[3]),
    ]);
    let efficacy = Matrix4::from_diagonal(&Vector4::from_column_slice(&MAX_LUMINOUS_EFFICACY));
    efficacy * observer * quadrature
}

/// Repack a matrix as column-major `[[f32; 4]; 4]` for a GPU uniform, as
/// GLSL mat4 constructors consume columns.
pub fn to_gpu_columns(m: &Matrix4<f64>) -> [[f32; 4]; 4] {
    let mut out = [[0f32; 4]; 4];
    for (c, col) in m.column_iter().enumerate() {
        for r in 0..4 {
            out[c][r] = col[r] as f32;
        }
    }
    out
}

/// The identity repacked for the GPU; used by the accumulate pass when the
/// output stays in radiance.
pub fn identity_gpu_columns() -> [[f32; 4]; 4] {
    to_gpu_columns(&Matrix4::identity())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn single_set_weights_degenerate_to_plain_trapezoid() {
        assert_eq!(
            trapezoid_weights(0, 1),
            Vector4::new(0.5, 1.0, 1.0, 0.5)
        );
    }

    #[test]
    fn multi_set_weights_halve_only_spectrum_endpoints() {
        assert_eq!(trapezoid_weights(0, 3), Vector4::new(0.5, 1.0, 1.0, 1.0));
        assert_eq!(trapezoid_weights(1, 3), Vector4::new(1.0, 1.0, 1.0, 1.0));
        assert_eq!(trapezoid_weights(2, 3), Vector4::new(1.0, 1.0, 1.0, 0.5));
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn weights_reject_out_of_range_set() {
        trapezoid_weights(3, 3);
    }

    #[test]
    fn delta_lambda_spans_grid() {
        // 8 wavelengths from 400 to 750: step is 50.
        assert_relative_eq!(delta_lambda(400.0, 750.0, 2), 50.0);
        assert_relative_eq!(delta_lambda(750.0, 400.0, 2), 50.0);
    }

    #[test]
    fn luminance_matrix_matches_manual_quadrature() {
        let sets = [[400.0, 450.0, 500.0, 550.0], [600.0, 650.0, 700.0, 750.0]];
        let radiance = [[1.0, 2.0, 3.0, 4.0], [0.5, 0.25, 2.0, 1.0]];

        let mut projected = Vector4::zeros();
        for (k, lambdas) in sets.iter().enumerate() {
            let m = radiance_to_luminance(*lambdas, k, sets.len(), 400.0, 750.0);
            projected += m * Vector4::from_column_slice(&radiance[k]);
        }

        // Direct sum over all eight wavelengths of the flattened grid.
        let dlambda = delta_lambda(400.0, 750.0, sets.len());
        let mut y = 0f64;
        for (k, lambdas) in sets.iter().enumerate() {
            let w = trapezoid_weights(k, sets.len());
            for i in 0..4 {
                y += 683.002 * y_bar(lambdas[i]) * radiance[k][i] * w[i] * dlambda;
            }
        }
        assert_relative_eq!(projected.y, y, max_relative = 1e-12);
    }

    #[test]
    fn gpu_columns_are_column_major() {
        let m = Matrix4::new(
            1.0, 2.0, 3.0, 4.0, //
            5.0, 6.0, 7.0, 8.0, //
            9.0, 10.0, 11.0, 12.0, //
            13.0, 14.0, 15.0, 16.0,
        );
        let cols = to_gpu_columns(&m);
        assert_eq!(cols[0], [1.0, 5.0, 9.0, 13.0]);
        assert_eq!(cols[3], [4.0, 8.0, 12.0, 16.0]);
    }
}
